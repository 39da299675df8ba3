//! Renderer settings
//!
//! Read once at startup from the JSON graphics config. Keys match the config
//! files the editor writes (`EnableMipmap`, `MSAAMaxSamples`, ...); missing keys
//! fall back to defaults.

use crate::error::{RenderError, RenderResult};
use crate::backend::DepthBias;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Feature flags and tuning values consumed by the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RenderSettings {
    /// Generate full mip chains for uploaded textures
    pub enable_mipmap: bool,
    /// Render scene depth before the color pass
    #[serde(rename = "EnableZPrePass")]
    pub enable_z_prepass: bool,
    /// Render a shadow map per shadow-casting light
    pub enable_shadow_map: bool,
    /// Use the G-buffer + lighting subpass path instead of forward shading
    pub enable_deferred: bool,
    /// Emit debug info into compiled shaders
    pub shader_debug_info: bool,
    /// Width and height of each shadow map
    pub shadow_map_resolution: u32,
    /// Upper bound on color samples; clamped to what the device supports
    #[serde(rename = "MSAAMaxSamples")]
    pub msaa_max_samples: u32,
    /// Depth of the frames-in-flight ring
    pub max_frames_in_flight: u32,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
    pub depth_bias_clamp: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enable_mipmap: true,
            enable_z_prepass: false,
            enable_shadow_map: true,
            enable_deferred: false,
            shader_debug_info: false,
            shadow_map_resolution: 2048,
            msaa_max_samples: 4,
            max_frames_in_flight: crate::DEFAULT_MAX_FRAMES_IN_FLIGHT as u32,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
            depth_bias_clamp: 0.0,
        }
    }
}

impl RenderSettings {
    /// Parse settings from a JSON string and validate them
    pub fn from_json(json: &str) -> RenderResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()
    }

    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::info!("Loaded graphics config from {}", path.as_ref().display());
        Self::from_json(&content)
    }

    /// Save settings as pretty JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> RenderResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject unusable values and clamp MSAA into 1..=64
    pub fn validate(mut self) -> RenderResult<Self> {
        if self.max_frames_in_flight == 0 {
            return Err(RenderError::Config(
                "MaxFramesInFlight must be at least 1".into(),
            ));
        }
        if self.shadow_map_resolution == 0 {
            return Err(RenderError::Config(
                "ShadowMapResolution must be non-zero".into(),
            ));
        }
        self.msaa_max_samples = self.msaa_max_samples.clamp(1, 64);
        Ok(self)
    }

    /// Ring depth as an index bound
    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight as usize
    }

    /// Whether a depth-fenced submission precedes the shadow passes each frame
    pub fn uses_depth_fence(&self) -> bool {
        self.enable_z_prepass || self.enable_shadow_map
    }

    /// Bias applied while rendering shadow maps
    pub fn depth_bias(&self) -> DepthBias {
        DepthBias {
            constant: self.depth_bias_constant,
            clamp: self.depth_bias_clamp,
            slope: self.depth_bias_slope,
        }
    }

    /// Largest power of two not above both the configured and device limits
    pub fn msaa_samples(&self, device_max: u32) -> u32 {
        if self.enable_deferred {
            return 1;
        }
        let limit = self.msaa_max_samples.min(device_max).max(1);
        1 << (31 - limit.leading_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_uses_config_keys() {
        let json = r#"
        {
            "EnableMipmap": false,
            "EnableZPrePass": true,
            "EnableShadowMap": true,
            "EnableDeferred": false,
            "MSAAMaxSamples": 8,
            "DepthBiasSlope": 2.5
        }
        "#;

        let settings = RenderSettings::from_json(json).unwrap();
        assert!(!settings.enable_mipmap);
        assert!(settings.enable_z_prepass);
        assert_eq!(settings.msaa_max_samples, 8);
        assert_eq!(settings.depth_bias_slope, 2.5);
        // Untouched keys keep their defaults
        assert_eq!(settings.shadow_map_resolution, 2048);
        assert_eq!(settings.max_frames_in_flight, 2);
    }

    #[test]
    fn test_validate_rejects_empty_ring() {
        let err = RenderSettings::from_json(r#"{ "MaxFramesInFlight": 0 }"#).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn test_validate_clamps_msaa() {
        let settings = RenderSettings::from_json(r#"{ "MSAAMaxSamples": 0 }"#).unwrap();
        assert_eq!(settings.msaa_max_samples, 1);
        let settings = RenderSettings::from_json(r#"{ "MSAAMaxSamples": 500 }"#).unwrap();
        assert_eq!(settings.msaa_max_samples, 64);
    }

    #[test]
    fn test_msaa_samples_power_of_two() {
        let mut settings = RenderSettings {
            msaa_max_samples: 6,
            ..Default::default()
        };
        assert_eq!(settings.msaa_samples(8), 4);
        assert_eq!(settings.msaa_samples(2), 2);
        settings.enable_deferred = true;
        assert_eq!(settings.msaa_samples(8), 1);
    }

    #[test]
    fn test_depth_fence_gating() {
        let mut settings = RenderSettings {
            enable_z_prepass: false,
            enable_shadow_map: false,
            ..Default::default()
        };
        assert!(!settings.uses_depth_fence());
        settings.enable_shadow_map = true;
        assert!(settings.uses_depth_fence());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("vkengine-settings-{}.json", std::process::id()));
        let settings = RenderSettings {
            enable_deferred: true,
            shadow_map_resolution: 1024,
            ..Default::default()
        };
        settings.to_file(&path).unwrap();
        let loaded = RenderSettings::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, settings);
    }
}
