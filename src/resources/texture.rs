//! Raw texture payloads and their GPU counterparts

use crate::backend::traits::*;
use crate::backend::types::*;
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

/// Role a texture plays in a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureKind {
    BaseColor,
    Roughness,
    Metallic,
    Normal,
    AmbientOcclusion,
}

impl TextureKind {
    pub const COUNT: usize = 5;

    pub const ALL: [TextureKind; Self::COUNT] = [
        TextureKind::BaseColor,
        TextureKind::Roughness,
        TextureKind::Metallic,
        TextureKind::Normal,
        TextureKind::AmbientOcclusion,
    ];

    /// Binding slot within the mesh descriptor set's texture range
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Pixel used when a mesh has no texture of this kind
    pub fn default_pixel(&self) -> [u8; 4] {
        match self {
            TextureKind::Normal => [128, 128, 255, 255],
            TextureKind::Metallic => [0, 0, 0, 255],
            _ => [255, 255, 255, 255],
        }
    }
}

/// Raw pixel buffer handed over by the asset loader
#[derive(Debug, Clone)]
pub struct TextureData {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Interleaved channels per pixel, 1 to 4
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn new(kind: TextureKind, width: u32, height: u32, channels: u32, pixels: Vec<u8>) -> Self {
        Self {
            kind,
            width,
            height,
            channels,
            pixels,
        }
    }

    /// Single-pixel texture
    pub fn solid(kind: TextureKind, color: [u8; 4]) -> Self {
        Self::new(kind, 1, 1, 4, color.to_vec())
    }

    /// Expand to tightly packed RGBA8, or `None` if the buffer does not match
    /// the declared size
    pub fn to_rgba8(&self) -> Option<Vec<u8>> {
        let (w, h) = (self.width, self.height);
        let pixels = self.pixels.clone();
        let image = match self.channels {
            1 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, pixels)?),
            2 => DynamicImage::ImageLumaA8(GrayAlphaImage::from_raw(w, h, pixels)?),
            3 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, pixels)?),
            4 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, pixels)?),
            _ => return None,
        };
        Some(image.to_rgba8().into_raw())
    }
}

/// Number of mip levels for a full chain down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Uploaded texture with its sampler
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub kind: TextureKind,
    pub image: ImageHandle,
    pub sampler: SamplerHandle,
    pub mip_levels: u32,
}

impl GpuTexture {
    /// Create, upload and (optionally) mip-map a texture
    pub fn create<D: RenderDevice>(
        device: &mut D,
        label: &str,
        data: &TextureData,
        mipmaps: bool,
    ) -> BackendResult<Self> {
        let rgba = data.to_rgba8().ok_or_else(|| {
            BackendError::ImageCreationFailed(format!(
                "{}: {}x{}x{} does not match {} pixel bytes",
                label,
                data.width,
                data.height,
                data.channels,
                data.pixels.len()
            ))
        })?;

        let mip_levels = if mipmaps {
            mip_level_count(data.width, data.height)
        } else {
            1
        };

        let image = device.create_image(&ImageDescriptor::texture(
            format!("{} {:?}", label, data.kind),
            data.width,
            data.height,
            mip_levels,
        ))?;
        if let Err(e) = device.upload_image(image, &rgba) {
            device.destroy_image(image);
            return Err(e);
        }
        let sampler = match device.create_sampler(&SamplerDescriptor::material(mip_levels)) {
            Ok(sampler) => sampler,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };

        Ok(Self {
            kind: data.kind,
            image,
            sampler,
            mip_levels,
        })
    }

    pub fn destroy<D: RenderDevice>(self, device: &mut D) {
        device.destroy_sampler(self.sampler);
        device.destroy_image(self.image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, ResourceKind};

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(300, 17), 9);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_rgb_expands_to_rgba() {
        let data = TextureData::new(TextureKind::BaseColor, 2, 1, 3, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(data.to_rgba8().unwrap(), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_gray_expands_to_rgba() {
        let data = TextureData::new(TextureKind::Roughness, 1, 1, 1, vec![9]);
        assert_eq!(data.to_rgba8().unwrap(), vec![9, 9, 9, 255]);
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let data = TextureData::new(TextureKind::Normal, 4, 4, 4, vec![0; 10]);
        assert!(data.to_rgba8().is_none());

        let mut device = DummyDevice::new();
        assert!(GpuTexture::create(&mut device, "bad", &data, false).is_err());
        assert_eq!(device.live_count(ResourceKind::Image), 0);
    }

    #[test]
    fn test_create_and_destroy() {
        let mut device = DummyDevice::new();
        let data = TextureData::new(TextureKind::BaseColor, 64, 32, 4, vec![0; 64 * 32 * 4]);
        let texture = GpuTexture::create(&mut device, "crate", &data, true).unwrap();
        assert_eq!(texture.mip_levels, 7);
        texture.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::Image), 0);
        assert_eq!(device.live_count(ResourceKind::Sampler), 0);
    }
}
