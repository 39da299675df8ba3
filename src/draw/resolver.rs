//! Shader fallback resolution
//!
//! Given a material's shader variants `[v0, v1, .., vn]`, most preferred first:
//! 1. an existing batch for `v0` is always taken;
//! 2. otherwise the lowest index `found` in `1..=n` with an existing batch is
//!    recorded, and new pipelines are built trying variants from `v0` on; the
//!    first that compiles is `created`;
//! 3. the existing batch wins when `found <= created`, the new one otherwise;
//!    on a tie (`found == created`, the variant at `found` would compile) the
//!    existing batch is reused, where a strict `found < created` would build a
//!    second batch for the same variant;
//! 4. with neither, there is no valid fallback.
//!
//! Variants at or past `found` are never compiled, since an existing batch
//! would win against them anyway.

use super::{BatchId, BatchPipelines, DrawRegistry};
use crate::backend::RenderDevice;
use crate::error::{RenderError, RenderResult};

/// Outcome of resolving a variant list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Joined a batch that already existed for `variants[index]`
    Existing { batch: BatchId, index: usize },
    /// Built a new batch from `variants[index]`
    Created { batch: BatchId, index: usize },
}

impl Resolution {
    pub fn batch(&self) -> BatchId {
        match *self {
            Resolution::Existing { batch, .. } | Resolution::Created { batch, .. } => batch,
        }
    }

    /// Fallback index of the chosen variant
    pub fn index(&self) -> usize {
        match *self {
            Resolution::Existing { index, .. } | Resolution::Created { index, .. } => index,
        }
    }
}

/// Pick or build the draw batch for a material's variant list
pub fn resolve<D: RenderDevice>(
    device: &mut D,
    registry: &mut DrawRegistry,
    material: &str,
    variants: &[String],
    deferred: bool,
) -> RenderResult<Resolution> {
    let no_fallback = || RenderError::NoValidShader {
        material: material.to_string(),
        variants: variants.to_vec(),
    };

    let Some(preferred) = variants.first() else {
        return Err(no_fallback());
    };
    if let Some(batch) = registry.find(preferred) {
        return Ok(Resolution::Existing { batch, index: 0 });
    }

    let found = variants
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(index, variant)| registry.find(variant).map(|batch| (index, batch)));
    let limit = found.map_or(variants.len(), |(index, _)| index);

    let mut created = None;
    for (index, variant) in variants.iter().enumerate().take(limit) {
        match BatchPipelines::build(device, variant, deferred) {
            Ok(pipelines) => {
                created = Some((index, pipelines));
                break;
            }
            Err(e) => {
                log::warn!("Material '{}': shader variant '{}' unusable: {}", material, variant, e);
            }
        }
    }

    match (found, created) {
        (_, Some((index, pipelines))) => {
            let batch = match registry.insert(&variants[index], pipelines) {
                Ok(batch) => batch,
                Err((e, pipelines)) => {
                    pipelines.destroy(device);
                    log::error!("Material '{}': {}", material, e);
                    return Err(e);
                }
            };
            if index > 0 {
                log::warn!(
                    "Material '{}' falls back to shader variant '{}' (index {})",
                    material,
                    variants[index],
                    index
                );
            }
            Ok(Resolution::Created { batch, index })
        }
        (Some((index, batch)), None) => {
            log::warn!(
                "Material '{}' reuses existing batch for shader variant '{}' (index {})",
                material,
                variants[index],
                index
            );
            Ok(Resolution::Existing { batch, index })
        }
        (None, None) => {
            let e = no_fallback();
            log::error!("{}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, ResourceKind};
    use crate::MAX_PIPELINE_NUM;

    fn variants(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn seed(device: &mut DummyDevice, registry: &mut DrawRegistry, variant: &str) -> BatchId {
        let pipelines = BatchPipelines::build(device, variant, false).unwrap();
        registry.insert(variant, pipelines).ok().unwrap()
    }

    #[test]
    fn test_preferred_batch_is_taken_without_compiling() {
        let mut device = DummyDevice::new();
        let mut registry = DrawRegistry::new();
        let pbr = seed(&mut device, &mut registry, "pbr");
        let attempts = device.shader_attempts().len();

        let resolution = resolve(&mut device, &mut registry, "m", &variants(&["pbr", "unlit"]), false).unwrap();
        assert_eq!(resolution, Resolution::Existing { batch: pbr, index: 0 });
        assert_eq!(device.shader_attempts().len(), attempts);
    }

    #[test]
    fn test_new_preferred_batch_beats_existing_fallback() {
        let mut device = DummyDevice::new();
        let mut registry = DrawRegistry::new();
        let fallback = seed(&mut device, &mut registry, "pbr_fallback");

        let resolution = resolve(
            &mut device,
            &mut registry,
            "m",
            &variants(&["pbr", "pbr_fallback"]),
            false,
        )
        .unwrap();
        assert!(matches!(resolution, Resolution::Created { index: 0, .. }));
        assert_ne!(resolution.batch(), fallback);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(fallback).unwrap().variant(), "pbr_fallback");
    }

    #[test]
    fn test_existing_fallback_wins_when_nothing_earlier_compiles() {
        let mut device = DummyDevice::new().with_shaders(&["unlit", "flat"]);
        let mut registry = DrawRegistry::new();
        let flat = seed(&mut device, &mut registry, "flat");

        let resolution = resolve(
            &mut device,
            &mut registry,
            "m",
            &variants(&["pbr", "flat", "unlit"]),
            false,
        )
        .unwrap();
        assert_eq!(resolution, Resolution::Existing { batch: flat, index: 1 });
        // "unlit" sits past the existing batch and is never compiled
        assert_eq!(device.shader_attempts().last().map(String::as_str), Some("pbr"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tie_reuses_existing_batch() {
        let mut device = DummyDevice::new().with_shaders(&["flat"]);
        let mut registry = DrawRegistry::new();
        let flat = seed(&mut device, &mut registry, "flat");
        let pipelines = device.live_count(ResourceKind::Pipeline);

        let resolution = resolve(&mut device, &mut registry, "m", &variants(&["pbr", "flat"]), false).unwrap();
        assert_eq!(resolution, Resolution::Existing { batch: flat, index: 1 });
        let flat_attempts = device.shader_attempts().iter().filter(|v| *v == "flat").count();
        assert_eq!(flat_attempts, 1);
        assert_eq!(device.live_count(ResourceKind::Pipeline), pipelines);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_compiles_first_working_variant() {
        let mut device = DummyDevice::new().with_shaders(&["unlit"]);
        let mut registry = DrawRegistry::new();

        let resolution = resolve(&mut device, &mut registry, "m", &variants(&["pbr", "unlit"]), false).unwrap();
        assert!(matches!(resolution, Resolution::Created { index: 1, .. }));
        assert_eq!(device.shader_attempts(), ["pbr", "unlit"]);
        assert!(registry.find("unlit").is_some());
        assert!(registry.find("pbr").is_none());
    }

    #[test]
    fn test_no_valid_fallback() {
        let mut device = DummyDevice::new().with_shaders(&[]);
        let mut registry = DrawRegistry::new();

        let err = resolve(&mut device, &mut registry, "rock", &variants(&["pbr", "unlit"]), false).unwrap_err();
        assert!(matches!(err, RenderError::NoValidShader { ref material, .. } if material == "rock"));
        assert!(registry.is_empty());
        assert_eq!(device.live_count(ResourceKind::Pipeline), 0);

        let err = resolve(&mut device, &mut registry, "empty", &[], false).unwrap_err();
        assert!(matches!(err, RenderError::NoValidShader { .. }));
    }

    #[test]
    fn test_slot_exhaustion_is_reported() {
        let mut device = DummyDevice::new();
        let mut registry = DrawRegistry::new();
        for i in 0..MAX_PIPELINE_NUM {
            let resolution = resolve(&mut device, &mut registry, "m", &variants(&[&format!("v{}", i)]), false);
            assert!(resolution.is_ok());
        }
        let pipelines_before = device.live_count(ResourceKind::Pipeline);

        let err = resolve(&mut device, &mut registry, "m", &variants(&["one_too_many"]), false).unwrap_err();
        assert!(matches!(err, RenderError::PipelineSlotsExhausted { .. }));
        assert_eq!(registry.len(), MAX_PIPELINE_NUM);
        assert_eq!(device.live_count(ResourceKind::Pipeline), pipelines_before);

        // Reuse still works when full
        let resolution = resolve(&mut device, &mut registry, "m", &variants(&["v3"]), false).unwrap();
        assert!(matches!(resolution, Resolution::Existing { index: 0, .. }));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        // The chosen index is min(found, created) with ties going to reuse
        let cases: &[(&[&str], &[&str], &[&str], usize, bool)] = &[
            // (compilable, existing batches, variant list, chosen index, reused)
            (&["a", "b", "c"], &["c"], &["a", "b", "c"], 0, false),
            (&["b", "c"], &["c"], &["a", "b", "c"], 1, false),
            (&["c"], &["b"], &["a", "b", "c"], 1, true),
            (&[], &["c"], &["a", "b", "c"], 2, true),
            (&["a"], &["a"], &["a", "b"], 0, true),
        ];
        for &(compilable, existing, list, index, reused) in cases {
            for _ in 0..2 {
                let mut device = DummyDevice::new();
                let mut registry = DrawRegistry::new();
                for &variant in existing {
                    seed(&mut device, &mut registry, variant);
                }
                device.set_compilable(compilable);
                let resolution = resolve(&mut device, &mut registry, "m", &variants(list), false).unwrap();
                assert_eq!(resolution.index(), index, "{:?} with {:?}", list, existing);
                assert_eq!(matches!(resolution, Resolution::Existing { .. }), reused);
            }
        }
    }
}
