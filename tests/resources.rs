//! Resource lifetime tests.
//!
//! Meshes go through the upload queue, the shader fallback resolver and the
//! shared uniform pool. These tests check which batch each mesh lands in, that
//! shared buffers are reference counted, and that everything a removed mesh
//! owned is released once the frames in flight have retired.
//!
//! ```bash
//! cargo test --test resources
//! ```

mod common;

use std::sync::Arc;

use glam::Vec3;
use rstest::rstest;

use common::{minimal_settings, TestContext};
use vkengine::backend::dummy::{DummyDevice, ResourceKind};
use vkengine::backend::{bindings, LightingGroupUniform};
use vkengine::{FrameStatus, MeshData, RenderError, RenderSettings, MAX_PIPELINE_NUM};

fn batch_variants(ctx: &TestContext) -> Vec<String> {
    ctx.renderer
        .registry()
        .iter()
        .map(|batch| batch.variant().to_string())
        .collect()
}

// ============================================================================
// Upload queue
// ============================================================================

#[test]
fn test_one_upload_per_frame_in_fifo_order() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("a", &["pbr"]);
    ctx.material("b", &["unlit"]);
    ctx.add_cube("first", "a");
    ctx.add_cube("second", "b");

    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 1);
    assert_eq!(batch_variants(&ctx), vec!["pbr"]);

    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 2);
    assert_eq!(batch_variants(&ctx), vec!["pbr", "unlit"]);
    assert!(!ctx.uploads.has_pending());
}

#[test]
fn test_mesh_waits_for_its_material() {
    let mut ctx = TestContext::new(minimal_settings());
    let material = ctx.scene.add_material("late", &[]);
    ctx.add_cube("cube", "late");

    ctx.frame();
    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 0);
    assert!(ctx.uploads.has_pending());

    material.set_shaders(["pbr"]);
    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 1);
    assert!(!ctx.uploads.has_pending());
    ctx.assert_no_violations();
}

#[test]
fn test_mesh_waits_for_a_camera() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("stone", &["pbr"]);
    let mesh = MeshData::cube("cube", 1.0, "stone").with_camera("overhead");
    let mesh = Arc::new(mesh);
    ctx.uploads.enqueue(&mesh);

    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 0);

    ctx.scene.add_camera("overhead", Vec3::new(0.0, 20.0, 0.1), Vec3::ZERO);
    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 1);
    let batch = ctx.renderer.registry().iter().next().expect("batch");
    assert_eq!(batch.meshes[0].camera().name(), "overhead");
}

#[test]
fn test_mesh_dropped_before_upload_is_skipped() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("stone", &["pbr"]);
    let mesh = Arc::new(MeshData::cube("cube", 1.0, "stone"));
    ctx.uploads.enqueue(&mesh);
    drop(mesh);

    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 0);
    assert_eq!(ctx.renderer.batch_count(), 0);
    assert!(!ctx.uploads.has_pending());
}

#[test]
fn test_same_payload_is_uploaded_once() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("stone", &["pbr"]);
    let mesh = ctx.add_cube("cube", "stone");
    ctx.uploads.enqueue(&mesh);

    ctx.flush_uploads();
    assert_eq!(ctx.renderer.mesh_count(), 1);
}

// ============================================================================
// Shader fallback
// ============================================================================

#[test]
fn test_falls_back_to_first_compiling_variant() {
    let device = DummyDevice::new().with_shaders(&["unlit"]);
    let mut ctx = TestContext::with_device(device, minimal_settings());
    ctx.material("stone", &["pbr", "unlit"]);
    ctx.add_cube("cube", "stone");

    ctx.frame();

    assert_eq!(batch_variants(&ctx), vec!["unlit"]);
    let attempts = ctx.device().shader_attempts();
    assert_eq!(attempts.first().map(String::as_str), Some("pbr"));
    assert!(attempts.iter().any(|a| a == "unlit"));
    ctx.assert_no_violations();
}

#[test]
fn test_existing_fallback_batch_is_shared() {
    let device = DummyDevice::new().with_shaders(&["unlit"]);
    let mut ctx = TestContext::with_device(device, minimal_settings());
    ctx.material("plain", &["unlit"]);
    ctx.material("fancy", &["toon", "unlit"]);
    ctx.add_cube("plain cube", "plain");
    ctx.add_cube("fancy cube", "fancy");

    ctx.flush_uploads();

    assert_eq!(ctx.renderer.batch_count(), 1);
    assert_eq!(ctx.renderer.mesh_count(), 2);
    // Only the variant ahead of the existing batch is tried
    let attempts = ctx.device().shader_attempts();
    assert_eq!(attempts.iter().filter(|a| *a == "toon").count(), 1);
    assert_eq!(attempts.iter().filter(|a| *a == "unlit").count(), 1);
    ctx.assert_no_violations();
}

#[test]
fn test_preferred_variant_gets_its_own_batch() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("plain", &["unlit"]);
    ctx.material("stone", &["pbr", "unlit"]);
    ctx.add_cube("plain cube", "plain");
    ctx.add_cube("stone cube", "stone");

    ctx.flush_uploads();

    assert_eq!(batch_variants(&ctx), vec!["unlit", "pbr"]);
}

#[test]
fn test_material_without_valid_shader_fails_one_frame() {
    let device = DummyDevice::new().with_shaders(&["unlit"]);
    let mut ctx = TestContext::with_device(device, minimal_settings());
    ctx.material("broken", &["missing", "also missing"]);
    ctx.add_cube("cube", "broken");

    let lights = ctx.scene.lights_by_id();
    let err = ctx.renderer.draw_frame(&lights).unwrap_err();
    assert!(matches!(err, RenderError::NoValidShader { ref material, .. } if material == "broken"));
    assert!(err.is_fatal_config());
    assert!(!ctx.uploads.has_pending());
    assert_eq!(ctx.renderer.batch_count(), 0);

    // The renderer stays usable
    ctx.frame();
    assert_eq!(ctx.renderer.frame_number(), 1);
    ctx.assert_no_violations();
}

#[test]
fn test_pipeline_slots_run_out() {
    let mut ctx = TestContext::new(minimal_settings());
    for i in 0..=MAX_PIPELINE_NUM {
        let name = format!("m{}", i);
        let variant = format!("v{}", i);
        ctx.material(&name, &[variant.as_str()]);
        ctx.add_cube(&format!("cube {}", i), &name);
    }
    for _ in 0..MAX_PIPELINE_NUM {
        ctx.frame();
    }
    assert_eq!(ctx.renderer.batch_count(), MAX_PIPELINE_NUM);
    let pipelines = ctx.device().live_count(ResourceKind::Pipeline);

    let lights = ctx.scene.lights_by_id();
    let err = ctx.renderer.draw_frame(&lights).unwrap_err();
    assert!(matches!(err, RenderError::PipelineSlotsExhausted { max } if max == MAX_PIPELINE_NUM));
    // The rejected pipelines were handed back
    assert_eq!(ctx.device().live_count(ResourceKind::Pipeline), pipelines);
    assert_eq!(ctx.renderer.batch_count(), MAX_PIPELINE_NUM);
    ctx.assert_no_violations();
}

// ============================================================================
// Shared uniforms and retirement
// ============================================================================

#[test]
fn test_shared_uniforms_are_refcounted() {
    let mut ctx = TestContext::new(minimal_settings());
    let material = ctx.scene.add_material("stone", &["pbr"]);
    let camera = ctx.scene.main_camera().expect("camera");
    let first = ctx.add_cube("first", "stone");
    ctx.add_cube("second", "stone");
    ctx.flush_uploads();

    let buffers = ctx.renderer.buffers();
    assert_eq!(buffers.materials.refcount(material.id()), 2);
    assert_eq!(buffers.cameras.refcount(camera.id()), 2);
    let shared = buffers.materials.buffers(material.id()).expect("material buffers").to_vec();
    assert_eq!(shared.len(), ctx.renderer.settings().frames_in_flight());

    first.mark_dead();
    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 1);
    assert_eq!(ctx.renderer.retired_count(), 1);
    // Still referenced until the ring has moved past the mesh
    assert_eq!(ctx.renderer.buffers().materials.refcount(material.id()), 2);

    for _ in 0..ctx.renderer.settings().frames_in_flight() {
        ctx.frame();
    }
    assert_eq!(ctx.renderer.retired_count(), 0);
    assert_eq!(ctx.renderer.buffers().materials.refcount(material.id()), 1);
    assert!(shared.iter().all(|b| ctx.device().is_buffer_live(*b)));
    ctx.assert_no_violations();
}

#[rstest]
#[case::forward(false)]
#[case::deferred(true)]
fn test_removed_model_frees_batch_and_buffers(#[case] deferred: bool) {
    let mut ctx = TestContext::new(RenderSettings {
        enable_deferred: deferred,
        ..minimal_settings()
    });
    let material = ctx.scene.add_material("stone", &["pbr"]);
    let mesh = Arc::new(MeshData::cube("cube", 1.0, "stone"));
    let model = ctx.scene.add_model("model", vec![Arc::clone(&mesh)]);
    ctx.uploads.enqueue(&mesh);
    ctx.frame();

    assert_eq!(ctx.renderer.batch_count(), 1);
    assert!(ctx
        .renderer
        .registry()
        .iter()
        .all(|b| b.lighting.len() == usize::from(deferred)));
    let camera = ctx.scene.main_camera().expect("camera");
    let expected_camera_refs = if deferred { 2 } else { 1 };
    assert_eq!(ctx.renderer.buffers().cameras.refcount(camera.id()), expected_camera_refs);
    let pipelines = ctx.device().live_count(ResourceKind::Pipeline);
    assert!(pipelines > 0);

    ctx.scene.remove_model(model.id());
    ctx.frame();
    // Mesh, its lighting draw and then its empty batch leave the registry at once
    assert_eq!(ctx.renderer.mesh_count(), 0);
    assert_eq!(ctx.renderer.batch_count(), 0);
    assert_eq!(ctx.renderer.retired_count(), if deferred { 3 } else { 2 });
    assert_eq!(ctx.device().live_count(ResourceKind::Pipeline), pipelines);

    for _ in 0..ctx.renderer.settings().frames_in_flight() {
        ctx.frame();
    }
    assert_eq!(ctx.renderer.retired_count(), 0);
    assert_eq!(ctx.device().live_count(ResourceKind::Pipeline), 0);
    assert!(ctx.renderer.buffers().is_empty());
    assert_eq!(ctx.renderer.buffers().materials.refcount(material.id()), 0);
    ctx.assert_no_violations();
}

#[test]
fn test_deferred_lighting_follows_each_light_channel() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_deferred: true,
        ..minimal_settings()
    });
    ctx.material("stone", &["pbr"]);
    ctx.material("glass", &["unlit"]);
    let default = ctx.scene.resolve_light_channel(None).expect("default channel");
    let second = ctx.scene.add_light_channel("second");
    ctx.add_cube("a", "stone");
    let b = Arc::new(MeshData::cube("b", 1.0, "stone").with_light_channel("second"));
    let model_b = ctx.scene.add_model("b", vec![Arc::clone(&b)]);
    ctx.uploads.enqueue(&b);
    ctx.add_cube("c", "glass");
    ctx.flush_uploads();
    assert_eq!(ctx.renderer.batch_count(), 2);

    // One lighting draw per (batch, light channel), each with its own group id
    let registry = ctx.renderer.registry();
    let pbr = registry.iter().find(|batch| batch.variant() == "pbr").expect("pbr batch");
    let channels: Vec<u64> = pbr.lighting.keys().map(|key| key.light_channel).collect();
    let mut expected = vec![default.id(), second.id()];
    expected.sort_unstable();
    assert_eq!(channels, expected);
    let mut groups: Vec<u32> = registry
        .iter()
        .flat_map(|batch| batch.lighting.values().map(|lighting| lighting.group()))
        .collect();
    groups.sort_unstable();
    groups.dedup();
    assert_eq!(groups.len(), 3);
    assert!(!groups.contains(&0));
    for batch in registry.iter() {
        for mesh in &batch.meshes {
            let lighting = &batch.lighting[&mesh.lighting_key()];
            assert_eq!(mesh.lighting_group(), lighting.group());
        }
    }

    let buffers = ctx.renderer.buffers();
    assert_eq!(buffers.light_channels.refcount(second.id()), 2);
    assert_eq!(buffers.light_channels.refcount(default.id()), 4);

    let f = ctx.renderer.current_frame();
    ctx.frame();
    let submits = ctx.device().submits();
    let color = submits.last().expect("color submit");
    assert_eq!(color.draws, 3 + 3);

    // The second channel's draw reads that channel and carries its own id
    let registry = ctx.renderer.registry();
    let pbr = registry.iter().find(|batch| batch.variant() == "pbr").expect("pbr batch");
    let lighting = pbr
        .lighting
        .values()
        .find(|lighting| lighting.key().light_channel == second.id())
        .expect("second channel lighting");
    let set = lighting.set(f).expect("lighting set");
    assert_eq!(
        ctx.device().bound_buffer(set, bindings::LIGHTING_LIGHT_CHANNEL),
        ctx.renderer.buffers().light_channels.buffer(second.id(), f)
    );
    let group_buffer = ctx
        .device()
        .bound_buffer(set, bindings::LIGHTING_GROUP)
        .expect("group buffer");
    let block = LightingGroupUniform {
        group: lighting.group(),
        _padding: [0; 3],
    };
    assert_eq!(ctx.device().buffer_contents(group_buffer), Some(bytemuck::bytes_of(&block)));

    // Last mesh on the second channel gone: its lighting draw retires with it
    ctx.scene.remove_model(model_b.id());
    ctx.frame();
    let pbr = ctx
        .renderer
        .registry()
        .iter()
        .find(|batch| batch.variant() == "pbr")
        .map(|batch| batch.lighting.len());
    assert_eq!(pbr, Some(1));
    for _ in 0..ctx.renderer.settings().frames_in_flight() {
        ctx.frame();
    }
    assert!(!ctx.renderer.buffers().light_channels.contains(second.id()));
    assert_eq!(ctx.device().submits().last().expect("color submit").draws, 2 + 2);
    ctx.assert_no_violations();
}

#[test]
fn test_empty_payload_is_skipped() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("stone", &["pbr"]);
    let empty = Arc::new(MeshData::new("empty", vec![], vec![], "stone"));
    ctx.uploads.enqueue(&empty);
    ctx.add_cube("cube", "stone");

    assert_eq!(ctx.frame(), FrameStatus::Presented);
    assert_eq!(ctx.renderer.batch_count(), 0);
    assert_eq!(ctx.renderer.mesh_count(), 0);
    ctx.frame();
    assert_eq!(ctx.renderer.mesh_count(), 1);
    ctx.assert_no_violations();
}

#[test]
fn test_freed_slot_is_reused() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("a", &["pbr"]);
    ctx.material("b", &["unlit"]);
    let first = ctx.add_cube("first", "a");
    ctx.add_cube("second", "b");
    ctx.flush_uploads();
    let slots: Vec<usize> = ctx.renderer.registry().iter().map(|b| b.slot()).collect();
    assert_eq!(slots, vec![0, 1]);

    first.mark_dead();
    ctx.frame();
    ctx.material("c", &["toon"]);
    ctx.add_cube("third", "c");
    ctx.frame();

    let toon = ctx
        .renderer
        .registry()
        .iter()
        .find(|b| b.variant() == "toon")
        .map(|b| b.slot());
    assert_eq!(toon, Some(0));
    ctx.assert_no_violations();
}

#[test]
fn test_uniform_changes_reach_the_frame_buffer() {
    let mut ctx = TestContext::new(minimal_settings());
    let material = ctx.scene.add_material("stone", &["pbr"]);
    let camera = ctx.scene.main_camera().expect("camera");
    ctx.add_cube("cube", "stone");
    ctx.flush_uploads();
    assert_eq!(ctx.renderer.settings().frames_in_flight(), 2);

    let material_bytes = |ctx: &TestContext, frame: usize| {
        let buffer = ctx.renderer.buffers().materials.buffer(material.id(), frame).expect("material buffer");
        ctx.device().buffer_contents(buffer).expect("contents").to_vec()
    };
    let camera_bytes = |ctx: &TestContext, frame: usize| {
        let buffer = ctx.renderer.buffers().cameras.buffer(camera.id(), frame).expect("camera buffer");
        ctx.device().buffer_contents(buffer).expect("contents").to_vec()
    };
    let old_material = bytemuck::bytes_of(&material.uniform_data()).to_vec();
    let old_camera = bytemuck::bytes_of(&camera.uniform_data()).to_vec();
    let refreshed = 1 - ctx.renderer.current_frame();
    assert_eq!(material_bytes(&ctx, refreshed), old_material);
    assert_eq!(camera_bytes(&ctx, refreshed), old_camera);

    material.set_params(vkengine::MaterialParams {
        color: glam::Vec4::new(0.1, 0.2, 0.3, 1.0),
        roughness: 0.3,
        metallic: 0.7,
    });
    camera.set_position(Vec3::new(4.0, 2.0, -3.0));
    let new_material = bytemuck::bytes_of(&material.uniform_data()).to_vec();
    let new_camera = bytemuck::bytes_of(&camera.uniform_data()).to_vec();
    assert_ne!(new_material, old_material);
    assert_ne!(new_camera, old_camera);

    // Only the slot being recorded is rewritten; the other may still be in flight
    let f = ctx.renderer.current_frame();
    ctx.frame();
    assert_eq!(material_bytes(&ctx, f), new_material);
    assert_eq!(camera_bytes(&ctx, f), new_camera);
    assert_eq!(material_bytes(&ctx, 1 - f), old_material);
    assert_eq!(camera_bytes(&ctx, 1 - f), old_camera);

    ctx.frame();
    assert_eq!(material_bytes(&ctx, 1 - f), new_material);
    assert_eq!(camera_bytes(&ctx, 1 - f), new_camera);
    ctx.assert_no_violations();
}

#[test]
fn test_cleanup_releases_everything() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        enable_z_prepass: true,
        ..minimal_settings()
    });
    ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.material("stone", &["pbr", "unlit"]);
    ctx.material("glass", &["unlit"]);
    let doomed = ctx.add_cube("doomed", "stone");
    ctx.add_cube("kept", "glass");
    ctx.flush_uploads();

    // Leave something in the retire queue at shutdown
    doomed.mark_dead();
    ctx.frame();
    assert!(ctx.renderer.retired_count() > 0);

    ctx.cleanup_and_assert_empty();
}
