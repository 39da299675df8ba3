//! Frame scheduling tests.
//!
//! These tests run the renderer on the dummy device and check the order of
//! fence waits, submissions and presents, how semaphores chain the passes of
//! a frame, and how the frames-in-flight ring and swapchain rebuilds behave.
//!
//! ```bash
//! cargo test --test frame_scheduler
//! ```

mod common;

use glam::Vec3;
use rstest::rstest;

use common::{fence_waits, minimal_settings, present_count, recreate_count, TestContext};
use vkengine::backend::dummy::{DeviceEvent, ResourceKind};
use vkengine::backend::{AcquireOutcome, Extent2D, LayoutTransition, PassKind, PresentOutcome, RenderDevice};
use vkengine::{FrameStatus, RenderSettings};

// ============================================================================
// Single frame
// ============================================================================

#[test]
fn test_forward_frame_without_optional_passes() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");

    assert_eq!(ctx.frame(), FrameStatus::Presented);
    assert_eq!(ctx.renderer.mesh_count(), 1);
    assert_eq!(ctx.renderer.current_frame(), 1);
    assert_eq!(ctx.renderer.frame_number(), 1);

    let device = ctx.device();
    let waits = fence_waits(device);
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].len(), 1, "only the color fence is waited");

    let submits = device.submits();
    assert_eq!(submits.len(), 1);
    let color = submits[0];
    assert_eq!(color.passes, vec![PassKind::Forward]);
    assert_eq!(color.draws, 1);
    assert!(color.transitions.is_empty());
    assert_eq!(color.fence, Some(waits[0][0]));

    let acquire_signal = device.events().iter().find_map(|e| match e {
        DeviceEvent::Acquire { signal, .. } => Some(*signal),
        _ => None,
    });
    assert_eq!(color.wait, acquire_signal);
    let present_wait = device.events().iter().find_map(|e| match e {
        DeviceEvent::Present { wait, .. } => Some(*wait),
        _ => None,
    });
    assert_eq!(color.signal, present_wait);
    ctx.assert_no_violations();
}

#[test]
fn test_frame_steps_happen_in_order() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.frame();

    let order: Vec<&'static str> = ctx
        .device()
        .events()
        .iter()
        .map(|e| match e {
            DeviceEvent::WaitFences(_) => "wait",
            DeviceEvent::ResetFences(_) => "reset",
            DeviceEvent::Acquire { .. } => "acquire",
            DeviceEvent::Submit(_) => "submit",
            DeviceEvent::Present { .. } => "present",
            DeviceEvent::RecreateSwapchain => "recreate",
            DeviceEvent::WaitIdle => "idle",
        })
        .collect();
    assert_eq!(order, vec!["wait", "acquire", "reset", "submit", "present"]);
}

/// Fences waited and queue submissions per frame for each feature combination
#[rstest]
#[case::color_only(false, false, 1, 1)]
#[case::prepass(false, true, 2, 2)]
#[case::shadows(true, false, 4, 4)]
#[case::shadows_and_prepass(true, true, 4, 4)]
fn test_fences_and_submits_per_frame(
    #[case] shadows: bool,
    #[case] prepass: bool,
    #[case] fences: usize,
    #[case] submits: usize,
) {
    let settings = RenderSettings {
        enable_shadow_map: shadows,
        enable_z_prepass: prepass,
        ..minimal_settings()
    };
    let mut ctx = TestContext::new(settings);
    ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.scene
        .add_spot("spot", Vec3::new(0.0, 4.0, 0.0), Vec3::NEG_Y, Vec3::ONE, 5.0, 0.6);
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");

    ctx.frame();

    let device = ctx.device();
    assert_eq!(fence_waits(device)[0].len(), fences);
    assert_eq!(device.submits().len(), submits);
    assert_eq!(present_count(device), 1);
    ctx.assert_no_violations();
}

// ============================================================================
// Depth pre-pass and shadow chain
// ============================================================================

#[test]
fn test_shadow_chain_follows_light_ids() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        ..minimal_settings()
    });
    // Added first, so it has the lower id and leads the chain
    let spot = ctx
        .scene
        .add_spot("spot", Vec3::new(0.0, 4.0, 0.0), Vec3::NEG_Y, Vec3::ONE, 5.0, 0.6);
    let sun = ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");

    ctx.frame();

    assert_eq!(ctx.renderer.shadow_light_ids(), vec![spot.id(), sun.id()]);
    assert_eq!(spot.shadow_slot(), Some(0));
    assert_eq!(sun.shadow_slot(), Some(1));

    let device = ctx.device();
    let submits = device.submits();
    assert_eq!(submits.len(), 4);

    // Layout transition only: no semaphores, but still fenced
    let depth = submits[0];
    assert!(depth.passes.is_empty());
    assert_eq!(depth.transitions, vec![(LayoutTransition::ToDepthAttachment, 2)]);
    assert_eq!(depth.wait, None);
    assert_eq!(depth.signal, None);
    assert!(depth.fence.is_some());

    let acquire_signal = device.events().iter().find_map(|e| match e {
        DeviceEvent::Acquire { signal, .. } => Some(*signal),
        _ => None,
    });
    let first = submits[1];
    let second = submits[2];
    assert_eq!(first.passes, vec![PassKind::Shadow]);
    assert_eq!(second.passes, vec![PassKind::Shadow]);
    assert_eq!(first.wait, acquire_signal);
    assert_eq!(second.wait, first.signal);
    assert_eq!(first.depth_bias, Some(ctx.renderer.settings().depth_bias()));
    assert_eq!(first.draws, 1);

    let color = submits[3];
    assert_eq!(color.wait, second.signal);
    assert_eq!(color.transitions, vec![(LayoutTransition::ToShaderRead, 2)]);
    ctx.assert_no_violations();
}

#[test]
fn test_prepass_feeds_the_shadow_chain() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        enable_z_prepass: true,
        ..minimal_settings()
    });
    ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");

    ctx.frame();

    let submits = ctx.device().submits();
    assert_eq!(submits.len(), 3);
    let prepass = submits[0];
    assert_eq!(prepass.passes, vec![PassKind::DepthPrepass]);
    assert_eq!(prepass.draws, 1);
    assert!(prepass.wait.is_some());
    assert!(prepass.signal.is_some());

    assert_eq!(submits[1].wait, prepass.signal);
    assert_eq!(submits[2].wait, submits[1].signal);
    ctx.assert_no_violations();
}

#[test]
fn test_prepass_without_shadows_signals_color_pass() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_z_prepass: true,
        ..minimal_settings()
    });
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");

    ctx.frame();

    let submits = ctx.device().submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[0].passes, vec![PassKind::DepthPrepass]);
    assert!(submits[0].transitions.is_empty());
    assert_eq!(submits[1].wait, submits[0].signal);
    ctx.assert_no_violations();
}

#[test]
fn test_shadow_maps_are_limited_to_two_lights() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        ..minimal_settings()
    });
    let a = ctx.scene.add_sun("a", Vec3::NEG_Y, Vec3::ONE, 1.0);
    let b = ctx.scene.add_sun("b", Vec3::NEG_X, Vec3::ONE, 1.0);
    let c = ctx.scene.add_sun("c", Vec3::NEG_Z, Vec3::ONE, 1.0);
    ctx.scene.add_point("lamp", Vec3::Y, Vec3::ONE, 1.0);

    ctx.frame();
    ctx.frame();

    assert_eq!(ctx.renderer.shadow_light_ids(), vec![a.id(), b.id()]);
    assert_eq!(c.shadow_slot(), None);

    // Freeing a slot hands it to the waiting light
    ctx.scene.remove_light(a.id());
    ctx.frame();
    assert_eq!(ctx.renderer.shadow_light_ids(), vec![b.id(), c.id()]);
    assert_eq!(c.shadow_slot(), Some(0));
    ctx.assert_no_violations();
}

#[test]
fn test_point_lights_never_get_shadow_maps() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        ..minimal_settings()
    });
    ctx.scene.add_point("lamp", Vec3::Y, Vec3::ONE, 1.0);
    ctx.frame();

    assert!(ctx.renderer.shadow_light_ids().is_empty());
    // Depth fence transition step plus color pass
    assert_eq!(ctx.device().submits().len(), 2);
    assert!(ctx.device().submits()[0].transitions.is_empty());
}

#[test]
fn test_removed_light_releases_shadow_map_after_ring() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        max_frames_in_flight: 2,
        ..minimal_settings()
    });
    let sun = ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.frame();
    ctx.frame();
    let maps_with_sun = ctx.renderer.shadow_maps();
    let with_shadow = ctx.device().live_count(ResourceKind::Image);

    ctx.scene.remove_light(sun.id());
    ctx.frame();
    assert!(ctx.renderer.shadow_light_ids().is_empty());
    assert_eq!(ctx.renderer.retired_count(), 1);
    assert_ne!(ctx.renderer.shadow_maps(), maps_with_sun);

    ctx.frame();
    assert_eq!(ctx.renderer.retired_count(), 1);
    ctx.frame();
    assert_eq!(ctx.renderer.retired_count(), 0);
    assert_eq!(
        ctx.device().live_count(ResourceKind::Image),
        with_shadow - 1
    );
    ctx.assert_no_violations();
}

#[test]
fn test_disabling_cast_shadow_frees_the_slot() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_shadow_map: true,
        ..minimal_settings()
    });
    let sun = ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.frame();
    assert_eq!(sun.shadow_slot(), Some(0));

    sun.set_cast_shadow(false);
    ctx.frame();
    assert_eq!(sun.shadow_slot(), None);
    assert!(ctx.renderer.shadow_light_ids().is_empty());
    ctx.assert_no_violations();
}

// ============================================================================
// Frames-in-flight ring
// ============================================================================

#[rstest]
fn test_ring_slots_cycle(#[values(1, 2, 3)] frames_in_flight: u32) {
    let mut ctx = TestContext::new(RenderSettings {
        max_frames_in_flight: frames_in_flight,
        ..minimal_settings()
    });
    for n in 1..=7u64 {
        assert_eq!(ctx.frame(), FrameStatus::Presented);
        assert_eq!(ctx.renderer.frame_number(), n);
        assert_eq!(ctx.renderer.current_frame(), n as usize % frames_in_flight as usize);
    }

    // Each slot waits on its own fence
    let waits = fence_waits(ctx.device());
    let f = frames_in_flight as usize;
    for (i, wait) in waits.iter().enumerate() {
        assert_eq!(wait, &waits[i % f]);
    }
    ctx.assert_no_violations();
}

/// Streams meshes in and out while every pass is active; the dummy device
/// flags any write to, or destruction of, a resource a pending frame uses
#[rstest]
fn test_busy_scene_never_touches_in_flight_resources(
    #[values(1, 2, 3)] frames_in_flight: u32,
    #[values(false, true)] deferred: bool,
) {
    let mut ctx = TestContext::new(RenderSettings {
        max_frames_in_flight: frames_in_flight,
        enable_shadow_map: true,
        enable_z_prepass: true,
        enable_deferred: deferred,
        ..minimal_settings()
    });
    let sun = ctx.scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
    ctx.material("stone", &["pbr", "unlit"]);
    ctx.material("glass", &["unlit"]);

    let mut models = Vec::new();
    for i in 0..6u32 {
        let material = if i % 2 == 0 { "stone" } else { "glass" };
        let mesh = ctx.add_cube(&format!("cube {}", i), material);
        models.push(mesh);
        ctx.frame();

        if i == 2 {
            ctx.scene
                .add_spot("spot", Vec3::new(1.0, 4.0, 0.0), Vec3::NEG_Y, Vec3::ONE, 5.0, 0.6);
        }
        if i == 3 {
            models.remove(0).mark_dead();
        }
        if i == 4 {
            ctx.scene.remove_light(sun.id());
        }
        ctx.scene
            .main_camera()
            .expect("camera")
            .set_position(Vec3::new(i as f32, 5.0, 10.0));
    }
    for _ in 0..4 {
        ctx.frame();
    }

    assert_eq!(ctx.renderer.mesh_count(), 5);
    ctx.assert_no_violations();
    ctx.cleanup_and_assert_empty();
}

// ============================================================================
// Swapchain
// ============================================================================

#[test]
fn test_out_of_date_acquire_recreates_without_submitting() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.device_mut().script_acquire(AcquireOutcome::OutOfDate);

    assert_eq!(ctx.frame(), FrameStatus::SwapchainRecreated);
    assert!(ctx.device().submits().is_empty());
    assert_eq!(present_count(ctx.device()), 0);
    assert_eq!(recreate_count(ctx.device()), 1);
    assert_eq!(ctx.renderer.current_frame(), 0);
    assert_eq!(ctx.renderer.frame_number(), 0);

    assert_eq!(ctx.frame(), FrameStatus::Presented);
    assert_eq!(ctx.renderer.current_frame(), 1);
    ctx.assert_no_violations();
}

#[rstest]
#[case::suboptimal(PresentOutcome::Suboptimal)]
#[case::out_of_date(PresentOutcome::OutOfDate)]
fn test_non_optimal_present_recreates(#[case] outcome: PresentOutcome) {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.device_mut().script_present(outcome);

    assert_eq!(ctx.frame(), FrameStatus::SwapchainRecreated);
    assert_eq!(present_count(ctx.device()), 1);
    assert_eq!(recreate_count(ctx.device()), 1);
    assert_eq!(ctx.renderer.frame_number(), 1);

    assert_eq!(ctx.frame(), FrameStatus::Presented);
    assert_eq!(recreate_count(ctx.device()), 1);
    ctx.assert_no_violations();
}

#[test]
fn test_suboptimal_acquire_still_renders() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.device_mut().script_acquire(AcquireOutcome::Acquired {
        image_index: 0,
        suboptimal: true,
    });

    assert_eq!(ctx.frame(), FrameStatus::SwapchainRecreated);
    assert_eq!(ctx.device().submits().len(), 1);
    assert_eq!(present_count(ctx.device()), 1);
    assert_eq!(recreate_count(ctx.device()), 1);
    ctx.assert_no_violations();
}

#[test]
fn test_resize_notification_recreates_after_present() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.frame();

    ctx.device_mut().set_extent(Extent2D::new(800, 600));
    ctx.renderer.notify_resized();
    assert_eq!(ctx.frame(), FrameStatus::SwapchainRecreated);
    assert_eq!(ctx.device().swapchain_extent(), Extent2D::new(800, 600));

    let camera = ctx.scene.main_camera().expect("camera");
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");
    assert_eq!(ctx.frame(), FrameStatus::Presented);
    let aspect = camera.projection_matrix().col(1).y / camera.projection_matrix().col(0).x;
    assert!((aspect - 800.0 / 600.0).abs() < 1e-4);
    ctx.assert_no_violations();
}

#[test]
fn test_minimized_window_skips_but_keeps_uploading() {
    let mut ctx = TestContext::new(minimal_settings());
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");
    ctx.device_mut().set_extent(Extent2D::new(0, 0));

    assert_eq!(ctx.frame(), FrameStatus::Skipped);
    assert_eq!(ctx.renderer.mesh_count(), 1);
    assert!(ctx.device().events().is_empty());
    assert_eq!(ctx.renderer.frame_number(), 0);

    ctx.device_mut().set_extent(Extent2D::new(640, 480));
    assert_eq!(ctx.frame(), FrameStatus::SwapchainRecreated);
    assert_eq!(ctx.device().swapchain_extent(), Extent2D::new(640, 480));
    assert_eq!(ctx.frame(), FrameStatus::Presented);
    ctx.assert_no_violations();
}

#[test]
fn test_recreate_rewrites_deferred_lighting() {
    let mut ctx = TestContext::new(RenderSettings {
        enable_deferred: true,
        ..minimal_settings()
    });
    ctx.material("stone", &["pbr"]);
    ctx.add_cube("cube", "stone");
    ctx.frame();

    ctx.device_mut().script_present(PresentOutcome::OutOfDate);
    assert_eq!(ctx.frame(), FrameStatus::SwapchainRecreated);
    assert_eq!(ctx.frame(), FrameStatus::Presented);

    let submits = ctx.device().submits();
    let last = submits.last().expect("color submit");
    assert_eq!(last.passes, vec![PassKind::Deferred]);
    // One mesh plus the fullscreen lighting triangle
    assert_eq!(last.draws, 2);
    ctx.assert_no_violations();
}
