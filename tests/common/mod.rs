//! Shared helpers for renderer integration tests.
//!
//! Every test drives a `Renderer` on top of `DummyDevice`, which logs each
//! synchronization call and flags use of resources a pending fence still
//! guards. No GPU is needed.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use vkengine::backend::dummy::{DeviceEvent, DummyDevice, ResourceKind};
use vkengine::backend::FenceHandle;
use vkengine::{FrameStatus, MeshData, RenderSettings, Renderer, Scene, UploadQueue};

/// Every object kind the dummy device tracks
pub const ALL_KINDS: [ResourceKind; 12] = [
    ResourceKind::Buffer,
    ResourceKind::Image,
    ResourceKind::Sampler,
    ResourceKind::Fence,
    ResourceKind::Semaphore,
    ResourceKind::Shader,
    ResourceKind::DescriptorSetLayout,
    ResourceKind::Pipeline,
    ResourceKind::DescriptorPool,
    ResourceKind::DescriptorSet,
    ResourceKind::Framebuffer,
    ResourceKind::CommandBuffer,
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Settings with every optional pass off
pub fn minimal_settings() -> RenderSettings {
    RenderSettings {
        enable_shadow_map: false,
        enable_z_prepass: false,
        enable_deferred: false,
        shadow_map_resolution: 256,
        ..RenderSettings::default()
    }
}

/// Renderer with a scene that already has a main camera
pub struct TestContext {
    pub renderer: Renderer<DummyDevice>,
    pub scene: Arc<Scene>,
    pub uploads: Arc<UploadQueue>,
}

impl TestContext {
    pub fn new(settings: RenderSettings) -> Self {
        Self::with_device(DummyDevice::new(), settings)
    }

    pub fn with_device(device: DummyDevice, settings: RenderSettings) -> Self {
        init_logging();
        let scene = Arc::new(Scene::new());
        scene.add_camera("main", Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO);
        let uploads = Arc::new(UploadQueue::new());
        let renderer = Renderer::new(device, settings, Arc::clone(&scene), Arc::clone(&uploads))
            .expect("renderer over dummy device");
        Self {
            renderer,
            scene,
            uploads,
        }
    }

    pub fn device(&self) -> &DummyDevice {
        self.renderer.device()
    }

    pub fn device_mut(&mut self) -> &mut DummyDevice {
        self.renderer.device_mut()
    }

    /// Register a material with the given variant list
    pub fn material(&self, name: &str, variants: &[&str]) {
        self.scene.add_material(name, variants);
    }

    /// Place a cube in the scene and queue it for upload
    pub fn add_cube(&self, name: &str, material: &str) -> Arc<MeshData> {
        let mesh = Arc::new(MeshData::cube(name, 1.0, material));
        self.scene.add_model(name, vec![Arc::clone(&mesh)]);
        self.uploads.enqueue(&mesh);
        mesh
    }

    /// Run one frame with the scene's current lights
    pub fn frame(&mut self) -> FrameStatus {
        let lights = self.scene.lights_by_id();
        self.renderer.draw_frame(&lights).expect("frame")
    }

    /// Run frames until the upload queue is empty
    pub fn flush_uploads(&mut self) {
        for _ in 0..64 {
            if !self.uploads.has_pending() {
                return;
            }
            self.frame();
        }
        panic!("upload queue never drained");
    }

    pub fn assert_no_violations(&self) {
        let violations = self.device().violations();
        assert!(violations.is_empty(), "violations: {:#?}", violations);
    }

    /// Tear down and check nothing outlives the renderer
    pub fn cleanup_and_assert_empty(self) {
        let device = self.renderer.cleanup_graphics().expect("cleanup");
        assert!(device.violations().is_empty(), "violations: {:#?}", device.violations());
        for kind in ALL_KINDS {
            assert_eq!(device.live_count(kind), 0, "{:?} still alive", kind);
        }
    }
}

/// Fences handed to each `WaitFences` event, in order
pub fn fence_waits(device: &DummyDevice) -> Vec<Vec<FenceHandle>> {
    device
        .events()
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::WaitFences(fences) => Some(fences.clone()),
            _ => None,
        })
        .collect()
}

/// Number of presents recorded
pub fn present_count(device: &DummyDevice) -> usize {
    device
        .events()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Present { .. }))
        .count()
}

/// Number of swapchain rebuilds recorded
pub fn recreate_count(device: &DummyDevice) -> usize {
    device
        .events()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::RecreateSwapchain))
        .count()
}
