//! Main engine orchestrator
//!
//! `Engine` owns the scene, the upload queue, the renderer and an optional
//! logic thread. The logic thread only sees the scene and the upload queue;
//! everything touching the device stays on the thread calling `draw_frame`.

use crate::backend::traits::RenderDevice;
use crate::backend::vulkan::VulkanDevice;
use crate::config::RenderSettings;
use crate::error::{RenderError, RenderResult};
use crate::render::{FrameStatus, Renderer};
use crate::resources::{MeshData, UploadQueue};
use crate::scene::Scene;
use crate::EngineConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use winit::window::Window as WinitWindow;

/// What the logic callback sees on every tick
pub struct LogicTick<'a> {
    pub scene: &'a Scene,
    pub uploads: &'a UploadQueue,
    /// Ticks completed before this one
    pub index: u64,
    /// Time since the previous tick started
    pub delta: Duration,
}

struct LogicThread {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl LogicThread {
    fn spawn<F>(scene: Arc<Scene>, uploads: Arc<UploadQueue>, tick: Duration, mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut(&LogicTick) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));
        let thread_running = Arc::clone(&running);
        let thread_ticks = Arc::clone(&ticks);

        let handle = std::thread::Builder::new()
            .name("logic".into())
            .spawn(move || {
                let mut last = Instant::now();
                while thread_running.load(Ordering::Acquire) {
                    let started = Instant::now();
                    callback(&LogicTick {
                        scene: &scene,
                        uploads: &uploads,
                        index: thread_ticks.load(Ordering::Relaxed),
                        delta: started - last,
                    });
                    last = started;
                    thread_ticks.fetch_add(1, Ordering::Release);

                    let elapsed = started.elapsed();
                    if elapsed < tick {
                        std::thread::sleep(tick - elapsed);
                    }
                }
                log::debug!("Logic thread stopped");
            })?;

        Ok(Self {
            running,
            ticks,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Logic thread panicked");
            }
        }
    }
}

impl Drop for LogicThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main engine
pub struct Engine<D: RenderDevice = VulkanDevice> {
    renderer: Option<Renderer<D>>,
    scene: Arc<Scene>,
    uploads: Arc<UploadQueue>,
    logic: Option<LogicThread>,
}

impl Engine<VulkanDevice> {
    /// Create a Vulkan engine presenting to `window`
    pub fn new(window: Arc<WinitWindow>, config: &EngineConfig) -> RenderResult<Self> {
        let settings = config.render.clone().validate()?;
        let device = VulkanDevice::new(window, config.vsync, config.shader_dir.clone(), &settings)?;
        Self::with_device(device, settings)
    }
}

impl<D: RenderDevice> Engine<D> {
    /// Create an engine on top of an existing device
    pub fn with_device(device: D, settings: RenderSettings) -> RenderResult<Self> {
        let scene = Arc::new(Scene::new());
        let uploads = Arc::new(UploadQueue::new());
        let renderer = Renderer::new(device, settings, Arc::clone(&scene), Arc::clone(&uploads))?;
        log::info!("Engine initialized");

        Ok(Self {
            renderer: Some(renderer),
            scene,
            uploads,
            logic: None,
        })
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    /// Queue shared with producers on other threads
    pub fn uploads(&self) -> &Arc<UploadQueue> {
        &self.uploads
    }

    /// The renderer, until `cleanup_graphics` has run
    pub fn renderer(&self) -> Option<&Renderer<D>> {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> Option<&mut Renderer<D>> {
        self.renderer.as_mut()
    }

    /// Start the logic thread, calling `callback` once per `tick`
    ///
    /// A running logic thread is stopped first.
    pub fn start_logic<F>(&mut self, tick: Duration, callback: F) -> RenderResult<()>
    where
        F: FnMut(&LogicTick) + Send + 'static,
    {
        self.stop_logic();
        let thread = LogicThread::spawn(Arc::clone(&self.scene), Arc::clone(&self.uploads), tick, callback)?;
        log::info!("Logic thread started with a {:?} tick", tick);
        self.logic = Some(thread);
        Ok(())
    }

    /// Stop and join the logic thread, if any
    pub fn stop_logic(&mut self) {
        if let Some(mut logic) = self.logic.take() {
            logic.stop();
        }
    }

    /// Ticks the current logic thread has completed
    pub fn logic_ticks(&self) -> u64 {
        self.logic
            .as_ref()
            .map(|logic| logic.ticks.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Queue a mesh for upload on a later frame
    pub fn parse_mesh_data(&self, mesh: &Arc<MeshData>) {
        self.uploads.enqueue(mesh);
    }

    /// Render one frame with every light currently in the scene
    pub fn draw_frame(&mut self) -> RenderResult<FrameStatus> {
        let renderer = self
            .renderer
            .as_mut()
            .ok_or_else(|| RenderError::Config("draw_frame after cleanup_graphics".into()))?;
        let lights = self.scene.lights_by_id();
        renderer.draw_frame(&lights)
    }

    /// Schedule a swapchain rebuild
    pub fn notify_resized(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.notify_resized();
        }
    }

    /// Stop the logic thread and release every GPU resource
    ///
    /// Later calls do nothing.
    pub fn cleanup_graphics(&mut self) -> RenderResult<()> {
        self.stop_logic();
        match self.renderer.take() {
            Some(renderer) => renderer.cleanup_graphics().map(drop),
            None => Ok(()),
        }
    }
}

impl<D: RenderDevice> Drop for Engine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup_graphics() {
            log::error!("Cleanup on drop failed: {}", e);
        }
    }
}
