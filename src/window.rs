//! winit window and the event loop that drives an `Engine`

use crate::engine::Engine;
use crate::error::{RenderError, RenderResult};
use crate::render::FrameStatus;
use crate::EngineConfig;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

/// The engine's window, with the size last reported by winit
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    close_requested: bool,
}

impl Window {
    /// Open a window with the given title and inner size
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> RenderResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(|e| RenderError::Window(format!("Failed to create window: {}", e)))?;

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            close_requested: false,
        })
    }

    /// Shared handle for the surface
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Inner size in physical pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Track resize and close events; returns true when the size changed
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::Resized(size) => {
                let changed = (size.width, size.height) != (self.width, self.height);
                self.width = size.width;
                self.height = size.height;
                changed
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                false
            }
            _ => false,
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Open a window, build the engine, let `setup` populate it and render until
/// the window closes or a frame fails
///
/// A failing frame is logged, ends the loop and is returned after cleanup.
pub fn run<F>(config: &EngineConfig, setup: F) -> RenderResult<()>
where
    F: FnOnce(&mut Engine) -> RenderResult<()>,
{
    let event_loop = EventLoop::new().map_err(|e| RenderError::Window(format!("Failed to create event loop: {}", e)))?;
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)?;
    let (width, height) = window.dimensions();
    log::info!("Opened window '{}' at {}x{}", config.title, width, height);
    let mut engine = Engine::new(window.window_arc(), config)?;
    setup(&mut engine)?;

    let mut failure: Option<RenderError> = None;
    let mut skipped = false;
    event_loop
        .run(|event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    if window.handle_event(&event) {
                        engine.notify_resized();
                    }
                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::RedrawRequested => match engine.draw_frame() {
                            Ok(FrameStatus::Skipped) => {
                                if !skipped {
                                    log::warn!("Surface has zero area, skipping frames");
                                    skipped = true;
                                }
                            }
                            Ok(_) => skipped = false,
                            Err(e) => {
                                if e.is_fatal_config() {
                                    log::error!("Scene or configuration cannot be rendered: {}", e);
                                } else {
                                    log::error!("Frame failed: {}", e);
                                }
                                failure = Some(e);
                                elwt.exit();
                            }
                        },
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    if !window.should_close() {
                        window.request_redraw();
                    }
                }
                _ => {}
            }
        })
        .map_err(|e| RenderError::Window(format!("Event loop failed: {}", e)))?;

    let cleanup = engine.cleanup_graphics();
    match failure {
        Some(e) => {
            if let Err(cleanup_error) = cleanup {
                log::error!("Cleanup after failed frame: {}", cleanup_error);
            }
            Err(e)
        }
        None => cleanup,
    }
}
