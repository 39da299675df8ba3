//! vkengine - a Vulkan rendering engine with shadow-mapped, optionally deferred rendering
//!
//! The engine turns a mutable scene of meshes, materials and lights into a
//! synchronized sequence of GPU submissions per frame:
//! - optional depth pre-pass
//! - one shadow-map pass per shadow-casting light, chained by semaphores
//! - a forward or deferred (G-buffer + lighting subpass) color pass
//!
//! Mesh data is streamed in from any thread through an upload queue and drained
//! one item per frame. Materials list shader variants from most to least
//! preferred; the fallback resolver picks an existing draw batch or builds a new
//! pipeline. Uniform buffers shared by many meshes are reference counted and only
//! destroyed once no frame in flight can read them.

pub mod backend;
pub mod config;
pub mod draw;
pub mod engine;
pub mod error;
pub mod render;
pub mod resources;
pub mod scene;
pub mod window;

pub use config::RenderSettings;
pub use engine::Engine;
pub use error::{RenderError, RenderResult};
pub use render::{FrameStatus, Renderer};
pub use resources::{Material, MaterialParams, MeshData, TextureData, TextureKind, UploadQueue};
pub use scene::{Camera, Light, LightChannel, LightKind, Model, Scene, SceneObject};
pub use window::Window;

use std::path::PathBuf;

/// Maximum number of lights in a light channel, and of shadow-casting lights
pub const MAX_LIGHT_NUM: usize = 2;

/// Maximum number of draw batches (pipeline slots) alive at once
pub const MAX_PIPELINE_NUM: usize = 10;

/// Default depth of the frames-in-flight ring
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Directory holding shader variants (`<variant>.wgsl` / `<variant>.<entry>.spv`)
    pub shader_dir: PathBuf,
    /// Renderer feature flags and tuning
    pub render: RenderSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "vkengine".to_string(),
            width: 800,
            height: 600,
            vsync: true,
            shader_dir: PathBuf::from("shaders"),
            render: RenderSettings::default(),
        }
    }
}

/// Initialize `env_logger` with `info` as the default level
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
