//! Renderer error taxonomy

use crate::backend::BackendError;
use thiserror::Error;

/// Which kind of shared uniform entry an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Camera,
    Material,
    LightChannel,
}

impl std::fmt::Display for UniformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniformKind::Camera => write!(f, "camera"),
            UniformKind::Material => write!(f, "material"),
            UniformKind::LightChannel => write!(f, "light channel"),
        }
    }
}

/// Errors raised by the renderer core
#[derive(Error, Debug)]
pub enum RenderError {
    /// No shader variant of a material compiles and no batch can be reused
    #[error("no valid shader fallback for material '{material}' (variants: {variants:?})")]
    NoValidShader {
        material: String,
        variants: Vec<String>,
    },
    /// Every pipeline slot is taken by a live draw batch
    #[error("pipeline slots exhausted: at most {max} draw batches may exist")]
    PipelineSlotsExhausted { max: usize },
    /// A shared uniform entry was released more often than acquired
    #[error("double release of {kind} uniform entry {key}")]
    DoubleRelease { kind: UniformKind, key: u64 },
    #[error("unknown draw batch {0}")]
    UnknownBatch(usize),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("window system: {0}")]
    Window(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Errors that indicate unusable asset or configuration data
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            RenderError::NoValidShader { .. }
                | RenderError::PipelineSlotsExhausted { .. }
                | RenderError::Config(_)
        )
    }
}
