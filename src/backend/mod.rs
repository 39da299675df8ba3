//! Backend abstraction layer
//!
//! The renderer talks to the GPU only through `RenderDevice`. `vulkan` is the
//! real implementation; `dummy` records calls for tests.

pub mod dummy;
pub mod traits;
pub mod types;
pub mod vulkan;

pub use traits::*;
pub use types::*;
