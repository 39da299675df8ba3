//! Resource management
//!
//! GPU-side resources built from the scene's data: meshes, textures, materials,
//! the shared uniform pool and the upload queue feeding them.

mod buffer_manager;
mod material;
mod mesh;
mod texture;
mod upload_queue;

pub use buffer_manager::*;
pub use material::*;
pub use mesh::*;
pub use texture::*;
pub use upload_queue::*;
