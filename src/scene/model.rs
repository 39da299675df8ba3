//! Models: groups of meshes placed in the scene

use crate::resources::MeshData;
use glam::Mat4;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct Model {
    id: u64,
    name: String,
    meshes: Vec<Arc<MeshData>>,
    transform: RwLock<Mat4>,
    alive: AtomicBool,
}

impl Model {
    pub fn new(id: u64, name: impl Into<String>, meshes: Vec<Arc<MeshData>>) -> Self {
        Self {
            id,
            name: name.into(),
            meshes,
            transform: RwLock::new(Mat4::IDENTITY),
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meshes(&self) -> &[Arc<MeshData>] {
        &self.meshes
    }

    pub fn transform(&self) -> Mat4 {
        *self.transform.read()
    }

    /// Move the model; every mesh picks the transform up on its next refresh
    pub fn set_transform(&self, transform: Mat4) {
        *self.transform.write() = transform;
        for mesh in &self.meshes {
            mesh.set_transform(transform);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Kill the model and all of its meshes
    pub fn destroy(&self) {
        self.alive.store(false, Ordering::Release);
        for mesh in &self.meshes {
            mesh.mark_dead();
        }
    }
}
