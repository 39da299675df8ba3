//! Material definitions
//!
//! A material names the shader variants it can be drawn with, most preferred
//! first, and carries the parameter block shared by every mesh using it.

use crate::backend::MaterialUniform;
use crate::error::UniformKind;
use crate::resources::UniformSource;
use glam::Vec4;
use parking_lot::RwLock;

/// PBR parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialParams {
    pub color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            roughness: 0.5,
            metallic: 0.0,
        }
    }
}

/// Material shared by any number of meshes
#[derive(Debug)]
pub struct Material {
    id: u64,
    name: String,
    shaders: RwLock<Vec<String>>,
    params: RwLock<MaterialParams>,
}

impl Material {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            shaders: RwLock::new(Vec::new()),
            params: RwLock::new(MaterialParams::default()),
        }
    }

    pub fn with_shaders<S: Into<String>>(self, shaders: impl IntoIterator<Item = S>) -> Self {
        self.set_shaders(shaders);
        self
    }

    pub fn with_params(self, params: MaterialParams) -> Self {
        *self.params.write() = params;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shader variants, most preferred first
    pub fn shaders(&self) -> Vec<String> {
        self.shaders.read().clone()
    }

    /// Replace the variant list; the asset loader may fill it in late
    pub fn set_shaders<S: Into<String>>(&self, shaders: impl IntoIterator<Item = S>) {
        *self.shaders.write() = shaders.into_iter().map(Into::into).collect();
    }

    /// A material without variants is still being loaded
    pub fn is_ready(&self) -> bool {
        !self.shaders.read().is_empty()
    }

    pub fn params(&self) -> MaterialParams {
        *self.params.read()
    }

    pub fn set_params(&self, params: MaterialParams) {
        *self.params.write() = params;
    }

    pub fn uniform_data(&self) -> MaterialUniform {
        let params = self.params();
        MaterialUniform {
            color: params.color,
            roughness: params.roughness,
            metallic: params.metallic,
            _padding: [0.0; 2],
        }
    }
}

impl UniformSource for Material {
    const KIND: UniformKind = UniformKind::Material;
    const SIZE: u64 = std::mem::size_of::<MaterialUniform>() as u64;

    fn uniform_key(&self) -> u64 {
        self.id
    }

    fn uniform_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(&self.uniform_data()).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_without_shaders_is_not_ready() {
        let material = Material::new(1, "rock");
        assert!(!material.is_ready());
        material.set_shaders(["pbr", "unlit"]);
        assert!(material.is_ready());
        assert_eq!(material.shaders(), vec!["pbr".to_string(), "unlit".to_string()]);
    }

    #[test]
    fn test_uniform_reflects_params() {
        let material = Material::new(2, "gold").with_params(MaterialParams {
            color: Vec4::new(1.0, 0.8, 0.2, 1.0),
            roughness: 0.2,
            metallic: 1.0,
        });
        let data = material.uniform_data();
        assert_eq!(data.metallic, 1.0);
        assert_eq!(data.roughness, 0.2);
        assert_eq!(material.uniform_bytes().len() as u64, Material::SIZE);
    }
}
