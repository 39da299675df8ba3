//! Scene management
//!
//! The `Scene` is an explicit registry of cameras, lights, light channels,
//! materials and models. It is shared between the logic thread and the render
//! thread behind an `Arc`; every method takes `&self`.

mod camera;
mod light;
mod model;

pub use camera::*;
pub use light::*;
pub use model::*;

use crate::resources::Material;
use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Name of the light channel every scene starts with
pub const DEFAULT_LIGHT_CHANNEL: &str = "default";

/// A placed object, tagged by type
#[derive(Debug, Clone)]
pub enum SceneObject {
    Camera(Arc<Camera>),
    Model(Arc<Model>),
    SunLight(Arc<Light>),
    SpotLight(Arc<Light>),
    PointLight(Arc<Light>),
}

impl From<Arc<Light>> for SceneObject {
    fn from(light: Arc<Light>) -> Self {
        match light.kind() {
            LightKind::Sun => SceneObject::SunLight(light),
            LightKind::Spot => SceneObject::SpotLight(light),
            LightKind::Point => SceneObject::PointLight(light),
        }
    }
}

impl SceneObject {
    pub fn id(&self) -> u64 {
        match self {
            SceneObject::Camera(c) => c.id(),
            SceneObject::Model(m) => m.id(),
            SceneObject::SunLight(l) | SceneObject::SpotLight(l) | SceneObject::PointLight(l) => l.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SceneObject::Camera(c) => c.name(),
            SceneObject::Model(m) => m.name(),
            SceneObject::SunLight(l) | SceneObject::SpotLight(l) | SceneObject::PointLight(l) => l.name(),
        }
    }

    /// View and projection for objects that render from their own viewpoint
    pub fn view_projection(&self) -> Option<(Mat4, Mat4)> {
        match self {
            SceneObject::Camera(c) => Some((c.view_matrix(), c.projection_matrix())),
            SceneObject::SunLight(l) | SceneObject::SpotLight(l) => {
                Some((l.view_matrix(), l.projection_matrix()))
            }
            SceneObject::Model(_) | SceneObject::PointLight(_) => None,
        }
    }

    pub fn is_shadow_caster(&self) -> bool {
        match self {
            SceneObject::SunLight(l) | SceneObject::SpotLight(l) => l.casts_shadow(),
            _ => false,
        }
    }

    pub fn as_light(&self) -> Option<&Arc<Light>> {
        match self {
            SceneObject::SunLight(l) | SceneObject::SpotLight(l) | SceneObject::PointLight(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Arc<Model>> {
        match self {
            SceneObject::Model(m) => Some(m),
            _ => None,
        }
    }
}

/// Registry of everything the renderer may reference by name or id
#[derive(Debug)]
pub struct Scene {
    next_id: AtomicU64,
    main_camera: RwLock<Option<String>>,
    cameras: RwLock<HashMap<String, Arc<Camera>>>,
    lights: RwLock<BTreeMap<u64, Arc<Light>>>,
    light_channels: RwLock<HashMap<String, Arc<LightChannel>>>,
    materials: RwLock<HashMap<String, Arc<Material>>>,
    models: RwLock<BTreeMap<u64, Arc<Model>>>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let scene = Self {
            next_id: AtomicU64::new(1),
            main_camera: RwLock::new(None),
            cameras: RwLock::new(HashMap::new()),
            lights: RwLock::new(BTreeMap::new()),
            light_channels: RwLock::new(HashMap::new()),
            materials: RwLock::new(HashMap::new()),
            models: RwLock::new(BTreeMap::new()),
        };
        scene.add_light_channel(DEFAULT_LIGHT_CHANNEL);
        scene
    }

    /// Allocate a scene-unique id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // Cameras

    /// Add a camera; the first one becomes the main camera
    pub fn add_camera(&self, name: &str, position: Vec3, target: Vec3) -> Arc<Camera> {
        let camera = Arc::new(Camera::new(self.next_id(), name, position, target));
        self.cameras.write().insert(name.to_string(), Arc::clone(&camera));
        let mut main = self.main_camera.write();
        if main.is_none() {
            *main = Some(name.to_string());
        }
        camera
    }

    pub fn set_main_camera(&self, name: &str) -> bool {
        if self.cameras.read().contains_key(name) {
            *self.main_camera.write() = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn camera(&self, name: &str) -> Option<Arc<Camera>> {
        self.cameras.read().get(name).cloned()
    }

    pub fn main_camera(&self) -> Option<Arc<Camera>> {
        let name = self.main_camera.read().clone()?;
        self.camera(&name)
    }

    /// Named camera, or the main one when no name is given
    pub fn resolve_camera(&self, name: Option<&str>) -> Option<Arc<Camera>> {
        match name {
            Some(name) => self.camera(name),
            None => self.main_camera(),
        }
    }

    // Lights

    /// Register a light (built with an id from `next_id`) in the default channel
    pub fn add_light(&self, light: Light) -> Arc<Light> {
        let light = Arc::new(light);
        self.lights.write().insert(light.id(), Arc::clone(&light));
        if let Some(channel) = self.light_channel(DEFAULT_LIGHT_CHANNEL) {
            channel.add_light(&light);
        }
        light
    }

    pub fn add_sun(&self, name: &str, direction: Vec3, color: Vec3, intensity: f32) -> Arc<Light> {
        self.add_light(Light::sun(self.next_id(), name, direction, color, intensity))
    }

    pub fn add_spot(
        &self,
        name: &str,
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        outer_angle: f32,
    ) -> Arc<Light> {
        self.add_light(Light::spot(
            self.next_id(),
            name,
            position,
            direction,
            color,
            intensity,
            outer_angle,
        ))
    }

    pub fn add_point(&self, name: &str, position: Vec3, color: Vec3, intensity: f32) -> Arc<Light> {
        self.add_light(Light::point(self.next_id(), name, position, color, intensity))
    }

    /// Remove a light from the scene and from every channel
    pub fn remove_light(&self, id: u64) -> Option<Arc<Light>> {
        let light = self.lights.write().remove(&id)?;
        for channel in self.light_channels.read().values() {
            channel.remove_light(id);
        }
        Some(light)
    }

    pub fn light(&self, id: u64) -> Option<Arc<Light>> {
        self.lights.read().get(&id).cloned()
    }

    /// Active lights keyed by id, as handed to `draw_frame`
    pub fn lights_by_id(&self) -> BTreeMap<u64, Weak<Light>> {
        self.lights
            .read()
            .iter()
            .map(|(&id, light)| (id, Arc::downgrade(light)))
            .collect()
    }

    // Light channels

    pub fn add_light_channel(&self, name: &str) -> Arc<LightChannel> {
        let mut channels = self.light_channels.write();
        if let Some(channel) = channels.get(name) {
            return Arc::clone(channel);
        }
        let channel = Arc::new(LightChannel::new(self.next_id(), name));
        channels.insert(name.to_string(), Arc::clone(&channel));
        channel
    }

    pub fn light_channel(&self, name: &str) -> Option<Arc<LightChannel>> {
        self.light_channels.read().get(name).cloned()
    }

    /// Named channel, or the default one when no name is given
    pub fn resolve_light_channel(&self, name: Option<&str>) -> Option<Arc<LightChannel>> {
        self.light_channel(name.unwrap_or(DEFAULT_LIGHT_CHANNEL))
    }

    // Materials

    /// Add (or fetch) a material; an empty shader list leaves it not ready
    pub fn add_material(&self, name: &str, shaders: &[&str]) -> Arc<Material> {
        let mut materials = self.materials.write();
        if let Some(material) = materials.get(name) {
            return Arc::clone(material);
        }
        let material = Arc::new(Material::new(self.next_id(), name).with_shaders(shaders.iter().copied()));
        materials.insert(name.to_string(), Arc::clone(&material));
        material
    }

    pub fn material(&self, name: &str) -> Option<Arc<Material>> {
        self.materials.read().get(name).cloned()
    }

    // Models

    pub fn add_model(&self, name: &str, meshes: Vec<Arc<crate::resources::MeshData>>) -> Arc<Model> {
        let model = Arc::new(Model::new(self.next_id(), name, meshes));
        self.models.write().insert(model.id(), Arc::clone(&model));
        model
    }

    /// Remove a model; its meshes are marked dead for the renderer to reclaim
    pub fn remove_model(&self, id: u64) -> Option<Arc<Model>> {
        let model = self.models.write().remove(&id)?;
        model.destroy();
        Some(model)
    }

    pub fn model(&self, id: u64) -> Option<Arc<Model>> {
        self.models.read().get(&id).cloned()
    }

    /// Snapshot of every placed object
    pub fn objects(&self) -> Vec<SceneObject> {
        let mut objects: Vec<SceneObject> = self
            .cameras
            .read()
            .values()
            .map(|c| SceneObject::Camera(Arc::clone(c)))
            .collect();
        objects.extend(self.lights.read().values().map(|l| SceneObject::from(Arc::clone(l))));
        objects.extend(self.models.read().values().map(|m| SceneObject::Model(Arc::clone(m))));
        objects.sort_by_key(SceneObject::id);
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MeshData;

    #[test]
    fn test_first_camera_is_main() {
        let scene = Scene::new();
        scene.add_camera("main", Vec3::Z, Vec3::ZERO);
        scene.add_camera("side", Vec3::X, Vec3::ZERO);
        assert_eq!(scene.main_camera().unwrap().name(), "main");
        assert!(scene.set_main_camera("side"));
        assert_eq!(scene.resolve_camera(None).unwrap().name(), "side");
        assert_eq!(scene.resolve_camera(Some("main")).unwrap().name(), "main");
        assert!(!scene.set_main_camera("missing"));
    }

    #[test]
    fn test_lights_join_default_channel() {
        let scene = Scene::new();
        let sun = scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
        let channel = scene.resolve_light_channel(None).unwrap();
        assert_eq!(channel.lights().len(), 1);
        assert!(scene.lights_by_id().contains_key(&sun.id()));

        scene.remove_light(sun.id());
        assert!(channel.lights().is_empty());
        assert!(scene.lights_by_id().is_empty());
    }

    #[test]
    fn test_removed_light_weak_expires() {
        let scene = Scene::new();
        let id = scene.add_spot("spot", Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 1.0, 0.4).id();
        let lights = scene.lights_by_id();
        scene.remove_light(id);
        assert!(lights[&id].upgrade().is_none());
    }

    #[test]
    fn test_object_capabilities() {
        let scene = Scene::new();
        scene.add_camera("main", Vec3::Z, Vec3::ZERO);
        scene.add_sun("sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
        scene.add_point("bulb", Vec3::Y, Vec3::ONE, 1.0);
        scene.add_model("crate", vec![Arc::new(MeshData::cube("c", 1.0, "m"))]);

        let objects = scene.objects();
        assert_eq!(objects.len(), 4);
        let casters: Vec<_> = objects.iter().filter(|o| o.is_shadow_caster()).collect();
        assert_eq!(casters.len(), 1);
        assert!(matches!(casters[0], SceneObject::SunLight(_)));
        assert!(objects[0].view_projection().is_some());
        assert!(objects.iter().any(|o| matches!(o, SceneObject::PointLight(_))
            && o.view_projection().is_none()));
    }

    #[test]
    fn test_remove_model_kills_meshes() {
        let scene = Scene::new();
        let mesh = Arc::new(MeshData::cube("c", 1.0, "m"));
        let model = scene.add_model("crate", vec![Arc::clone(&mesh)]);
        scene.remove_model(model.id());
        assert!(!mesh.is_alive());
        assert!(scene.model(model.id()).is_none());
    }

    #[test]
    fn test_material_lookup_is_idempotent() {
        let scene = Scene::new();
        let a = scene.add_material("rock", &["pbr", "unlit"]);
        let b = scene.add_material("rock", &[]);
        assert_eq!(a.id(), b.id());
        assert!(b.is_ready());
    }
}
