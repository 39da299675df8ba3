//! Lights and light channels

use crate::backend::{LightChannelUniform, LightUniform};
use crate::error::UniformKind;
use crate::resources::UniformSource;
use crate::MAX_LIGHT_NUM;
use bytemuck::Zeroable;
use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

/// Light type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Directional light; orthographic shadow projection
    Sun,
    /// Omnidirectional light; lit but never shadowed
    Point,
    /// Cone light; perspective shadow projection
    Spot,
}

impl LightKind {
    /// Value of `LightUniform::kind`
    pub fn shader_index(&self) -> u32 {
        match self {
            LightKind::Sun => 0,
            LightKind::Point => 1,
            LightKind::Spot => 2,
        }
    }

    pub fn supports_shadow(&self) -> bool {
        !matches!(self, LightKind::Point)
    }
}

#[derive(Debug, Clone, Copy)]
struct LightState {
    position: Vec3,
    direction: Vec3,
    color: Vec3,
    intensity: f32,
    cast_shadow: bool,
    /// Spot reach, and the far plane of spot shadow maps
    range: f32,
    /// Spot half-angle in radians
    outer_angle: f32,
    /// Side of the square a sun shadow map covers
    shadow_extent: f32,
}

/// A light source
///
/// The render thread assigns shadow slots; everything else is set by the scene.
#[derive(Debug)]
pub struct Light {
    id: u64,
    name: String,
    kind: LightKind,
    state: RwLock<LightState>,
    shadow_slot: AtomicI32,
}

impl Light {
    fn new(id: u64, name: impl Into<String>, kind: LightKind, state: LightState) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            state: RwLock::new(state),
            shadow_slot: AtomicI32::new(-1),
        }
    }

    /// Directional light shining along `direction`
    pub fn sun(id: u64, name: impl Into<String>, direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self::new(
            id,
            name,
            LightKind::Sun,
            LightState {
                position: Vec3::ZERO,
                direction: direction.normalize_or_zero(),
                color,
                intensity,
                cast_shadow: true,
                range: 100.0,
                outer_angle: 0.0,
                shadow_extent: 40.0,
            },
        )
    }

    /// Cone light at `position` pointing along `direction`
    pub fn spot(
        id: u64,
        name: impl Into<String>,
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        outer_angle: f32,
    ) -> Self {
        Self::new(
            id,
            name,
            LightKind::Spot,
            LightState {
                position,
                direction: direction.normalize_or_zero(),
                color,
                intensity,
                cast_shadow: true,
                range: 50.0,
                outer_angle,
                shadow_extent: 0.0,
            },
        )
    }

    pub fn point(id: u64, name: impl Into<String>, position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self::new(
            id,
            name,
            LightKind::Point,
            LightState {
                position,
                direction: Vec3::NEG_Y,
                color,
                intensity,
                cast_shadow: false,
                range: 20.0,
                outer_angle: 0.0,
                shadow_extent: 0.0,
            },
        )
    }

    pub fn with_shadow(self, cast_shadow: bool) -> Self {
        self.state.write().cast_shadow = cast_shadow;
        self
    }

    pub fn with_range(self, range: f32) -> Self {
        self.state.write().range = range;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.state.read().position
    }

    pub fn direction(&self) -> Vec3 {
        self.state.read().direction
    }

    pub fn set_position(&self, position: Vec3) {
        self.state.write().position = position;
    }

    pub fn set_direction(&self, direction: Vec3) {
        self.state.write().direction = direction.normalize_or_zero();
    }

    pub fn set_color(&self, color: Vec3) {
        self.state.write().color = color;
    }

    pub fn set_intensity(&self, intensity: f32) {
        self.state.write().intensity = intensity;
    }

    pub fn set_cast_shadow(&self, cast_shadow: bool) {
        self.state.write().cast_shadow = cast_shadow;
    }

    /// Whether the light wants a shadow map
    pub fn casts_shadow(&self) -> bool {
        self.kind.supports_shadow() && self.state.read().cast_shadow
    }

    /// Shadow slot assigned by the renderer
    pub fn shadow_slot(&self) -> Option<usize> {
        usize::try_from(self.shadow_slot.load(Ordering::Acquire)).ok()
    }

    pub(crate) fn set_shadow_slot(&self, slot: Option<usize>) {
        let value = slot.map_or(-1, |s| s as i32);
        self.shadow_slot.store(value, Ordering::Release);
    }

    /// Eye position used for the shadow view
    fn shadow_eye(state: &LightState, kind: LightKind) -> Vec3 {
        match kind {
            LightKind::Sun => -state.direction * state.range * 0.5,
            _ => state.position,
        }
    }

    /// View matrix from the light's point of view
    pub fn view_matrix(&self) -> Mat4 {
        let state = self.state.read();
        let eye = Self::shadow_eye(&state, self.kind);
        let direction = if state.direction == Vec3::ZERO {
            Vec3::NEG_Y
        } else {
            state.direction
        };
        let up = if direction.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(eye, eye + direction, up)
    }

    /// Projection used when rendering the light's shadow map
    pub fn projection_matrix(&self) -> Mat4 {
        let state = self.state.read();
        match self.kind {
            LightKind::Sun => {
                let half = state.shadow_extent * 0.5;
                Mat4::orthographic_rh(-half, half, -half, half, 0.1, state.range)
            }
            LightKind::Spot => {
                let fov = (state.outer_angle * 2.0).clamp(0.01, std::f32::consts::PI - 0.01);
                Mat4::perspective_rh(fov, 1.0, 0.1, state.range)
            }
            LightKind::Point => Mat4::IDENTITY,
        }
    }

    /// Per-light block inside a light channel uniform
    pub fn uniform_data(&self) -> LightUniform {
        let (position, color, direction, intensity) = {
            let state = self.state.read();
            (state.position, state.color, state.direction, state.intensity)
        };
        LightUniform {
            id: self.id as u32,
            kind: self.kind.shader_index(),
            intensity,
            shadow_slot: self.shadow_slot().map_or(-1.0, |s| s as f32),
            position: position.extend(1.0),
            color: color.extend(1.0),
            direction: direction.extend(0.0),
            view: self.view_matrix(),
            proj: self.projection_matrix(),
        }
    }
}

/// A named group of lights that meshes subscribe to
#[derive(Debug)]
pub struct LightChannel {
    id: u64,
    name: String,
    lights: RwLock<Vec<Weak<Light>>>,
}

impl LightChannel {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            lights: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe a light; returns false when the channel is full
    pub fn add_light(&self, light: &Arc<Light>) -> bool {
        let mut lights = self.lights.write();
        lights.retain(|l| l.strong_count() > 0);
        if lights.iter().any(|l| l.upgrade().map_or(false, |l| l.id == light.id)) {
            return true;
        }
        if lights.len() >= MAX_LIGHT_NUM {
            log::warn!(
                "Light channel '{}' is full, ignoring light '{}'",
                self.name,
                light.name
            );
            return false;
        }
        lights.push(Arc::downgrade(light));
        true
    }

    pub fn remove_light(&self, id: u64) {
        self.lights
            .write()
            .retain(|l| l.upgrade().map_or(false, |l| l.id != id));
    }

    /// Lights that are still alive
    pub fn lights(&self) -> Vec<Arc<Light>> {
        self.lights.read().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn uniform_data(&self) -> LightChannelUniform {
        let mut data = LightChannelUniform::zeroed();
        let lights = self.lights();
        for (slot, light) in lights.iter().take(MAX_LIGHT_NUM).enumerate() {
            data.lights[slot] = light.uniform_data();
        }
        data.count = lights.len().min(MAX_LIGHT_NUM) as u32;
        data
    }
}

impl UniformSource for LightChannel {
    const KIND: UniformKind = UniformKind::LightChannel;
    const SIZE: u64 = std::mem::size_of::<LightChannelUniform>() as u64;

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
    fn test_point_lights_never_cast_shadows() {
        let light = Light::point(1, "bulb", Vec3::Y, Vec3::ONE, 1.0).with_shadow(true);
        assert!(!light.casts_shadow());
        let sun = Light::sun(2, "sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
        assert!(sun.casts_shadow());
        sun.set_cast_shadow(false);
        assert!(!sun.casts_shadow());
    }

    #[test]
    fn test_shadow_slot_flows_into_uniform() {
        let light = Light::spot(3, "spot", Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 2.0, 0.5);
        assert_eq!(light.uniform_data().shadow_slot, -1.0);
        light.set_shadow_slot(Some(1));
        assert_eq!(light.shadow_slot(), Some(1));
        assert_eq!(light.uniform_data().shadow_slot, 1.0);
        assert_eq!(light.uniform_data().kind, 2);
    }

    #[test]
    fn test_straight_down_view_is_finite() {
        let sun = Light::sun(1, "sun", Vec3::NEG_Y, Vec3::ONE, 1.0);
        assert!(sun.view_matrix().is_finite());
        assert!(sun.projection_matrix().is_finite());
    }

    #[test]
    fn test_channel_capacity_and_dead_lights() {
        let channel = LightChannel::new(10, "default");
        let a = Arc::new(Light::point(1, "a", Vec3::ZERO, Vec3::ONE, 1.0));
        let b = Arc::new(Light::point(2, "b", Vec3::ZERO, Vec3::ONE, 1.0));
        let c = Arc::new(Light::point(3, "c", Vec3::ZERO, Vec3::ONE, 1.0));

        assert!(channel.add_light(&a));
        assert!(channel.add_light(&a));
        assert!(channel.add_light(&b));
        assert!(!channel.add_light(&c));
        assert_eq!(channel.uniform_data().count, 2);

        drop(a);
        assert_eq!(channel.lights().len(), 1);
        assert!(channel.add_light(&c));
        assert_eq!(channel.uniform_data().count, 2);
    }
}
