//! Mesh payloads and their GPU counterparts
//!
//! `MeshData` is what the asset side hands over: geometry, raw textures and the
//! names of the material, camera and light channel it should be drawn with. The
//! upload step turns it into a `GpuMesh` that owns buffers, textures and one
//! descriptor set per pass flavor and frame in flight.

use crate::backend::types::*;
use crate::backend::traits::*;
use crate::draw::LightingKey;
use crate::error::RenderResult;
use crate::resources::{BufferManager, GpuTexture, TextureData, TextureKind};
use crate::scene::Camera;
use crate::MAX_LIGHT_NUM;
use glam::{Mat4, Vec2, Vec3};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Mesh payload produced by the asset loader
#[derive(Debug)]
pub struct MeshData {
    name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<TextureData>,
    material: String,
    camera: Option<String>,
    light_channel: Option<String>,
    alive: AtomicBool,
    transform: RwLock<Mat4>,
}

impl MeshData {
    pub fn new(
        name: impl Into<String>,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        material: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            vertices,
            indices,
            textures: Vec::new(),
            material: material.into(),
            camera: None,
            light_channel: None,
            alive: AtomicBool::new(true),
            transform: RwLock::new(Mat4::IDENTITY),
        }
    }

    pub fn with_texture(mut self, texture: TextureData) -> Self {
        self.textures.push(texture);
        self
    }

    /// Draw through a specific camera instead of the scene's main one
    pub fn with_camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    /// Subscribe to a specific light channel instead of the default one
    pub fn with_light_channel(mut self, channel: impl Into<String>) -> Self {
        self.light_channel = Some(channel.into());
        self
    }

    pub fn with_transform(self, transform: Mat4) -> Self {
        *self.transform.write() = transform;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn camera(&self) -> Option<&str> {
        self.camera.as_deref()
    }

    pub fn light_channel(&self) -> Option<&str> {
        self.light_channel.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flag the mesh for removal; the renderer frees it at the next safe point
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn transform(&self) -> Mat4 {
        *self.transform.read()
    }

    pub fn set_transform(&self, transform: Mat4) {
        *self.transform.write() = transform;
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Whether there is no geometry to draw
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Create a cube centered at origin
    pub fn cube(name: impl Into<String>, size: f32, material: impl Into<String>) -> Self {
        let h = size * 0.5;
        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent) in faces {
            let bitangent = normal.cross(tangent);
            let base = vertices.len() as u32;
            let corners = [
                (-1.0, -1.0, Vec2::new(0.0, 1.0)),
                (1.0, -1.0, Vec2::new(1.0, 1.0)),
                (1.0, 1.0, Vec2::new(1.0, 0.0)),
                (-1.0, 1.0, Vec2::new(0.0, 0.0)),
            ];
            for (u, v, uv) in corners {
                let position = (normal + tangent * u + bitangent * v) * h;
                vertices.push(Vertex::new(position, normal, uv).with_tangent(tangent));
            }
            // Two triangles per face
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(name, vertices, indices, material)
    }

    /// Create a plane on the XZ axis
    pub fn plane(name: impl Into<String>, width: f32, depth: f32, material: impl Into<String>) -> Self {
        let (hw, hd) = (width * 0.5, depth * 0.5);
        let vertices = vec![
            Vertex::new(Vec3::new(-hw, 0.0, hd), Vec3::Y, Vec2::new(0.0, 1.0)),
            Vertex::new(Vec3::new(hw, 0.0, hd), Vec3::Y, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(hw, 0.0, -hd), Vec3::Y, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(-hw, 0.0, -hd), Vec3::Y, Vec2::new(0.0, 0.0)),
        ];
        Self::new(name, vertices, vec![0, 1, 2, 0, 2, 3], material)
    }
}

/// Shared inputs for building a `GpuMesh`
pub struct MeshBindings<'a> {
    pub frames_in_flight: usize,
    pub mesh_layout: DescriptorSetLayoutHandle,
    pub depth_layout: DescriptorSetLayoutHandle,
    pub camera: Arc<Camera>,
    pub material_key: u64,
    pub light_channel_key: u64,
    /// Deferred lighting group the mesh writes to the G-buffer, 0 in forward mode
    pub lighting_group: u32,
    pub camera_buffers: &'a [BufferHandle],
    pub material_buffers: &'a [BufferHandle],
    pub light_channel_buffers: &'a [BufferHandle],
    pub shadow_images: [ImageHandle; MAX_LIGHT_NUM],
    pub shadow_sampler: SamplerHandle,
    /// Shadow map set version the images above belong to
    pub shadow_generation: u64,
    pub default_textures: &'a [GpuTexture],
    pub mipmaps: bool,
}

/// A mesh resident on the GPU
pub struct GpuMesh {
    name: String,
    source: Weak<MeshData>,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
    textures: Vec<GpuTexture>,
    bound_textures: Vec<ImageHandle>,
    texture_sampler: Option<SamplerHandle>,
    pool: Option<DescriptorPoolHandle>,
    transform_buffers: Vec<BufferHandle>,
    shadow_buffers: Vec<[Option<BufferHandle>; MAX_LIGHT_NUM]>,
    color_sets: Vec<DescriptorSetHandle>,
    color_set_generation: Vec<u64>,
    depth_sets: Vec<DescriptorSetHandle>,
    shadow_sets: Vec<[Option<DescriptorSetHandle>; MAX_LIGHT_NUM]>,
    camera_buffers: Vec<BufferHandle>,
    material_buffers: Vec<BufferHandle>,
    light_channel_buffers: Vec<BufferHandle>,
    camera: Arc<Camera>,
    material_key: u64,
    light_channel_key: u64,
    lighting_group: u32,
}

impl GpuMesh {
    /// Upload geometry and textures and write every descriptor set
    ///
    /// The caller must already hold one reference on each shared uniform
    /// passed in `shared`; `destroy` gives them back.
    pub fn create<D: RenderDevice>(
        device: &mut D,
        source: &Arc<MeshData>,
        shared: &MeshBindings<'_>,
    ) -> BackendResult<Self> {
        let vertex_buffer = device.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", source.name())),
                size: source.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            source.vertex_bytes(),
        )?;
        let index_buffer = match device.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", source.name())),
                size: source.index_bytes().len() as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            source.index_bytes(),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        let mut mesh = Self {
            name: source.name().to_string(),
            source: Arc::downgrade(source),
            vertex_buffer,
            index_buffer,
            index_count: source.indices.len() as u32,
            textures: Vec::new(),
            bound_textures: Vec::new(),
            texture_sampler: None,
            pool: None,
            transform_buffers: Vec::new(),
            shadow_buffers: Vec::new(),
            color_sets: Vec::new(),
            color_set_generation: Vec::new(),
            depth_sets: Vec::new(),
            shadow_sets: Vec::new(),
            camera_buffers: shared.camera_buffers.to_vec(),
            material_buffers: shared.material_buffers.to_vec(),
            light_channel_buffers: shared.light_channel_buffers.to_vec(),
            camera: Arc::clone(&shared.camera),
            material_key: shared.material_key,
            light_channel_key: shared.light_channel_key,
            lighting_group: shared.lighting_group,
        };

        if let Err(e) = mesh.populate(device, source, shared) {
            mesh.destroy_resources(device);
            return Err(e);
        }
        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} indices, {} textures)",
            mesh.name,
            source.vertices.len(),
            mesh.index_count,
            mesh.textures.len()
        );
        Ok(mesh)
    }

    fn populate<D: RenderDevice>(
        &mut self,
        device: &mut D,
        source: &MeshData,
        shared: &MeshBindings<'_>,
    ) -> BackendResult<()> {
        let frames = shared.frames_in_flight;

        for data in &source.textures {
            let texture = GpuTexture::create(device, &self.name, data, shared.mipmaps)?;
            self.textures.push(texture);
        }
        self.bound_textures = TextureKind::ALL
            .iter()
            .map(|kind| {
                self.textures
                    .iter()
                    .find(|t| t.kind == *kind)
                    .or_else(|| shared.default_textures.get(kind.index()))
                    .map(|t| t.image)
                    .ok_or_else(|| BackendError::InvalidHandle(format!("no default {:?} texture", kind)))
            })
            .collect::<BackendResult<_>>()?;
        self.texture_sampler = self
            .textures
            .first()
            .or_else(|| shared.default_textures.first())
            .map(|t| t.sampler);

        let sets_per_frame = 2 + MAX_LIGHT_NUM as u32;
        let pool = device.create_descriptor_pool(&DescriptorPoolDescriptor {
            max_sets: frames as u32 * sets_per_frame,
            uniform_buffers: frames as u32 * (4 + 1 + MAX_LIGHT_NUM as u32),
            sampled_images: frames as u32 * (MAX_LIGHT_NUM + TextureKind::COUNT) as u32,
            samplers: frames as u32 * 2,
            input_attachments: 0,
        })?;
        self.pool = Some(pool);

        let transform_size = std::mem::size_of::<TransformUniform>() as u64;
        for frame in 0..frames {
            let transform = device.create_buffer(&BufferDescriptor::uniform(
                format!("{} transform frame {}", self.name, frame),
                transform_size,
            ))?;
            self.transform_buffers.push(transform);

            let mut shadow_buffers = [None; MAX_LIGHT_NUM];
            for (slot, entry) in shadow_buffers.iter_mut().enumerate() {
                *entry = Some(device.create_buffer(&BufferDescriptor::uniform(
                    format!("{} shadow {} frame {}", self.name, slot, frame),
                    transform_size,
                ))?);
            }
            self.shadow_buffers.push(shadow_buffers);

            let color = device.allocate_descriptor_set(pool, shared.mesh_layout)?;
            self.color_sets.push(color);
            self.color_set_generation.push(shared.shadow_generation);
            let depth = device.allocate_descriptor_set(pool, shared.depth_layout)?;
            device.update_descriptor_set(
                depth,
                &[DescriptorWrite::UniformBuffer {
                    binding: bindings::TRANSFORM,
                    buffer: transform,
                }],
            )?;
            self.depth_sets.push(depth);

            let mut shadow_sets = [None; MAX_LIGHT_NUM];
            for (slot, entry) in shadow_sets.iter_mut().enumerate() {
                let set = device.allocate_descriptor_set(pool, shared.depth_layout)?;
                if let Some(buffer) = shadow_buffers[slot] {
                    device.update_descriptor_set(
                        set,
                        &[DescriptorWrite::UniformBuffer {
                            binding: bindings::TRANSFORM,
                            buffer,
                        }],
                    )?;
                }
                *entry = Some(set);
            }
            self.shadow_sets.push(shadow_sets);

            self.write_color_set(
                device,
                frame,
                shared.shadow_generation,
                &shared.shadow_images,
                shared.shadow_sampler,
            )?;
        }
        Ok(())
    }

    /// Rewrite the color set of one ring slot, e.g. after the shadow maps changed
    ///
    /// Only call once the slot's fences have been waited.
    pub fn write_color_set<D: RenderDevice>(
        &mut self,
        device: &mut D,
        frame: usize,
        generation: u64,
        shadow_images: &[ImageHandle; MAX_LIGHT_NUM],
        shadow_sampler: SamplerHandle,
    ) -> BackendResult<()> {
        let set = *self
            .color_sets
            .get(frame)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{} color set {}", self.name, frame)))?;

        let mut writes = Vec::with_capacity(4 + MAX_LIGHT_NUM + TextureKind::COUNT + 2);
        let uniforms = [
            (bindings::TRANSFORM, self.transform_buffers.get(frame)),
            (bindings::CAMERA, self.camera_buffers.get(frame)),
            (bindings::MATERIAL, self.material_buffers.get(frame)),
            (bindings::LIGHT_CHANNEL, self.light_channel_buffers.get(frame)),
        ];
        for (binding, buffer) in uniforms {
            if let Some(&buffer) = buffer {
                writes.push(DescriptorWrite::UniformBuffer { binding, buffer });
            }
        }
        for (slot, &image) in shadow_images.iter().enumerate() {
            writes.push(DescriptorWrite::Image {
                binding: bindings::SHADOW_MAP + slot as u32,
                image,
            });
        }
        writes.push(DescriptorWrite::Sampler {
            binding: bindings::SHADOW_SAMPLER,
            sampler: shadow_sampler,
        });
        for (index, &image) in self.bound_textures.iter().enumerate() {
            writes.push(DescriptorWrite::Image {
                binding: bindings::TEXTURE + index as u32,
                image,
            });
        }
        if let Some(sampler) = self.texture_sampler {
            writes.push(DescriptorWrite::Sampler {
                binding: bindings::TEXTURE_SAMPLER,
                sampler,
            });
        }

        device.update_descriptor_set(set, &writes)?;
        if let Some(bound) = self.color_set_generation.get_mut(frame) {
            *bound = generation;
        }
        Ok(())
    }

    /// Shadow map version the color set of `frame` was last written with
    pub fn color_set_generation(&self, frame: usize) -> Option<u64> {
        self.color_set_generation.get(frame).copied()
    }

    /// Refresh the per-mesh transform blocks of one ring slot
    ///
    /// `shadow_views` holds (view, proj) for every occupied shadow slot.
    pub fn update_uniforms<D: RenderDevice>(
        &self,
        device: &mut D,
        frame: usize,
        shadow_views: &[Option<(Mat4, Mat4)>; MAX_LIGHT_NUM],
    ) -> BackendResult<()> {
        let model = self.source.upgrade().map_or(Mat4::IDENTITY, |s| s.transform());

        if let Some(&buffer) = self.transform_buffers.get(frame) {
            let data = TransformUniform {
                model,
                view: self.camera.view_matrix(),
                proj: self.camera.projection_matrix(),
                lighting_group: self.lighting_group,
                _padding: [0; 3],
            };
            device.write_buffer(buffer, 0, bytemuck::bytes_of(&data))?;
        }

        if let Some(buffers) = self.shadow_buffers.get(frame) {
            for (slot, view) in shadow_views.iter().enumerate() {
                if let (Some((view, proj)), Some(buffer)) = (view, buffers[slot]) {
                    let data = TransformUniform {
                        model,
                        view: *view,
                        proj: *proj,
                        lighting_group: self.lighting_group,
                        _padding: [0; 3],
                    };
                    device.write_buffer(buffer, 0, bytemuck::bytes_of(&data))?;
                }
            }
        }
        Ok(())
    }

    /// Bind the mesh's geometry with `set` and issue its indexed draw
    pub fn record_draw<D: RenderDevice>(
        &self,
        device: &mut D,
        command_buffer: CommandBufferHandle,
        pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    ) {
        device.cmd_bind_descriptor_set(command_buffer, pipeline, set);
        device.cmd_bind_vertex_buffer(command_buffer, self.vertex_buffer);
        device.cmd_bind_index_buffer(command_buffer, self.index_buffer);
        device.cmd_draw_indexed(command_buffer, self.index_count);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alive while the payload exists and the scene has not killed it
    pub fn is_alive(&self) -> bool {
        self.source.upgrade().map_or(false, |s| s.is_alive())
    }

    /// Whether this mesh was built from `data`
    pub fn is_built_from(&self, data: &Arc<MeshData>) -> bool {
        std::ptr::eq(self.source.as_ptr(), Arc::as_ptr(data))
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn color_set(&self, frame: usize) -> Option<DescriptorSetHandle> {
        self.color_sets.get(frame).copied()
    }

    pub fn depth_set(&self, frame: usize) -> Option<DescriptorSetHandle> {
        self.depth_sets.get(frame).copied()
    }

    pub fn shadow_set(&self, frame: usize, slot: usize) -> Option<DescriptorSetHandle> {
        self.shadow_sets.get(frame).and_then(|sets| sets.get(slot).copied().flatten())
    }

    pub fn camera(&self) -> &Arc<Camera> {
        &self.camera
    }

    pub fn material_key(&self) -> u64 {
        self.material_key
    }

    pub fn light_channel_key(&self) -> u64 {
        self.light_channel_key
    }

    /// Which deferred lighting draw of its batch shades this mesh
    pub fn lighting_key(&self) -> LightingKey {
        LightingKey {
            camera: self.camera.id(),
            light_channel: self.light_channel_key,
        }
    }

    pub fn lighting_group(&self) -> u32 {
        self.lighting_group
    }

    fn destroy_resources<D: RenderDevice>(&mut self, device: &mut D) {
        if let Some(pool) = self.pool.take() {
            device.destroy_descriptor_pool(pool);
        }
        self.color_sets.clear();
        self.color_set_generation.clear();
        self.depth_sets.clear();
        self.shadow_sets.clear();
        for buffer in self.transform_buffers.drain(..) {
            device.destroy_buffer(buffer);
        }
        for buffers in self.shadow_buffers.drain(..) {
            for buffer in buffers.into_iter().flatten() {
                device.destroy_buffer(buffer);
            }
        }
        for texture in self.textures.drain(..) {
            texture.destroy(device);
        }
        device.destroy_buffer(self.index_buffer);
        device.destroy_buffer(self.vertex_buffer);
    }

    /// Free everything the mesh owns and drop its shared uniform references
    ///
    /// Only call once no frame in flight can read the mesh. All three
    /// references are released even if one fails; the first error is returned.
    pub fn destroy<D: RenderDevice>(mut self, device: &mut D, buffers: &mut BufferManager) -> RenderResult<()> {
        self.destroy_resources(device);
        let camera = buffers.cameras.release(device, self.camera.id());
        let material = buffers.materials.release(device, self.material_key);
        let channel = buffers.light_channels.release(device, self.light_channel_key);
        log::debug!("Destroyed mesh '{}'", self.name);
        camera.and(material).and(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_geometry() {
        let cube = MeshData::cube("cube", 2.0, "rock");
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.abs().max_element() == 1.0));
        // Counter-clockwise winding: the face normal matches the vertex normal
        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[tri[i] as usize]);
            let n = (b.position - a.position).cross(c.position - a.position).normalize();
            assert!(n.dot(a.normal) > 0.99);
        }
    }

    #[test]
    fn test_empty_payload() {
        assert!(MeshData::new("empty", vec![], vec![], "stone").is_empty());
        let plane = MeshData::plane("floor", 1.0, 1.0, "ground");
        assert!(!plane.is_empty());
        assert!(MeshData::new("points", plane.vertices.clone(), vec![], "stone").is_empty());
    }

    #[test]
    fn test_destroy_releases_every_reference() {
        use crate::backend::dummy::{DummyDevice, ResourceKind};
        use crate::draw::{depth_layout_bindings, mesh_layout_bindings};
        use crate::resources::Material;
        use crate::scene::LightChannel;

        let mut device = DummyDevice::new();
        let mut buffers = BufferManager::new();
        let mesh_layout = device.create_descriptor_set_layout(&mesh_layout_bindings()).unwrap();
        let depth_layout = device.create_descriptor_set_layout(&depth_layout_bindings()).unwrap();
        let defaults: Vec<GpuTexture> = TextureKind::ALL
            .iter()
            .map(|&kind| {
                let data = TextureData::solid(kind, kind.default_pixel());
                GpuTexture::create(&mut device, "default", &data, false).unwrap()
            })
            .collect();
        let shadow = device.create_image(&ImageDescriptor::shadow_map("shadow", 4)).unwrap();
        let sampler = device.create_sampler(&SamplerDescriptor::shadow()).unwrap();

        let camera = Arc::new(Camera::new(1, "main", Vec3::Z, Vec3::ZERO));
        let material = Arc::new(Material::new(2, "stone"));
        let channel = Arc::new(LightChannel::new(3, "default"));
        let camera_buffers = buffers.cameras.acquire(&mut device, &camera, 2).unwrap();
        let material_buffers = buffers.materials.acquire(&mut device, &material, 2).unwrap();
        let channel_buffers = buffers.light_channels.acquire(&mut device, &channel, 2).unwrap();

        let data = Arc::new(MeshData::cube("cube", 1.0, "stone"));
        let mesh = GpuMesh::create(
            &mut device,
            &data,
            &MeshBindings {
                frames_in_flight: 2,
                mesh_layout,
                depth_layout,
                camera: Arc::clone(&camera),
                material_key: material.id(),
                light_channel_key: channel.id(),
                lighting_group: 1,
                camera_buffers: &camera_buffers,
                material_buffers: &material_buffers,
                light_channel_buffers: &channel_buffers,
                shadow_images: [shadow; MAX_LIGHT_NUM],
                shadow_sampler: sampler,
                shadow_generation: 0,
                default_textures: &defaults,
                mipmaps: false,
            },
        )
        .unwrap();
        assert_eq!(mesh.lighting_group(), 1);
        assert_eq!(
            mesh.lighting_key(),
            LightingKey {
                camera: 1,
                light_channel: 3
            }
        );

        // The camera reference is gone; material and channel still get released
        buffers.cameras.release(&mut device, camera.id()).unwrap();
        let err = mesh.destroy(&mut device, &mut buffers).unwrap_err();
        assert!(matches!(err, crate::RenderError::DoubleRelease { key: 1, .. }));
        assert_eq!(buffers.materials.refcount(material.id()), 0);
        assert!(buffers.light_channels.is_empty());
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
    }

    #[test]
    fn test_mark_dead() {
        let plane = MeshData::plane("floor", 10.0, 10.0, "ground");
        assert!(plane.is_alive());
        plane.mark_dead();
        assert!(!plane.is_alive());
    }

    #[test]
    fn test_byte_views() {
        let plane = MeshData::plane("floor", 1.0, 1.0, "ground");
        assert_eq!(plane.vertex_bytes().len(), 4 * std::mem::size_of::<Vertex>());
        assert_eq!(plane.index_bytes().len(), 6 * 4);
    }
}
