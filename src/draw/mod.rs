//! Draw batches and their registry
//!
//! A draw batch groups every mesh drawn with one shader variant together with
//! the pipelines built from it. Batches live in a slab and are referenced by
//! `BatchId`; a fixed table of pipeline slots maps slot numbers to batches and
//! bounds how many batches may exist at once.

mod resolver;

pub use resolver::*;

use crate::backend::types::*;
use crate::backend::traits::*;
use crate::error::{RenderError, RenderResult};
use crate::resources::{BufferManager, GpuMesh, TextureKind};
use crate::scene::Camera;
use crate::MAX_LIGHT_NUM;
use crate::MAX_PIPELINE_NUM;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Handle to a draw batch in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(usize);

impl BatchId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bindings of the per-mesh set used by forward and G-buffer output pipelines
pub fn mesh_layout_bindings() -> Vec<LayoutBinding> {
    let mut layout = vec![
        LayoutBinding::new(bindings::TRANSFORM, BindingKind::UniformBuffer, ShaderStages::VERTEX_FRAGMENT),
        LayoutBinding::new(bindings::CAMERA, BindingKind::UniformBuffer, ShaderStages::VERTEX_FRAGMENT),
        LayoutBinding::new(bindings::MATERIAL, BindingKind::UniformBuffer, ShaderStages::FRAGMENT),
        LayoutBinding::new(bindings::LIGHT_CHANNEL, BindingKind::UniformBuffer, ShaderStages::FRAGMENT),
    ];
    for slot in 0..MAX_LIGHT_NUM as u32 {
        layout.push(LayoutBinding::new(
            bindings::SHADOW_MAP + slot,
            BindingKind::SampledImage,
            ShaderStages::FRAGMENT,
        ));
    }
    layout.push(LayoutBinding::new(bindings::SHADOW_SAMPLER, BindingKind::Sampler, ShaderStages::FRAGMENT));
    for index in 0..TextureKind::COUNT as u32 {
        layout.push(LayoutBinding::new(
            bindings::TEXTURE + index,
            BindingKind::SampledImage,
            ShaderStages::FRAGMENT,
        ));
    }
    layout.push(LayoutBinding::new(bindings::TEXTURE_SAMPLER, BindingKind::Sampler, ShaderStages::FRAGMENT));
    layout
}

/// Bindings of the depth-only set used by pre-pass and shadow pipelines
pub fn depth_layout_bindings() -> Vec<LayoutBinding> {
    vec![LayoutBinding::new(
        bindings::TRANSFORM,
        BindingKind::UniformBuffer,
        ShaderStages::VERTEX,
    )]
}

/// Highest deferred lighting group id; ids are stored in a 16-bit float
pub const MAX_LIGHTING_GROUP: u32 = 2048;

/// Meshes of one batch lit together: same camera, same light channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightingKey {
    pub camera: u64,
    pub light_channel: u64,
}

/// Bindings of the deferred lighting set
pub fn lighting_layout_bindings() -> Vec<LayoutBinding> {
    let mut layout = vec![
        LayoutBinding::new(bindings::LIGHTING_CAMERA, BindingKind::UniformBuffer, ShaderStages::FRAGMENT),
        LayoutBinding::new(
            bindings::LIGHTING_LIGHT_CHANNEL,
            BindingKind::UniformBuffer,
            ShaderStages::FRAGMENT,
        ),
    ];
    for slot in 0..MAX_LIGHT_NUM as u32 {
        layout.push(LayoutBinding::new(
            bindings::LIGHTING_SHADOW_MAP + slot,
            BindingKind::SampledImage,
            ShaderStages::FRAGMENT,
        ));
    }
    layout.push(LayoutBinding::new(
        bindings::LIGHTING_SHADOW_SAMPLER,
        BindingKind::Sampler,
        ShaderStages::FRAGMENT,
    ));
    for (index, _) in GBufferAttachment::ALL.iter().enumerate() {
        layout.push(LayoutBinding::new(
            bindings::LIGHTING_GBUFFER + index as u32,
            BindingKind::InputAttachment,
            ShaderStages::FRAGMENT,
        ));
    }
    layout.push(LayoutBinding::new(
        bindings::LIGHTING_GROUP,
        BindingKind::UniformBuffer,
        ShaderStages::FRAGMENT,
    ));
    layout
}

/// Pipelines and layouts built from one shader variant
#[derive(Debug)]
pub struct BatchPipelines {
    pub shader: ShaderHandle,
    pub mesh_layout: DescriptorSetLayoutHandle,
    pub depth_layout: DescriptorSetLayoutHandle,
    pub lighting_layout: Option<DescriptorSetLayoutHandle>,
    /// Forward, or G-buffer output in deferred mode
    pub color: PipelineHandle,
    pub depth: PipelineHandle,
    pub shadow: PipelineHandle,
    pub lighting: Option<PipelineHandle>,
}

#[derive(Default)]
struct PartialPipelines {
    shader: Option<ShaderHandle>,
    layouts: Vec<DescriptorSetLayoutHandle>,
    pipelines: Vec<PipelineHandle>,
}

impl PartialPipelines {
    fn destroy<D: RenderDevice>(self, device: &mut D) {
        for pipeline in self.pipelines {
            device.destroy_pipeline(pipeline);
        }
        for layout in self.layouts {
            device.destroy_descriptor_set_layout(layout);
        }
        if let Some(shader) = self.shader {
            device.destroy_shader(shader);
        }
    }
}

impl BatchPipelines {
    /// Compile `variant` and build every pipeline flavor a batch needs
    ///
    /// Nothing is leaked on failure.
    pub fn build<D: RenderDevice>(device: &mut D, variant: &str, deferred: bool) -> BackendResult<Self> {
        let mut partial = PartialPipelines::default();
        match Self::build_into(device, variant, deferred, &mut partial) {
            Ok(pipelines) => Ok(pipelines),
            Err(e) => {
                partial.destroy(device);
                Err(e)
            }
        }
    }

    fn build_into<D: RenderDevice>(
        device: &mut D,
        variant: &str,
        deferred: bool,
        partial: &mut PartialPipelines,
    ) -> BackendResult<Self> {
        let shader = device.create_shader(variant)?;
        partial.shader = Some(shader);

        let mesh_layout = device.create_descriptor_set_layout(&mesh_layout_bindings())?;
        partial.layouts.push(mesh_layout);
        let depth_layout = device.create_descriptor_set_layout(&depth_layout_bindings())?;
        partial.layouts.push(depth_layout);
        let lighting_layout = if deferred {
            let layout = device.create_descriptor_set_layout(&lighting_layout_bindings())?;
            partial.layouts.push(layout);
            Some(layout)
        } else {
            None
        };

        let mut pipeline = |kind: PipelineKind, layout: DescriptorSetLayoutHandle| -> BackendResult<PipelineHandle> {
            let handle = device.create_pipeline(&PipelineDescriptor {
                label: Some(format!("{} {:?}", variant, kind)),
                kind,
                shader,
                layout,
            })?;
            partial.pipelines.push(handle);
            Ok(handle)
        };

        let color_kind = if deferred {
            PipelineKind::GBufferOutput
        } else {
            PipelineKind::Forward
        };
        let color = pipeline(color_kind, mesh_layout)?;
        let depth = pipeline(PipelineKind::DepthOnly, depth_layout)?;
        let shadow = pipeline(PipelineKind::Shadow, depth_layout)?;
        let lighting = match lighting_layout {
            Some(layout) => Some(pipeline(PipelineKind::GBufferLighting, layout)?),
            None => None,
        };

        Ok(Self {
            shader,
            mesh_layout,
            depth_layout,
            lighting_layout,
            color,
            depth,
            shadow,
            lighting,
        })
    }

    pub fn destroy<D: RenderDevice>(self, device: &mut D) {
        if let Some(lighting) = self.lighting {
            device.destroy_pipeline(lighting);
        }
        device.destroy_pipeline(self.shadow);
        device.destroy_pipeline(self.depth);
        device.destroy_pipeline(self.color);
        if let Some(layout) = self.lighting_layout {
            device.destroy_descriptor_set_layout(layout);
        }
        device.destroy_descriptor_set_layout(self.depth_layout);
        device.destroy_descriptor_set_layout(self.mesh_layout);
        device.destroy_shader(self.shader);
    }
}

/// Resources of one lighting draw in the deferred lighting subpass
///
/// A batch keeps one per `LightingKey` its meshes use. Each holds its own
/// references on the camera and light channel, and a constant buffer with its
/// group id that the lighting shader compares against the G-buffer.
pub struct DeferredLighting {
    group: u32,
    group_buffer: BufferHandle,
    pool: DescriptorPoolHandle,
    sets: Vec<DescriptorSetHandle>,
    set_generation: Vec<u64>,
    camera: Arc<Camera>,
    light_channel_key: u64,
    camera_buffers: Vec<BufferHandle>,
    light_channel_buffers: Vec<BufferHandle>,
}

impl DeferredLighting {
    #[allow(clippy::too_many_arguments)]
    pub fn create<D: RenderDevice>(
        device: &mut D,
        layout: DescriptorSetLayoutHandle,
        group: u32,
        camera: Arc<Camera>,
        camera_buffers: Vec<BufferHandle>,
        light_channel_key: u64,
        light_channel_buffers: Vec<BufferHandle>,
        shadow_generation: u64,
        shadow_images: &[ImageHandle; MAX_LIGHT_NUM],
        shadow_sampler: SamplerHandle,
    ) -> BackendResult<Self> {
        let block = LightingGroupUniform {
            group,
            _padding: [0; 3],
        };
        let group_buffer = device.create_buffer_init(
            &BufferDescriptor::uniform(
                format!("lighting group {}", group),
                std::mem::size_of::<LightingGroupUniform>() as u64,
            ),
            bytemuck::bytes_of(&block),
        )?;

        let frames = camera_buffers.len() as u32;
        let pool = match device.create_descriptor_pool(&DescriptorPoolDescriptor {
            max_sets: frames,
            uniform_buffers: frames * 3,
            sampled_images: frames * MAX_LIGHT_NUM as u32,
            samplers: frames,
            input_attachments: frames * GBufferAttachment::ALL.len() as u32,
        }) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_buffer(group_buffer);
                return Err(e);
            }
        };

        let mut lighting = Self {
            group,
            group_buffer,
            pool,
            sets: Vec::new(),
            set_generation: Vec::new(),
            camera,
            light_channel_key,
            camera_buffers,
            light_channel_buffers,
        };
        let allocated =
            lighting.allocate_sets(device, layout, frames, shadow_generation, shadow_images, shadow_sampler);
        if let Err(e) = allocated {
            device.destroy_descriptor_pool(pool);
            device.destroy_buffer(group_buffer);
            return Err(e);
        }
        Ok(lighting)
    }

    fn allocate_sets<D: RenderDevice>(
        &mut self,
        device: &mut D,
        layout: DescriptorSetLayoutHandle,
        frames: u32,
        shadow_generation: u64,
        shadow_images: &[ImageHandle; MAX_LIGHT_NUM],
        shadow_sampler: SamplerHandle,
    ) -> BackendResult<()> {
        for _ in 0..frames {
            let set = device.allocate_descriptor_set(self.pool, layout)?;
            self.sets.push(set);
            self.set_generation.push(shadow_generation);
        }
        for frame in 0..frames as usize {
            self.write(device, frame, shadow_generation, shadow_images, shadow_sampler)?;
        }
        Ok(())
    }

    /// Rewrite the lighting set of one ring slot
    pub fn write<D: RenderDevice>(
        &mut self,
        device: &mut D,
        frame: usize,
        generation: u64,
        shadow_images: &[ImageHandle; MAX_LIGHT_NUM],
        shadow_sampler: SamplerHandle,
    ) -> BackendResult<()> {
        let (Some(&set), Some(&camera), Some(&channel)) = (
            self.sets.get(frame),
            self.camera_buffers.get(frame),
            self.light_channel_buffers.get(frame),
        ) else {
            return Err(BackendError::InvalidHandle(format!("lighting set {}", frame)));
        };

        let mut writes = vec![
            DescriptorWrite::UniformBuffer {
                binding: bindings::LIGHTING_CAMERA,
                buffer: camera,
            },
            DescriptorWrite::UniformBuffer {
                binding: bindings::LIGHTING_LIGHT_CHANNEL,
                buffer: channel,
            },
        ];
        for (slot, &image) in shadow_images.iter().enumerate() {
            writes.push(DescriptorWrite::Image {
                binding: bindings::LIGHTING_SHADOW_MAP + slot as u32,
                image,
            });
        }
        writes.push(DescriptorWrite::Sampler {
            binding: bindings::LIGHTING_SHADOW_SAMPLER,
            sampler: shadow_sampler,
        });
        for (index, &attachment) in GBufferAttachment::ALL.iter().enumerate() {
            writes.push(DescriptorWrite::InputAttachment {
                binding: bindings::LIGHTING_GBUFFER + index as u32,
                attachment,
            });
        }
        writes.push(DescriptorWrite::UniformBuffer {
            binding: bindings::LIGHTING_GROUP,
            buffer: self.group_buffer,
        });
        device.update_descriptor_set(set, &writes)?;
        if let Some(bound) = self.set_generation.get_mut(frame) {
            *bound = generation;
        }
        Ok(())
    }

    pub fn set(&self, frame: usize) -> Option<DescriptorSetHandle> {
        self.sets.get(frame).copied()
    }

    pub fn set_generation(&self, frame: usize) -> Option<u64> {
        self.set_generation.get(frame).copied()
    }

    pub fn frames(&self) -> usize {
        self.sets.len()
    }

    /// Id written to the G-buffer by the meshes this draw shades
    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn key(&self) -> LightingKey {
        LightingKey {
            camera: self.camera.id(),
            light_channel: self.light_channel_key,
        }
    }

    /// Free the sets and group buffer and drop the shared references
    ///
    /// Every reference is released even if an earlier release fails; the
    /// first error is returned.
    pub fn destroy<D: RenderDevice>(self, device: &mut D, buffers: &mut BufferManager) -> RenderResult<()> {
        device.destroy_descriptor_pool(self.pool);
        device.destroy_buffer(self.group_buffer);
        let camera = buffers.cameras.release(device, self.camera.id());
        let channel = buffers.light_channels.release(device, self.light_channel_key);
        camera.and(channel)
    }
}

/// Meshes sharing one shader variant, plus that variant's GPU objects
pub struct DrawBatch {
    variant: String,
    slot: usize,
    pub pipelines: BatchPipelines,
    pub meshes: Vec<GpuMesh>,
    /// Deferred lighting draws, one per camera and light channel in use
    pub lighting: BTreeMap<LightingKey, DeferredLighting>,
}

impl DrawBatch {
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Pipeline slot assigned at creation
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Detach lighting draws no mesh of the batch uses any more
    pub fn take_unused_lighting(&mut self) -> Vec<DeferredLighting> {
        let unused: Vec<LightingKey> = self
            .lighting
            .keys()
            .filter(|key| !self.meshes.iter().any(|mesh| mesh.lighting_key() == **key))
            .copied()
            .collect();
        unused.into_iter().filter_map(|key| self.lighting.remove(&key)).collect()
    }

    /// Destroy the batch, its remaining meshes and its lighting resources
    ///
    /// Only call once no frame in flight can use the batch.
    pub fn destroy<D: RenderDevice>(self, device: &mut D, buffers: &mut BufferManager) -> RenderResult<()> {
        let mut result = Ok(());
        for mesh in self.meshes {
            if let Err(e) = mesh.destroy(device, buffers) {
                result = Err(e);
            }
        }
        for lighting in self.lighting.into_values() {
            if let Err(e) = lighting.destroy(device, buffers) {
                result = Err(e);
            }
        }
        self.pipelines.destroy(device);
        log::debug!("Destroyed draw batch '{}' (slot {})", self.variant, self.slot);
        result
    }
}

/// Arena of draw batches indexed by `BatchId`
pub struct DrawRegistry {
    batches: Vec<Option<DrawBatch>>,
    by_variant: HashMap<String, BatchId>,
    slots: [Option<BatchId>; MAX_PIPELINE_NUM],
}

impl Default for DrawRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawRegistry {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
            by_variant: HashMap::new(),
            slots: [None; MAX_PIPELINE_NUM],
        }
    }

    /// Batch drawing with `variant`, if one exists
    pub fn find(&self, variant: &str) -> Option<BatchId> {
        self.by_variant.get(variant).copied()
    }

    pub fn get(&self, id: BatchId) -> Option<&DrawBatch> {
        self.batches.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: BatchId) -> Option<&mut DrawBatch> {
        self.batches.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Lowest unassigned pipeline slot
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Register a new batch in the lowest free slot
    ///
    /// On exhaustion the pipelines are handed back so the caller can free them.
    pub fn insert(
        &mut self,
        variant: &str,
        pipelines: BatchPipelines,
    ) -> Result<BatchId, (RenderError, BatchPipelines)> {
        let Some(slot) = self.free_slot() else {
            return Err((
                RenderError::PipelineSlotsExhausted {
                    max: MAX_PIPELINE_NUM,
                },
                pipelines,
            ));
        };

        let batch = DrawBatch {
            variant: variant.to_string(),
            slot,
            pipelines,
            meshes: Vec::new(),
            lighting: BTreeMap::new(),
        };
        let id = match self.batches.iter().position(Option::is_none) {
            Some(index) => {
                self.batches[index] = Some(batch);
                BatchId(index)
            }
            None => {
                self.batches.push(Some(batch));
                BatchId(self.batches.len() - 1)
            }
        };
        self.slots[slot] = Some(id);
        self.by_variant.insert(variant.to_string(), id);
        log::info!("Created draw batch '{}' {} in pipeline slot {}", variant, id, slot);
        Ok(id)
    }

    /// Unregister a batch; the caller owns its destruction
    pub fn remove(&mut self, id: BatchId) -> RenderResult<DrawBatch> {
        let batch = self
            .batches
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(RenderError::UnknownBatch(id.0))?;
        self.slots[batch.slot] = None;
        self.by_variant.remove(&batch.variant);
        Ok(batch)
    }

    /// Batch ids in pipeline slot order
    pub fn ids(&self) -> Vec<BatchId> {
        self.slots.iter().flatten().copied().collect()
    }

    /// Batches in pipeline slot order
    pub fn iter(&self) -> impl Iterator<Item = &DrawBatch> {
        self.slots.iter().flatten().filter_map(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.by_variant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_variant.is_empty()
    }

    pub fn mesh_count(&self) -> usize {
        self.iter().map(|b| b.meshes.len()).sum()
    }

    /// Detach every mesh whose scene object died
    pub fn take_dead_meshes(&mut self) -> Vec<GpuMesh> {
        let mut dead = Vec::new();
        for batch in self.batches.iter_mut().flatten() {
            let (alive, gone): (Vec<_>, Vec<_>) = batch.meshes.drain(..).partition(GpuMesh::is_alive);
            batch.meshes = alive;
            dead.extend(gone);
        }
        dead
    }

    /// Detach the lighting draws of every batch that no mesh uses any more
    pub fn take_unused_lighting(&mut self) -> Vec<DeferredLighting> {
        self.batches
            .iter_mut()
            .flatten()
            .flat_map(DrawBatch::take_unused_lighting)
            .collect()
    }

    /// Lowest deferred lighting group id not used by any batch
    ///
    /// Ids start at 1; 0 marks pixels no lighting draw shades.
    pub fn free_lighting_group(&self) -> Option<u32> {
        let used: BTreeSet<u32> = self
            .iter()
            .flat_map(|batch| batch.lighting.values().map(DeferredLighting::group))
            .collect();
        (1..=MAX_LIGHTING_GROUP).find(|group| !used.contains(group))
    }

    /// Unregister every batch that has no meshes left
    pub fn take_empty_batches(&mut self) -> Vec<DrawBatch> {
        let empty: Vec<BatchId> = self
            .ids()
            .into_iter()
            .filter(|&id| self.get(id).map_or(false, DrawBatch::is_empty))
            .collect();
        empty.into_iter().filter_map(|id| self.remove(id).ok()).collect()
    }

    /// Unregister everything, for teardown
    pub fn drain(&mut self) -> Vec<DrawBatch> {
        self.ids().into_iter().filter_map(|id| self.remove(id).ok()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, ResourceKind};

    #[test]
    fn test_build_failure_leaks_nothing() {
        let mut device = DummyDevice::new().with_shaders(&[]);
        assert!(BatchPipelines::build(&mut device, "pbr", true).is_err());
        assert_eq!(device.live_count(ResourceKind::Shader), 0);
        assert_eq!(device.live_count(ResourceKind::DescriptorSetLayout), 0);
    }

    #[test]
    fn test_build_creates_every_flavor() {
        let mut device = DummyDevice::new();
        let forward = BatchPipelines::build(&mut device, "unlit", false).unwrap();
        assert!(forward.lighting.is_none());
        assert_eq!(device.live_count(ResourceKind::Pipeline), 3);

        let deferred = BatchPipelines::build(&mut device, "pbr", true).unwrap();
        assert!(deferred.lighting.is_some());
        assert_eq!(device.live_count(ResourceKind::Pipeline), 7);

        forward.destroy(&mut device);
        deferred.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::Pipeline), 0);
        assert_eq!(device.live_count(ResourceKind::Shader), 0);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_slots_are_reused_lowest_first() {
        let mut device = DummyDevice::new();
        let mut registry = DrawRegistry::new();
        let mut ids = Vec::new();
        for variant in ["a", "b", "c"] {
            let pipelines = BatchPipelines::build(&mut device, variant, false).unwrap();
            ids.push(registry.insert(variant, pipelines).ok().unwrap());
        }
        let removed = registry.remove(ids[1]).unwrap();
        assert_eq!(removed.slot(), 1);
        removed.pipelines.destroy(&mut device);
        assert!(registry.find("b").is_none());

        let pipelines = BatchPipelines::build(&mut device, "d", false).unwrap();
        let d = registry.insert("d", pipelines).ok().unwrap();
        assert_eq!(registry.get(d).unwrap().slot(), 1);
        let order: Vec<_> = registry.iter().map(|b| b.variant().to_string()).collect();
        assert_eq!(order, ["a", "d", "c"]);
    }

    #[test]
    fn test_insert_past_capacity_hands_pipelines_back() {
        let mut device = DummyDevice::new();
        let mut registry = DrawRegistry::new();
        for i in 0..MAX_PIPELINE_NUM {
            let variant = format!("v{}", i);
            let pipelines = BatchPipelines::build(&mut device, &variant, false).unwrap();
            assert!(registry.insert(&variant, pipelines).is_ok());
        }
        let pipelines = BatchPipelines::build(&mut device, "overflow", false).unwrap();
        let Err((err, pipelines)) = registry.insert("overflow", pipelines) else {
            panic!("insert past capacity must fail");
        };
        assert!(matches!(err, RenderError::PipelineSlotsExhausted { max: MAX_PIPELINE_NUM }));
        pipelines.destroy(&mut device);
        assert_eq!(registry.len(), MAX_PIPELINE_NUM);
    }

    #[test]
    fn test_empty_batches_are_taken() {
        let mut device = DummyDevice::new();
        let mut registry = DrawRegistry::new();
        let pipelines = BatchPipelines::build(&mut device, "unlit", false).unwrap();
        registry.insert("unlit", pipelines).ok().unwrap();

        let empty = registry.take_empty_batches();
        assert_eq!(empty.len(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.free_slot(), Some(0));
    }

    #[test]
    fn test_remove_unknown_batch() {
        let mut registry = DrawRegistry::new();
        assert!(matches!(
            registry.remove(BatchId(4)),
            Err(RenderError::UnknownBatch(4))
        ));
    }

    fn lighting_for(
        device: &mut DummyDevice,
        buffers: &mut BufferManager,
        layout: DescriptorSetLayoutHandle,
        group: u32,
        camera: &Arc<Camera>,
        channel: &Arc<crate::scene::LightChannel>,
    ) -> DeferredLighting {
        let image = device.create_image(&ImageDescriptor::shadow_map("shadow", 4)).unwrap();
        let sampler = device.create_sampler(&SamplerDescriptor::shadow()).unwrap();
        let camera_buffers = buffers.cameras.acquire(device, camera, 2).unwrap();
        let channel_buffers = buffers.light_channels.acquire(device, channel, 2).unwrap();
        DeferredLighting::create(
            device,
            layout,
            group,
            Arc::clone(camera),
            camera_buffers,
            channel.id(),
            channel_buffers,
            0,
            &[image; MAX_LIGHT_NUM],
            sampler,
        )
        .unwrap()
    }

    #[test]
    fn test_lighting_groups_take_the_lowest_free_id() {
        let mut device = DummyDevice::new();
        let mut buffers = BufferManager::new();
        let mut registry = DrawRegistry::new();
        let pipelines = BatchPipelines::build(&mut device, "pbr", true).unwrap();
        let layout = pipelines.lighting_layout.unwrap();
        let id = registry.insert("pbr", pipelines).ok().unwrap();
        assert_eq!(registry.free_lighting_group(), Some(1));

        let camera = Arc::new(Camera::new(1, "main", glam::Vec3::Z, glam::Vec3::ZERO));
        for (group, channel_id) in [(1, 10), (3, 11)] {
            let channel = Arc::new(crate::scene::LightChannel::new(channel_id, "channel"));
            let lighting = lighting_for(&mut device, &mut buffers, layout, group, &camera, &channel);
            assert_eq!(lighting.key().light_channel, channel_id);
            registry.get_mut(id).unwrap().lighting.insert(lighting.key(), lighting);
        }
        assert_eq!(registry.free_lighting_group(), Some(2));

        // No mesh uses either draw
        let unused = registry.take_unused_lighting();
        assert_eq!(unused.len(), 2);
        assert_eq!(registry.free_lighting_group(), Some(1));
        for lighting in unused {
            lighting.destroy(&mut device, &mut buffers).unwrap();
        }
        assert_eq!(buffers.cameras.refcount(1), 0);
        assert!(buffers.light_channels.is_empty());
    }

    #[test]
    fn test_lighting_destroy_releases_every_reference() {
        let mut device = DummyDevice::new();
        let mut buffers = BufferManager::new();
        let pipelines = BatchPipelines::build(&mut device, "pbr", true).unwrap();
        let layout = pipelines.lighting_layout.unwrap();
        let camera = Arc::new(Camera::new(1, "main", glam::Vec3::Z, glam::Vec3::ZERO));
        let channel = Arc::new(crate::scene::LightChannel::new(2, "default"));
        let lighting = lighting_for(&mut device, &mut buffers, layout, 1, &camera, &channel);

        // Camera reference already gone: its release fails, the channel's must still happen
        buffers.cameras.release(&mut device, camera.id()).unwrap();
        let err = lighting.destroy(&mut device, &mut buffers).unwrap_err();
        assert!(matches!(err, RenderError::DoubleRelease { key: 1, .. }));
        assert!(buffers.light_channels.is_empty());
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
    }
}
