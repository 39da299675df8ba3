//! Frame scheduler
//!
//! `Renderer` drives one frame at a time through a fixed sequence:
//! wait fences, acquire, reset fences, depth pre-pass (or the standalone shadow
//! layout transition), one shadow pass per shadow-casting light chained by
//! semaphores, the forward or deferred color pass, present. Each ring slot of
//! the frames-in-flight ring owns its own command buffers, semaphores and
//! fences; resources leaving the frame loop go through a retire queue.

mod frame;
mod retire;
mod shadow;

pub use frame::FrameSync;
pub use retire::{RetireQueue, Retired};
pub use shadow::ShadowState;

use crate::backend::types::*;
use crate::backend::traits::*;
use crate::config::RenderSettings;
use crate::draw::{self, DeferredLighting, DrawRegistry, LightingKey, MAX_LIGHTING_GROUP};
use crate::error::{RenderError, RenderResult};
use crate::resources::{
    BufferManager, DrainOutcome, GpuMesh, GpuTexture, Material, MeshBindings, MeshData, TextureData,
    TextureKind, UploadQueue, UploadStatus,
};
use crate::scene::{Camera, Light, LightChannel, Scene};
use crate::MAX_LIGHT_NUM;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// What `draw_frame` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented
    Presented,
    /// The swapchain was rebuilt; if acquisition failed nothing was submitted
    SwapchainRecreated,
    /// The surface has zero area; nothing was submitted
    Skipped,
}

/// Fallback images and samplers bound where a mesh or slot has nothing of its own
struct Defaults {
    textures: Vec<GpuTexture>,
    /// 1x1 depth image bound to unoccupied shadow slots
    shadow_placeholder: ImageHandle,
    shadow_sampler: SamplerHandle,
}

impl Defaults {
    fn create<D: RenderDevice>(device: &mut D) -> BackendResult<Self> {
        let mut textures = Vec::with_capacity(TextureKind::COUNT);
        for kind in TextureKind::ALL {
            let data = TextureData::solid(kind, kind.default_pixel());
            match GpuTexture::create(device, "default", &data, false) {
                Ok(texture) => textures.push(texture),
                Err(e) => {
                    for texture in textures {
                        texture.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        let shadow_placeholder = match device.create_image(&ImageDescriptor::shadow_map("shadow placeholder", 1)) {
            Ok(image) => image,
            Err(e) => {
                for texture in textures {
                    texture.destroy(device);
                }
                return Err(e);
            }
        };
        let shadow_sampler = match device.create_sampler(&SamplerDescriptor::shadow()) {
            Ok(sampler) => sampler,
            Err(e) => {
                device.destroy_image(shadow_placeholder);
                for texture in textures {
                    texture.destroy(device);
                }
                return Err(e);
            }
        };

        Ok(Self {
            textures,
            shadow_placeholder,
            shadow_sampler,
        })
    }

    fn destroy<D: RenderDevice>(self, device: &mut D) {
        device.destroy_sampler(self.shadow_sampler);
        device.destroy_image(self.shadow_placeholder);
        for texture in self.textures {
            texture.destroy(device);
        }
    }
}

/// Deferred lighting draw a new mesh joins
enum LightingGroup {
    Forward,
    Existing(u32),
    Missing(DescriptorSetLayoutHandle),
}

/// Shared uniform buffers taken for one mesh
struct SharedRefs {
    camera: Vec<BufferHandle>,
    material: Vec<BufferHandle>,
    light_channel: Vec<BufferHandle>,
}

fn missing(what: String) -> RenderError {
    RenderError::Backend(BackendError::InvalidHandle(what))
}

/// The frame scheduler
pub struct Renderer<D: RenderDevice> {
    device: D,
    settings: RenderSettings,
    scene: Arc<Scene>,
    uploads: Arc<UploadQueue>,
    buffers: BufferManager,
    registry: DrawRegistry,
    frames: Vec<FrameSync>,
    /// Keyed by light id; iteration order is the shadow chain order
    shadows: BTreeMap<u64, ShadowState>,
    shadow_slots: [Option<u64>; MAX_LIGHT_NUM],
    /// Bumped whenever the set of shadow images changes
    shadow_generation: u64,
    shadow_overflow_warned: bool,
    defaults: Defaults,
    retired: RetireQueue,
    current_frame: usize,
    frame_number: u64,
    framebuffer_resized: bool,
}

impl<D: RenderDevice> Renderer<D> {
    /// Create the frame ring and default resources on top of `device`
    pub fn new(
        mut device: D,
        settings: RenderSettings,
        scene: Arc<Scene>,
        uploads: Arc<UploadQueue>,
    ) -> RenderResult<Self> {
        let settings = settings.validate()?;
        let frames_in_flight = settings.frames_in_flight();

        let frames = FrameSync::create_ring(&mut device, frames_in_flight)?;
        let defaults = match Defaults::create(&mut device) {
            Ok(defaults) => defaults,
            Err(e) => {
                for frame in frames {
                    frame.destroy(&mut device);
                }
                return Err(e.into());
            }
        };

        log::info!(
            "Renderer ready: {} frames in flight, z-prepass {}, shadow maps {}, deferred {}, {}x MSAA",
            frames_in_flight,
            settings.enable_z_prepass,
            settings.enable_shadow_map,
            settings.enable_deferred,
            settings.msaa_samples(device.max_msaa_samples())
        );

        Ok(Self {
            device,
            settings,
            scene,
            uploads,
            buffers: BufferManager::new(),
            registry: DrawRegistry::new(),
            frames,
            shadows: BTreeMap::new(),
            shadow_slots: [None; MAX_LIGHT_NUM],
            shadow_generation: 0,
            shadow_overflow_warned: false,
            defaults,
            retired: RetireQueue::new(frames_in_flight),
            current_frame: 0,
            frame_number: 0,
            framebuffer_resized: false,
        })
    }

    /// Queue a mesh for upload; callable from any thread holding the queue
    pub fn parse_mesh_data(&self, mesh: &Arc<MeshData>) {
        self.uploads.enqueue(mesh);
    }

    /// Upload at most one queued mesh without blocking on the queue lock
    pub fn pump_uploads(&mut self) -> RenderResult<DrainOutcome> {
        let uploads = Arc::clone(&self.uploads);
        uploads.try_drain_one(|mesh| self.upload_mesh(mesh))
    }

    /// Request a swapchain rebuild after the next present
    pub fn notify_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Advance the pipeline by one frame
    ///
    /// `lights` holds every active light by id; lights that cast shadows get a
    /// shadow map, chained in id order.
    pub fn draw_frame(&mut self, lights: &BTreeMap<u64, Weak<Light>>) -> RenderResult<FrameStatus> {
        if self.device.surface_extent().is_zero_area() {
            self.framebuffer_resized = true;
            self.pump_uploads()?;
            return Ok(FrameStatus::Skipped);
        }

        self.sync_shadows(lights)?;

        let f = self.current_frame;
        let sync = *self
            .frames
            .get(f)
            .ok_or_else(|| missing(format!("frame slot {}", f)))?;
        let fences = self.frame_fences(f, &sync)?;
        self.device.wait_for_fences(&fences)?;
        self.retired
            .release_ready(&mut self.device, &mut self.buffers, self.frame_number)?;

        self.update_frame(f)?;

        let image_index = match self.device.acquire_next_image(sync.image_available)? {
            AcquireOutcome::OutOfDate => {
                log::warn!("Swapchain out of date on acquire, recreating");
                self.recreate_swapchain()?;
                return Ok(FrameStatus::SwapchainRecreated);
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.framebuffer_resized = true;
                }
                image_index
            }
        };
        self.device.reset_fences(&fences)?;

        let shadow_images: Vec<ImageHandle> = self.shadows.values().map(|s| s.image).collect();
        let mut wait = sync.image_available;

        if self.settings.uses_depth_fence() {
            if self.record_depth_step(f, &sync, image_index, &shadow_images)? {
                wait = sync.zprepass_finished;
            }
        }
        if self.settings.enable_shadow_map {
            wait = self.record_shadow_chain(f, wait)?;
        }
        self.record_color_pass(f, &sync, image_index, &shadow_images, wait)?;

        let outcome = self.device.present(image_index, sync.render_finished)?;
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        self.frame_number += 1;

        if outcome != PresentOutcome::Optimal || self.framebuffer_resized {
            log::debug!("Present returned {:?}, recreating swapchain", outcome);
            self.recreate_swapchain()?;
            return Ok(FrameStatus::SwapchainRecreated);
        }
        Ok(FrameStatus::Presented)
    }

    /// Fences guarding ring slot `frame`
    fn frame_fences(&self, frame: usize, sync: &FrameSync) -> RenderResult<Vec<FenceHandle>> {
        let mut fences = vec![sync.color_fence];
        if self.settings.uses_depth_fence() {
            fences.push(sync.depth_fence);
        }
        for shadow in self.shadows.values() {
            fences.push(
                shadow
                    .fence(frame)
                    .ok_or_else(|| missing(format!("shadow fence {} of light {}", frame, shadow.light_id())))?,
            );
        }
        Ok(fences)
    }

    /// Create shadow states for new casters and retire those of lights that
    /// stopped casting or disappeared
    fn sync_shadows(&mut self, lights: &BTreeMap<u64, Weak<Light>>) -> RenderResult<()> {
        if !self.settings.enable_shadow_map {
            return Ok(());
        }

        let casters: BTreeMap<u64, Arc<Light>> = lights
            .iter()
            .filter_map(|(&id, light)| light.upgrade().map(|light| (id, light)))
            .filter(|(_, light)| light.casts_shadow())
            .collect();
        let mut changed = false;

        let gone: Vec<u64> = self
            .shadows
            .keys()
            .filter(|id| !casters.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(state) = self.shadows.remove(&id) {
                state.wait(&mut self.device)?;
                self.shadow_slots[state.slot()] = None;
                if let Some(light) = state.light() {
                    light.set_shadow_slot(None);
                }
                log::debug!("Retiring shadow map of light {} (slot {})", id, state.slot());
                self.retired.push(self.frame_number, Retired::Shadow(state));
                changed = true;
            }
        }

        let mut overflow = Vec::new();
        for (&id, light) in &casters {
            if self.shadows.contains_key(&id) {
                continue;
            }
            let Some(slot) = self.shadow_slots.iter().position(Option::is_none) else {
                overflow.push(light.name().to_string());
                continue;
            };
            let state = ShadowState::create(
                &mut self.device,
                light,
                slot,
                self.settings.shadow_map_resolution,
                self.settings.frames_in_flight(),
            )?;
            light.set_shadow_slot(Some(slot));
            self.shadow_slots[slot] = Some(id);
            self.shadows.insert(id, state);
            changed = true;
        }

        if overflow.is_empty() {
            self.shadow_overflow_warned = false;
        } else if !self.shadow_overflow_warned {
            log::warn!(
                "Only {} shadow maps available; lights {:?} are lit without shadows",
                MAX_LIGHT_NUM,
                overflow
            );
            self.shadow_overflow_warned = true;
        }

        if changed {
            self.shadow_generation += 1;
        }
        Ok(())
    }

    /// Image bound to each shadow slot
    fn shadow_slot_images(&self) -> [ImageHandle; MAX_LIGHT_NUM] {
        let mut images = [self.defaults.shadow_placeholder; MAX_LIGHT_NUM];
        for shadow in self.shadows.values() {
            if let Some(image) = images.get_mut(shadow.slot()) {
                *image = shadow.image;
            }
        }
        images
    }

    /// Per-frame bookkeeping once ring slot `frame` is free
    fn update_frame(&mut self, frame: usize) -> RenderResult<()> {
        for mesh in self.registry.take_dead_meshes() {
            log::debug!("Retiring mesh '{}'", mesh.name());
            self.retired.push(self.frame_number, Retired::Mesh(mesh));
        }
        for lighting in self.registry.take_unused_lighting() {
            log::debug!("Retiring deferred lighting group {}", lighting.group());
            self.retired.push(self.frame_number, Retired::Lighting(lighting));
        }
        for batch in self.registry.take_empty_batches() {
            log::debug!("Retiring empty draw batch '{}' (slot {})", batch.variant(), batch.slot());
            self.retired.push(self.frame_number, Retired::Batch(batch));
        }

        let uploads = Arc::clone(&self.uploads);
        uploads.drain_one(|mesh| self.upload_mesh(mesh))?;

        self.buffers.refresh(&mut self.device, frame)?;

        let mut shadow_views = [None; MAX_LIGHT_NUM];
        for shadow in self.shadows.values() {
            if let Some(view) = shadow_views.get_mut(shadow.slot()) {
                *view = shadow.view_projection();
            }
        }
        let images = self.shadow_slot_images();
        let generation = self.shadow_generation;
        let sampler = self.defaults.shadow_sampler;

        for id in self.registry.ids() {
            let Some(batch) = self.registry.get_mut(id) else {
                continue;
            };
            for mesh in batch.meshes.iter_mut() {
                if mesh.color_set_generation(frame) != Some(generation) {
                    mesh.write_color_set(&mut self.device, frame, generation, &images, sampler)?;
                }
                mesh.update_uniforms(&mut self.device, frame, &shadow_views)?;
            }
            for lighting in batch.lighting.values_mut() {
                if lighting.set_generation(frame) != Some(generation) {
                    lighting.write(&mut self.device, frame, generation, &images, sampler)?;
                }
            }
        }
        Ok(())
    }

    /// Record and submit the depth pre-pass, or the standalone transition of
    /// the shadow maps into depth attachment layout
    ///
    /// Returns whether the submission signals `zprepass_finished`.
    fn record_depth_step(
        &mut self,
        frame: usize,
        sync: &FrameSync,
        image_index: u32,
        shadow_images: &[ImageHandle],
    ) -> RenderResult<bool> {
        let cb = sync.zprepass_cb;
        let prepass = self.settings.enable_z_prepass;

        self.device.begin_command_buffer(cb)?;
        if !shadow_images.is_empty() {
            self.device
                .cmd_transition_images(cb, shadow_images, LayoutTransition::ToDepthAttachment);
        }
        if prepass {
            self.device.cmd_begin_pass(
                cb,
                &PassBegin {
                    kind: PassKind::DepthPrepass,
                    target: PassTarget::Swapchain(image_index),
                },
            );
            for batch in self.registry.iter() {
                self.device.cmd_bind_pipeline(cb, batch.pipelines.depth);
                for mesh in &batch.meshes {
                    if let Some(set) = mesh.depth_set(frame) {
                        mesh.record_draw(&mut self.device, cb, batch.pipelines.depth, set);
                    }
                }
            }
            self.device.cmd_end_pass(cb);
        }
        self.device.end_command_buffer(cb)?;

        let (wait, signal) = if prepass {
            (Some(sync.image_available), Some(sync.zprepass_finished))
        } else {
            (None, None)
        };
        self.device.submit(&SubmitInfo {
            command_buffer: cb,
            wait,
            signal,
            fence: Some(sync.depth_fence),
        })?;
        Ok(prepass)
    }

    /// One shadow pass per light, each waiting on the previous signal
    ///
    /// Returns the semaphore the color pass has to wait on.
    fn record_shadow_chain(&mut self, frame: usize, mut wait: SemaphoreHandle) -> RenderResult<SemaphoreHandle> {
        let bias = self.settings.depth_bias();
        for shadow in self.shadows.values() {
            let (Some(cb), Some(fence), Some(finished)) = (
                shadow.command_buffer(frame),
                shadow.fence(frame),
                shadow.finished(frame),
            ) else {
                return Err(missing(format!("shadow sync {} of light {}", frame, shadow.light_id())));
            };

            self.device.begin_command_buffer(cb)?;
            self.device.cmd_begin_pass(
                cb,
                &PassBegin {
                    kind: PassKind::Shadow,
                    target: PassTarget::Offscreen(shadow.framebuffer),
                },
            );
            self.device.cmd_set_depth_bias(cb, bias);
            for batch in self.registry.iter() {
                self.device.cmd_bind_pipeline(cb, batch.pipelines.shadow);
                for mesh in &batch.meshes {
                    if let Some(set) = mesh.shadow_set(frame, shadow.slot()) {
                        mesh.record_draw(&mut self.device, cb, batch.pipelines.shadow, set);
                    }
                }
            }
            self.device.cmd_end_pass(cb);
            self.device.end_command_buffer(cb)?;

            self.device.submit(&SubmitInfo {
                command_buffer: cb,
                wait: Some(wait),
                signal: Some(finished),
                fence: Some(fence),
            })?;
            wait = finished;
        }
        Ok(wait)
    }

    fn record_color_pass(
        &mut self,
        frame: usize,
        sync: &FrameSync,
        image_index: u32,
        shadow_images: &[ImageHandle],
        wait: SemaphoreHandle,
    ) -> RenderResult<()> {
        let cb = sync.color_cb;
        let deferred = self.settings.enable_deferred;

        self.device.begin_command_buffer(cb)?;
        if !shadow_images.is_empty() {
            self.device
                .cmd_transition_images(cb, shadow_images, LayoutTransition::ToShaderRead);
        }
        self.device.cmd_begin_pass(
            cb,
            &PassBegin {
                kind: if deferred { PassKind::Deferred } else { PassKind::Forward },
                target: PassTarget::Swapchain(image_index),
            },
        );
        for batch in self.registry.iter() {
            self.device.cmd_bind_pipeline(cb, batch.pipelines.color);
            for mesh in &batch.meshes {
                if let Some(set) = mesh.color_set(frame) {
                    mesh.record_draw(&mut self.device, cb, batch.pipelines.color, set);
                }
            }
        }
        if deferred {
            self.device.cmd_next_subpass(cb);
            for batch in self.registry.iter() {
                let Some(pipeline) = batch.pipelines.lighting else {
                    continue;
                };
                self.device.cmd_bind_pipeline(cb, pipeline);
                for lighting in batch.lighting.values() {
                    if let Some(set) = lighting.set(frame) {
                        self.device.cmd_bind_descriptor_set(cb, pipeline, set);
                        // Fullscreen triangle, shading only this group's pixels
                        self.device.cmd_draw(cb, 3);
                    }
                }
            }
        }
        self.device.cmd_end_pass(cb);
        self.device.end_command_buffer(cb)?;

        self.device.submit(&SubmitInfo {
            command_buffer: cb,
            wait: Some(wait),
            signal: Some(sync.render_finished),
            fence: Some(sync.color_fence),
        })?;
        Ok(())
    }

    /// Rebuild swapchain-sized targets and everything bound to them
    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        if self.device.surface_extent().is_zero_area() {
            self.framebuffer_resized = true;
            return Ok(());
        }
        self.device.wait_idle()?;
        self.device.recreate_swapchain()?;
        self.framebuffer_resized = false;

        let extent = self.device.swapchain_extent();
        let images = self.shadow_slot_images();
        let generation = self.shadow_generation;
        let sampler = self.defaults.shadow_sampler;
        for id in self.registry.ids() {
            let Some(batch) = self.registry.get_mut(id) else {
                continue;
            };
            for mesh in &batch.meshes {
                mesh.camera().set_aspect(extent.width as f32, extent.height as f32);
            }
            for lighting in batch.lighting.values_mut() {
                for frame in 0..lighting.frames() {
                    lighting.write(&mut self.device, frame, generation, &images, sampler)?;
                }
            }
        }
        log::info!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Turn one payload into a `GpuMesh` inside the batch the resolver picks
    fn upload_mesh(&mut self, data: Arc<MeshData>) -> RenderResult<UploadStatus> {
        let already = self
            .registry
            .iter()
            .any(|batch| batch.meshes.iter().any(|mesh| mesh.is_built_from(&data)));
        if already {
            log::debug!("Mesh '{}' is already resident", data.name());
            return Ok(UploadStatus::Uploaded);
        }
        if data.is_empty() {
            log::warn!(
                "Mesh '{}' has {} vertices and {} indices, nothing to draw; skipping",
                data.name(),
                data.vertices.len(),
                data.indices.len()
            );
            return Ok(UploadStatus::Uploaded);
        }

        let Some(material) = self.scene.material(data.material()).filter(|m| m.is_ready()) else {
            log::debug!("Mesh '{}': material '{}' not ready", data.name(), data.material());
            return Ok(UploadStatus::NotReady);
        };
        let Some(camera) = self.scene.resolve_camera(data.camera()) else {
            log::debug!("Mesh '{}': no camera yet", data.name());
            return Ok(UploadStatus::NotReady);
        };
        let Some(channel) = self.scene.resolve_light_channel(data.light_channel()) else {
            log::debug!("Mesh '{}': no light channel {:?}", data.name(), data.light_channel());
            return Ok(UploadStatus::NotReady);
        };

        let variants = material.shaders();
        let resolution = draw::resolve(
            &mut self.device,
            &mut self.registry,
            material.name(),
            &variants,
            self.settings.enable_deferred,
        )?;
        let batch_id = resolution.batch();
        let key = LightingKey {
            camera: camera.id(),
            light_channel: channel.id(),
        };
        let (mesh_layout, depth_layout, lighting) = {
            let batch = self
                .registry
                .get(batch_id)
                .ok_or(RenderError::UnknownBatch(batch_id.index()))?;
            let lighting = match batch.pipelines.lighting_layout {
                Some(layout) => match batch.lighting.get(&key) {
                    Some(existing) => LightingGroup::Existing(existing.group()),
                    None => LightingGroup::Missing(layout),
                },
                None => LightingGroup::Forward,
            };
            (batch.pipelines.mesh_layout, batch.pipelines.depth_layout, lighting)
        };

        let extent = self.device.swapchain_extent();
        camera.set_aspect(extent.width as f32, extent.height as f32);

        let lighting_group = match lighting {
            LightingGroup::Forward => 0,
            LightingGroup::Existing(group) => group,
            LightingGroup::Missing(layout) => {
                let group = self.registry.free_lighting_group().ok_or_else(|| {
                    RenderError::Config(format!(
                        "more than {} deferred lighting groups (batch, camera, light channel)",
                        MAX_LIGHTING_GROUP
                    ))
                })?;
                let lighting = self.create_lighting(layout, group, &camera, &channel)?;
                if let Some(batch) = self.registry.get_mut(batch_id) {
                    log::debug!(
                        "Batch '{}' lights camera '{}' with channel '{}' as group {}",
                        batch.variant(),
                        camera.name(),
                        channel.name(),
                        group
                    );
                    batch.lighting.insert(key, lighting);
                }
                group
            }
        };

        let shared = self.acquire_shared(&camera, &material, &channel)?;
        let frames_in_flight = self.settings.frames_in_flight();
        let shadow_images = self.shadow_slot_images();
        let created = GpuMesh::create(
            &mut self.device,
            &data,
            &MeshBindings {
                frames_in_flight,
                mesh_layout,
                depth_layout,
                camera: Arc::clone(&camera),
                material_key: material.id(),
                light_channel_key: channel.id(),
                lighting_group,
                camera_buffers: &shared.camera,
                material_buffers: &shared.material,
                light_channel_buffers: &shared.light_channel,
                shadow_images,
                shadow_sampler: self.defaults.shadow_sampler,
                shadow_generation: self.shadow_generation,
                default_textures: &self.defaults.textures,
                mipmaps: self.settings.enable_mipmap,
            },
        );
        let mesh = match created {
            Ok(mesh) => mesh,
            Err(e) => {
                self.release_shared(camera.id(), Some(material.id()), Some(channel.id()));
                return Err(e.into());
            }
        };

        let batch = self
            .registry
            .get_mut(batch_id)
            .ok_or(RenderError::UnknownBatch(batch_id.index()))?;
        batch.meshes.push(mesh);
        log::info!(
            "Mesh '{}' drawn with '{}' ({} meshes in batch)",
            data.name(),
            batch.variant(),
            batch.meshes.len()
        );
        Ok(UploadStatus::Uploaded)
    }

    /// Lighting resources for a new camera and light channel pair of a deferred
    /// batch, holding their own references
    fn create_lighting(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        group: u32,
        camera: &Arc<Camera>,
        channel: &Arc<LightChannel>,
    ) -> RenderResult<DeferredLighting> {
        let frames_in_flight = self.settings.frames_in_flight();
        let camera_buffers = self.buffers.cameras.acquire(&mut self.device, camera, frames_in_flight)?;
        let channel_buffers = match self
            .buffers
            .light_channels
            .acquire(&mut self.device, channel, frames_in_flight)
        {
            Ok(buffers) => buffers,
            Err(e) => {
                self.release_shared(camera.id(), None, None);
                return Err(e);
            }
        };

        let images = self.shadow_slot_images();
        match DeferredLighting::create(
            &mut self.device,
            layout,
            group,
            Arc::clone(camera),
            camera_buffers,
            channel.id(),
            channel_buffers,
            self.shadow_generation,
            &images,
            self.defaults.shadow_sampler,
        ) {
            Ok(lighting) => Ok(lighting),
            Err(e) => {
                self.release_shared(camera.id(), None, Some(channel.id()));
                Err(e.into())
            }
        }
    }

    /// Take one reference on each shared uniform a mesh reads
    fn acquire_shared(
        &mut self,
        camera: &Arc<Camera>,
        material: &Arc<Material>,
        channel: &Arc<LightChannel>,
    ) -> RenderResult<SharedRefs> {
        let frames_in_flight = self.settings.frames_in_flight();
        let camera_buffers = self.buffers.cameras.acquire(&mut self.device, camera, frames_in_flight)?;
        let material_buffers = match self.buffers.materials.acquire(&mut self.device, material, frames_in_flight) {
            Ok(buffers) => buffers,
            Err(e) => {
                self.release_shared(camera.id(), None, None);
                return Err(e);
            }
        };
        let channel_buffers = match self
            .buffers
            .light_channels
            .acquire(&mut self.device, channel, frames_in_flight)
        {
            Ok(buffers) => buffers,
            Err(e) => {
                self.release_shared(camera.id(), Some(material.id()), None);
                return Err(e);
            }
        };
        Ok(SharedRefs {
            camera: camera_buffers,
            material: material_buffers,
            light_channel: channel_buffers,
        })
    }

    /// Give back references taken by a failed upload; nothing has read them yet
    fn release_shared(&mut self, camera: u64, material: Option<u64>, channel: Option<u64>) {
        let mut results = vec![self.buffers.cameras.release(&mut self.device, camera)];
        if let Some(material) = material {
            results.push(self.buffers.materials.release(&mut self.device, material));
        }
        if let Some(channel) = channel {
            results.push(self.buffers.light_channels.release(&mut self.device, channel));
        }
        for result in results {
            if let Err(e) = result {
                log::error!("Failed to release shared uniform after upload error: {}", e);
            }
        }
    }

    /// Tear everything down in reverse creation order and hand back the device
    pub fn cleanup_graphics(mut self) -> RenderResult<D> {
        self.device.wait_idle()?;

        let mut result = self.retired.release_all(&mut self.device, &mut self.buffers);
        for batch in self.registry.drain() {
            if let Err(e) = batch.destroy(&mut self.device, &mut self.buffers) {
                result = Err(e);
            }
        }
        let leaked = self.buffers.destroy_all(&mut self.device);
        if leaked > 0 {
            log::warn!("{} shared uniform entries were still referenced at cleanup", leaked);
        }
        for (_, shadow) in std::mem::take(&mut self.shadows) {
            if let Some(light) = shadow.light() {
                light.set_shadow_slot(None);
            }
            shadow.destroy(&mut self.device);
        }
        self.shadow_slots = [None; MAX_LIGHT_NUM];

        let Renderer {
            mut device,
            defaults,
            frames,
            ..
        } = self;
        defaults.destroy(&mut device);
        for frame in frames {
            frame.destroy(&mut device);
        }
        log::info!("Graphics cleaned up");
        result.map(|_| device)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    /// Ring slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Frames presented so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn batch_count(&self) -> usize {
        self.registry.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.registry.mesh_count()
    }

    pub fn registry(&self) -> &DrawRegistry {
        &self.registry
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Resources waiting for frames in flight to retire
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Lights that currently own a shadow map, in chain order
    pub fn shadow_light_ids(&self) -> Vec<u64> {
        self.shadows.keys().copied().collect()
    }

    /// Shadow map currently bound to each slot
    pub fn shadow_maps(&self) -> [ImageHandle; MAX_LIGHT_NUM] {
        self.shadow_slot_images()
    }
}
