//! Dummy device for testing without GPU hardware.
//!
//! Nothing is rendered. Instead the device keeps an event log of every
//! synchronization-relevant call (fence waits/resets, acquires, submissions,
//! presents) and tracks which resources each pending fence protects. Touching a
//! resource that an un-waited fence still guards (writing, re-recording,
//! updating or destroying it) is recorded as a violation, as are semaphore
//! waits with nothing to wait on and fence resets while a submission is in
//! flight.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::backend::traits::*;
use crate::backend::types::*;

/// Object kinds tracked by the dummy device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    Sampler,
    Fence,
    Semaphore,
    Shader,
    DescriptorSetLayout,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    Framebuffer,
    CommandBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

#[derive(Debug, Default)]
struct Recording {
    open: bool,
    passes: Vec<PassKind>,
    transitions: Vec<(LayoutTransition, usize)>,
    draws: u32,
    depth_bias: Option<DepthBias>,
    resources: HashSet<u64>,
}

/// What a submitted command buffer contained
#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub command_buffer: CommandBufferHandle,
    pub passes: Vec<PassKind>,
    /// Layout transitions with the number of images each covered
    pub transitions: Vec<(LayoutTransition, usize)>,
    pub draws: u32,
    pub depth_bias: Option<DepthBias>,
    pub wait: Option<SemaphoreHandle>,
    pub signal: Option<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

/// Synchronization-relevant device calls, in call order
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    WaitFences(Vec<FenceHandle>),
    ResetFences(Vec<FenceHandle>),
    Acquire {
        signal: SemaphoreHandle,
        outcome: AcquireOutcome,
    },
    Submit(SubmitRecord),
    Present {
        image_index: u32,
        wait: SemaphoreHandle,
        outcome: PresentOutcome,
    },
    RecreateSwapchain,
    WaitIdle,
}

/// Recording device used by tests
#[derive(Debug)]
pub struct DummyDevice {
    next_id: u64,
    live: HashMap<u64, ResourceKind>,
    compilable: Option<HashSet<String>>,
    shader_variants: HashMap<u64, String>,
    shader_attempts: Vec<String>,
    extent: Extent2D,
    swapchain_extent: Extent2D,
    image_count: u32,
    next_image: u32,
    max_msaa: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fences: HashMap<u64, FenceState>,
    guarded: HashMap<u64, HashSet<u64>>,
    signaled_semaphores: HashSet<u64>,
    recordings: HashMap<u64, Recording>,
    set_bindings: HashMap<u64, HashMap<u32, u64>>,
    pool_sets: HashMap<u64, Vec<u64>>,
    framebuffer_images: HashMap<u64, u64>,
    buffer_contents: HashMap<u64, Vec<u8>>,
    events: Vec<DeviceEvent>,
    violations: Vec<String>,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    /// Create a device where every shader variant compiles
    pub fn new() -> Self {
        Self {
            next_id: 1,
            live: HashMap::new(),
            compilable: None,
            shader_variants: HashMap::new(),
            shader_attempts: Vec::new(),
            extent: Extent2D::new(1280, 720),
            swapchain_extent: Extent2D::new(1280, 720),
            image_count: 3,
            next_image: 0,
            max_msaa: 8,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fences: HashMap::new(),
            guarded: HashMap::new(),
            signaled_semaphores: HashSet::new(),
            recordings: HashMap::new(),
            set_bindings: HashMap::new(),
            pool_sets: HashMap::new(),
            framebuffer_images: HashMap::new(),
            buffer_contents: HashMap::new(),
            events: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Restrict compilation to the given shader variants
    pub fn with_shaders(mut self, variants: &[&str]) -> Self {
        self.compilable = Some(variants.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Change the set of variants that compile
    pub fn set_compilable(&mut self, variants: &[&str]) {
        self.compilable = Some(variants.iter().map(|v| v.to_string()).collect());
    }

    /// Change the surface size; a zero area simulates a minimized window
    pub fn set_extent(&mut self, extent: Extent2D) {
        self.extent = extent;
    }

    /// Queue the outcome of the next acquire
    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    /// Queue the outcome of the next present
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    /// Every recorded event
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    /// Forget recorded events
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Submissions in order
    pub fn submits(&self) -> Vec<&SubmitRecord> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Submit(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Detected synchronization or lifetime violations
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Shader variants the device was asked to compile, in order
    pub fn shader_attempts(&self) -> &[String] {
        &self.shader_attempts
    }

    /// Number of live objects of a kind
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.live.values().filter(|&&k| k == kind).count()
    }

    /// Whether a buffer is still alive
    pub fn is_buffer_live(&self, buffer: BufferHandle) -> bool {
        self.live.get(&buffer.0) == Some(&ResourceKind::Buffer)
    }

    /// Size a buffer was created with
    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffer_contents.get(&buffer.0).map(|bytes| bytes.len() as u64)
    }

    /// Bytes last written to a live buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffer_contents.get(&buffer.0).map(Vec::as_slice)
    }

    /// Buffer currently written at `binding` of a descriptor set
    pub fn bound_buffer(&self, set: DescriptorSetHandle, binding: u32) -> Option<BufferHandle> {
        let id = *self.set_bindings.get(&set.0)?.get(&binding)?;
        (self.live.get(&id) == Some(&ResourceKind::Buffer)).then_some(BufferHandle(id))
    }

    fn alloc(&mut self, kind: ResourceKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, kind);
        id
    }

    fn violation(&mut self, message: String) {
        log::error!("DummyDevice: {}", message);
        self.violations.push(message);
    }

    fn in_flight(&self, id: u64) -> bool {
        self.guarded.values().any(|set| set.contains(&id))
    }

    fn check_idle(&mut self, id: u64, action: &str) {
        if self.in_flight(id) {
            let kind = self.live.get(&id).copied();
            self.violation(format!("{} {:?} #{} while in flight", action, kind, id));
        }
    }

    fn release(&mut self, id: u64, kind: ResourceKind) {
        self.check_idle(id, "destroy");
        match self.live.remove(&id) {
            Some(k) if k == kind => {}
            Some(k) => self.violation(format!("destroy #{} as {:?} but it is {:?}", id, kind, k)),
            None => self.violation(format!("destroy of dead or unknown {:?} #{}", kind, id)),
        }
    }

    fn require_live(&mut self, id: u64, kind: ResourceKind) -> BackendResult<()> {
        match self.live.get(&id) {
            Some(&k) if k == kind => Ok(()),
            _ => Err(BackendError::InvalidHandle(format!("{:?} #{}", kind, id))),
        }
    }

    fn record(&mut self, command_buffer: CommandBufferHandle) -> Option<&mut Recording> {
        let open = self
            .recordings
            .get(&command_buffer.0)
            .map_or(false, |rec| rec.open);
        if !open {
            self.violation(format!(
                "command recorded into #{} outside begin/end",
                command_buffer.0
            ));
            return None;
        }
        self.recordings.get_mut(&command_buffer.0)
    }

    fn signal_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if !self.signaled_semaphores.insert(semaphore.0) {
            self.violation(format!("semaphore #{} signaled twice without a wait", semaphore.0));
        }
    }

    fn consume_semaphore(&mut self, semaphore: SemaphoreHandle, by: &str) {
        if !self.signaled_semaphores.remove(&semaphore.0) {
            self.violation(format!(
                "{} waits on semaphore #{} that nothing signals",
                by, semaphore.0
            ));
        }
    }
}

impl RenderDevice for DummyDevice {
    fn surface_extent(&self) -> Extent2D {
        self.extent
    }

    fn swapchain_extent(&self) -> Extent2D {
        self.swapchain_extent
    }

    fn max_msaa_samples(&self) -> u32 {
        self.max_msaa
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        log::trace!("DummyDevice: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.alloc(ResourceKind::Buffer);
        self.buffer_contents.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.require_live(buffer.0, ResourceKind::Buffer)?;
        self.check_idle(buffer.0, "write");
        let contents = self.buffer_contents.entry(buffer.0).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(BackendError::InvalidHandle(format!(
                "write of {} bytes at {} overflows buffer #{} ({} bytes)",
                data.len(),
                offset,
                buffer.0,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.release(buffer.0, ResourceKind::Buffer);
        self.buffer_contents.remove(&buffer.0);
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::ImageCreationFailed(format!(
                "{:?}: zero-sized image",
                desc.label
            )));
        }
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        Ok(ImageHandle(self.alloc(ResourceKind::Image)))
    }

    fn upload_image(&mut self, image: ImageHandle, _pixels: &[u8]) -> BackendResult<()> {
        self.require_live(image.0, ResourceKind::Image)
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.release(image.0, ResourceKind::Image);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyDevice: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.alloc(ResourceKind::Sampler)))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.release(sampler.0, ResourceKind::Sampler);
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let id = self.alloc(ResourceKind::Fence);
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(id, state);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if self.fences.get(&fence.0) == Some(&FenceState::Pending) {
            self.violation(format!("destroy of fence #{} with pending work", fence.0));
        }
        self.fences.remove(&fence.0);
        self.guarded.remove(&fence.0);
        self.release(fence.0, ResourceKind::Fence);
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        Ok(SemaphoreHandle(self.alloc(ResourceKind::Semaphore)))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.signaled_semaphores.remove(&semaphore.0);
        self.release(semaphore.0, ResourceKind::Semaphore);
    }

    fn wait_for_fences(&mut self, fences: &[FenceHandle]) -> BackendResult<()> {
        self.events.push(DeviceEvent::WaitFences(fences.to_vec()));
        for fence in fences {
            match self.fences.get(&fence.0).copied() {
                Some(FenceState::Pending) | Some(FenceState::Signaled) => {
                    self.fences.insert(fence.0, FenceState::Signaled);
                    self.guarded.remove(&fence.0);
                }
                Some(FenceState::Unsignaled) => {
                    self.violation(format!("wait on fence #{} that was never submitted", fence.0));
                }
                None => return Err(BackendError::InvalidHandle(format!("fence #{}", fence.0))),
            }
        }
        Ok(())
    }

    fn reset_fences(&mut self, fences: &[FenceHandle]) -> BackendResult<()> {
        self.events.push(DeviceEvent::ResetFences(fences.to_vec()));
        for fence in fences {
            match self.fences.get(&fence.0).copied() {
                Some(FenceState::Pending) => {
                    self.violation(format!("reset of in-flight fence #{}", fence.0));
                }
                Some(_) => {
                    self.fences.insert(fence.0, FenceState::Unsignaled);
                }
                None => return Err(BackendError::InvalidHandle(format!("fence #{}", fence.0))),
            }
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.events.push(DeviceEvent::WaitIdle);
        for state in self.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        self.guarded.clear();
        Ok(())
    }

    fn create_shader(&mut self, variant: &str) -> BackendResult<ShaderHandle> {
        self.shader_attempts.push(variant.to_string());
        let compiles = self
            .compilable
            .as_ref()
            .map_or(true, |set| set.contains(variant));
        if !compiles {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{}: failed to compile",
                variant
            )));
        }
        let id = self.alloc(ResourceKind::Shader);
        self.shader_variants.insert(id, variant.to_string());
        Ok(ShaderHandle(id))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shader_variants.remove(&shader.0);
        self.release(shader.0, ResourceKind::Shader);
    }

    fn create_descriptor_set_layout(
        &mut self,
        _bindings: &[LayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        Ok(DescriptorSetLayoutHandle(
            self.alloc(ResourceKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.release(layout.0, ResourceKind::DescriptorSetLayout);
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        self.require_live(desc.shader.0, ResourceKind::Shader)?;
        self.require_live(desc.layout.0, ResourceKind::DescriptorSetLayout)?;
        log::trace!(
            "DummyDevice: creating {:?} pipeline for {:?}",
            desc.kind,
            self.shader_variants.get(&desc.shader.0)
        );
        Ok(PipelineHandle(self.alloc(ResourceKind::Pipeline)))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.release(pipeline.0, ResourceKind::Pipeline);
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        if desc.max_sets == 0 {
            return Err(BackendError::DescriptorCreationFailed(
                "pool with zero sets".into(),
            ));
        }
        let id = self.alloc(ResourceKind::DescriptorPool);
        self.pool_sets.insert(id, Vec::new());
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let sets = self.pool_sets.remove(&pool.0).unwrap_or_default();
        for set in sets {
            self.set_bindings.remove(&set);
            self.release(set, ResourceKind::DescriptorSet);
        }
        self.release(pool.0, ResourceKind::DescriptorPool);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        self.require_live(pool.0, ResourceKind::DescriptorPool)?;
        self.require_live(layout.0, ResourceKind::DescriptorSetLayout)?;
        let id = self.alloc(ResourceKind::DescriptorSet);
        self.pool_sets.entry(pool.0).or_default().push(id);
        self.set_bindings.insert(id, HashMap::new());
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()> {
        self.require_live(set.0, ResourceKind::DescriptorSet)?;
        self.check_idle(set.0, "update");
        for write in writes {
            let (binding, resource) = match *write {
                DescriptorWrite::UniformBuffer { binding, buffer } => {
                    self.require_live(buffer.0, ResourceKind::Buffer)?;
                    (binding, Some(buffer.0))
                }
                DescriptorWrite::Image { binding, image } => {
                    self.require_live(image.0, ResourceKind::Image)?;
                    (binding, Some(image.0))
                }
                DescriptorWrite::Sampler { binding, sampler } => {
                    self.require_live(sampler.0, ResourceKind::Sampler)?;
                    (binding, Some(sampler.0))
                }
                DescriptorWrite::InputAttachment { binding, .. } => (binding, None),
            };
            let bindings = self.set_bindings.entry(set.0).or_default();
            match resource {
                Some(id) => {
                    bindings.insert(binding, id);
                }
                None => {
                    bindings.remove(&binding);
                }
            }
        }
        Ok(())
    }

    fn create_shadow_framebuffer(&mut self, depth: ImageHandle) -> BackendResult<FramebufferHandle> {
        self.require_live(depth.0, ResourceKind::Image)?;
        let id = self.alloc(ResourceKind::Framebuffer);
        self.framebuffer_images.insert(id, depth.0);
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffer_images.remove(&framebuffer.0);
        self.release(framebuffer.0, ResourceKind::Framebuffer);
    }

    fn allocate_command_buffer(&mut self) -> BackendResult<CommandBufferHandle> {
        let id = self.alloc(ResourceKind::CommandBuffer);
        self.recordings.insert(id, Recording::default());
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        self.recordings.remove(&command_buffer.0);
        self.release(command_buffer.0, ResourceKind::CommandBuffer);
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        self.require_live(command_buffer.0, ResourceKind::CommandBuffer)?;
        self.check_idle(command_buffer.0, "re-record");
        let mut rec = Recording {
            open: true,
            ..Default::default()
        };
        rec.resources.insert(command_buffer.0);
        self.recordings.insert(command_buffer.0, rec);
        Ok(())
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        match self.recordings.get_mut(&command_buffer.0) {
            Some(rec) if rec.open => {
                rec.open = false;
                Ok(())
            }
            _ => Err(BackendError::CommandRecordingFailed(format!(
                "#{} is not recording",
                command_buffer.0
            ))),
        }
    }

    fn cmd_begin_pass(&mut self, command_buffer: CommandBufferHandle, begin: &PassBegin) {
        let image = match begin.target {
            PassTarget::Offscreen(fb) => self.framebuffer_images.get(&fb.0).map(|&img| (fb.0, img)),
            PassTarget::Swapchain(_) => None,
        };
        if let Some(rec) = self.record(command_buffer) {
            rec.passes.push(begin.kind);
            if let Some((fb, img)) = image {
                rec.resources.insert(fb);
                rec.resources.insert(img);
            }
        }
    }

    fn cmd_next_subpass(&mut self, command_buffer: CommandBufferHandle) {
        self.record(command_buffer);
    }

    fn cmd_end_pass(&mut self, command_buffer: CommandBufferHandle) {
        self.record(command_buffer);
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        if let Some(rec) = self.record(command_buffer) {
            rec.resources.insert(pipeline.0);
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: CommandBufferHandle,
        _pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    ) {
        let bound: Vec<u64> = self
            .set_bindings
            .get(&set.0)
            .map(|b| b.values().copied().collect())
            .unwrap_or_default();
        if let Some(rec) = self.record(command_buffer) {
            rec.resources.insert(set.0);
            rec.resources.extend(bound);
        }
    }

    fn cmd_set_depth_bias(&mut self, command_buffer: CommandBufferHandle, bias: DepthBias) {
        if let Some(rec) = self.record(command_buffer) {
            rec.depth_bias = Some(bias);
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        if let Some(rec) = self.record(command_buffer) {
            rec.resources.insert(buffer.0);
        }
    }

    fn cmd_bind_index_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        if let Some(rec) = self.record(command_buffer) {
            rec.resources.insert(buffer.0);
        }
    }

    fn cmd_draw_indexed(&mut self, command_buffer: CommandBufferHandle, _index_count: u32) {
        if let Some(rec) = self.record(command_buffer) {
            rec.draws += 1;
        }
    }

    fn cmd_draw(&mut self, command_buffer: CommandBufferHandle, _vertex_count: u32) {
        if let Some(rec) = self.record(command_buffer) {
            rec.draws += 1;
        }
    }

    fn cmd_transition_images(
        &mut self,
        command_buffer: CommandBufferHandle,
        images: &[ImageHandle],
        transition: LayoutTransition,
    ) {
        if let Some(rec) = self.record(command_buffer) {
            rec.transitions.push((transition, images.len()));
            rec.resources.extend(images.iter().map(|i| i.0));
        }
    }

    fn submit(&mut self, submit: &SubmitInfo) -> BackendResult<()> {
        let (passes, transitions, draws, depth_bias, resources) =
            match self.recordings.get(&submit.command_buffer.0) {
                Some(rec) if !rec.open => (
                    rec.passes.clone(),
                    rec.transitions.clone(),
                    rec.draws,
                    rec.depth_bias,
                    rec.resources.clone(),
                ),
                _ => {
                    return Err(BackendError::SubmitFailed(format!(
                        "#{} is not a finished recording",
                        submit.command_buffer.0
                    )))
                }
            };

        if let Some(wait) = submit.wait {
            self.consume_semaphore(wait, "submit");
        }
        if let Some(signal) = submit.signal {
            self.signal_semaphore(signal);
        }
        match submit.fence {
            Some(fence) => {
                match self.fences.get(&fence.0).copied() {
                    Some(FenceState::Unsignaled) => {}
                    Some(state) => self.violation(format!(
                        "submit with fence #{} in state {:?}",
                        fence.0, state
                    )),
                    None => {
                        return Err(BackendError::InvalidHandle(format!("fence #{}", fence.0)))
                    }
                }
                self.fences.insert(fence.0, FenceState::Pending);
                self.guarded.entry(fence.0).or_default().extend(resources);
            }
            None => self.violation(format!(
                "submit of #{} without a fence cannot be tracked",
                submit.command_buffer.0
            )),
        }

        log::trace!(
            "DummyDevice: submit #{} passes={:?} wait={:?} signal={:?}",
            submit.command_buffer.0,
            passes,
            submit.wait,
            submit.signal
        );
        self.events.push(DeviceEvent::Submit(SubmitRecord {
            command_buffer: submit.command_buffer,
            passes,
            transitions,
            draws,
            depth_bias,
            wait: submit.wait,
            signal: submit.signal,
            fence: submit.fence,
        }));
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquireOutcome> {
        let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            }
        });
        if let AcquireOutcome::Acquired { .. } = outcome {
            self.signal_semaphore(signal);
        }
        self.events.push(DeviceEvent::Acquire { signal, outcome });
        Ok(outcome)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<PresentOutcome> {
        self.consume_semaphore(wait, "present");
        let outcome = self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Optimal);
        self.events.push(DeviceEvent::Present {
            image_index,
            wait,
            outcome,
        });
        Ok(outcome)
    }

    fn recreate_swapchain(&mut self) -> BackendResult<()> {
        if self.extent.is_zero_area() {
            return Ok(());
        }
        self.swapchain_extent = self.extent;
        self.next_image = 0;
        self.events.push(DeviceEvent::RecreateSwapchain);
        Ok(())
    }
}
