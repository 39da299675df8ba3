//! Core device abstraction
//!
//! `RenderDevice` is the mechanism layer the frame scheduler drives: resource
//! creation/destruction pairs, fences and semaphores, command recording and the
//! swapchain. It carries no policy of its own.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("No queue family supports graphics and presentation")]
    MissingQueueFamily,
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create image: {0}")]
    ImageCreationFailed(String),
    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create descriptor object: {0}")]
    DescriptorCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Command recording failed: {0}")]
    CommandRecordingFailed(String),
    #[error("Queue submission failed: {0}")]
    SubmitFailed(String),
    #[error("Synchronization failed: {0}")]
    SyncFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU image (with its default view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceHandle(pub(crate) u64);

/// Handle to a binary semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemaphoreHandle(pub(crate) u64);

/// Handle to a primary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandBufferHandle(pub(crate) u64);

/// Handle to a compiled shader program (one source, several entry points)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub(crate) u64);

/// Handle to a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetLayoutHandle(pub(crate) u64);

/// Handle to a descriptor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorPoolHandle(pub(crate) u64);

/// Handle to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to an offscreen framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub(crate) u64);

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; the semaphore will be signaled
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was signaled
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// A single queue submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo {
    pub command_buffer: CommandBufferHandle,
    pub wait: Option<SemaphoreHandle>,
    pub signal: Option<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

/// Device abstraction driven by the frame scheduler
pub trait RenderDevice {
    /// Current drawable size of the surface; zero area while minimized
    fn surface_extent(&self) -> Extent2D;

    /// Size of the swapchain images
    fn swapchain_extent(&self) -> Extent2D;

    /// Highest usable color sample count
    fn max_msaa_samples(&self) -> u32;

    // Resource primitives

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a host-visible buffer filled with `data`
    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        self.write_buffer(handle, 0, data)?;
        Ok(handle)
    }

    /// Write into a host-visible buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Create an image together with its default view
    fn create_image(&mut self, desc: &ImageDescriptor) -> BackendResult<ImageHandle>;

    /// Upload RGBA8 pixels into mip 0, generate remaining mips and leave the
    /// image shader-readable
    fn upload_image(&mut self, image: ImageHandle, pixels: &[u8]) -> BackendResult<()>;

    /// Destroy an image and its view
    fn destroy_image(&mut self, image: ImageHandle);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // Synchronization

    /// Create a fence, optionally already signaled
    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Block until every fence is signaled
    fn wait_for_fences(&mut self, fences: &[FenceHandle]) -> BackendResult<()>;

    /// Return fences to the unsignaled state
    fn reset_fences(&mut self, fences: &[FenceHandle]) -> BackendResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> BackendResult<()>;

    // Shaders and pipelines

    /// Load and compile the shader program for a variant path
    fn create_shader(&mut self, variant: &str) -> BackendResult<ShaderHandle>;

    /// Destroy a shader program
    fn destroy_shader(&mut self, shader: ShaderHandle);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);

    /// Create a graphics pipeline for one pass flavor
    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle>;

    /// Destroy a pipeline and its layout
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Descriptors

    /// Create a descriptor pool
    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle>;

    /// Destroy a descriptor pool, freeing every set allocated from it
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Allocate a descriptor set
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;

    /// Point descriptor bindings at resources
    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()>;

    // Offscreen targets

    /// Create a depth-only framebuffer for a shadow map
    fn create_shadow_framebuffer(&mut self, depth: ImageHandle) -> BackendResult<FramebufferHandle>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Command recording

    /// Allocate a primary command buffer
    fn allocate_command_buffer(&mut self) -> BackendResult<CommandBufferHandle>;

    /// Free a command buffer
    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle);

    /// Reset and begin recording
    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    /// Finish recording
    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    /// Begin a render pass; viewport and scissor cover the target
    fn cmd_begin_pass(&mut self, command_buffer: CommandBufferHandle, begin: &PassBegin);

    /// Advance to the next subpass
    fn cmd_next_subpass(&mut self, command_buffer: CommandBufferHandle);

    /// End the current render pass
    fn cmd_end_pass(&mut self, command_buffer: CommandBufferHandle);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind a descriptor set at set index 0 of the pipeline layout
    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: CommandBufferHandle,
        pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    );

    /// Set dynamic depth bias
    fn cmd_set_depth_bias(&mut self, command_buffer: CommandBufferHandle, bias: DepthBias);

    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle);

    /// Bind a u32 index buffer
    fn cmd_bind_index_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle);

    /// Draw indexed primitives
    fn cmd_draw_indexed(&mut self, command_buffer: CommandBufferHandle, index_count: u32);

    /// Draw non-indexed primitives
    fn cmd_draw(&mut self, command_buffer: CommandBufferHandle, vertex_count: u32);

    /// Record a layout transition for a set of depth images
    fn cmd_transition_images(
        &mut self,
        command_buffer: CommandBufferHandle,
        images: &[ImageHandle],
        transition: LayoutTransition,
    );

    /// Submit a recorded command buffer
    fn submit(&mut self, submit: &SubmitInfo) -> BackendResult<()>;

    // Swapchain

    /// Acquire the next presentable image, signaling `signal` when it is ready
    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquireOutcome>;

    /// Present an image after `wait` is signaled
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<PresentOutcome>;

    /// Rebuild the swapchain and every swapchain-sized target
    fn recreate_swapchain(&mut self) -> BackendResult<()>;
}
