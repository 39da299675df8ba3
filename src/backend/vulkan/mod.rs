//! Vulkan implementation of [`RenderDevice`] using ash and gpu-allocator
//!
//! Handles returned to the renderer are plain ids into per-kind maps. The
//! device owns the swapchain, one render pass per [`PassKind`] and every
//! swapchain-sized attachment; the renderer only ever names them through
//! [`PassTarget`] and [`DescriptorWrite::InputAttachment`].

mod conversion;
mod instance;
mod memory;
mod pipeline;
mod swapchain;
mod targets;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RenderSettings;

use conversion::*;
use memory::{ImageSpec, VkBuffer, VkImage};
use pipeline::{PipelineTarget, ShaderProgram};
use swapchain::{SurfaceContext, Swapchain};
use targets::{FrameTargets, RenderPasses, TargetConfig};

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

struct VkDescriptorSet {
    set: vk::DescriptorSet,
    pool: u64,
}

struct VkFramebuffer {
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

/// Vulkan device bound to one window surface
pub struct VulkanDevice {
    window: Arc<Window>,
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: surface::Instance,
    swapchain_fn: khr_swapchain::Device,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    allocator: Option<Allocator>,
    command_pool: vk::CommandPool,

    surface_format: vk::SurfaceFormatKHR,
    swapchain: Swapchain,
    passes: RenderPasses,
    targets: FrameTargets,
    config: TargetConfig,
    vsync: bool,
    max_msaa_samples: u32,
    linear_blit: bool,

    shader_dir: PathBuf,
    shader_debug_info: bool,

    // Resource storage
    buffers: HashMap<u64, VkBuffer>,
    images: HashMap<u64, VkImage>,
    samplers: HashMap<u64, vk::Sampler>,
    fences: HashMap<u64, vk::Fence>,
    semaphores: HashMap<u64, vk::Semaphore>,
    shaders: HashMap<u64, ShaderProgram>,
    set_layouts: HashMap<u64, vk::DescriptorSetLayout>,
    pipelines: HashMap<u64, VkPipeline>,
    descriptor_pools: HashMap<u64, vk::DescriptorPool>,
    descriptor_sets: HashMap<u64, VkDescriptorSet>,
    framebuffers: HashMap<u64, VkFramebuffer>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    next_id: u64,
}

fn allocator_mut(allocator: &mut Option<Allocator>) -> BackendResult<&mut Allocator> {
    allocator
        .as_mut()
        .ok_or_else(|| BackendError::InitializationFailed("allocator not available".into()))
}

#[allow(clippy::too_many_arguments)]
fn image_barrier(
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    base_mip_level: u32,
    level_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask)
}

/// Copy mip 0 from `staging`, blit the remaining mips and leave every level
/// shader-readable
fn record_texture_upload(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
    mip_levels: u32,
    filter: vk::Filter,
) {
    let color = vk::ImageAspectFlags::COLOR;
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[image_barrier(
                image,
                color,
                0,
                mip_levels,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            )],
        );

        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: color,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        device.cmd_copy_buffer_to_image(
            cmd,
            staging,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        let mut width = extent.width as i32;
        let mut height = extent.height as i32;
        for level in 1..mip_levels {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier(
                    image,
                    color,
                    level - 1,
                    1,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::TRANSFER_READ,
                )],
            );

            let next_width = (width / 2).max(1);
            let next_height = (height / 2).max(1);
            let blit = vk::ImageBlit::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: color,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D { x: width, y: height, z: 1 },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: color,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ]);
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                filter,
            );

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier(
                    image,
                    color,
                    level - 1,
                    1,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::AccessFlags::SHADER_READ,
                )],
            );

            width = next_width;
            height = next_height;
        }

        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[image_barrier(
                image,
                color,
                mip_levels - 1,
                1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            )],
        );
    }
}

impl VulkanDevice {
    /// Create the device, swapchain and render targets for `window`
    pub fn new(
        window: Arc<Window>,
        vsync: bool,
        shader_dir: impl Into<PathBuf>,
        settings: &RenderSettings,
    ) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to load Vulkan: {}", e)))?;

        let display_handle = window
            .display_handle()
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let instance = instance::create_instance(&entry, display_handle.as_raw())?;

        let surface_fn = surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| BackendError::SurfaceCreationFailed(format!("{:?}", e)))?;

        let (physical_device, queue_family) =
            instance::select_physical_device(&instance, &surface_fn, surface)?;
        let device = instance::create_logical_device(&instance, physical_device, queue_family)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| BackendError::InitializationFailed(format!("Failed to create memory allocator: {}", e)))?;

        let swapchain_fn = khr_swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
        })?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let max_msaa_samples = max_sample_count(
            properties.limits.framebuffer_color_sample_counts
                & properties.limits.framebuffer_depth_sample_counts,
        );
        let depth_format = instance::select_depth_format(&instance, physical_device)?;
        let texture_features = unsafe {
            instance.get_physical_device_format_properties(physical_device, vk::Format::R8G8B8A8_SRGB)
        };
        let linear_blit = texture_features
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);

        let surface_format = swapchain::choose_surface_format(&surface_fn, physical_device, surface)?;
        let config = TargetConfig {
            color_format: surface_format.format,
            depth_format,
            samples: settings.msaa_samples(max_msaa_samples),
            prepass: settings.enable_z_prepass,
            deferred: settings.enable_deferred,
        };

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            &SurfaceContext {
                device: &device,
                surface_fn: &surface_fn,
                swapchain_fn: &swapchain_fn,
                physical_device,
                surface,
            },
            surface_format,
            size.width.max(1),
            size.height.max(1),
            vsync,
            vk::SwapchainKHR::null(),
        )?;
        let passes = RenderPasses::new(&device, &config)?;

        let mut backend = Self {
            window,
            _entry: entry,
            instance,
            surface_fn,
            swapchain_fn,
            surface,
            physical_device,
            device,
            graphics_queue,
            allocator: Some(allocator),
            command_pool,
            surface_format,
            swapchain,
            passes,
            targets: FrameTargets::default(),
            config,
            vsync,
            max_msaa_samples,
            linear_blit,
            shader_dir: shader_dir.into(),
            shader_debug_info: settings.shader_debug_info,
            buffers: HashMap::new(),
            images: HashMap::new(),
            samplers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            shaders: HashMap::new(),
            set_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_pools: HashMap::new(),
            descriptor_sets: HashMap::new(),
            framebuffers: HashMap::new(),
            command_buffers: HashMap::new(),
            next_id: 1,
        };

        let allocator = allocator_mut(&mut backend.allocator)?;
        backend.targets = FrameTargets::new(
            &backend.device,
            allocator,
            &backend.passes,
            &backend.config,
            &backend.swapchain,
        )?;

        log::info!(
            "Vulkan device ready: depth {:?}, {} color samples (device max {}), {} path{}",
            depth_format,
            if config.msaa() { config.samples } else { 1 },
            max_msaa_samples,
            if config.deferred { "deferred" } else { "forward" },
            if config.prepass { " with depth pre-pass" } else { "" }
        );
        Ok(backend)
    }

    /// Get the Vulkan instance
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan device
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The window this device presents to
    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn fence(&self, fence: FenceHandle) -> BackendResult<vk::Fence> {
        self.fences
            .get(&fence.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("fence #{}", fence.0)))
    }

    fn semaphore(&self, semaphore: SemaphoreHandle) -> BackendResult<vk::Semaphore> {
        self.semaphores
            .get(&semaphore.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("semaphore #{}", semaphore.0)))
    }

    fn command_buffer(&self, command_buffer: CommandBufferHandle) -> Option<vk::CommandBuffer> {
        let cb = self.command_buffers.get(&command_buffer.0).copied();
        if cb.is_none() {
            log::error!("Recording into unknown command buffer #{}", command_buffer.0);
        }
        cb
    }

    /// Record `record` into a one-shot command buffer and wait for the queue
    fn immediate_submit<F>(&mut self, record: F) -> BackendResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "allocate transfer commands"))?[0];

        let result = self.record_and_wait(cmd, record);
        unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
        result
    }

    fn record_and_wait<F>(&self, cmd: vk::CommandBuffer, record: F) -> BackendResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "begin transfer commands"))?;
        record(&self.device, cmd);
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "end transfer commands"))?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                .map_err(|e| map_vk_error(e, BackendError::SubmitFailed, "transfer submit"))?;
            self.device
                .queue_wait_idle(self.graphics_queue)
                .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "transfer wait"))
        }
    }

    /// Host-visible staging buffer holding `data`
    fn create_staging(&mut self, data: &[u8]) -> BackendResult<VkBuffer> {
        let allocator = allocator_mut(&mut self.allocator)?;
        let mut staging = memory::create_buffer(
            &self.device,
            allocator,
            "staging",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        match staging.allocation.mapped_slice_mut() {
            Some(mapped) => {
                mapped[..data.len()].copy_from_slice(data);
                Ok(staging)
            }
            None => {
                memory::destroy_buffer(&self.device, allocator, staging);
                Err(BackendError::BufferCreationFailed("staging buffer is not host visible".into()))
            }
        }
    }

    fn release_staging(&mut self, staging: VkBuffer) {
        if let Some(allocator) = self.allocator.as_mut() {
            memory::destroy_buffer(&self.device, allocator, staging);
        }
    }

    /// Copy into a device-local buffer through a staging buffer
    fn write_staged(&mut self, dst: vk::Buffer, offset: u64, data: &[u8]) -> BackendResult<()> {
        let staging = self.create_staging(data)?;
        let src = staging.buffer;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        };
        let result = self.immediate_submit(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, src, dst, &[region]);
        });
        self.release_staging(staging);
        result
    }

    fn pipeline_target(&self, kind: PipelineKind) -> PipelineTarget {
        let forward_samples = if self.config.msaa() {
            self.config.samples
        } else {
            1
        };
        match kind {
            PipelineKind::Forward => PipelineTarget {
                render_pass: self.passes.forward,
                subpass: 0,
                samples: forward_samples,
                color_attachments: 1,
            },
            PipelineKind::DepthOnly => PipelineTarget {
                render_pass: self.passes.depth_prepass,
                subpass: 0,
                samples: forward_samples,
                color_attachments: 0,
            },
            PipelineKind::Shadow => PipelineTarget {
                render_pass: self.passes.shadow,
                subpass: 0,
                samples: 1,
                color_attachments: 0,
            },
            PipelineKind::GBufferOutput => PipelineTarget {
                render_pass: self.passes.deferred,
                subpass: 0,
                samples: 1,
                color_attachments: GBufferAttachment::ALL.len(),
            },
            PipelineKind::GBufferLighting => PipelineTarget {
                render_pass: self.passes.deferred,
                subpass: kind.subpass(),
                samples: 1,
                color_attachments: 1,
            },
        }
    }

    /// Render pass, framebuffer, extent and clear values of a pass
    fn pass_setup(&self, begin: &PassBegin) -> Option<(vk::RenderPass, vk::Framebuffer, vk::Extent2D, Vec<vk::ClearValue>)> {
        let color = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };
        let depth = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };
        let extent = self.swapchain.extent;

        match (begin.kind, begin.target) {
            (PassKind::Shadow, PassTarget::Offscreen(framebuffer)) => {
                let fb = self.framebuffers.get(&framebuffer.0)?;
                Some((self.passes.shadow, fb.framebuffer, fb.extent, vec![depth]))
            }
            (PassKind::DepthPrepass, PassTarget::Swapchain(_)) => Some((
                self.passes.depth_prepass,
                self.targets.prepass_framebuffer?,
                extent,
                vec![depth],
            )),
            (PassKind::Forward, PassTarget::Swapchain(index)) => {
                let clears = if self.config.msaa() {
                    vec![color, depth, color]
                } else {
                    vec![color, depth]
                };
                Some((
                    self.passes.forward,
                    *self.targets.color_framebuffers.get(index as usize)?,
                    extent,
                    clears,
                ))
            }
            (PassKind::Deferred, PassTarget::Swapchain(index)) => {
                let mut clears = vec![color, depth];
                clears.extend(std::iter::repeat(color).take(GBufferAttachment::ALL.len()));
                Some((
                    self.passes.deferred,
                    *self.targets.color_framebuffers.get(index as usize)?,
                    extent,
                    clears,
                ))
            }
            _ => None,
        }
    }
}

impl RenderDevice for VulkanDevice {
    fn surface_extent(&self) -> Extent2D {
        let size = self.window.inner_size();
        Extent2D::new(size.width, size.height)
    }

    fn swapchain_extent(&self) -> Extent2D {
        Extent2D::new(self.swapchain.extent.width, self.swapchain.extent.height)
    }

    fn max_msaa_samples(&self) -> u32 {
        self.max_msaa_samples
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let name = desc.label.as_deref().unwrap_or("buffer");
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!("{}: zero-sized buffer", name)));
        }
        let (usage, location) = if desc.usage.contains(BufferUsage::MAP_WRITE) {
            (convert_buffer_usage(desc.usage), MemoryLocation::CpuToGpu)
        } else {
            (
                convert_buffer_usage(desc.usage) | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
            )
        };
        let allocator = allocator_mut(&mut self.allocator)?;
        let buffer = memory::create_buffer(&self.device, allocator, name, desc.size, usage, location)?;

        let id = self.next_handle();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let vk_buffer = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer #{}", buffer.0)))?;
        if offset + data.len() as u64 > vk_buffer.size {
            return Err(BackendError::InvalidHandle(format!(
                "write of {} bytes at {} overflows buffer #{} ({} bytes)",
                data.len(),
                offset,
                buffer.0,
                vk_buffer.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        if let Some(mapped) = vk_buffer.allocation.mapped_slice_mut() {
            let start = offset as usize;
            mapped[start..start + data.len()].copy_from_slice(data);
            return Ok(());
        }
        let dst = vk_buffer.buffer;
        self.write_staged(dst, offset, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(vk_buffer) = self.buffers.remove(&buffer.0) {
            if let Some(allocator) = self.allocator.as_mut() {
                memory::destroy_buffer(&self.device, allocator, vk_buffer);
            }
        }
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        let name = desc.label.as_deref().unwrap_or("image");
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::ImageCreationFailed(format!("{}: zero-sized image", name)));
        }
        let (format, aspect) = match desc.format {
            ImageFormat::Rgba8Unorm => (vk::Format::R8G8B8A8_UNORM, vk::ImageAspectFlags::COLOR),
            ImageFormat::Rgba8Srgb => (vk::Format::R8G8B8A8_SRGB, vk::ImageAspectFlags::COLOR),
            ImageFormat::Depth => (self.config.depth_format, vk::ImageAspectFlags::DEPTH),
        };
        let allocator = allocator_mut(&mut self.allocator)?;
        let image = memory::create_image(
            &self.device,
            allocator,
            &ImageSpec {
                name,
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
                format,
                usage: convert_image_usage(desc.usage),
                mip_levels: desc.mip_levels.max(1),
                samples: vk::SampleCountFlags::TYPE_1,
                aspect,
            },
        )?;

        // Sampled depth images start out shader-readable
        if desc.format.is_depth() && desc.usage.contains(ImageUsage::SAMPLED) {
            let raw = image.image;
            let aspects = transition_aspects(aspect, format);
            let result = self.immediate_submit(|device, cmd| unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[image_barrier(
                        raw,
                        aspects,
                        0,
                        1,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::empty(),
                        vk::AccessFlags::SHADER_READ,
                    )],
                );
            });
            if let Err(e) = result {
                if let Some(allocator) = self.allocator.as_mut() {
                    memory::destroy_image(&self.device, allocator, image);
                }
                return Err(e);
            }
        }

        let id = self.next_handle();
        self.images.insert(id, image);
        Ok(ImageHandle(id))
    }

    fn upload_image(&mut self, image: ImageHandle, pixels: &[u8]) -> BackendResult<()> {
        let (raw, extent, mip_levels) = {
            let target = self
                .images
                .get(&image.0)
                .ok_or_else(|| BackendError::InvalidHandle(format!("image #{}", image.0)))?;
            (target.image, target.extent, target.mip_levels)
        };
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(BackendError::ImageCreationFailed(format!(
                "upload of {} bytes into {}x{} RGBA8 image #{} (expected {})",
                pixels.len(),
                extent.width,
                extent.height,
                image.0,
                expected
            )));
        }

        let filter = if self.linear_blit {
            vk::Filter::LINEAR
        } else {
            vk::Filter::NEAREST
        };
        let staging = self.create_staging(pixels)?;
        let src = staging.buffer;
        let result = self.immediate_submit(|device, cmd| {
            record_texture_upload(device, cmd, src, raw, extent, mip_levels, filter);
        });
        self.release_staging(staging);
        result
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if let Some(vk_image) = self.images.remove(&image.0) {
            if let Some(allocator) = self.allocator.as_mut() {
                memory::destroy_image(&self.device, allocator, vk_image);
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let address_mode = convert_address_mode(desc.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(desc.filter))
            .min_filter(convert_filter(desc.filter))
            .mipmap_mode(convert_mipmap_mode(desc.filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.map(convert_compare_op).unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(0.0)
            .max_lod(desc.max_lod)
            // Outside a shadow map counts as lit
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }.map_err(|e| {
            BackendError::SamplerCreationFailed(format!("{:?}: {:?}", desc.label, e))
        })?;
        let id = self.next_handle();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(sampler) = self.samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "create fence"))?;
        let id = self.next_handle();
        self.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(fence) = self.fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "create semaphore"))?;
        let id = self.next_handle();
        self.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.semaphores.remove(&semaphore.0) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn wait_for_fences(&mut self, fences: &[FenceHandle]) -> BackendResult<()> {
        let raw = fences
            .iter()
            .map(|&fence| self.fence(fence))
            .collect::<BackendResult<Vec<_>>>()?;
        if raw.is_empty() {
            return Ok(());
        }
        unsafe { self.device.wait_for_fences(&raw, true, u64::MAX) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "wait for fences"))
    }

    fn reset_fences(&mut self, fences: &[FenceHandle]) -> BackendResult<()> {
        let raw = fences
            .iter()
            .map(|&fence| self.fence(fence))
            .collect::<BackendResult<Vec<_>>>()?;
        if raw.is_empty() {
            return Ok(());
        }
        unsafe { self.device.reset_fences(&raw) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "reset fences"))
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "wait idle"))
    }

    fn create_shader(&mut self, variant: &str) -> BackendResult<ShaderHandle> {
        let program = ShaderProgram::load(&self.shader_dir, variant, self.shader_debug_info)?;
        log::info!("Loaded shader variant '{}'", variant);
        let id = self.next_handle();
        self.shaders.insert(id, program);
        Ok(ShaderHandle(id))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        if let Some(mut program) = self.shaders.remove(&shader.0) {
            program.destroy(&self.device);
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(convert_descriptor_type(b.kind))
                    .descriptor_count(1)
                    .stage_flags(convert_shader_stages(b.stages))
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }.map_err(|e| {
            BackendError::DescriptorCreationFailed(format!("descriptor set layout: {:?}", e))
        })?;
        let id = self.next_handle();
        self.set_layouts.insert(id, layout);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.set_layouts.remove(&layout.0) {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        let set_layout = self
            .set_layouts
            .get(&desc.layout.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("descriptor set layout #{}", desc.layout.0)))?;
        let target = self.pipeline_target(desc.kind);
        let (vertex_entry, fragment_entry) = desc.kind.entry_points();

        let program = self
            .shaders
            .get_mut(&desc.shader.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("shader #{}", desc.shader.0)))?;
        program.prepare_stage(&self.device, vertex_entry, naga::ShaderStage::Vertex)?;
        if let Some(entry) = fragment_entry {
            program.prepare_stage(&self.device, entry, naga::ShaderStage::Fragment)?;
        }
        let missing = |entry: &str| BackendError::PipelineCreationFailed(format!("stage '{}' not built", entry));
        let vertex = program.stage(vertex_entry).ok_or_else(|| missing(vertex_entry))?;
        let fragment = match fragment_entry {
            Some(entry) => Some(program.stage(entry).ok_or_else(|| missing(entry))?),
            None => None,
        };

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None) }.map_err(|e| {
            BackendError::PipelineCreationFailed(format!("{:?} layout: {:?}", desc.label, e))
        })?;

        let pipeline = match pipeline::create_graphics_pipeline(&self.device, desc.kind, vertex, fragment, layout, &target) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        log::debug!("Created pipeline {:?}", desc.label);
        let id = self.next_handle();
        self.pipelines.insert(id, VkPipeline { pipeline, layout });
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.pipelines.remove(&pipeline.0) {
            unsafe {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
        }
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDescriptor,
    ) -> BackendResult<DescriptorPoolHandle> {
        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::UNIFORM_BUFFER, desc.uniform_buffers),
            (vk::DescriptorType::SAMPLED_IMAGE, desc.sampled_images),
            (vk::DescriptorType::SAMPLER, desc.samplers),
            (vk::DescriptorType::INPUT_ATTACHMENT, desc.input_attachments),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect();
        if pool_sizes.is_empty() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            });
        }

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(desc.max_sets.max(1))
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            BackendError::DescriptorCreationFailed(format!("descriptor pool of {} sets: {:?}", desc.max_sets, e))
        })?;
        let id = self.next_handle();
        self.descriptor_pools.insert(id, pool);
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if let Some(raw) = self.descriptor_pools.remove(&pool.0) {
            self.descriptor_sets.retain(|_, set| set.pool != pool.0);
            unsafe { self.device.destroy_descriptor_pool(raw, None) };
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let raw_pool = self
            .descriptor_pools
            .get(&pool.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("descriptor pool #{}", pool.0)))?;
        let raw_layout = self
            .set_layouts
            .get(&layout.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("descriptor set layout #{}", layout.0)))?;

        let layouts = [raw_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(raw_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| BackendError::DescriptorCreationFailed(format!("allocate descriptor set: {:?}", e)))?;

        let id = self.next_handle();
        self.descriptor_sets.insert(
            id,
            VkDescriptorSet {
                set: sets[0],
                pool: pool.0,
            },
        );
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()> {
        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorImageInfo),
        }

        let raw_set = self
            .descriptor_sets
            .get(&set.0)
            .map(|s| s.set)
            .ok_or_else(|| BackendError::InvalidHandle(format!("descriptor set #{}", set.0)))?;

        let mut infos = Vec::with_capacity(writes.len());
        for write in writes {
            let entry = match *write {
                DescriptorWrite::UniformBuffer { binding, buffer } => {
                    let raw = self
                        .buffers
                        .get(&buffer.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("buffer #{}", buffer.0)))?;
                    (
                        binding,
                        vk::DescriptorType::UNIFORM_BUFFER,
                        Info::Buffer(vk::DescriptorBufferInfo {
                            buffer: raw.buffer,
                            offset: 0,
                            range: vk::WHOLE_SIZE,
                        }),
                    )
                }
                DescriptorWrite::Image { binding, image } => {
                    let raw = self
                        .images
                        .get(&image.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("image #{}", image.0)))?;
                    (
                        binding,
                        vk::DescriptorType::SAMPLED_IMAGE,
                        Info::Image(
                            vk::DescriptorImageInfo::default()
                                .image_view(raw.view)
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                        ),
                    )
                }
                DescriptorWrite::Sampler { binding, sampler } => {
                    let raw = self
                        .samplers
                        .get(&sampler.0)
                        .copied()
                        .ok_or_else(|| BackendError::InvalidHandle(format!("sampler #{}", sampler.0)))?;
                    (
                        binding,
                        vk::DescriptorType::SAMPLER,
                        Info::Image(vk::DescriptorImageInfo::default().sampler(raw)),
                    )
                }
                DescriptorWrite::InputAttachment { binding, attachment } => {
                    let view = self.targets.gbuffer_view(attachment).ok_or_else(|| {
                        BackendError::InvalidHandle(format!("G-buffer {:?} without deferred targets", attachment))
                    })?;
                    (
                        binding,
                        vk::DescriptorType::INPUT_ATTACHMENT,
                        Info::Image(
                            vk::DescriptorImageInfo::default()
                                .image_view(view)
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                        ),
                    )
                }
            };
            infos.push(entry);
        }

        let vk_writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(binding, ty, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(raw_set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match info {
                    Info::Buffer(buffer) => write.buffer_info(std::slice::from_ref(buffer)),
                    Info::Image(image) => write.image_info(std::slice::from_ref(image)),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn create_shadow_framebuffer(&mut self, depth: ImageHandle) -> BackendResult<FramebufferHandle> {
        let image = self
            .images
            .get(&depth.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("image #{}", depth.0)))?;
        let framebuffer =
            targets::create_framebuffer(&self.device, self.passes.shadow, &[image.view], image.extent)?;
        let extent = image.extent;
        let id = self.next_handle();
        self.framebuffers.insert(id, VkFramebuffer { framebuffer, extent });
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(fb) = self.framebuffers.remove(&framebuffer.0) {
            unsafe { self.device.destroy_framebuffer(fb.framebuffer, None) };
        }
    }

    fn allocate_command_buffer(&mut self) -> BackendResult<CommandBufferHandle> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "allocate command buffer"))?;
        let id = self.next_handle();
        self.command_buffers.insert(id, buffers[0]);
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        if let Some(cb) = self.command_buffers.remove(&command_buffer.0) {
            unsafe { self.device.free_command_buffers(self.command_pool, &[cb]) };
        }
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let cb = self
            .command_buffers
            .get(&command_buffer.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("command buffer #{}", command_buffer.0)))?;
        unsafe {
            self.device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "reset"))?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cb, &begin_info)
                .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "begin"))
        }
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let cb = self
            .command_buffers
            .get(&command_buffer.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("command buffer #{}", command_buffer.0)))?;
        unsafe { self.device.end_command_buffer(cb) }
            .map_err(|e| map_vk_error(e, BackendError::CommandRecordingFailed, "end"))
    }

    fn cmd_begin_pass(&mut self, command_buffer: CommandBufferHandle, begin: &PassBegin) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        let Some((render_pass, framebuffer, extent, clears)) = self.pass_setup(begin) else {
            log::error!("No framebuffer for {:?} pass into {:?}", begin.kind, begin.target);
            return;
        };

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clears);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            self.device.cmd_set_viewport(cb, 0, &[viewport]);
            self.device.cmd_set_scissor(cb, 0, &[render_area]);
        }
    }

    fn cmd_next_subpass(&mut self, command_buffer: CommandBufferHandle) {
        if let Some(cb) = self.command_buffer(command_buffer) {
            unsafe { self.device.cmd_next_subpass(cb, vk::SubpassContents::INLINE) };
        }
    }

    fn cmd_end_pass(&mut self, command_buffer: CommandBufferHandle) {
        if let Some(cb) = self.command_buffer(command_buffer) {
            unsafe { self.device.cmd_end_render_pass(cb) };
        }
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        match self.pipelines.get(&pipeline.0) {
            Some(p) => unsafe {
                self.device
                    .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, p.pipeline)
            },
            None => log::error!("Binding unknown pipeline #{}", pipeline.0),
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: CommandBufferHandle,
        pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    ) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        let (Some(p), Some(s)) = (self.pipelines.get(&pipeline.0), self.descriptor_sets.get(&set.0)) else {
            log::error!("Binding descriptor set #{} with pipeline #{}: unknown handle", set.0, pipeline.0);
            return;
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                p.layout,
                0,
                &[s.set],
                &[],
            );
        }
    }

    fn cmd_set_depth_bias(&mut self, command_buffer: CommandBufferHandle, bias: DepthBias) {
        if let Some(cb) = self.command_buffer(command_buffer) {
            unsafe {
                self.device
                    .cmd_set_depth_bias(cb, bias.constant, bias.clamp, bias.slope)
            };
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        match self.buffers.get(&buffer.0) {
            Some(b) => unsafe { self.device.cmd_bind_vertex_buffers(cb, 0, &[b.buffer], &[0]) },
            None => log::error!("Binding unknown vertex buffer #{}", buffer.0),
        }
    }

    fn cmd_bind_index_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        match self.buffers.get(&buffer.0) {
            Some(b) => unsafe {
                self.device
                    .cmd_bind_index_buffer(cb, b.buffer, 0, vk::IndexType::UINT32)
            },
            None => log::error!("Binding unknown index buffer #{}", buffer.0),
        }
    }

    fn cmd_draw_indexed(&mut self, command_buffer: CommandBufferHandle, index_count: u32) {
        if let Some(cb) = self.command_buffer(command_buffer) {
            unsafe { self.device.cmd_draw_indexed(cb, index_count, 1, 0, 0, 0) };
        }
    }

    fn cmd_draw(&mut self, command_buffer: CommandBufferHandle, vertex_count: u32) {
        if let Some(cb) = self.command_buffer(command_buffer) {
            unsafe { self.device.cmd_draw(cb, vertex_count, 1, 0, 0) };
        }
    }

    fn cmd_transition_images(
        &mut self,
        command_buffer: CommandBufferHandle,
        images: &[ImageHandle],
        transition: LayoutTransition,
    ) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        let fragment_tests =
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let depth_access = vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let (old_layout, new_layout, src_access, dst_access, src_stage, dst_stage) = match transition {
            LayoutTransition::ToDepthAttachment => (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::SHADER_READ,
                depth_access,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                fragment_tests,
            ),
            LayoutTransition::ToShaderRead => (
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                depth_access,
                vk::AccessFlags::SHADER_READ,
                fragment_tests,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
        };

        let barriers: Vec<vk::ImageMemoryBarrier> = images
            .iter()
            .filter_map(|handle| {
                let image = self.images.get(&handle.0);
                if image.is_none() {
                    log::error!("Transition of unknown image #{}", handle.0);
                }
                image
            })
            .map(|image| {
                image_barrier(
                    image.image,
                    transition_aspects(image.aspect, image.format),
                    0,
                    1,
                    old_layout,
                    new_layout,
                    src_access,
                    dst_access,
                )
            })
            .collect();
        if barriers.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    fn submit(&mut self, submit: &SubmitInfo) -> BackendResult<()> {
        let cb = self
            .command_buffers
            .get(&submit.command_buffer.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("command buffer #{}", submit.command_buffer.0)))?;
        let wait: Vec<vk::Semaphore> = submit.wait.map(|s| self.semaphore(s)).transpose()?.into_iter().collect();
        let signal: Vec<vk::Semaphore> = submit.signal.map(|s| self.semaphore(s)).transpose()?.into_iter().collect();
        let fence = match submit.fence {
            Some(fence) => self.fence(fence)?,
            None => vk::Fence::null(),
        };
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait.len()];
        let command_buffers = [cb];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        }
        .map_err(|e| map_vk_error(e, BackendError::SubmitFailed, "queue submit"))
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquireOutcome> {
        let semaphore = self.semaphore(signal)?;
        let result = unsafe {
            self.swapchain_fn.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(map_vk_error(e, BackendError::AcquireImageFailed, "acquire")),
        }
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<PresentOutcome> {
        let wait_semaphores = [self.semaphore(wait)?];
        let swapchains = [self.swapchain.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_fn.queue_present(self.graphics_queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(map_vk_error(e, BackendError::PresentFailed, "present")),
        }
    }

    fn recreate_swapchain(&mut self) -> BackendResult<()> {
        let extent = self.surface_extent();
        if extent.is_zero_area() {
            return Ok(());
        }
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed, "wait idle"))?;

        let swapchain = Swapchain::new(
            &SurfaceContext {
                device: &self.device,
                surface_fn: &self.surface_fn,
                swapchain_fn: &self.swapchain_fn,
                physical_device: self.physical_device,
                surface: self.surface,
            },
            self.surface_format,
            extent.width,
            extent.height,
            self.vsync,
            self.swapchain.swapchain,
        )?;
        let mut old = std::mem::replace(&mut self.swapchain, swapchain);
        old.destroy(&self.device, &self.swapchain_fn);

        let allocator = allocator_mut(&mut self.allocator)?;
        self.targets.destroy(&self.device, allocator);
        self.targets = FrameTargets::new(&self.device, allocator, &self.passes, &self.config, &self.swapchain)?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let leaked = self.buffers.len() + self.images.len() + self.pipelines.len() + self.fences.len();
            if leaked > 0 {
                log::warn!("Vulkan device dropped with {} live resources", leaked);
            }

            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, layout) in self.set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, mut program) in self.shaders.drain() {
                program.destroy(&self.device);
            }
            self.descriptor_sets.clear();
            for (_, pool) in self.descriptor_pools.drain() {
                self.device.destroy_descriptor_pool(pool, None);
            }
            for (_, fb) in self.framebuffers.drain() {
                self.device.destroy_framebuffer(fb.framebuffer, None);
            }
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, fence) in self.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
            for (_, semaphore) in self.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }

            // Freed with the pool
            self.command_buffers.clear();

            // Drop the allocator before destroying the device
            if let Some(mut allocator) = self.allocator.take() {
                for (_, image) in self.images.drain() {
                    memory::destroy_image(&self.device, &mut allocator, image);
                }
                for (_, buffer) in self.buffers.drain() {
                    memory::destroy_buffer(&self.device, &mut allocator, buffer);
                }
                self.targets.destroy(&self.device, &mut allocator);
            }

            self.passes.destroy(&self.device);
            self.device.destroy_command_pool(self.command_pool, None);
            self.swapchain.destroy(&self.device, &self.swapchain_fn);
            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}
