//! Render passes and the swapchain-sized attachments they render into.
//!
//! Render passes are created once for the device lifetime. The depth target,
//! the multisampled color target, the G-buffer and all swapchain framebuffers
//! follow the swapchain and are rebuilt on every recreation.

use ash::vk;
use gpu_allocator::vulkan::Allocator;

use super::conversion::convert_sample_count;
use super::memory::{self, ImageSpec, VkImage};
use super::swapchain::Swapchain;
use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::GBufferAttachment;

/// Fixed attachment setup chosen at device creation
#[derive(Debug, Clone, Copy)]
pub struct TargetConfig {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    /// Color and depth samples of the forward pass
    pub samples: u32,
    pub prepass: bool,
    pub deferred: bool,
}

impl TargetConfig {
    pub fn msaa(&self) -> bool {
        self.samples > 1 && !self.deferred
    }

    /// Samples of the swapchain-sized depth target
    pub fn depth_samples(&self) -> vk::SampleCountFlags {
        if self.msaa() {
            convert_sample_count(self.samples)
        } else {
            vk::SampleCountFlags::TYPE_1
        }
    }
}

pub fn gbuffer_format(attachment: GBufferAttachment) -> vk::Format {
    match attachment {
        GBufferAttachment::Position | GBufferAttachment::Normal => vk::Format::R16G16B16A16_SFLOAT,
        GBufferAttachment::Albedo | GBufferAttachment::Material => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Index of a G-buffer attachment in the deferred render pass
pub fn gbuffer_slot(attachment: GBufferAttachment) -> usize {
    match attachment {
        GBufferAttachment::Position => 0,
        GBufferAttachment::Normal => 1,
        GBufferAttachment::Albedo => 2,
        GBufferAttachment::Material => 3,
    }
}

pub struct RenderPasses {
    pub depth_prepass: vk::RenderPass,
    pub shadow: vk::RenderPass,
    pub forward: vk::RenderPass,
    pub deferred: vk::RenderPass,
}

fn create_render_pass(
    device: &ash::Device,
    attachments: &[vk::AttachmentDescription],
    subpasses: &[vk::SubpassDescription],
    dependencies: &[vk::SubpassDependency],
    name: &str,
) -> BackendResult<vk::RenderPass> {
    let info = vk::RenderPassCreateInfo::default()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);
    unsafe { device.create_render_pass(&info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create {} render pass: {:?}", name, e))
    })
}

/// Depth attachment of the color passes, loading what the pre-pass wrote
fn scene_depth_attachment(config: &TargetConfig) -> vk::AttachmentDescription {
    let (load_op, initial_layout) = if config.prepass {
        (vk::AttachmentLoadOp::LOAD, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
    } else {
        (vk::AttachmentLoadOp::CLEAR, vk::ImageLayout::UNDEFINED)
    };
    vk::AttachmentDescription::default()
        .format(config.depth_format)
        .samples(config.depth_samples())
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial_layout)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
}

fn present_attachment(config: &TargetConfig, load_op: vk::AttachmentLoadOp) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(config.color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

fn external_color_dependency() -> vk::SubpassDependency {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
}

impl RenderPasses {
    pub fn new(device: &ash::Device, config: &TargetConfig) -> BackendResult<Self> {
        let mut passes = Self {
            depth_prepass: vk::RenderPass::null(),
            shadow: vk::RenderPass::null(),
            forward: vk::RenderPass::null(),
            deferred: vk::RenderPass::null(),
        };
        if let Err(e) = passes.create_all(device, config) {
            passes.destroy(device);
            return Err(e);
        }
        Ok(passes)
    }

    fn create_all(&mut self, device: &ash::Device, config: &TargetConfig) -> BackendResult<()> {
        self.depth_prepass = Self::create_depth_prepass(device, config)?;
        self.shadow = Self::create_shadow(device, config)?;
        self.forward = Self::create_forward(device, config)?;
        self.deferred = Self::create_deferred(device, config)?;
        Ok(())
    }

    fn create_depth_prepass(device: &ash::Device, config: &TargetConfig) -> BackendResult<vk::RenderPass> {
        let attachment = vk::AttachmentDescription::default()
            .format(config.depth_format)
            .samples(config.depth_samples())
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let depth_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .depth_stencil_attachment(&depth_ref);
        let fragment_tests =
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(fragment_tests)
            .dst_stage_mask(fragment_tests)
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);

        create_render_pass(device, &[attachment], &[subpass], &[dependency], "depth pre-pass")
    }

    /// Shadow maps arrive in depth attachment layout and leave in it; the
    /// frame records explicit transitions around the shadow chain.
    fn create_shadow(device: &ash::Device, config: &TargetConfig) -> BackendResult<vk::RenderPass> {
        let attachment = vk::AttachmentDescription::default()
            .format(config.depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let depth_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .depth_stencil_attachment(&depth_ref);
        let fragment_tests =
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_stage_mask(fragment_tests)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(fragment_tests)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ),
        ];

        create_render_pass(device, &[attachment], &[subpass], &dependencies, "shadow")
    }

    fn create_forward(device: &ash::Device, config: &TargetConfig) -> BackendResult<vk::RenderPass> {
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let resolve_ref = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let dependency = external_color_dependency();

        if config.msaa() {
            let attachments = [
                vk::AttachmentDescription::default()
                    .format(config.color_format)
                    .samples(convert_sample_count(config.samples))
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                scene_depth_attachment(config),
                present_attachment(config, vk::AttachmentLoadOp::DONT_CARE),
            ];
            let subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_ref)
                .resolve_attachments(&resolve_ref)
                .depth_stencil_attachment(&depth_ref);
            create_render_pass(device, &attachments, &[subpass], &[dependency], "forward")
        } else {
            let attachments = [
                present_attachment(config, vk::AttachmentLoadOp::CLEAR),
                scene_depth_attachment(config),
            ];
            let subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_ref)
                .depth_stencil_attachment(&depth_ref);
            create_render_pass(device, &attachments, &[subpass], &[dependency], "forward")
        }
    }

    /// Subpass 0 writes the G-buffer, subpass 1 reads it as input
    /// attachments and shades the swapchain image.
    fn create_deferred(device: &ash::Device, config: &TargetConfig) -> BackendResult<vk::RenderPass> {
        let mut attachments = vec![
            present_attachment(config, vk::AttachmentLoadOp::CLEAR),
            scene_depth_attachment(config),
        ];
        for attachment in GBufferAttachment::ALL {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(gbuffer_format(attachment))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            );
        }

        let gbuffer_writes: Vec<vk::AttachmentReference> = (0..GBufferAttachment::ALL.len() as u32)
            .map(|i| vk::AttachmentReference {
                attachment: 2 + i,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let gbuffer_reads: Vec<vk::AttachmentReference> = (0..GBufferAttachment::ALL.len() as u32)
            .map(|i| vk::AttachmentReference {
                attachment: 2 + i,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect();
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let present_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpasses = [
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&gbuffer_writes)
                .depth_stencil_attachment(&depth_ref),
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&present_ref)
                .input_attachments(&gbuffer_reads),
        ];
        let dependencies = [
            external_color_dependency(),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(1)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        create_render_pass(device, &attachments, &subpasses, &dependencies, "deferred")
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for pass in [
            &mut self.depth_prepass,
            &mut self.shadow,
            &mut self.forward,
            &mut self.deferred,
        ] {
            if *pass != vk::RenderPass::null() {
                unsafe { device.destroy_render_pass(*pass, None) };
                *pass = vk::RenderPass::null();
            }
        }
    }
}

/// Swapchain-sized attachments and framebuffers
#[derive(Default)]
pub struct FrameTargets {
    pub depth: Option<VkImage>,
    pub msaa_color: Option<VkImage>,
    pub gbuffer: Vec<VkImage>,
    pub prepass_framebuffer: Option<vk::Framebuffer>,
    /// Forward or deferred framebuffer per swapchain image
    pub color_framebuffers: Vec<vk::Framebuffer>,
}

impl FrameTargets {
    pub fn new(
        device: &ash::Device,
        allocator: &mut Allocator,
        passes: &RenderPasses,
        config: &TargetConfig,
        swapchain: &Swapchain,
    ) -> BackendResult<Self> {
        let mut targets = Self::default();
        if let Err(e) = targets.create_all(device, allocator, passes, config, swapchain) {
            targets.destroy(device, allocator);
            return Err(e);
        }
        Ok(targets)
    }

    fn create_all(
        &mut self,
        device: &ash::Device,
        allocator: &mut Allocator,
        passes: &RenderPasses,
        config: &TargetConfig,
        swapchain: &Swapchain,
    ) -> BackendResult<()> {
        let extent = swapchain.extent;
        let depth = self.depth.insert(memory::create_image(
            device,
            allocator,
            &ImageSpec {
                name: "scene depth",
                extent,
                format: config.depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                mip_levels: 1,
                samples: config.depth_samples(),
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )?);
        let depth_view = depth.view;

        if config.msaa() {
            self.msaa_color = Some(memory::create_image(
                device,
                allocator,
                &ImageSpec {
                    name: "msaa color",
                    extent,
                    format: config.color_format,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    mip_levels: 1,
                    samples: convert_sample_count(config.samples),
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            )?);
        }

        if config.deferred {
            for attachment in GBufferAttachment::ALL {
                self.gbuffer.push(memory::create_image(
                    device,
                    allocator,
                    &ImageSpec {
                        name: "g-buffer",
                        extent,
                        format: gbuffer_format(attachment),
                        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
                        mip_levels: 1,
                        samples: vk::SampleCountFlags::TYPE_1,
                        aspect: vk::ImageAspectFlags::COLOR,
                    },
                )?);
            }
        }

        if config.prepass {
            self.prepass_framebuffer = Some(create_framebuffer(
                device,
                passes.depth_prepass,
                &[depth_view],
                extent,
            )?);
        }

        for &swap_view in &swapchain.image_views {
            let attachments: Vec<vk::ImageView> = if config.deferred {
                let mut views = vec![swap_view, depth_view];
                views.extend(self.gbuffer.iter().map(|image| image.view));
                views
            } else if let Some(msaa) = &self.msaa_color {
                vec![msaa.view, depth_view, swap_view]
            } else {
                vec![swap_view, depth_view]
            };
            let pass = if config.deferred {
                passes.deferred
            } else {
                passes.forward
            };
            self.color_framebuffers
                .push(create_framebuffer(device, pass, &attachments, extent)?);
        }
        Ok(())
    }

    /// View of a G-buffer attachment, if the deferred path is active
    pub fn gbuffer_view(&self, attachment: GBufferAttachment) -> Option<vk::ImageView> {
        self.gbuffer.get(gbuffer_slot(attachment)).map(|image| image.view)
    }

    pub fn destroy(&mut self, device: &ash::Device, allocator: &mut Allocator) {
        unsafe {
            for framebuffer in self.color_framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if let Some(framebuffer) = self.prepass_framebuffer.take() {
                device.destroy_framebuffer(framebuffer, None);
            }
        }
        for image in self.gbuffer.drain(..) {
            memory::destroy_image(device, allocator, image);
        }
        if let Some(image) = self.msaa_color.take() {
            memory::destroy_image(device, allocator, image);
        }
        if let Some(image) = self.depth.take() {
            memory::destroy_image(device, allocator, image);
        }
    }
}

pub fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> BackendResult<vk::Framebuffer> {
    let info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    unsafe { device.create_framebuffer(&info, None) }
        .map_err(|e| BackendError::FramebufferCreationFailed(format!("{}x{}: {:?}", extent.width, extent.height, e)))
}
