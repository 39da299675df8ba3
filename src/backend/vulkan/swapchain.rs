//! Swapchain creation and teardown.

use ash::khr::{surface, swapchain};
use ash::vk;

use crate::backend::traits::{BackendError, BackendResult};

/// Swapchain with one view per image
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Surface-facing objects needed to build a swapchain
pub struct SurfaceContext<'a> {
    pub device: &'a ash::Device,
    pub surface_fn: &'a surface::Instance,
    pub swapchain_fn: &'a swapchain::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
}

/// Pick the surface format: sRGB BGRA when offered, else the first one.
pub fn choose_surface_format(
    surface_fn: &surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> BackendResult<vk::SurfaceFormatKHR> {
    let formats = unsafe { surface_fn.get_physical_device_surface_formats(physical_device, surface) }
        .map_err(|e| BackendError::SwapchainCreationFailed(format!("Failed to query surface formats: {:?}", e)))?;

    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| BackendError::SwapchainCreationFailed("Surface reports no formats".into()))
}

impl Swapchain {
    /// Create a swapchain of `format`, retiring `old` if it is not null.
    pub fn new(
        ctx: &SurfaceContext,
        format: vk::SurfaceFormatKHR,
        width: u32,
        height: u32,
        vsync: bool,
        old: vk::SwapchainKHR,
    ) -> BackendResult<Self> {
        let capabilities = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| BackendError::SwapchainCreationFailed(format!("Failed to query capabilities: {:?}", e)))?;

        let present_modes = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| BackendError::SwapchainCreationFailed(format!("Failed to query present modes: {:?}", e)))?;

        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            present_modes
                .iter()
                .copied()
                .find(|&m| m == vk::PresentModeKHR::MAILBOX)
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let image_count = (capabilities.min_image_count + 1).min(if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        });

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = unsafe { ctx.swapchain_fn.create_swapchain(&create_info, None) }
            .map_err(|e| BackendError::SwapchainCreationFailed(format!("{:?}", e)))?;

        let mut result = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: format.format,
            extent,
        };
        if let Err(e) = result.create_views(ctx) {
            result.destroy(ctx.device, ctx.swapchain_fn);
            return Err(e);
        }

        log::info!(
            "Created swapchain: {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            result.images.len(),
            format.format,
            present_mode
        );
        Ok(result)
    }

    fn create_views(&mut self, ctx: &SurfaceContext) -> BackendResult<()> {
        self.images = unsafe { ctx.swapchain_fn.get_swapchain_images(self.swapchain) }
            .map_err(|e| BackendError::SwapchainCreationFailed(format!("Failed to get images: {:?}", e)))?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { ctx.device.create_image_view(&view_info, None) }
                .map_err(|e| BackendError::SwapchainCreationFailed(format!("Failed to create view: {:?}", e)))?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Destroy the views and the swapchain; the device must be idle.
    pub fn destroy(&mut self, device: &ash::Device, swapchain_fn: &swapchain::Device) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_fn.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}
