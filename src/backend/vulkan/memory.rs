//! Buffers and images backed by gpu-allocator memory.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::backend::traits::{BackendError, BackendResult};

pub struct VkBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
    pub size: u64,
}

pub struct VkImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Allocation,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    /// Aspect of the default view
    pub aspect: vk::ImageAspectFlags,
}

/// Parameters of an image allocation.
pub struct ImageSpec<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub aspect: vk::ImageAspectFlags,
}

pub fn create_buffer(
    device: &ash::Device,
    allocator: &mut Allocator,
    name: &str,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> BackendResult<VkBuffer> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(|e| BackendError::BufferCreationFailed(format!("{} ({} bytes): {:?}", name, size, e)))?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = match allocator.allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(BackendError::BufferCreationFailed(format!("{}: {}", name, e)));
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) } {
        unsafe { device.destroy_buffer(buffer, None) };
        let _ = allocator.free(allocation);
        return Err(BackendError::BufferCreationFailed(format!("{}: {:?}", name, e)));
    }

    Ok(VkBuffer {
        buffer,
        allocation,
        size,
    })
}

pub fn destroy_buffer(device: &ash::Device, allocator: &mut Allocator, buffer: VkBuffer) {
    unsafe { device.destroy_buffer(buffer.buffer, None) };
    if let Err(e) = allocator.free(buffer.allocation) {
        log::error!("Failed to free buffer memory: {}", e);
    }
}

pub fn create_image(
    device: &ash::Device,
    allocator: &mut Allocator,
    spec: &ImageSpec,
) -> BackendResult<VkImage> {
    let fail = |e: String| BackendError::ImageCreationFailed(format!("{} ({:?}): {}", spec.name, spec.format, e));

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: spec.extent.width,
            height: spec.extent.height,
            depth: 1,
        })
        .mip_levels(spec.mip_levels)
        .array_layers(1)
        .format(spec.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(spec.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(spec.samples);

    let image = unsafe { device.create_image(&image_info, None) }.map_err(|e| fail(format!("{:?}", e)))?;
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = match allocator.allocate(&AllocationCreateDesc {
        name: spec.name,
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(fail(e.to_string()));
        }
    };

    if let Err(e) = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) } {
        unsafe { device.destroy_image(image, None) };
        let _ = allocator.free(allocation);
        return Err(fail(format!("{:?}", e)));
    }

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(spec.format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: spec.aspect,
            base_mip_level: 0,
            level_count: spec.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = match unsafe { device.create_image_view(&view_info, None) } {
        Ok(view) => view,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            let _ = allocator.free(allocation);
            return Err(fail(format!("{:?}", e)));
        }
    };

    Ok(VkImage {
        image,
        view,
        allocation,
        format: spec.format,
        extent: spec.extent,
        mip_levels: spec.mip_levels,
        aspect: spec.aspect,
    })
}

pub fn destroy_image(device: &ash::Device, allocator: &mut Allocator, image: VkImage) {
    unsafe {
        device.destroy_image_view(image.view, None);
        device.destroy_image(image.image, None);
    }
    if let Err(e) = allocator.free(image.allocation) {
        log::error!("Failed to free image memory: {}", e);
    }
}
