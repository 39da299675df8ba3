//! Type conversions between engine types and Vulkan types.

use ash::vk;

use crate::backend::traits::BackendError;
use crate::backend::types::{
    AddressMode, BindingKind, BufferUsage, CompareFunction, FilterMode, ImageUsage, ShaderStages,
};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    // MAP_WRITE selects the memory location instead
    result
}

/// Convert ImageUsage flags to Vulkan image usage flags.
pub fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::DEPTH_ATTACHMENT) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }

    result
}

pub fn convert_compare_op(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn convert_filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn convert_mipmap_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
    }
}

pub fn convert_descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        BindingKind::Sampler => vk::DescriptorType::SAMPLER,
        BindingKind::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
    }
}

pub fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    result
}

/// Sample count flag for a power-of-two sample count.
pub fn convert_sample_count(samples: u32) -> vk::SampleCountFlags {
    match samples {
        64 => vk::SampleCountFlags::TYPE_64,
        32 => vk::SampleCountFlags::TYPE_32,
        16 => vk::SampleCountFlags::TYPE_16,
        8 => vk::SampleCountFlags::TYPE_8,
        4 => vk::SampleCountFlags::TYPE_4,
        2 => vk::SampleCountFlags::TYPE_2,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

/// Highest sample count present in a flag set.
pub fn max_sample_count(flags: vk::SampleCountFlags) -> u32 {
    [64, 32, 16, 8, 4, 2]
        .into_iter()
        .find(|&count| flags.contains(convert_sample_count(count)))
        .unwrap_or(1)
}

/// Whether a depth format carries a stencil aspect.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspects a layout transition must cover, given the aspect of the image's view.
///
/// Depth views only see depth, but a transition of a combined format must
/// include its stencil too.
pub fn transition_aspects(view_aspect: vk::ImageAspectFlags, format: vk::Format) -> vk::ImageAspectFlags {
    if view_aspect.contains(vk::ImageAspectFlags::DEPTH) && has_stencil(format) {
        view_aspect | vk::ImageAspectFlags::STENCIL
    } else {
        view_aspect
    }
}

/// Map a raw result to a backend error, keeping device loss and OOM distinct.
pub fn map_vk_error(result: vk::Result, wrap: fn(String) -> BackendError, what: &str) -> BackendError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            BackendError::OutOfMemory
        }
        other => wrap(format!("{}: {:?}", what, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_sample_count() {
        let flags = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(max_sample_count(flags), 4);
        assert_eq!(max_sample_count(vk::SampleCountFlags::TYPE_1), 1);
    }

    #[test]
    fn test_stencil_formats_transition_both_aspects() {
        let depth = vk::ImageAspectFlags::DEPTH;
        assert_eq!(transition_aspects(depth, vk::Format::D32_SFLOAT), depth);
        assert_eq!(
            transition_aspects(depth, vk::Format::D24_UNORM_S8_UINT),
            depth | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_color_images_transition_color_aspect() {
        let color = vk::ImageAspectFlags::COLOR;
        assert_eq!(transition_aspects(color, vk::Format::R8G8B8A8_SRGB), color);
        assert_eq!(transition_aspects(color, vk::Format::D24_UNORM_S8_UINT), color);
    }

    #[test]
    fn test_device_loss_is_not_wrapped() {
        let err = map_vk_error(vk::Result::ERROR_DEVICE_LOST, BackendError::SubmitFailed, "submit");
        assert!(matches!(err, BackendError::DeviceLost));
        let err = map_vk_error(vk::Result::ERROR_INITIALIZATION_FAILED, BackendError::SubmitFailed, "submit");
        assert!(matches!(err, BackendError::SubmitFailed(ref msg) if msg.contains("submit")));
    }

    #[test]
    fn test_usage_mapping() {
        let usage = convert_buffer_usage(BufferUsage::UNIFORM | BufferUsage::MAP_WRITE);
        assert_eq!(usage, vk::BufferUsageFlags::UNIFORM_BUFFER);
        let usage = convert_image_usage(ImageUsage::SAMPLED | ImageUsage::DEPTH_ATTACHMENT);
        assert!(usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
    }
}
