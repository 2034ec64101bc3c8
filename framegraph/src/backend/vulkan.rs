//! Conversions from the frame graph's synchronization vocabulary to Vulkan.
//!
//! A Vulkan [`GraphBackend`](super::GraphBackend) stores raw `vk::Image` and
//! `vk::Buffer` handles in [`PhysicalHandle`]s and builds its barriers with the
//! helpers below.

use ash::vk;
use ash::vk::Handle;

use super::{PhysicalHandle, ResolvedBarrier, ResolvedTransfer};
use crate::compiler::BarrierKind;
use crate::graph::{AccessFlags, ImageLayout, PipelineStages, QueueType};
use crate::types::{BufferUsage, TextureFormat, TextureUsage};

/// Convert access flags to Vulkan access flags.
pub fn convert_access_flags(access: AccessFlags) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();

    if access.contains(AccessFlags::INDIRECT_COMMAND_READ) {
        result |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    if access.contains(AccessFlags::INDEX_READ) {
        result |= vk::AccessFlags::INDEX_READ;
    }
    if access.contains(AccessFlags::VERTEX_ATTRIBUTE_READ) {
        result |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if access.contains(AccessFlags::UNIFORM_READ) {
        result |= vk::AccessFlags::UNIFORM_READ;
    }
    if access.contains(AccessFlags::SHADER_READ) {
        result |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(AccessFlags::SHADER_WRITE) {
        result |= vk::AccessFlags::SHADER_WRITE;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_READ) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::DEPTH_STENCIL_READ) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if access.contains(AccessFlags::DEPTH_STENCIL_WRITE) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::TRANSFER_READ) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }

    result
}

/// Convert pipeline stages to Vulkan pipeline stage flags.
pub fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    const PAIRS: [(PipelineStages, vk::PipelineStageFlags); 11] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStages::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStages::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (
            PipelineStages::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
    ];

    let result = PAIRS
        .iter()
        .filter(|(stage, _)| stages.contains(*stage))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, vk_stage)| {
            acc | *vk_stage
        });

    // Vulkan rejects an empty stage mask
    if result.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        result
    }
}

/// Convert an image layout to a Vulkan image layout.
pub fn convert_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Convert a texture format to a Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Image aspect touched by barriers on a texture of the given format.
pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Map texture usage onto `VkImageUsageFlags`; attachment usage depends on the format.
pub fn convert_texture_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let attachment = if format.is_depth_stencil() {
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
    } else {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    };
    let pairs = [
        (TextureUsage::COPY_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
        (TextureUsage::COPY_DST, vk::ImageUsageFlags::TRANSFER_DST),
        (TextureUsage::TEXTURE_BINDING, vk::ImageUsageFlags::SAMPLED),
        (TextureUsage::STORAGE_BINDING, vk::ImageUsageFlags::STORAGE),
        (TextureUsage::RENDER_ATTACHMENT, attachment),
    ];

    pairs
        .iter()
        .filter(|(flag, _)| usage.contains(*flag))
        .fold(vk::ImageUsageFlags::empty(), |acc, (_, vk_flag)| acc | *vk_flag)
}

/// Map buffer usage onto `VkBufferUsageFlags`.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    const PAIRS: [(BufferUsage, vk::BufferUsageFlags); 7] = [
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::INDIRECT, vk::BufferUsageFlags::INDIRECT_BUFFER),
        (BufferUsage::COPY_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::COPY_DST, vk::BufferUsageFlags::TRANSFER_DST),
    ];

    PAIRS
        .iter()
        .filter(|(flag, _)| usage.contains(*flag))
        .fold(vk::BufferUsageFlags::empty(), |acc, (_, vk_flag)| acc | *vk_flag)
}

/// Queue family indices of the device's queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Family index of a queue type.
    pub fn index(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }
}

/// Raw image handle stored in a physical handle.
pub fn image_handle(handle: PhysicalHandle) -> vk::Image {
    vk::Image::from_raw(handle.0)
}

/// Raw buffer handle stored in a physical handle.
pub fn buffer_handle(handle: PhysicalHandle) -> vk::Buffer {
    vk::Buffer::from_raw(handle.0)
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Image memory barrier for a planned transition.
///
/// Aliasing barriers discard the previous contents, so they always start from
/// `UNDEFINED`.
pub fn image_barrier(
    barrier: &ResolvedBarrier,
    aspect: vk::ImageAspectFlags,
) -> vk::ImageMemoryBarrier<'static> {
    let old_layout = match barrier.kind {
        BarrierKind::Aliasing => vk::ImageLayout::UNDEFINED,
        _ => convert_image_layout(barrier.src.layout),
    };
    vk::ImageMemoryBarrier::default()
        .src_access_mask(convert_access_flags(barrier.src.access.writes()))
        .dst_access_mask(convert_access_flags(barrier.dst.access))
        .old_layout(old_layout)
        .new_layout(convert_image_layout(barrier.dst.layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image_handle(barrier.handle))
        .subresource_range(subresource_range(aspect))
}

/// Buffer memory barrier for a planned transition.
pub fn buffer_barrier(barrier: &ResolvedBarrier) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(convert_access_flags(barrier.src.access.writes()))
        .dst_access_mask(convert_access_flags(barrier.dst.access))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer_handle(barrier.handle))
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Release half of a queue family ownership transfer of an image.
///
/// The destination access mask is ignored on release and left empty.
pub fn image_release_barrier(
    transfer: &ResolvedTransfer,
    families: &QueueFamilies,
    aspect: vk::ImageAspectFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(convert_access_flags(transfer.src.access.writes()))
        .old_layout(convert_image_layout(transfer.src.layout))
        .new_layout(convert_image_layout(transfer.dst.layout))
        .src_queue_family_index(families.index(transfer.src_queue))
        .dst_queue_family_index(families.index(transfer.dst_queue))
        .image(image_handle(transfer.handle))
        .subresource_range(subresource_range(aspect))
}

/// Acquire half of a queue family ownership transfer of an image.
///
/// Must describe the same layouts as the release half.
pub fn image_acquire_barrier(
    transfer: &ResolvedTransfer,
    families: &QueueFamilies,
    aspect: vk::ImageAspectFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .dst_access_mask(convert_access_flags(transfer.dst.access))
        .old_layout(convert_image_layout(transfer.src.layout))
        .new_layout(convert_image_layout(transfer.dst.layout))
        .src_queue_family_index(families.index(transfer.src_queue))
        .dst_queue_family_index(families.index(transfer.dst_queue))
        .image(image_handle(transfer.handle))
        .subresource_range(subresource_range(aspect))
}

/// Release half of a queue family ownership transfer of a buffer.
pub fn buffer_release_barrier(
    transfer: &ResolvedTransfer,
    families: &QueueFamilies,
) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(convert_access_flags(transfer.src.access.writes()))
        .src_queue_family_index(families.index(transfer.src_queue))
        .dst_queue_family_index(families.index(transfer.dst_queue))
        .buffer(buffer_handle(transfer.handle))
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Acquire half of a queue family ownership transfer of a buffer.
pub fn buffer_acquire_barrier(
    transfer: &ResolvedTransfer,
    families: &QueueFamilies,
) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .dst_access_mask(convert_access_flags(transfer.dst.access))
        .src_queue_family_index(families.index(transfer.src_queue))
        .dst_queue_family_index(families.index(transfer.dst_queue))
        .buffer(buffer_handle(transfer.handle))
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ResourceId, ResourceState};

    #[test]
    fn test_empty_stage_mask_becomes_top_of_pipe() {
        assert_eq!(
            convert_pipeline_stages(PipelineStages::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            convert_pipeline_stages(PipelineStages::COMPUTE_SHADER | PipelineStages::TRANSFER),
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER
        );
    }

    #[test]
    fn test_aliasing_barrier_discards_contents() {
        let barrier = ResolvedBarrier {
            resource: ResourceId::new(0),
            handle: PhysicalHandle(5),
            is_image: true,
            kind: BarrierKind::Aliasing,
            src: ResourceState::new(
                AccessFlags::SHADER_WRITE,
                PipelineStages::COMPUTE_SHADER,
                ImageLayout::General,
            ),
            dst: ResourceState::new(
                AccessFlags::COLOR_ATTACHMENT_WRITE,
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                ImageLayout::ColorAttachment,
            ),
        };
        let vk_barrier = image_barrier(&barrier, vk::ImageAspectFlags::COLOR);
        assert_eq!(vk_barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            vk_barrier.new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(vk_barrier.src_access_mask, vk::AccessFlags::SHADER_WRITE);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(
            aspect_mask(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(TextureFormat::Rgba8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }
}
