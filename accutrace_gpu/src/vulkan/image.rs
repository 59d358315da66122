use std::sync::{Arc, RwLock};

use erupt::{vk, DeviceLoader};
use vk_mem_erupt as vma;

use crate::{
    vulkan::{command, device_error, AllocatedBuffer, VulkanContext},
    DeviceError, Extent,
};

pub const TARGET_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

#[derive(Clone)]
pub struct AllocatedImage {
    pub image:             vk::Image,
    pub view:              vk::ImageView,
    pub subresource_range: vk::ImageSubresourceRange,
    pub extent:            vk::Extent3D,
    pub layout:            vk::ImageLayout,

    allocator:           Arc<RwLock<vma::Allocator>>,
    allocation:          vma::Allocation,
    pub allocation_info: vma::AllocationInfo,
}

impl AllocatedImage {
    pub fn new(
        vk_ctx: &VulkanContext,
        image_info: vk::ImageCreateInfoBuilder,
        layout: vk::ImageLayout,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<Self, DeviceError> {
        let allocation_create_info =
            vma::AllocationCreateInfo { usage: vma::MemoryUsage::GpuOnly, ..Default::default() };

        let (image, allocation, allocation_info) = vk_ctx
            .allocator
            .read()
            .map_err(|_| DeviceError::Backend("Memory allocator lock is poisoned".to_string()))?
            .create_image(&image_info.initial_layout(vk::ImageLayout::UNDEFINED), &allocation_create_info)
            .map_err(|e| {
                log::error!("Cannot allocate {:?} image: {e:?}", image_info.extent);
                DeviceError::OutOfMemory { what: "image" }
            })?;

        let view_info = vk::ImageViewCreateInfoBuilder::new()
            .image(image)
            .view_type(vk::ImageViewType::_2D)
            .format(image_info.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(subresource_range);

        let view = unsafe { vk_ctx.device.create_image_view(&view_info, None) }
            .result()
            .map_err(device_error("image view"))?;

        let this = Self {
            image,
            view,
            subresource_range,
            extent: image_info.extent,
            layout,
            allocator: vk_ctx.allocator.clone(),
            allocation,
            allocation_info,
        };

        if layout != vk::ImageLayout::UNDEFINED {
            command::immediate_submit(vk_ctx, |device, command_buffer| unsafe {
                device.cmd_pipeline_barrier2(
                    command_buffer,
                    &vk::DependencyInfoBuilder::new().image_memory_barriers(&[vk::ImageMemoryBarrier2Builder::new()
                        .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(layout)
                        .image(image)
                        .subresource_range(subresource_range)]),
                );
            })?;
        }

        Ok(this)
    }

    /// RGBA32F image the kernels write to and the presenter copies from.
    pub fn storage_target(vk_ctx: &VulkanContext, extent: Extent) -> Result<Self, DeviceError> {
        if extent.is_empty() {
            return Err(DeviceError::ZeroSized { what: "render target" });
        }

        let image_info = vk::ImageCreateInfoBuilder::new()
            .usage(
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .format(TARGET_FORMAT)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlagBits::_1)
            .image_type(vk::ImageType::_2D);

        let this = Self::new(vk_ctx, image_info, vk::ImageLayout::GENERAL, colour_range())?;
        if let Err(e) = this.clear(vk_ctx) {
            this.destroy(&vk_ctx.device);
            return Err(e);
        }
        Ok(this)
    }

    /// Zeroes a `GENERAL` layout image so fresh targets never hold stale memory.
    fn clear(&self, vk_ctx: &VulkanContext) -> Result<(), DeviceError> {
        let range = vk::ImageSubresourceRangeBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);
        let black = vk::ClearColorValue { float32: [0.0; 4] };
        command::immediate_submit(vk_ctx, |device, command_buffer| unsafe {
            device.cmd_clear_color_image(command_buffer, self.image, vk::ImageLayout::GENERAL, &black, &[range]);
        })
    }

    pub fn texture_with_data(
        vk_ctx: &VulkanContext,
        format: vk::Format,
        extent: Extent,
        data: &[u8],
    ) -> Result<Self, DeviceError> {
        let image_info = vk::ImageCreateInfoBuilder::new()
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlagBits::_1)
            .image_type(vk::ImageType::_2D);

        let mut this = Self::new(vk_ctx, image_info, vk::ImageLayout::UNDEFINED, colour_range())?;
        this.set_data(vk_ctx, data)?;
        this.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(this)
    }

    pub fn size(&self) -> Extent {
        Extent::new(self.extent.width, self.extent.height)
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_image_view(self.view, None);
        }
        if let Ok(allocator) = self.allocator.read() {
            allocator.destroy_image(self.image, &self.allocation);
        }
    }

    fn set_data(&self, vk_ctx: &VulkanContext, data: &[u8]) -> Result<(), DeviceError> {
        let staging = AllocatedBuffer::with_data(self.allocator.clone(), vk::BufferUsageFlags::TRANSFER_SRC, 1, data)?;

        let result = command::immediate_submit(vk_ctx, |device, command_buffer| unsafe {
            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfoBuilder::new().image_memory_barriers(&[vk::ImageMemoryBarrier2Builder::new()
                    .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                    .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                    .src_access_mask(vk::AccessFlags2::empty())
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .image(self.image)
                    .subresource_range(self.subresource_range)]),
            );
            device.cmd_copy_buffer_to_image2(
                command_buffer,
                &vk::CopyBufferToImageInfo2Builder::new()
                    .src_buffer(staging.buffer)
                    .dst_image(self.image)
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .regions(&[vk::BufferImageCopy2Builder::new()
                        .buffer_offset(0)
                        .buffer_row_length(0)
                        .buffer_image_height(0)
                        .image_offset(vk::Offset3D::default())
                        .image_subresource(
                            vk::ImageSubresourceLayersBuilder::new()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .mip_level(0)
                                .base_array_layer(0)
                                .layer_count(1)
                                .build(),
                        )
                        .image_extent(self.extent)]),
            );
            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfoBuilder::new().image_memory_barriers(&[vk::ImageMemoryBarrier2Builder::new()
                    .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                    .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                    .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .image(self.image)
                    .subresource_range(self.subresource_range)]),
            );
        });

        staging.destroy();
        result
    }
}

fn colour_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRangeBuilder::new()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}
