use erupt::vk;
use itertools::Itertools;

use crate::{
    device::{Device, DeviceError, Extent},
    kernel::{KernelBindings, WorkGroups},
    vulkan::{
        bytes_of,
        command::{compute_barrier, immediate_submit},
        device_error,
        pipeline::{ComputePipeline, ComputePipelineCreateInfo},
        push_constants::{BlendPushConstants, TracePushConstants},
        std140::FrameUniforms,
        AllocatedBuffer,
        AllocatedImage,
        VulkanContext,
    },
};

/// Tightly packed RGBA8 pixels of the environment map.
#[derive(Copy, Clone, Debug)]
pub struct TextureData<'a> {
    pub extent: Extent,
    pub rgba:   &'a [u8],
}

#[derive(Copy, Clone, Debug)]
pub struct VulkanDeviceCreateInfo<'a> {
    pub trace_kernel: &'a [u8],
    pub blend_kernel: &'a [u8],
    pub skybox:       TextureData<'a>,
}

/// Runs the tracing and blending kernels on a Vulkan compute queue.
///
/// Every dispatch is recorded into its own command buffer and waited on before
/// returning, so descriptor sets can be rewritten freely between calls.
pub struct VulkanDevice {
    vk_ctx:         VulkanContext,
    trace_pipeline: ComputePipeline,
    blend_pipeline: ComputePipeline,
    uniforms:       AllocatedBuffer,
    empty:          AllocatedBuffer,
    skybox:         AllocatedImage,
    skybox_sampler: vk::Sampler,
}

impl VulkanDevice {
    pub fn new(vk_ctx: VulkanContext, create_info: VulkanDeviceCreateInfo) -> Result<Self, DeviceError> {
        let trace_pipeline = ComputePipeline::new(&vk_ctx, ComputePipelineCreateInfo {
            shader:             create_info.trace_kernel,
            bindings:           vec![
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::STORAGE_IMAGE,
            ],
            push_constant_size: std::mem::size_of::<TracePushConstants>() as u32,
        })?;

        let blend_pipeline = ComputePipeline::new(&vk_ctx, ComputePipelineCreateInfo {
            shader:             create_info.blend_kernel,
            bindings:           vec![vk::DescriptorType::STORAGE_IMAGE, vk::DescriptorType::STORAGE_IMAGE],
            push_constant_size: std::mem::size_of::<BlendPushConstants>() as u32,
        })?;

        let uniforms = AllocatedBuffer::new(
            vk_ctx.allocator.clone(),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            1,
            std::mem::size_of::<FrameUniforms>(),
        )?;

        // Stands in for scene lists that are currently empty.
        let empty =
            AllocatedBuffer::new(vk_ctx.allocator.clone(), vk::BufferUsageFlags::STORAGE_BUFFER, 1, 72)?;

        let skybox = AllocatedImage::texture_with_data(
            &vk_ctx,
            vk::Format::R8G8B8A8_UNORM,
            create_info.skybox.extent,
            create_info.skybox.rgba,
        )?;

        let skybox_sampler = {
            let info = vk::SamplerCreateInfoBuilder::new()
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .min_filter(vk::Filter::LINEAR)
                .mag_filter(vk::Filter::LINEAR);
            unsafe { vk_ctx.device.create_sampler(&info, None) }.result().map_err(device_error("sampler"))?
        };

        log::info!(
            "Vulkan device ready: skybox {}x{}",
            create_info.skybox.extent.width,
            create_info.skybox.extent.height
        );

        Ok(Self { vk_ctx, trace_pipeline, blend_pipeline, uniforms, empty, skybox, skybox_sampler })
    }

    pub fn context(&self) -> &VulkanContext {
        &self.vk_ctx
    }

    pub fn destroy(&self) {
        let device = &self.vk_ctx.device;
        self.trace_pipeline.destroy(device);
        self.blend_pipeline.destroy(device);
        self.uniforms.destroy();
        self.empty.destroy();
        self.skybox.destroy(device);
        unsafe {
            device.destroy_sampler(self.skybox_sampler, None);
        }
    }
}

impl Device for VulkanDevice {
    type Buffer = AllocatedBuffer;
    type Image = AllocatedImage;

    fn create_buffer(&self, count: usize, stride: usize) -> Result<AllocatedBuffer, DeviceError> {
        AllocatedBuffer::new(self.vk_ctx.allocator.clone(), vk::BufferUsageFlags::STORAGE_BUFFER, count, stride)
    }

    fn write_buffer(&self, buffer: &mut AllocatedBuffer, data: &[u8]) -> Result<(), DeviceError> {
        buffer.set_data(data)
    }

    fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        buffer.destroy();
    }

    fn create_image(&self, extent: Extent) -> Result<AllocatedImage, DeviceError> {
        AllocatedImage::storage_target(&self.vk_ctx, extent)
    }

    fn image_extent(&self, image: &AllocatedImage) -> Extent {
        image.size()
    }

    fn destroy_image(&self, image: AllocatedImage) {
        image.destroy(&self.vk_ctx.device);
    }

    fn dispatch(&self, bindings: KernelBindings<'_, Self>, groups: WorkGroups) -> Result<(), DeviceError> {
        self.uniforms.set_data(bytes_of(&FrameUniforms::from(bindings.params)))?;

        let push_constants = TracePushConstants {
            sphere_count:      bindings.spheres.map_or(0, |b| b.count as u32),
            mesh_object_count: bindings.mesh_objects.map_or(0, |b| b.count as u32),
        };

        let scene_infos = [bindings.spheres, bindings.mesh_objects, bindings.vertices, bindings.indices].map(|buffer| {
            [vk::DescriptorBufferInfoBuilder::new()
                .buffer(buffer.unwrap_or(&self.empty).buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)]
        });
        let skybox_info = [vk::DescriptorImageInfoBuilder::new()
            .sampler(self.skybox_sampler)
            .image_view(self.skybox.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let uniform_info =
            [vk::DescriptorBufferInfoBuilder::new().buffer(self.uniforms.buffer).offset(0).range(vk::WHOLE_SIZE)];
        let target_info = [vk::DescriptorImageInfoBuilder::new()
            .image_view(bindings.target.view)
            .image_layout(vk::ImageLayout::GENERAL)];

        let set = self.trace_pipeline.descriptor_set();
        let mut writes = scene_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSetBuilder::new()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect_vec();
        writes.push(
            vk::WriteDescriptorSetBuilder::new()
                .dst_set(set)
                .dst_binding(4)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&skybox_info),
        );
        writes.push(
            vk::WriteDescriptorSetBuilder::new()
                .dst_set(set)
                .dst_binding(5)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&uniform_info),
        );
        writes.push(
            vk::WriteDescriptorSetBuilder::new()
                .dst_set(set)
                .dst_binding(6)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&target_info),
        );

        unsafe {
            self.vk_ctx.device.update_descriptor_sets(&writes, &[]);
        }

        immediate_submit(&self.vk_ctx, |device, command_buffer| {
            compute_barrier(device, command_buffer);
            self.trace_pipeline.bind(device, command_buffer, &push_constants);
            unsafe {
                device.cmd_dispatch(command_buffer, groups.x, groups.y, groups.z);
            }
        })
    }

    fn blend(&self, raw: &AllocatedImage, converged: &mut AllocatedImage, sample: u32) -> Result<(), DeviceError> {
        if raw.size() != converged.size() {
            return Err(DeviceError::Backend(format!(
                "cannot blend {:?} into {:?}",
                raw.size(),
                converged.size()
            )));
        }

        let raw_info =
            [vk::DescriptorImageInfoBuilder::new().image_view(raw.view).image_layout(vk::ImageLayout::GENERAL)];
        let converged_info =
            [vk::DescriptorImageInfoBuilder::new().image_view(converged.view).image_layout(vk::ImageLayout::GENERAL)];
        let set = self.blend_pipeline.descriptor_set();
        let writes = [
            vk::WriteDescriptorSetBuilder::new()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&raw_info),
            vk::WriteDescriptorSetBuilder::new()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&converged_info),
        ];

        unsafe {
            self.vk_ctx.device.update_descriptor_sets(&writes, &[]);
        }

        let push_constants = BlendPushConstants { sample: sample as f32 };
        let groups = WorkGroups::covering(converged.size());
        immediate_submit(&self.vk_ctx, |device, command_buffer| {
            compute_barrier(device, command_buffer);
            self.blend_pipeline.bind(device, command_buffer, &push_constants);
            unsafe {
                device.cmd_dispatch(command_buffer, groups.x, groups.y, groups.z);
            }
        })
    }
}
