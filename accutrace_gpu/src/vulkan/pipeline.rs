use std::ffi::CString;

use erupt::{vk, DeviceLoader, SmallVec};
use itertools::Itertools;

use crate::{
    vulkan::{device_error, shader::make_shader_module, VulkanContext},
    DeviceError,
};

/// A compute kernel with a single descriptor set whose bindings are numbered
/// in the order they are listed.
#[derive(Clone, Debug)]
pub struct ComputePipeline {
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool:       vk::DescriptorPool,
    pub descriptor_sets:       SmallVec<vk::DescriptorSet>,
    pub layout:                vk::PipelineLayout,
    pub pipeline:              vk::Pipeline,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineCreateInfo<'a> {
    pub shader:             &'a [u8],
    pub bindings:           Vec<vk::DescriptorType>,
    pub push_constant_size: u32,
}

impl ComputePipeline {
    pub fn new(vk_ctx: &VulkanContext, create_info: ComputePipelineCreateInfo) -> Result<Self, DeviceError> {
        let descriptor_set_layout = {
            let bindings = create_info
                .bindings
                .iter()
                .enumerate()
                .map(|(binding, &descriptor_type)| {
                    vk::DescriptorSetLayoutBindingBuilder::new()
                        .binding(binding as u32)
                        .descriptor_count(1)
                        .descriptor_type(descriptor_type)
                        .stage_flags(vk::ShaderStageFlags::COMPUTE)
                })
                .collect_vec();
            let info = vk::DescriptorSetLayoutCreateInfoBuilder::new().bindings(&bindings);
            unsafe { vk_ctx.device.create_descriptor_set_layout(&info, None) }
                .result()
                .map_err(device_error("descriptor set layout"))?
        };

        let descriptor_pool = {
            let sizes = create_info
                .bindings
                .iter()
                .copied()
                .counts()
                .into_iter()
                .map(|(descriptor_type, count)| {
                    vk::DescriptorPoolSizeBuilder::new()._type(descriptor_type).descriptor_count(count as u32)
                })
                .collect_vec();
            let info = vk::DescriptorPoolCreateInfoBuilder::new().max_sets(1).pool_sizes(&sizes);
            unsafe { vk_ctx.device.create_descriptor_pool(&info, None) }
                .result()
                .map_err(device_error("descriptor pool"))?
        };

        let descriptor_sets = unsafe {
            vk_ctx.device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfoBuilder::new()
                    .descriptor_pool(descriptor_pool)
                    .set_layouts(&[descriptor_set_layout]),
            )
        }
        .result()
        .map_err(device_error("descriptor set"))?;

        let layout = {
            let push_constant_ranges = if create_info.push_constant_size > 0 {
                vec![vk::PushConstantRangeBuilder::new()
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .offset(0)
                    .size(create_info.push_constant_size)]
            } else {
                Vec::new()
            };
            let info = vk::PipelineLayoutCreateInfoBuilder::new()
                .set_layouts(std::slice::from_ref(&descriptor_set_layout))
                .push_constant_ranges(&push_constant_ranges);
            unsafe { vk_ctx.device.create_pipeline_layout(&info, None) }
                .result()
                .map_err(device_error("compute pipeline layout"))?
        };

        let shader = make_shader_module(&vk_ctx.device, create_info.shader)?;
        let entry_point = CString::new("main").map_err(|e| DeviceError::Backend(e.to_string()))?;
        let stage = vk::PipelineShaderStageCreateInfoBuilder::new()
            .stage(vk::ShaderStageFlagBits::COMPUTE)
            .module(shader)
            .name(&entry_point);
        let pipeline_infos = [vk::ComputePipelineCreateInfoBuilder::new().stage(*stage).layout(layout)];

        let pipeline = unsafe {
            vk_ctx.device.create_compute_pipelines(vk::PipelineCache::null(), &pipeline_infos, None)
        }
        .result()
        .map_err(device_error("compute pipeline"));

        unsafe {
            vk_ctx.device.destroy_shader_module(shader, None);
        }

        Ok(Self { descriptor_set_layout, descriptor_pool, descriptor_sets, layout, pipeline: pipeline?[0] })
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_sets[0]
    }

    /// Binds the pipeline and its descriptor set and uploads `push_constants`.
    pub fn bind<T: Copy>(&self, device: &DeviceLoader, command_buffer: vk::CommandBuffer, push_constants: &T) {
        unsafe {
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.layout,
                0,
                &self.descriptor_sets,
                &[],
            );
            device.cmd_push_constants(
                command_buffer,
                self.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::mem::size_of::<T>() as u32,
                push_constants as *const T as *const std::ffi::c_void,
            );
        }
    }

    pub fn destroy(&self, device: &DeviceLoader) {
        unsafe {
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
