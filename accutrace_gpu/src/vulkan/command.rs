use erupt::{vk, DeviceLoader};

use crate::{
    vulkan::{device_error, VulkanContext},
    DeviceError,
};

/// Records `execute_commands` into a one-shot command buffer, submits it and
/// waits for it to finish.
pub fn immediate_submit<F>(vk_ctx: &VulkanContext, execute_commands: F) -> Result<(), DeviceError>
where
    F: FnOnce(&DeviceLoader, vk::CommandBuffer),
{
    let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
        .command_pool(vk_ctx.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let begin_info =
        vk::CommandBufferBeginInfoBuilder::new().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let command_buffers = unsafe {
        let command_buffer = vk_ctx
            .device
            .allocate_command_buffers(&allocate_info)
            .result()
            .map_err(device_error("command buffer"))?[0];
        vk_ctx
            .device
            .begin_command_buffer(command_buffer, &begin_info)
            .result()
            .map_err(device_error("command buffer recording"))?;
        execute_commands(&vk_ctx.device, command_buffer);
        vk_ctx
            .device
            .end_command_buffer(command_buffer)
            .result()
            .map_err(device_error("command buffer recording"))?;
        [command_buffer]
    };

    let submit_info = vk::SubmitInfoBuilder::new().command_buffers(&command_buffers);
    let result = unsafe {
        vk_ctx
            .device
            .queue_submit(vk_ctx.queue, &[submit_info], vk_ctx.upload_fence)
            .result()
            .map_err(device_error("queue submission"))
            .and_then(|_| {
                vk_ctx
                    .device
                    .wait_for_fences(&[vk_ctx.upload_fence], true, u64::MAX)
                    .result()
                    .map_err(device_error("fence wait"))
            })
            .and_then(|_| {
                vk_ctx.device.reset_fences(&[vk_ctx.upload_fence]).result().map_err(device_error("fence reset"))
            })
    };

    unsafe {
        vk_ctx.device.free_command_buffers(vk_ctx.command_pool, &command_buffers);
    }
    result
}

/// Makes every earlier write on the queue visible to the compute work that follows.
pub fn compute_barrier(device: &DeviceLoader, command_buffer: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier2Builder::new()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE);
    unsafe {
        device.cmd_pipeline_barrier2(
            command_buffer,
            &vk::DependencyInfoBuilder::new().memory_barriers(std::slice::from_ref(&barrier)),
        );
    }
}
