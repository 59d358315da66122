use erupt::{vk, DeviceLoader};

use crate::{vulkan::device_error, DeviceError};

pub fn make_shader_module(device: &DeviceLoader, spv_bytes: &[u8]) -> Result<vk::ShaderModule, DeviceError> {
    let spv = erupt::utils::decode_spv(spv_bytes)
        .map_err(|e| DeviceError::Backend(format!("Cannot decode SPIR-V: {e}")))?;
    let module_info = vk::ShaderModuleCreateInfoBuilder::new().code(&spv);
    unsafe { device.create_shader_module(&module_info, None) }
        .result()
        .map_err(device_error("shader module"))
}
