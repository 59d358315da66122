pub mod buffer;
pub mod command;
pub mod contexts;
pub mod debug;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod push_constants;
pub mod shader;
pub mod std140;

pub use buffer::AllocatedBuffer;
pub use contexts::{FrameContext, VulkanContext};
pub use device::{TextureData, VulkanDevice, VulkanDeviceCreateInfo};
pub use image::AllocatedImage;

use erupt::vk;

use crate::DeviceError;

pub(crate) fn device_error(what: &'static str) -> impl Fn(vk::Result) -> DeviceError {
    move |result| {
        if result == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY || result == vk::Result::ERROR_OUT_OF_HOST_MEMORY {
            DeviceError::OutOfMemory { what }
        } else {
            DeviceError::Backend(format!("{what}: {result:?}"))
        }
    }
}

/// Raw bytes of a plain `#[repr(C)]`/std140 value for upload.
pub(crate) fn bytes_of<T: Copy>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}
