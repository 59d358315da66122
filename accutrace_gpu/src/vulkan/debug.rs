use std::ffi::{c_void, CStr};

use erupt::vk;

pub unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagBitsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = &*callback_data;
    let message_id = if callback_data.p_message_id_name.is_null() {
        "unnamed".into()
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();
    let message = message.split("| ").last().unwrap_or_default();

    let level = if severity == vk::DebugUtilsMessageSeverityFlagBitsEXT::ERROR_EXT {
        log::Level::Error
    } else if severity == vk::DebugUtilsMessageSeverityFlagBitsEXT::WARNING_EXT {
        log::Level::Warn
    } else if severity == vk::DebugUtilsMessageSeverityFlagBitsEXT::INFO_EXT {
        log::Level::Debug
    } else {
        log::Level::Trace
    };
    log::log!(target: "vulkan", level, "[{message_id}] {message}");

    if log::log_enabled!(target: "vulkan", level) && !callback_data.p_objects.is_null() {
        let objects = std::slice::from_raw_parts(callback_data.p_objects, callback_data.object_count as _);
        for (i, object) in objects.iter().enumerate() {
            log::log!(
                target: "vulkan",
                level,
                "- Object {}: handle = {:#x}, type = {:?}",
                i,
                object.object_handle,
                object.object_type
            );
        }
    }
    vk::FALSE
}
