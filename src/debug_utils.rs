//! VK_EXT_debug_utils integration: validation messages routed into [log],
//! and human-readable names attached to Vulkan objects so they show up in
//! validation output and graphics debuggers.

use ash::ext::debug_utils;
use ash::vk;
use ash::vk::Handle;
use core::fmt::Arguments;
use std::ffi::{c_char, c_void, CStr, CString};

/// Debug-utils object naming, owned by the [Device](crate::Device) whose
/// objects it names. Carries the extension's function table explicitly
/// instead of stashing it in process-wide state; when the extension was not
/// enabled, every call is a no-op.
pub struct DebugNamer {
    fns: Option<debug_utils::Device>,
}

impl DebugNamer {
    pub fn new(fns: debug_utils::Device) -> DebugNamer {
        DebugNamer { fns: Some(fns) }
    }

    pub fn disabled() -> DebugNamer {
        DebugNamer { fns: None }
    }

    /// Attaches `name` to `object`. Naming is best-effort: failures only
    /// cost the label, so they are not propagated.
    pub fn name<T: Handle>(&self, object: T, name: Arguments) {
        let Some(fns) = &self.fns else { return };
        let Ok(name) = CString::new(format!("{name}")) else { return };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(&name);
        let _ = unsafe { fns.set_debug_utils_object_name(&name_info) };
    }
}

pub(crate) fn create_debug_utils_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT), vk::Result> {
    let fns = debug_utils::Instance::new(entry, instance);
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_utils_messenger_callback));
    let messenger = unsafe { fns.create_debug_utils_messenger(&create_info, None) }?;
    Ok((fns, messenger))
}

unsafe extern "system" fn debug_utils_messenger_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let ptr_to_str = |ptr: *const c_char| {
        if ptr.is_null() {
            String::from("-")
        } else {
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string()
        }
    };
    let message_id = ptr_to_str((*p_callback_data).p_message_id_name);
    let message = ptr_to_str((*p_callback_data).p_message);
    let message = if message.contains("MessageID = ") && message.contains("] Object ") {
        // Validation layer messages repeat all their meta info in the text;
        // pick out the last part containing the actual human-language part.
        message.rsplit(" | ").next().unwrap_or(&message)
    } else {
        &message
    };

    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    };
    log::log!(level, "[{message_id}] {message}");

    vk::FALSE
}
