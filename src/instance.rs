use crate::debug_utils;
use ash::ext;
use ash::vk;
use ash::Entry;
use core::ffi::CStr;
use raw_window_handle::HasDisplayHandle;

#[derive(thiserror::Error, Debug)]
pub enum InstanceCreationError {
    #[error("failed to load the vulkan library (is a driver installed?)")]
    Loading(#[source] ash::LoadingError),
    #[error("failed to get a display handle from the window")]
    DisplayHandle(#[source] raw_window_handle::HandleError),
    #[error("failed to enumerate the window system's required vulkan extensions")]
    WindowExtensionEnumeration(#[source] vk::Result),
    #[error("failed to enumerate instance layers")]
    LayerEnumeration(#[source] vk::Result),
    #[error("failed to enumerate instance extensions")]
    ExtensionEnumeration(#[source] vk::Result),
    #[error("failed to create vulkan instance")]
    InstanceCreation(#[source] vk::Result),
}

/// The vulkan instance and its entry point. Created once at startup,
/// dropped last during teardown.
pub struct Instance {
    pub entry: Entry,
    pub inner: ash::Instance,
    pub(crate) debug_utils_available: bool,
    debug_utils_messenger: Option<(ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((fns, messenger)) = self.debug_utils_messenger.take() {
                fns.destroy_debug_utils_messenger(messenger, None);
            }
            self.inner.destroy_instance(None);
        }
    }
}

impl Instance {
    /// Creates the vulkan instance with the surface extensions `display`
    /// needs. Enables the Khronos validation layer and the debug utils
    /// extension when they are installed, skipping them with a note in the
    /// log when they are not.
    pub fn new(display: &dyn HasDisplayHandle, app_name: &CStr) -> Result<Instance, InstanceCreationError> {
        profiling::scope!("vulkan instance creation");
        let entry = unsafe { Entry::load() }.map_err(InstanceCreationError::Loading)?;

        let display_handle = display.display_handle().map_err(InstanceCreationError::DisplayHandle)?.as_raw();
        let window_extensions =
            ash_window::enumerate_required_extensions(display_handle).map_err(InstanceCreationError::WindowExtensionEnumeration)?;

        let validation_layer = crate::cstr!("VK_LAYER_KHRONOS_validation");
        let available_layers =
            unsafe { entry.enumerate_instance_layer_properties() }.map_err(InstanceCreationError::LayerEnumeration)?;
        let validation_layer_available = available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == validation_layer));
        let mut layers = Vec::new();
        if validation_layer_available {
            layers.push(validation_layer.as_ptr());
        } else {
            log::info!("{validation_layer:?} is not installed, vulkan validation is off");
        }

        let available_extensions =
            unsafe { entry.enumerate_instance_extension_properties(None) }.map_err(InstanceCreationError::ExtensionEnumeration)?;
        let debug_utils_available = available_extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == ext::debug_utils::NAME));
        let mut extensions = window_extensions.to_vec();
        if debug_utils_available {
            extensions.push(ext::debug_utils::NAME.as_ptr());
        } else {
            log::info!("{:?} is not supported, object names and validation output are off", ext::debug_utils::NAME);
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(crate::cstr!("firstlight"))
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);
        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        let inner =
            unsafe { entry.create_instance(&instance_create_info, None) }.map_err(InstanceCreationError::InstanceCreation)?;

        let debug_utils_messenger = if debug_utils_available {
            match debug_utils::create_debug_utils_messenger(&entry, &inner) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    log::warn!("failed to create debug utils messenger: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Instance {
            entry,
            inner,
            debug_utils_available,
            debug_utils_messenger,
        })
    }
}
