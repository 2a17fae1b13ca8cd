use crate::error::RenderResult;
use ash::vk;
use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::Arc;

const VALIDATION_LAYER_NAME: &str = "VK_LAYER_KHRONOS_validation";

pub struct Instance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
}

impl Instance {
    pub fn new(
        app_name: &str,
        required_extensions: Vec<*const i8>,
        validation_layers: bool,
    ) -> RenderResult<Arc<Instance>> {
        let entry = ash::Entry::linked();
        let enable_validation =
            validation_layers && Instance::check_validation_layer_support(&entry)?;
        if validation_layers && !enable_validation {
            log::warn!("validation layers requested but not present, continuing without");
        }

        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = CString::new("kestrel").unwrap_or_default();
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_next: ptr::null(),
            p_application_name: app_name.as_ptr(),
            application_version: 0,
            p_engine_name: engine_name.as_ptr(),
            engine_version: 0,
            api_version: vk::make_api_version(0, 1, 3, 0),
        };

        let layer_name = CString::new(VALIDATION_LAYER_NAME).unwrap_or_default();
        let enabled_layer_names = [layer_name.as_ptr()];

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::InstanceCreateFlags::empty(),
            p_application_info: &app_info,
            enabled_layer_count: if enable_validation { 1 } else { 0 },
            pp_enabled_layer_names: if enable_validation {
                enabled_layer_names.as_ptr()
            } else {
                ptr::null()
            },
            pp_enabled_extension_names: required_extensions.as_ptr(),
            enabled_extension_count: required_extensions.len() as u32,
        };

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        log::debug!("created vulkan instance");

        Ok(Arc::new(Instance { entry, instance }))
    }

    pub fn check_validation_layer_support(entry: &ash::Entry) -> RenderResult<bool> {
        let layer_properties = entry.enumerate_instance_layer_properties()?;
        for layer_property in layer_properties.iter() {
            let name = unsafe { CStr::from_ptr(layer_property.layer_name.as_ptr()) };
            if name.to_string_lossy() == VALIDATION_LAYER_NAME {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let types = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let message = CStr::from_ptr((*p_callback_data).p_message);
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", types, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", types, message)
        }
        _ => log::debug!("{} {:?}", types, message),
    }

    vk::FALSE
}

pub struct DebugMessenger {
    loader: ash::extensions::ext::DebugUtils,
    handle: vk::DebugUtilsMessengerEXT,

    // Reference-counting
    _instance: Arc<Instance>,
}

impl DebugMessenger {
    fn get_debug_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
        vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            p_next: ptr::null(),
            flags: vk::DebugUtilsMessengerCreateFlagsEXT::empty(),
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(vulkan_debug_utils_callback),
            p_user_data: ptr::null_mut(),
        }
    }

    pub fn new(instance: Arc<Instance>) -> RenderResult<DebugMessenger> {
        let debug_utils_loader =
            ash::extensions::ext::DebugUtils::new(&instance.entry, &instance.instance);

        let create_info = DebugMessenger::get_debug_create_info();
        let handle =
            unsafe { debug_utils_loader.create_debug_utils_messenger(&create_info, None)? };

        Ok(DebugMessenger {
            loader: debug_utils_loader,
            handle,
            _instance: instance,
        })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.handle, None);
        };
    }
}
