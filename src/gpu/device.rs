use crate::error::{RenderError, RenderResult};
use crate::gpu;
use ash::vk;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

#[derive(Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }
}

pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,

    // Reference-counting
    instance: Arc<gpu::Instance>,
}

impl PhysicalDevice {
    pub fn new(vk_device: vk::PhysicalDevice, instance: Arc<gpu::Instance>) -> PhysicalDevice {
        let properties = unsafe { instance.instance.get_physical_device_properties(vk_device) };
        let features = unsafe { instance.instance.get_physical_device_features(vk_device) };

        PhysicalDevice {
            handle: vk_device,
            properties,
            features,
            queue_families: QueueFamilyIndices::default(),
            instance,
        }
    }

    /// Picks the first physical device that exposes the swapchain
    /// extension, a graphics queue family, and a present-capable family
    /// for `surface`.
    pub fn pick(
        instance: Arc<gpu::Instance>,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        required_extensions: &[String],
    ) -> RenderResult<Arc<PhysicalDevice>> {
        let physical_devices = unsafe { instance.instance.enumerate_physical_devices()? };
        for physical_device in physical_devices {
            let mut candidate = PhysicalDevice::new(physical_device, instance.clone());
            if candidate.is_suitable(surface_loader, surface, required_extensions)? {
                log::info!(
                    "using gpu: {:?}",
                    unsafe { CStr::from_ptr(candidate.properties.device_name.as_ptr()) }
                );
                return Ok(Arc::new(candidate));
            }
        }
        Err(RenderError::NoSuitableGpu)
    }

    fn is_suitable(
        &mut self,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        required_extensions: &[String],
    ) -> RenderResult<bool> {
        if !self.has_extensions(required_extensions)? {
            return Ok(false);
        }
        self.find_queue_families(surface_loader, surface)?;
        if !self.queue_families.is_complete() {
            return Ok(false);
        }
        let support = self.get_swapchain_support(surface_loader, surface)?;
        Ok(!support.formats.is_empty() && !support.present_modes.is_empty())
    }

    pub fn find_queue_families(
        &mut self,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<()> {
        let queue_family_properties = unsafe {
            self.instance
                .instance
                .get_physical_device_queue_family_properties(self.handle)
        };
        for (index, queue_family) in queue_family_properties.iter().enumerate() {
            if queue_family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && self.queue_families.graphics_family.is_none()
            {
                self.queue_families.graphics_family = Some(index as u32);
            }
            let present_support = unsafe {
                surface_loader.get_physical_device_surface_support(
                    self.handle,
                    index as u32,
                    surface,
                )?
            };
            if present_support && self.queue_families.present_family.is_none() {
                self.queue_families.present_family = Some(index as u32);
            }
        }
        Ok(())
    }

    pub fn has_extensions(&self, extensions: &[String]) -> RenderResult<bool> {
        let available_extensions = unsafe {
            self.instance
                .instance
                .enumerate_device_extension_properties(self.handle)?
        };

        let mut required_extensions: HashSet<String> = extensions.iter().cloned().collect();
        for extension in available_extensions.iter() {
            let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
            required_extensions.remove(&name.to_string_lossy().into_owned());
        }

        Ok(required_extensions.is_empty())
    }

    pub fn get_swapchain_support(
        &self,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<gpu::SwapchainSupportDetails> {
        Ok(gpu::SwapchainSupportDetails {
            capabilities: unsafe {
                surface_loader.get_physical_device_surface_capabilities(self.handle, surface)?
            },
            formats: unsafe {
                surface_loader.get_physical_device_surface_formats(self.handle, surface)?
            },
            present_modes: unsafe {
                surface_loader.get_physical_device_surface_present_modes(self.handle, surface)?
            },
        })
    }

    /// Required offset alignment for uniform sub-allocations out of one
    /// backing buffer. The frame heap rounds every bump by this.
    pub fn uniform_buffer_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

pub struct Device {
    pub handle: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,

    // Reference-counting
    _instance: Arc<gpu::Instance>,
    physical_device: Arc<PhysicalDevice>,
}

impl Device {
    pub fn new(
        physical_device: Arc<PhysicalDevice>,
        required_extensions: &[String],
        instance: Arc<gpu::Instance>,
    ) -> RenderResult<Arc<Device>> {
        let queue_families = physical_device.queue_families;
        let graphics_family = queue_families
            .graphics_family
            .ok_or(RenderError::NoSuitableGpu)?;
        let present_family = queue_families
            .present_family
            .ok_or(RenderError::NoSuitableGpu)?;

        let mut unique_queue_families = vec![graphics_family];
        if present_family != graphics_family {
            unique_queue_families.push(present_family);
        }

        let queue_priority = 1.0f32;
        let queue_cis: Vec<vk::DeviceQueueCreateInfo> = unique_queue_families
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: &queue_priority,
                ..vk::DeviceQueueCreateInfo::default()
            })
            .collect();

        let cstring_ext_names: Vec<CString> = required_extensions
            .iter()
            .filter_map(|s| CString::new(s.clone()).ok())
            .collect();
        let c_str_ptrs: Vec<*const c_char> = cstring_ext_names.iter().map(|s| s.as_ptr()).collect();

        let physical_device_features = vk::PhysicalDeviceFeatures::default();
        let device_ci = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_queue_create_infos: queue_cis.as_ptr(),
            queue_create_info_count: queue_cis.len() as u32,
            p_enabled_features: &physical_device_features,
            enabled_extension_count: c_str_ptrs.len() as u32,
            pp_enabled_extension_names: c_str_ptrs.as_ptr(),
            ..vk::DeviceCreateInfo::default()
        };
        let device = unsafe {
            instance
                .instance
                .create_device(physical_device.handle, &device_ci, None)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        Ok(Arc::new(Device {
            handle: device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            _instance: instance,
            physical_device,
        }))
    }

    pub fn physical(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    /// Blocks until every queue on the device has drained. Used before
    /// swapchain recreation and final teardown.
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.handle.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe { self.handle.destroy_device(None) };
    }
}
