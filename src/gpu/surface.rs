use crate::error::RenderResult;
use crate::gpu;
use ash::vk;
use std::sync::Arc;

pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(
        instance: &gpu::Instance,
        loader: ash::extensions::khr::Surface,
        display_handle: raw_window_handle::RawDisplayHandle,
        window_handle: raw_window_handle::RawWindowHandle,
    ) -> RenderResult<Arc<Surface>> {
        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )?
        };
        Ok(Arc::new(Surface { loader, handle }))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
