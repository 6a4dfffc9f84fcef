use anyhow::Result;
use ash::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::instance::Instance;

pub(crate) struct Surface {
    pub(crate) loader: khr::surface::Instance,
    pub(crate) raw: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn new(
        instance: &Instance,
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
    ) -> Result<Self> {
        let loader = khr::surface::Instance::new(&instance.entry, &instance.raw);
        let raw = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.raw,
                display_handle,
                window_handle,
                None,
            )?
        };

        Ok(Self { loader, raw })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.raw, None);
        }
    }
}
