// Surface - the drawable the swapchain presents into
//
// Created from the native window through ash-window, so every platform
// winit supports gets the right VK_KHR_*_surface extension.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

/// Loader plus handle; copies share the handle, only one may destroy it
#[derive(Clone)]
pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(entry: &Entry, instance: &ash::Instance, window: &Window) -> Result<Self> {
        let loader = ash::extensions::khr::Surface::new(entry, instance);

        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;

        Ok(Self { loader, handle })
    }

    /// Instance extensions the window system needs to create a surface
    pub fn required_extensions(window: &Window) -> Result<Vec<*const std::ffi::c_char>> {
        let extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())
            .context("Window system is not supported by Vulkan")?;
        Ok(extensions.to_vec())
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.handle)
        }
        .context("Failed to query surface presentation support")
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .context("Failed to query surface capabilities")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .context("Failed to query surface formats")
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .context("Failed to query surface present modes")
    }

    pub fn destroy(&self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
