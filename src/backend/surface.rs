// Window surface - platform-specific connection between a window and Vulkan
//
// The window layer creates it once per window and destroys it after the
// presentation surface built on it is gone.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use winit::window::Window;

use super::VulkanDevice;

/// Native handle a swap chain is bound to.
///
/// Keeps the window alive because full-screen switches go through it.
#[derive(Clone)]
pub struct VulkanSurface {
    pub window: Arc<Window>,
    pub surface: vk::SurfaceKHR,
}

impl VulkanSurface {
    pub fn new(device: &VulkanDevice, window: Arc<Window>) -> Result<Self> {
        let surface = unsafe {
            use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
            let window_handle = window
                .window_handle()
                .context("Failed to get window handle")?
                .as_raw();
            let display_handle = window
                .display_handle()
                .context("Failed to get display handle")?
                .as_raw();

            #[cfg(target_os = "windows")]
            {
                match (display_handle, window_handle) {
                    (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                        let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
                        let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                        let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                            .hinstance(hinstance)
                            .hwnd(hwnd);
                        let win32_surface_loader =
                            ash::extensions::khr::Win32Surface::new(&device.entry, &device.instance);
                        win32_surface_loader.create_win32_surface(&create_info, None)?
                    }
                    _ => anyhow::bail!("Unsupported window handle type"),
                }
            }

            #[cfg(not(target_os = "windows"))]
            {
                let _ = (display_handle, window_handle);
                anyhow::bail!("Platform not supported")
            }
        };

        // Verify the GPU supports presenting to this surface
        let surface_support = unsafe {
            device.surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )?
        };

        if !surface_support {
            unsafe { device.surface_loader.destroy_surface(surface, None) };
            anyhow::bail!("GPU doesn't support presenting to this surface");
        }

        Ok(Self { window, surface })
    }

    /// Destroy the native surface. Every swap chain built on it must be gone.
    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe {
            device.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
