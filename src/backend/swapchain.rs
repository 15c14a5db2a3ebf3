// Swapchain - Window presentation
//
// A fixed ring of presentable images bound to one surface. The ring is
// rotated strictly in order by the presentation surface, so the swapchain
// is created with exactly the requested image count and a present mode
// that hands images back in order (immediate, else FIFO).
//
// Vulkan needs an image acquired before it can be presented. The next image
// is acquired right after each present (and after creation/resize) and
// checked against the ring position; the producer's submission waits on
// `image_available` and signals `render_finished`, which the present waits
// on. An out-of-date swapchain or an image out of rotation withholds the
// frame semaphores until the ring is rebuilt.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;
use winit::window::{Fullscreen, Window};

use super::surface::VulkanSurface;
use super::VulkanDevice;
use crate::device::{PresentMode, SwapChain, SwapChainDesc};

/// Semaphores a frame's submission must wait on and signal.
#[derive(Debug, Clone, Copy)]
pub struct FrameSemaphores {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

/// Acquire/present bookkeeping of the image ring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Rotation {
    /// Image whose acquire signal is pending on `image_available`.
    acquired: Option<u32>,
    /// Image the ring presents next.
    expected: u32,
    image_count: u32,
}

impl Rotation {
    fn new(image_count: u32) -> Self {
        Self {
            acquired: None,
            expected: 0,
            image_count,
        }
    }

    /// Record an acquired image. Returns false when it is out of rotation;
    /// the signal stays pending either way so it can be drained.
    fn acquire(&mut self, index: u32) -> bool {
        self.acquired = Some(index);
        index == self.expected
    }

    /// Nothing acquired (out of date or failed acquire).
    fn lose(&mut self) {
        self.acquired = None;
    }

    /// The acquired image is the one the ring renders into next.
    fn in_rotation(&self) -> bool {
        self.acquired == Some(self.expected)
    }

    /// Take the pending acquire for draining.
    fn take_pending(&mut self) -> Option<u32> {
        self.acquired.take()
    }

    /// Account for a present of `index`. `Ok(false)` when there is no frame
    /// in rotation to present.
    fn present(&mut self, index: u32) -> Result<bool> {
        if !self.in_rotation() {
            return Ok(false);
        }

        // The frame's submission already waited on the acquire signal
        self.acquired = None;
        if index != self.expected {
            anyhow::bail!("Present of image {} out of order, expected {}", index, self.expected);
        }
        self.expected = (index + 1) % self.image_count;
        Ok(true)
    }
}

pub struct VulkanSwapChain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    rotation: Rotation,
    semaphores: FrameSemaphores,
    surface: vk::SurfaceKHR,
    window: Arc<Window>,
    queue: vk::Queue,
    physical_device: vk::PhysicalDevice,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    device: ash::Device,
}

impl VulkanSwapChain {
    pub fn new(device: &VulkanDevice, surface: &VulkanSurface, desc: &SwapChainDesc) -> Result<Self> {
        log::info!(
            "Creating swapchain: {}x{} {:?}, {} images",
            desc.width,
            desc.height,
            desc.format,
            desc.buffer_count
        );

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let semaphores = unsafe {
            FrameSemaphores {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
            }
        };

        let mut swap_chain = Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            rotation: Rotation::default(),
            semaphores,
            surface: surface.surface,
            window: surface.window.clone(),
            queue: device.graphics_queue,
            physical_device: device.physical_device,
            surface_loader: device.surface_loader.clone(),
            swapchain_loader: device.swapchain_loader.clone(),
            device: device.device.clone(),
        };

        // Drop cleans up the semaphores if anything below fails
        swap_chain.build(desc)?;
        if desc.full_screen {
            swap_chain.set_full_screen_state(true)?;
        }
        swap_chain.acquire_next()?;

        Ok(swap_chain)
    }

    /// Semaphores for the frame being recorded, or `None` when the frame
    /// must be skipped: the swapchain is out of date or handed out an image
    /// out of rotation. Either way it needs a rebuild.
    pub fn frame_semaphores(&self) -> Option<FrameSemaphores> {
        self.rotation.in_rotation().then_some(self.semaphores)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// (Re)create the vk swapchain, retiring the previous one.
    fn build(&mut self, desc: &SwapChainDesc) -> Result<()> {
        // Query surface capabilities
        let surface_caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }?;

        // Query supported formats
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }?;

        // Query supported present modes
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }?;

        let format: vk::Format = desc.format.into();
        let surface_format = formats
            .iter()
            .find(|f| f.format == format)
            .with_context(|| format!("Surface does not support {:?}", desc.format))?;

        // IMMEDIATE: No vsync, lowest latency, may tear
        // FIFO: Vsync enabled, guaranteed available
        // MAILBOX is never used: it may hand images back out of order
        let present_mode = match desc.present_mode {
            PresentMode::Immediate if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) => {
                vk::PresentModeKHR::IMMEDIATE
            }
            _ => vk::PresentModeKHR::FIFO,
        };
        log::info!("Present mode: {:?}", present_mode);

        // Choose extent
        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: desc.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: desc.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        if desc.buffer_count < surface_caps.min_image_count
            || (surface_caps.max_image_count > 0 && desc.buffer_count > surface_caps.max_image_count)
        {
            anyhow::bail!(
                "Surface supports {}..={} images, {} requested",
                surface_caps.min_image_count,
                surface_caps.max_image_count,
                desc.buffer_count
            );
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(desc.buffer_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        // Get swapchain images
        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }?;
        if images.len() != desc.buffer_count as usize {
            anyhow::bail!(
                "Swapchain created {} images, {} requested",
                images.len(),
                desc.buffer_count
            );
        }

        log::info!("Created swapchain with {} images", images.len());

        self.rotation = Rotation::new(images.len() as u32);
        self.images = images;
        self.extent = extent;
        Ok(())
    }

    /// Acquire the image the next frame renders into.
    fn acquire_next(&mut self) -> Result<()> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.semaphores.image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal");
                }
                if !self.rotation.acquire(index) {
                    log::error!(
                        "Presentation engine handed out image {} but the ring expects {}",
                        index,
                        self.rotation.expected
                    );
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date, waiting for a rebuild");
                self.rotation.lose();
                Ok(())
            }
            Err(e) => {
                self.rotation.lose();
                Err(e).context("Failed to acquire swapchain image")
            }
        }
    }

    /// Consume a pending acquire signal so `image_available` can be reused.
    fn drain_acquire(&mut self) -> Result<()> {
        if self.rotation.take_pending().is_none() {
            return Ok(());
        }

        let wait_semaphores = [self.semaphores.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            let fence = self.device.create_fence(&vk::FenceCreateInfo::builder(), None)?;
            let result = self
                .device
                .queue_submit(self.queue, &[submit_info.build()], fence)
                .and_then(|_| self.device.wait_for_fences(&[fence], true, u64::MAX));
            self.device.destroy_fence(fence, None);
            result.context("Failed to drain swapchain acquire")
        }
    }
}

impl SwapChain for VulkanSwapChain {
    type Buffer = vk::Image;

    fn get_buffer(&mut self, index: u32) -> Result<vk::Image> {
        self.images
            .get(index as usize)
            .copied()
            .with_context(|| format!("Swapchain has no image {}", index))
    }

    fn release_buffer(&mut self, _image: vk::Image) {
        // Images belong to the swapchain and go away with it
    }

    fn resize_buffers(&mut self, desc: &SwapChainDesc) -> Result<()> {
        self.drain_acquire()?;
        self.build(desc)?;
        self.acquire_next()
    }

    fn set_full_screen_state(&mut self, full_screen: bool) -> Result<()> {
        if full_screen {
            self.window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            self.window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }
        Ok(())
    }

    fn present(&mut self, index: u32) -> Result<()> {
        if !self.rotation.present(index)? {
            log::debug!("No image in rotation, dropping present of image {}", index);
            return Ok(());
        }

        let wait_semaphores = [self.semaphores.render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(self.queue, &present_info) };

        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal after present");
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date at present");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to present swapchain image"),
        }

        self.acquire_next()
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        if let Err(e) = self.drain_acquire() {
            log::warn!("{:?}", e);
        }
        unsafe {
            self.device.destroy_semaphore(self.semaphores.image_available, None);
            self.device.destroy_semaphore(self.semaphores.render_finished, None);
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_images_rotate_and_wrap() {
        let mut rotation = Rotation::new(3);
        for index in [0, 1, 2, 0] {
            assert!(rotation.acquire(index));
            assert!(rotation.in_rotation());
            assert!(rotation.present(index).unwrap());
            assert_eq!(rotation.take_pending(), None);
        }
        assert_eq!(rotation.expected, 1);
    }

    #[test]
    fn out_of_rotation_image_withholds_the_frame_but_stays_drainable() {
        let mut rotation = Rotation::new(3);
        assert!(!rotation.acquire(1));
        assert!(!rotation.in_rotation());

        // Nothing was rendered, so nothing is presented or consumed
        assert!(!rotation.present(0).unwrap());
        assert_eq!(rotation.take_pending(), Some(1));
        assert_eq!(rotation.take_pending(), None);
    }

    #[test]
    fn out_of_order_present_fails_without_leaving_a_pending_signal() {
        let mut rotation = Rotation::new(2);
        assert!(rotation.acquire(0));

        assert!(rotation.present(1).is_err());
        assert!(!rotation.in_rotation());
        assert_eq!(rotation.take_pending(), None);
    }

    #[test]
    fn lost_swapchain_has_nothing_to_present_or_drain() {
        let mut rotation = Rotation::new(2);
        assert!(rotation.acquire(0));
        rotation.lose();

        assert!(!rotation.in_rotation());
        assert!(!rotation.present(0).unwrap());
        assert_eq!(rotation.take_pending(), None);
    }
}
