// Backend module - Vulkan implementation of the presentation device layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Performance: Zero-cost abstractions, explicit control

pub mod device;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod views;

pub use device::VulkanDevice;
pub use surface::VulkanSurface;
pub use swapchain::{FrameSemaphores, VulkanSwapChain};
pub use sync::TimelineFence;
pub use views::ImageViewRegistry;

use ash::vk;

use crate::device::PixelFormat;

impl From<PixelFormat> for vk::Format {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            PixelFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            PixelFormat::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
            PixelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pixel_format_maps_to_a_distinct_vk_format() {
        let formats = [
            PixelFormat::Bgra8Unorm,
            PixelFormat::Bgra8Srgb,
            PixelFormat::Rgba8Unorm,
            PixelFormat::Rgba8Srgb,
            PixelFormat::Rgb10A2Unorm,
            PixelFormat::Rgba16Float,
        ];
        let mapped: std::collections::HashSet<vk::Format> =
            formats.iter().map(|&f| vk::Format::from(f)).collect();
        assert_eq!(mapped.len(), formats.len());
        assert_eq!(vk::Format::from(PixelFormat::Bgra8Srgb), vk::Format::B8G8R8A8_SRGB);
    }
}
