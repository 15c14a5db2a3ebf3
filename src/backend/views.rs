// Image view registry
//
// Render-target views over swapchain images, handed out as generational
// handles. One registry serves every surface of the process.

use anyhow::{Context, Result};
use ash::vk;
use parking_lot::Mutex;

use super::VulkanDevice;
use crate::registry::{SlotTable, ViewDesc, ViewDimension, ViewHandle, ViewRegistry};

pub struct ImageViewRegistry {
    views: Mutex<SlotTable<vk::ImageView>>,
    device: ash::Device,
}

impl ImageViewRegistry {
    pub fn new(device: &VulkanDevice) -> Self {
        Self {
            views: Mutex::new(SlotTable::new()),
            device: device.device.clone(),
        }
    }

    /// The Vulkan view behind a handle, `None` once it has been freed.
    pub fn resolve(&self, handle: ViewHandle) -> Option<vk::ImageView> {
        self.views.lock().get(handle).copied()
    }
}

impl ViewRegistry<vk::Image> for ImageViewRegistry {
    fn allocate_view(&self, image: &vk::Image, desc: &ViewDesc) -> Result<ViewHandle> {
        let view_type = match desc.dimension {
            ViewDimension::Texture2D => vk::ImageViewType::TYPE_2D,
        };

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(*image)
            .view_type(view_type)
            .format(desc.format.into())
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: desc.mip_slice,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.create_image_view(&create_info, None) }
            .context("Failed to create image view")?;

        Ok(self.views.lock().insert(view))
    }

    fn free_view(&self, handle: ViewHandle) {
        match self.views.lock().remove(handle) {
            Some(view) => unsafe { self.device.destroy_image_view(view, None) },
            None => log::warn!("Freeing unknown image view {:?}", handle),
        }
    }
}

impl Drop for ImageViewRegistry {
    fn drop(&mut self) {
        let leaked = self.views.get_mut().drain();
        if !leaked.is_empty() {
            log::warn!("Destroying {} image views still registered", leaked.len());
        }
        for view in leaked {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }
}
