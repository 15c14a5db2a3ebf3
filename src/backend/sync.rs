// Synchronization primitives
//
// Timeline semaphore used as the graphics queue's completion counter.
// Every submission signals the next value; the presentation surface waits
// on it before releasing back buffers.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fence::CompletionTracker;

pub struct TimelineFence {
    semaphore: vk::Semaphore,
    device: ash::Device,
    last_issued: AtomicU64,
}

impl TimelineFence {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        let semaphore = unsafe { device.create_semaphore(&create_info, None) }
            .context("Failed to create timeline semaphore")?;

        Ok(Self {
            semaphore,
            device: device.clone(),
            last_issued: AtomicU64::new(0),
        })
    }

    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Reserve the value the next submission will signal.
    pub fn next_value(&self) -> u64 {
        self.last_issued.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.semaphore, None);
        }
    }
}

impl CompletionTracker for TimelineFence {
    fn completed_value(&self) -> u64 {
        // A lost device reads as "nothing completed"; the wait reports it
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }.unwrap_or(0)
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        if value == 0 {
            return Ok(());
        }

        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
            .with_context(|| format!("Failed waiting for timeline value {}", value))
    }
}
