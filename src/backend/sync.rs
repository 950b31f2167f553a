// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;

/// Frame synchronization - one per frame in flight
#[derive(Clone, Copy)]
pub struct FrameSync {
    /// Signalled by the presentation engine once the acquired image is writable
    pub image_available: vk::Semaphore,
    /// Signalled by the submit once rendering is done; present waits on it.
    /// Kept per slot rather than per image, matching the frame-slot model.
    pub render_finished: vk::Semaphore,
    /// Signalled when the slot's submit has completed on the GPU
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let device = &device.device;

        let mut sync = Self::null();
        if let Err(e) = sync.create_handles(device) {
            // Handles not created yet are null, which destroy ignores
            sync.destroy(device);
            return Err(e);
        }
        Ok(sync)
    }

    fn null() -> Self {
        Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        }
    }

    fn create_handles(&mut self, device: &ash::Device) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on every slot returns at once
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            self.image_available = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            self.render_finished = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create render-finished semaphore")?;
            self.in_flight_fence = device
                .create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;
        }
        Ok(())
    }

    /// Block until the slot's previous submit has finished on the GPU
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbuilt_slot_holds_only_null_handles() {
        let sync = FrameSync::null();
        assert_eq!(sync.image_available, vk::Semaphore::null());
        assert_eq!(sync.render_finished, vk::Semaphore::null());
        assert_eq!(sync.in_flight_fence, vk::Fence::null());
    }
}
