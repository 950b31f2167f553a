// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Every choice below is a first-match policy over what the surface reports.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Prefer 8-bit sRGB, otherwise take whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The configured mode if supported, else MAILBOX if supported, else FIFO
/// (which every surface must support).
pub fn choose_present_mode(
    preferred: vk::PresentModeKHR,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's own extent, unless it leaves the choice to us
/// (`u32::MAX`), in which case the window size clamped to the limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum so we never wait on the driver, capped at the
/// maximum when there is one (`0` means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Interpret the result of `vkAcquireNextImageKHR`.
///
/// `ERROR_OUT_OF_DATE_KHR` is not an error: the frame is skipped (`None`)
/// and the swapchain recreated. `SUBOPTIMAL_KHR` still yields an image, with
/// the flag set so the caller can schedule a recreation.
pub fn acquire_outcome(result: VkResult<(u32, bool)>) -> Result<Option<(u32, bool)>> {
    match result {
        Ok(acquired) => Ok(Some(acquired)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
        Err(e) => Err(e).context("Failed to acquire swapchain image"),
    }
}

/// Interpret the result of `vkQueuePresentKHR`; `true` means recreate.
pub fn present_outcome(result: VkResult<bool>) -> Result<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(e) => Err(e).context("Failed to present swapchain image"),
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        preferred_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let surface = &device.surface;
        let caps = surface.capabilities(device.physical_device)?;
        let formats = surface.formats(device.physical_device)?;
        let present_modes = surface.present_modes(device.physical_device)?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(preferred_present_mode, &present_modes);
        let extent = choose_extent(&caps, width, height);
        let image_count = choose_image_count(&caps);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            present_mode
        );

        let queue_family_indices = [device.graphics_queue_family, device.present_queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Images are touched by both queues when the families differ
        let create_info = if device.graphics_queue_family != device.present_queue_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        log::info!("Created swapchain with {} images", images.len());

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { device.device.create_image_view(&create_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            device.device.destroy_image_view(view, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e).context("Failed to create image view");
                }
            }
        }

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire the next image, signalling `semaphore` once it is writable.
    ///
    /// Returns `None` when the swapchain is out of date and has to be
    /// recreated before anything can be drawn. The flag is `true` for a
    /// suboptimal (but still usable) image.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<Option<(u32, bool)>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        acquire_outcome(result)
    }

    /// Present `image_index` once every semaphore in `wait_semaphores` has
    /// signalled. Returns `true` when the swapchain should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        present_outcome(result)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    #[test]
    fn srgb_format_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_fallback_chain() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::IMMEDIATE, &all),
            vk::PresentModeKHR::IMMEDIATE
        );

        let no_immediate = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::IMMEDIATE, &no_immediate),
            vk::PresentModeKHR::MAILBOX
        );

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::MAILBOX, &fifo_only),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::FIFO_RELAXED, &[]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn surface_extent_wins_when_defined() {
        let caps = caps((800, 600), (1, 1), (4096, 4096));
        assert_eq!(
            choose_extent(&caps, 1024, 768),
            vk::Extent2D { width: 800, height: 600 }
        );
    }

    #[test]
    fn window_size_clamped_when_surface_extent_undefined() {
        let caps = caps((u32::MAX, u32::MAX), (200, 200), (1000, 700));
        assert_eq!(
            choose_extent(&caps, 1024, 100),
            vk::Extent2D { width: 1000, height: 200 }
        );
        assert_eq!(
            choose_extent(&caps, 640, 480),
            vk::Extent2D { width: 640, height: 480 }
        );
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        let outcome = acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn suboptimal_acquire_still_yields_an_image() {
        assert_eq!(acquire_outcome(Ok((2, true))).unwrap(), Some((2, true)));
        assert_eq!(acquire_outcome(Ok((0, false))).unwrap(), Some((0, false)));
    }

    #[test]
    fn other_acquire_failures_are_errors() {
        assert!(acquire_outcome(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
        assert!(acquire_outcome(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn present_asks_for_recreation_when_suboptimal_or_out_of_date() {
        assert!(!present_outcome(Ok(false)).unwrap());
        assert!(present_outcome(Ok(true)).unwrap());
        assert!(present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(present_outcome(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }
}
