// GPU memory: vertex/index buffers and the depth attachment
//
// Buffers live in host-visible, host-coherent memory. They are mapped once
// when allocated and written straight through the mapping; no staging copy,
// no resizing.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// A buffer plus the allocation backing it, released on drop
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        // Create buffer
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        // Get memory requirements
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        // Allocate memory; CpuToGpu allocations come back persistently mapped
        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        // From here on Drop releases both halves
        let this = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        };

        // Bind memory to buffer
        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device
                    .device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            }
            .with_context(|| format!("Failed to bind memory for '{}'", name))?;
        }

        log::debug!("Allocated buffer '{}' ({} bytes, {:?})", name, size, location);

        Ok(this)
    }

    /// Create a host-visible buffer sized for `data` and fill it
    pub fn with_data<T: bytemuck::Pod>(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            anyhow::bail!("Refusing to create empty buffer '{}'", name);
        }

        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Copy `data` to the start of the mapped buffer
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            anyhow::bail!(
                "Write of {} bytes overflows {}-byte buffer",
                bytes.len(),
                self.size
            );
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        // Host-coherent, so no flush needed
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Depth attachment sized to the swapchain; recreated with it
pub struct DepthImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl DepthImage {
    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<Self> {
        // Create image
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL) // GPU-only, layout is the driver's choice
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create depth image")?;

        // Get memory requirements
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        // Device-local memory, never touched by the CPU
        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "depth",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e).context("Failed to allocate depth image memory");
            }
        };

        let mut this = Self {
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            device,
        };

        // Bind memory to image
        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device
                    .device
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            }
            .context("Failed to bind depth image memory")?;
        }

        // Create image view over the depth aspect
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        this.view = unsafe { this.device.device.create_image_view(&view_info, None) }
            .context("Failed to create depth image view")?;

        Ok(this)
    }
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free depth image memory: {}", e);
            }
        }
        unsafe {
            self.device.device.destroy_image(self.image, None);
        }
    }
}
