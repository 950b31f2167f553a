// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Objects that own GPU memory or swapchain state
// are RAII types holding an Arc<VulkanDevice>; the rest are plain handles
// destroyed by the renderer.

pub mod buffer;
pub mod device;
pub mod frame;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
