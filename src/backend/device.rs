// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Debug messenger routing validation output into `log`
// - Surface creation
// - Physical device selection (graphics + present capable, prefer discrete GPU)
// - Logical device + queue creation
// - Memory allocator setup

use super::surface::Surface;
use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use winit::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue families a device must expose: one that draws, one that presents.
/// Both may be the same family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in order, keeping the first graphics-capable and the
    /// first present-capable one. Stops as soon as both are known.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, graphics first. One queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.dedup();
        families
    }
}

fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1,
        _ => 0,
    }
}

/// Index of the preferred device among suitable candidates: the first
/// discrete GPU, otherwise the first candidate.
fn pick_preferred(device_types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, &device_type) in device_types.iter().enumerate() {
        let rank = device_type_rank(device_type);
        if best.map_or(true, |(_, best_rank)| rank > best_rank) {
            best = Some((index, rank));
        }
    }
    best.map(|(index, _)| index)
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

/// Instance, debug messenger and surface while the device is being built.
/// Destroyed on drop unless released into a finished `VulkanDevice`.
struct InstanceObjects {
    instance: ash::Instance,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<Surface>,
    released: bool,
}

impl InstanceObjects {
    fn release(
        mut self,
    ) -> (
        ash::Instance,
        Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) {
        self.released = true;
        (self.instance.clone(), self.debug_utils.take())
    }
}

impl Drop for InstanceObjects {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::debug!("Device setup failed, destroying instance objects");

        if let Some(surface) = self.surface.take() {
            surface.destroy();
        }
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl VulkanDevice {
    /// Create the instance, surface and device for `window`.
    ///
    /// Validation is only enabled when requested *and* the Khronos layer is
    /// installed; a missing layer is a warning, not an error.
    pub fn new(app_name: &str, enable_validation: bool, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let enable_validation = enable_validation && Self::validation_layer_available(&entry)?;

        let instance = Self::create_instance(&entry, app_name, enable_validation, window)?;

        // Owns the instance-level objects until the device exists; any early
        // return below destroys them.
        let mut early = InstanceObjects {
            instance,
            debug_utils: None,
            surface: None,
            released: false,
        };
        let instance = &early.instance;

        if enable_validation {
            early.debug_utils = Some(Self::setup_debug_messenger(&entry, instance)?);
        }

        // Presentation support is a per-surface question, so the surface
        // has to exist before a device can be judged suitable.
        let surface = Surface::new(&entry, instance, window)?;
        early.surface = Some(surface.clone());

        let (physical_device, families) = Self::pick_physical_device(instance, &surface)?;
        let graphics_queue_family = families.graphics.context("No graphics queue family")?;
        let present_queue_family = families.present.context("No present queue family")?;

        let device = Self::create_logical_device(instance, physical_device, &families)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            graphics_queue_family,
            present_queue_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e).context("Failed to create GPU memory allocator");
            }
        };

        let (instance, debug_utils) = early.release();

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            surface,
            instance,
            _entry: entry,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            debug_utils,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        let available = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !available {
            log::warn!(
                "{} requested but not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
        Ok(available)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        window: &Window,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"Lava Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = Surface::required_extensions(window)?;
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut suitable = Vec::new();
        for device in devices {
            if let Some(families) = Self::check_device(instance, surface, device)? {
                let props = unsafe { instance.get_physical_device_properties(device) };
                suitable.push((device, families, props.device_type));
            }
        }

        let device_types: Vec<_> = suitable.iter().map(|&(_, _, ty)| ty).collect();
        let index = pick_preferred(&device_types)
            .ok_or_else(|| anyhow::anyhow!("None of the GPUs can render and present to this window"))?;

        let (device, families, _) = suitable[index];
        Ok((device, families))
    }

    /// Queue families of `device` if it can draw to `surface`, `None` otherwise
    fn check_device(
        instance: &ash::Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilyIndices>> {
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let families = QueueFamilyIndices::find(&queue_families, |index| {
            surface.supports_present(device, index)
        })?;
        if !families.is_complete() {
            return Ok(None);
        }

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let swapchain_name = ash::extensions::khr::Swapchain::name();
        let has_swapchain = extensions
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == swapchain_name);
        if !has_swapchain {
            return Ok(None);
        }

        if surface.formats(device)?.is_empty() || surface.present_modes(device)?.is_empty() {
            return Ok(None);
        }

        Ok(Some(families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface.destroy();

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Warnings and errors keep their level; chatter goes to debug
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else {
        log::Level::Debug
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    log::log!(
        severity_level(message_severity),
        "[Vulkan {:?}] {}",
        message_type,
        message
    );

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn shared_family_is_found_and_deduplicated() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn separate_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 2)).unwrap();

        assert!(indices.is_complete());
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn first_matching_family_wins_and_scan_stops() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut queried = Vec::new();
        let indices = QueueFamilyIndices::find(&families, |index| {
            queried.push(index);
            Ok(true)
        })
        .unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn missing_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();

        assert!(!indices.is_complete());
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn discrete_gpu_preferred_over_earlier_devices() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];
        assert_eq!(pick_preferred(&types), Some(2));
    }

    #[test]
    fn first_device_when_no_discrete_gpu() {
        let types = [
            vk::PhysicalDeviceType::VIRTUAL_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];
        assert_eq!(pick_preferred(&types), Some(0));
        assert_eq!(pick_preferred(&[]), None);
    }

    #[test]
    fn validation_severities_map_to_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

        assert_eq!(severity_level(Severity::ERROR), log::Level::Error);
        assert_eq!(severity_level(Severity::WARNING), log::Level::Warn);
        assert_eq!(severity_level(Severity::INFO), log::Level::Debug);
        assert_eq!(severity_level(Severity::VERBOSE), log::Level::Debug);
    }
}
