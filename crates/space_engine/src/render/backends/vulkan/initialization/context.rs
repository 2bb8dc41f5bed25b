//! Device context: the one-time Vulkan bootstrap
//!
//! [`DeviceContext`] owns everything that lives for the whole process: the
//! loaded entry points, the instance, the surface, the chosen physical device
//! and the logical device with its queues. It is created once, never mutated,
//! and dropped after every other Vulkan object.

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use super::surface::PresentationSurface;
use super::window::{Window, WindowError};
use crate::config::BootstrapConfig;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies both the resource and the requested properties
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// The window system failed
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Capabilities of one queue family that matter for queue selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilyCapabilities {
    /// The family supports graphics commands
    pub graphics: bool,
    /// The family can present to the surface
    pub present: bool,
}

/// Chosen graphics and present queue families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for rendering and transfers
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Both roles are served by the same family
    pub const fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Choose queue families for graphics and presentation
///
/// The first graphics family wins when it can also present. Failing that, any
/// family that does both is used. Otherwise graphics and presentation are split
/// across the first family of each kind.
pub fn choose_queue_families(families: &[QueueFamilyCapabilities]) -> Option<QueueFamilyIndices> {
    let index = |i: usize| u32::try_from(i).ok();

    let graphics = families.iter().position(|f| f.graphics)?;
    if families[graphics].present {
        let graphics = index(graphics)?;
        return Some(QueueFamilyIndices { graphics, present: graphics });
    }

    if let Some(both) = families.iter().position(|f| f.graphics && f.present) {
        let both = index(both)?;
        return Some(QueueFamilyIndices { graphics: both, present: both });
    }

    let present = families.iter().position(|f| f.present)?;
    Some(QueueFamilyIndices {
        graphics: index(graphics)?,
        present: index(present)?,
    })
}

/// Keep the requested names the runtime reports, warning about the rest
pub fn filter_supported(kind: &str, requested: &[String], available: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        if kept.contains(name) {
            continue;
        }
        if available.contains(name) {
            kept.push(name.clone());
        } else {
            log::warn!("Requested {kind} {name} is not supported by the Vulkan runtime, skipping");
        }
    }
    kept
}

fn c_names(names: &[String]) -> VulkanResult<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|e| VulkanError::InitializationFailed(format!("Invalid name {name:?}: {e}")))
        })
        .collect()
}

fn name_from_raw(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
}

/// Vulkan instance with its optional debug messenger
pub struct VulkanInstance {
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: Instance,
    entry: Entry,
}

impl VulkanInstance {
    /// Load the Vulkan library and create an instance
    ///
    /// This is the single place the process-wide dispatch table is loaded. The
    /// resulting [`Entry`] travels inside the context; nothing reaches for a
    /// global loader.
    pub fn new(config: &BootstrapConfig, window_extensions: &[String]) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let available_layers: Vec<String> = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(VulkanError::Api)?
            .iter()
            .map(|layer| name_from_raw(&layer.layer_name))
            .collect();
        let available_extensions: Vec<String> = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(VulkanError::Api)?
            .iter()
            .map(|extension| name_from_raw(&extension.extension_name))
            .collect();

        let debug_utils_name = DebugUtils::name().to_string_lossy().into_owned();
        let mut requested = config.instance_extensions.clone();
        if config.enable_validation {
            requested.push(debug_utils_name.clone());
        }

        let layers = filter_supported("layer", &config.validation_layers, &available_layers);
        let mut extensions = window_extensions.to_vec();
        for extension in filter_supported("instance extension", &requested, &available_extensions) {
            if !extensions.contains(&extension) {
                extensions.push(extension);
            }
        }
        let debug_enabled = extensions.contains(&debug_utils_name);

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new(config.engine_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid engine name: {e}")))?;
        let layer_names = c_names(&layers)?;
        let extension_names = c_names(&extensions)?;
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> =
            extension_names.iter().map(|name| name.as_ptr()).collect();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::info!(
            "Created Vulkan instance with layers {:?} and extensions {:?}",
            layers,
            extensions
        );

        let debug_utils = if debug_enabled {
            let loader = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_utils,
            instance,
            entry,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Forwards validation messages to the log
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::trace!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// The physical device the context renders with
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported optional features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types, used for every allocation
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Chosen queue families
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Select the first device with graphics, presentation and swapchain support
    pub fn select_suitable_device(
        instance: &Instance,
        surface: &PresentationSurface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(Some(info)) => {
                    log::info!(
                        "Selected GPU: {} (graphics family {}, present family {})",
                        name_from_raw(&info.properties.device_name),
                        info.queue_families.graphics,
                        info.queue_families.present
                    );
                    return Ok(info);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Skipping physical device: {e}"),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    /// Widest line the device rasterizes, 1.0 without the wide-lines feature
    pub fn max_line_width(&self) -> f32 {
        if self.features.wide_lines == vk::TRUE {
            self.properties.limits.line_width_range[1]
        } else {
            1.0
        }
    }

    /// Whether pipelines may use `LINE` or `POINT` polygon modes
    pub fn supports_non_solid_fill(&self) -> bool {
        self.features.fill_mode_non_solid == vk::TRUE
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &PresentationSurface,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut capabilities = Vec::with_capacity(families.len());
        for (index, family) in (0u32..).zip(families.iter()) {
            capabilities.push(QueueFamilyCapabilities {
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: surface.supports_family(device, index)?,
            });
        }

        let Some(queue_families) = choose_queue_families(&capabilities) else {
            log::debug!(
                "{} lacks a graphics or present queue family",
                name_from_raw(&properties.device_name)
            );
            return Ok(None);
        };

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            (unsafe { CStr::from_ptr(available.extension_name.as_ptr()) }) == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Ok(None);
        }

        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Some(Self {
            device,
            properties,
            features,
            memory_properties,
            queue_families,
        }))
    }
}

/// Logical device with its queues
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a device with one queue per distinct family and the swapchain extension
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical_device.queue_families;
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder()
            .wide_lines(physical_device.features.wide_lines == vk::TRUE)
            .fill_mode_non_solid(physical_device.supports_non_solid_fill())
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during shutdown: {e:?}");
            }
            self.device.destroy_device(None);
        }
    }
}

/// Process-lifetime Vulkan state
///
/// Fields drop in declaration order: device, then surface, then instance.
pub struct DeviceContext {
    device: LogicalDevice,
    surface: PresentationSurface,
    physical_device: PhysicalDeviceInfo,
    instance: VulkanInstance,
}

impl DeviceContext {
    /// Bootstrap Vulkan for `window`
    pub fn new(config: &BootstrapConfig, window: &mut Window) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(VulkanError::InitializationFailed)?;

        let window_extensions = window.required_instance_extensions()?;
        let instance = VulkanInstance::new(config, &window_extensions)?;

        let raw_surface = window.create_surface(instance.instance.handle())?;
        let surface = PresentationSurface::new(
            Surface::new(&instance.entry, &instance.instance),
            raw_surface,
        );

        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, &surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self {
            device,
            surface,
            physical_device,
            instance,
        })
    }

    /// Get the logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Memory heaps and types of the physical device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Get the presentation surface
    pub fn surface(&self) -> &PresentationSurface {
        &self.surface
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Chosen queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.physical_device.queue_families
    }

    /// Block until every queue on the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPHICS: QueueFamilyCapabilities = QueueFamilyCapabilities { graphics: true, present: false };
    const PRESENT: QueueFamilyCapabilities = QueueFamilyCapabilities { graphics: false, present: true };
    const BOTH: QueueFamilyCapabilities = QueueFamilyCapabilities { graphics: true, present: true };
    const NEITHER: QueueFamilyCapabilities = QueueFamilyCapabilities { graphics: false, present: false };

    #[test]
    fn test_first_graphics_family_that_presents_is_shared() {
        let chosen = choose_queue_families(&[NEITHER, BOTH, BOTH]).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(chosen.is_shared());
        assert_eq!(chosen.unique(), vec![1]);
    }

    #[test]
    fn test_later_family_with_both_beats_a_split() {
        let chosen = choose_queue_families(&[GRAPHICS, PRESENT, BOTH]).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 2, present: 2 });
    }

    #[test]
    fn test_split_families_when_nothing_does_both() {
        let chosen = choose_queue_families(&[PRESENT, GRAPHICS]).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 1, present: 0 });
        assert!(!chosen.is_shared());
        assert_eq!(chosen.unique(), vec![1, 0]);
    }

    #[test]
    fn test_missing_roles_yield_none() {
        assert!(choose_queue_families(&[PRESENT, NEITHER]).is_none());
        assert!(choose_queue_families(&[GRAPHICS]).is_none());
        assert!(choose_queue_families(&[]).is_none());
    }

    #[test]
    fn test_filter_supported_drops_unknown_and_duplicates() {
        let requested = vec![
            "VK_LAYER_KHRONOS_validation".to_string(),
            "VK_LAYER_LUNARG_standard_validation".to_string(),
            "VK_LAYER_KHRONOS_validation".to_string(),
        ];
        let available = vec!["VK_LAYER_KHRONOS_validation".to_string()];
        let kept = filter_supported("layer", &requested, &available);
        assert_eq!(kept, vec!["VK_LAYER_KHRONOS_validation".to_string()]);
    }

    #[test]
    fn test_name_from_raw_stops_at_nul() {
        let mut raw = [0 as c_char; 16];
        for (slot, byte) in raw.iter_mut().zip(b"VK_KHR_surface") {
            *slot = *byte as c_char;
        }
        assert_eq!(name_from_raw(&raw), "VK_KHR_surface");
    }
}
