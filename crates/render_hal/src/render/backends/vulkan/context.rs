//! Vulkan context management
//!
//! Instance creation, physical device and queue family selection, and the
//! logical device with its hardware queues.
//!
//! Native handles are owned by reference-counted cores. The logical device
//! core keeps the instance core alive, and every buffer, image, pipeline and
//! frame created from the device keeps the device core alive. Dropping the
//! [`LogicalDevice`] value therefore never destroys the native device while a
//! resource still uses it: destruction happens, after an idle-wait, when the
//! last owner goes away.

use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use crate::config::DeviceConfig;

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

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A requested device extension is not offered by the hardware
    #[error("Device extension not supported: {0}")]
    UnsupportedExtension(String),

    /// A queue index beyond the family's queue count was requested
    #[error("Queue index {index} out of range, family has {count} queues")]
    QueueIndexOutOfRange {
        /// Requested queue index
        index: u32,
        /// Number of queues in the family
        count: u32,
    },
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

struct InstanceShared {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        log::debug!("[VULKAN] Destroying instance");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Headless Vulkan instance
///
/// No surface extensions are requested; presentation belongs to whoever owns
/// the window. With validation enabled the Khronos validation layer is loaded
/// when available and its messages are routed to `log`.
pub struct VulkanInstance {
    shared: Arc<InstanceShared>,
}

impl VulkanInstance {
    /// Create an instance, optionally with validation layers
    pub fn new(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("Application name contains a NUL byte".to_string()))?;
        let engine_name_cstr = CString::new("RenderHal").map_err(|_| VulkanError::InitializationFailed(String::new()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation = enable_validation && Self::validation_layer_available(&entry);
        if enable_validation && !validation {
            log::warn!("[VULKAN] Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let mut extensions: Vec<*const std::os::raw::c_char> = Vec::new();
        let mut layers: Vec<*const std::os::raw::c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        log::debug!("[VULKAN] Created instance for '{}' (validation: {})", app_name, validation);

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            shared: Arc::new(InstanceShared { entry, instance, debug }),
        })
    }

    /// Create an instance from device settings
    pub fn from_config(config: &DeviceConfig) -> VulkanResult<Self> {
        Self::new(&config.application_name, config.validation_enabled())
    }

    /// Instance function table
    pub fn raw(&self) -> &Instance {
        &self.shared.instance
    }

    /// True when the validation layer and debug messenger are active
    pub fn validation_enabled(&self) -> bool {
        self.shared.debug.is_some()
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        entry.enumerate_instance_layer_properties().map_or(false, |layers| {
            layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? })
    }
}

/// Debug callback for validation layers
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
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// A physical device together with one of its queue families
#[derive(Debug, Clone)]
pub struct DeviceQueueFamily {
    physical_device: vk::PhysicalDevice,
    index: u32,
    properties: vk::QueueFamilyProperties,
    device_name: String,
    device_type: vk::PhysicalDeviceType,
}

impl DeviceQueueFamily {
    /// Pick the first graphics-capable queue family
    ///
    /// With `prefer_discrete` a discrete GPU wins over any other device type;
    /// otherwise enumeration order decides.
    pub fn select_graphics(instance: &VulkanInstance, prefer_discrete: bool) -> VulkanResult<Self> {
        let raw = instance.raw();
        let devices = unsafe { raw.enumerate_physical_devices()? };

        let mut candidates: Vec<Self> = devices
            .into_iter()
            .filter_map(|device| Self::graphics_family_of(raw, device))
            .collect();

        if prefer_discrete {
            // stable sort keeps enumeration order within a device type
            candidates.sort_by_key(|family| family.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);
        }

        let selected = candidates
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No GPU with a graphics queue found".to_string()))?;

        log::info!(
            "Selected GPU: {} (queue family {}, {} queues)",
            selected.device_name,
            selected.index,
            selected.queue_count()
        );
        Ok(selected)
    }

    fn graphics_family_of(instance: &Instance, device: vk::PhysicalDevice) -> Option<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        (0u32..).zip(families).find_map(|(index, family)| {
            (family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && family.queue_count > 0).then(|| Self {
                physical_device: device,
                index,
                properties: family,
                device_name: device_name.clone(),
                device_type: properties.device_type,
            })
        })
    }

    /// Physical device handle
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue family index
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Number of hardware queues in the family
    pub const fn queue_count(&self) -> u32 {
        self.properties.queue_count
    }

    /// Capabilities of the family
    pub const fn properties(&self) -> &vk::QueueFamilyProperties {
        &self.properties
    }

    /// Driver-reported device name
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

/// Device extensions to enable on a logical device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionList {
    names: Vec<String>,
}

impl ExtensionList {
    /// Create an empty list
    pub const fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Build a list from the extension names in a device configuration
    pub fn from_config(config: &DeviceConfig) -> Self {
        config.extensions.iter().map(String::as_str).collect()
    }

    /// Add an extension, ignoring duplicates
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.push(name);
        self
    }

    /// Add an extension, ignoring duplicates
    pub fn push(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    /// Extension names in insertion order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of extensions
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no extension is requested
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names that `available` does not contain, in insertion order
    pub fn missing_from<'a>(&'a self, available: &[&str]) -> Vec<&'a str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|name| !available.contains(name))
            .collect()
    }

    fn to_cstrings(&self) -> VulkanResult<Vec<CString>> {
        self.names
            .iter()
            .map(|name| CString::new(name.as_str()).map_err(|_| VulkanError::UnsupportedExtension(name.clone())))
            .collect()
    }
}

impl<'a> FromIterator<&'a str> for ExtensionList {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut list = Self::new();
        for name in iter {
            list.push(name);
        }
        list
    }
}

/// Native device state shared by the logical device and everything created from it
pub(crate) struct DeviceShared {
    pub(crate) device: Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) queue_family_index: u32,
    pub(crate) multi_draw_indirect: bool,
    instance: Arc<InstanceShared>,
}

impl DeviceShared {
    /// Instance function table
    pub(crate) fn instance(&self) -> &Instance {
        &self.instance.instance
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        log::debug!("[VULKAN] Waiting for device idle before destruction");
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("[VULKAN] Device wait idle failed during destruction: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        log::debug!("[VULKAN] Logical device destroyed");
    }
}

/// Logical device over one queue family
///
/// Move-only. The native device lives until this value and every resource
/// created from it have been dropped.
pub struct LogicalDevice {
    shared: Arc<DeviceShared>,
    family: DeviceQueueFamily,
    extensions: ExtensionList,
}

impl LogicalDevice {
    /// Create a logical device exposing every queue of `family`
    ///
    /// Fails with [`VulkanError::UnsupportedExtension`] when the physical
    /// device does not offer one of `extensions`. Multi-draw-indirect is
    /// enabled whenever the hardware supports it.
    pub fn new(instance: &VulkanInstance, family: &DeviceQueueFamily, extensions: &ExtensionList) -> VulkanResult<Self> {
        let raw = instance.raw();
        let physical_device = family.physical_device;

        let available = unsafe { raw.enumerate_device_extension_properties(physical_device)? };
        let available_names: Vec<String> = available
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        let available_refs: Vec<&str> = available_names.iter().map(String::as_str).collect();
        if let Some(missing) = extensions.missing_from(&available_refs).first() {
            log::error!("[VULKAN] Device '{}' does not support extension {}", family.device_name, missing);
            return Err(VulkanError::UnsupportedExtension((*missing).to_string()));
        }

        let supported = unsafe { raw.get_physical_device_features(physical_device) };
        let multi_draw_indirect = supported.multi_draw_indirect == vk::TRUE;
        let enabled_features = vk::PhysicalDeviceFeatures::builder()
            .multi_draw_indirect(multi_draw_indirect)
            .geometry_shader(supported.geometry_shader == vk::TRUE)
            .tessellation_shader(supported.tessellation_shader == vk::TRUE)
            .build();

        let priorities = vec![1.0_f32; family.queue_count() as usize];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(family.index)
            .queue_priorities(&priorities)
            .build()];

        let extension_cstrings = extensions.to_cstrings()?;
        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            extension_cstrings.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&enabled_features);

        let device = unsafe { raw.create_device(physical_device, &create_info, None)? };
        let memory_properties = unsafe { raw.get_physical_device_memory_properties(physical_device) };

        log::debug!(
            "[VULKAN] Created logical device on '{}' with {} queues (multi-draw-indirect: {})",
            family.device_name,
            family.queue_count(),
            multi_draw_indirect
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                device,
                physical_device,
                memory_properties,
                queue_family_index: family.index,
                multi_draw_indirect,
                instance: Arc::clone(&instance.shared),
            }),
            family: family.clone(),
            extensions: extensions.clone(),
        })
    }

    /// View of the hardware queue at `index` within the device's family
    pub fn get_hardware_queue(&self, index: u32) -> VulkanResult<Queue> {
        let count = self.family.queue_count();
        if index >= count {
            return Err(VulkanError::QueueIndexOutOfRange { index, count });
        }

        let handle = unsafe { self.shared.device.get_device_queue(self.family.index, index) };
        Ok(Queue {
            shared: Arc::clone(&self.shared),
            handle,
            index,
        })
    }

    /// Block until every queue of the device is idle
    pub fn block_until_idle(&self) -> VulkanResult<()> {
        unsafe { self.shared.device.device_wait_idle()? };
        Ok(())
    }

    /// Queue family the device was created over
    pub const fn queue_family(&self) -> &DeviceQueueFamily {
        &self.family
    }

    /// Extensions enabled on the device
    pub const fn extensions(&self) -> &ExtensionList {
        &self.extensions
    }

    /// True when draws can be batched into one indirect command
    pub fn supports_multi_draw_indirect(&self) -> bool {
        self.shared.multi_draw_indirect
    }

    /// Device function table
    pub fn raw(&self) -> &Device {
        &self.shared.device
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }
}

/// View of one hardware queue
///
/// Keeps the device alive while it exists.
#[derive(Clone)]
pub struct Queue {
    shared: Arc<DeviceShared>,
    handle: vk::Queue,
    index: u32,
}

impl Queue {
    /// Submit recorded command buffers, signalling `fence` on completion
    pub fn submit(&self, command_buffers: &[vk::CommandBuffer], fence: vk::Fence) -> VulkanResult<()> {
        let submit_info = vk::SubmitInfo::builder().command_buffers(command_buffers).build();
        unsafe {
            self.shared
                .device
                .queue_submit(self.handle, &[submit_info], fence)
                .map_err(|e| {
                    log::error!("[VULKAN] Queue {} submission failed: {:?}", self.index, e);
                    VulkanError::Api(e)
                })?;
        }
        Ok(())
    }

    /// Block until the queue has drained
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.shared.device.queue_wait_idle(self.handle)? };
        Ok(())
    }

    /// Index of the queue within its family
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Native queue handle
    pub const fn handle(&self) -> vk::Queue {
        self.handle
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Headless device on the first graphics-capable GPU, or `None` without Vulkan
    pub(crate) fn headless_device() -> Option<LogicalDevice> {
        let instance = VulkanInstance::new("render_hal tests", false).ok()?;
        let family = DeviceQueueFamily::select_graphics(&instance, false).ok()?;
        LogicalDevice::new(&instance, &family, &ExtensionList::new()).ok()
    }

    #[test]
    fn extension_list_ignores_duplicates() {
        let list = ExtensionList::new().with("VK_KHR_swapchain").with("VK_KHR_swapchain");
        assert_eq!(list.len(), 1);
        assert_eq!(list.names(), &["VK_KHR_swapchain".to_string()]);
    }

    #[test]
    fn missing_extensions_are_reported_in_order() {
        let list: ExtensionList = ["VK_A", "VK_B", "VK_C"].into_iter().collect();
        assert_eq!(list.missing_from(&["VK_B"]), vec!["VK_A", "VK_C"]);
        assert!(list.missing_from(&["VK_A", "VK_B", "VK_C"]).is_empty());
    }

    #[test]
    fn extension_list_from_config() {
        let config = DeviceConfig {
            extensions: vec!["VK_KHR_maintenance1".to_string()],
            ..DeviceConfig::default()
        };
        assert_eq!(ExtensionList::from_config(&config).names(), &["VK_KHR_maintenance1".to_string()]);
    }

    #[test]
    fn logical_device_lifecycle() {
        let Some(device) = headless_device() else {
            eprintln!("skipping: no Vulkan implementation available");
            return;
        };

        let queue = device.get_hardware_queue(0).unwrap();
        queue.submit(&[], vk::Fence::null()).unwrap();
        queue.wait_idle().unwrap();
        device.block_until_idle().unwrap();

        let count = device.queue_family().queue_count();
        assert!(matches!(
            device.get_hardware_queue(count),
            Err(VulkanError::QueueIndexOutOfRange { index, count: c }) if index == count && c == count
        ));

        // the queue view keeps the native device alive after the owner is gone
        drop(device);
        queue.wait_idle().unwrap();
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let Ok(instance) = VulkanInstance::new("render_hal tests", false) else {
            return;
        };
        let Ok(family) = DeviceQueueFamily::select_graphics(&instance, false) else {
            return;
        };

        let extensions = ExtensionList::new().with("VK_RENDER_HAL_not_a_real_extension");
        assert!(matches!(
            LogicalDevice::new(&instance, &family, &extensions),
            Err(VulkanError::UnsupportedExtension(name)) if name == "VK_RENDER_HAL_not_a_real_extension"
        ));
    }
}
