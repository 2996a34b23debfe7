// SPDX-License-Identifier: CEPL-1.0
//! Instance creation, optional debug messenger, physical-device selection.
//!
//! STRICT ORDER:
//! 1) Instance (platform WSI extensions + negotiated optional ones)
//! 2) Surface from THIS instance (see `context`)
//! 3) Physical device + queue family checked AGAINST that surface
//! 4) Logical device (see `device`)

use std::ffi::{c_char, CStr, CString};

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn, Level};

use crate::context::SurfaceContext;
use crate::error::FrameError;

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub app_name: String,
    pub validation: bool,
    /// Extra optional layers; skipped with a warning when missing.
    pub layers: Vec<String>,
    /// Extra optional instance extensions; skipped with a warning when missing.
    pub extensions: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "swapflow".into(),
            validation: cfg!(debug_assertions),
            layers: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

/// Requested names split into what the platform offers and what it does not.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Negotiated {
    pub enabled: Vec<String>,
    pub skipped: Vec<String>,
}

/// Keeps request order and drops duplicates.
pub fn negotiate<S: AsRef<str>>(requested: &[S], available: &[String]) -> Negotiated {
    let mut out = Negotiated::default();
    for name in requested {
        let name = name.as_ref();
        if out.enabled.iter().chain(&out.skipped).any(|n| n == name) {
            continue;
        }
        if available.iter().any(|a| a == name) {
            out.enabled.push(name.to_owned());
        } else {
            out.skipped.push(name.to_owned());
        }
    }
    out
}

fn to_cstrings(names: &[String]) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|n| CString::new(n.as_str()).with_context(|| format!("name {n:?}")))
        .collect()
}

pub(crate) fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        Level::ERROR
    } else if severity.contains(S::WARNING) {
        Level::WARN
    } else if severity.contains(S::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback-data struct for the call.
    let msg = unsafe { (*data).message_as_c_str() }
        .map(CStr::to_string_lossy)
        .unwrap_or_default();
    match severity_level(severity) {
        Level::ERROR => error!("[vulkan {:?}] {}", types, msg),
        Level::WARN => warn!("[vulkan {:?}] {}", types, msg),
        Level::DEBUG => debug!("[vulkan {:?}] {}", types, msg),
        _ => trace!("[vulkan {:?}] {}", types, msg),
    }
    vk::FALSE
}

/// Debug-utils loader plus the messenger it created.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    fn new(entry: &Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
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
            .pfn_user_callback(Some(vulkan_debug_callback));
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .context("create_debug_utils_messenger")?;
        Ok(Self { loader, messenger })
    }

    /// # Safety
    /// Call once, before the owning instance is destroyed.
    unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

pub struct InstanceContext {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    layers: Vec<String>,
    extensions: Vec<String>,
}

fn available_layers(entry: &Entry) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_layer_properties() }
        .context("enumerate_instance_layer_properties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(|n| n.to_string_lossy().into_owned())
        .collect())
}

fn available_extensions(entry: &Entry) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_extension_properties(None) }
        .context("enumerate_instance_extension_properties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|n| n.to_string_lossy().into_owned())
        .collect())
}

impl InstanceContext {
    pub fn new(display: RawDisplayHandle, cfg: &InstanceConfig) -> Result<Self> {
        let entry = Entry::linked();

        // Mandatory: whatever the windowing platform needs for a surface.
        let required = ash_window::enumerate_required_extensions(display)
            .context("enumerate_required_extensions")?;

        let mut want_layers: Vec<&str> = Vec::new();
        let mut want_exts: Vec<&str> = Vec::new();
        if cfg.validation {
            want_layers.push(VALIDATION_LAYER);
            want_exts.push(debug_utils::NAME.to_str().unwrap_or("VK_EXT_debug_utils"));
        }
        want_layers.extend(cfg.layers.iter().map(String::as_str));
        want_exts.extend(cfg.extensions.iter().map(String::as_str));

        let layers = negotiate(&want_layers, &available_layers(&entry)?);
        let exts = negotiate(&want_exts, &available_extensions(&entry)?);
        for name in layers.skipped.iter().chain(&exts.skipped) {
            warn!("optional {} not available, skipping", name);
        }

        let layer_c = to_cstrings(&layers.enabled)?;
        let ext_c = to_cstrings(&exts.enabled)?;
        let layer_ptrs: Vec<*const c_char> = layer_c.iter().map(|c| c.as_ptr()).collect();
        let mut ext_ptrs: Vec<*const c_char> = required.to_vec();
        ext_ptrs.extend(ext_c.iter().map(|c| c.as_ptr()));

        let app = CString::new(cfg.app_name.as_str()).context("application name")?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app)
            .engine_name(&app)
            .api_version(vk::API_VERSION_1_1);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&ext_ptrs);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;

        let debug_name = debug_utils::NAME.to_string_lossy();
        let debug = if exts.enabled.iter().any(|e| *e == debug_name) {
            match DebugMessenger::new(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let has_messenger = debug.is_some();
        info!(
            "instance ready (layers: {:?}, debug messenger: {})",
            layers.enabled, has_messenger
        );

        Ok(Self {
            entry,
            instance,
            debug,
            layers: layers.enabled,
            extensions: exts.enabled,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug.is_some()
    }

    pub fn enabled_layers(&self) -> &[String] {
        &self.layers
    }

    pub fn enabled_extensions(&self) -> &[String] {
        &self.extensions
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    /// Graphics + compute family that can present to the surface.
    pub queue_family: Option<u32>,
}

/// First family with both GRAPHICS and COMPUTE that can also present.
pub fn pick_queue_family(
    families: &[vk::QueueFamilyProperties],
    can_present: impl Fn(u32) -> bool,
) -> Option<u32> {
    let want = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    families
        .iter()
        .zip(0u32..)
        .find(|(f, i)| f.queue_count > 0 && f.queue_flags.contains(want) && can_present(*i))
        .map(|(_, i)| i)
}

/// A qualifying discrete GPU if there is one, else the first qualifying device.
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    let qualifying = || {
        candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.queue_family.is_some())
    };
    qualifying()
        .find(|(_, c)| c.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| qualifying().next())
        .map(|(i, _)| i)
}

pub fn pick_physical_device(
    instance: &InstanceContext,
    surface: &SurfaceContext,
) -> Result<(vk::PhysicalDevice, u32)> {
    let raw = instance.raw();
    let devices =
        unsafe { raw.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    if devices.is_empty() {
        return Err(FrameError::NoPhysicalDevice.into());
    }

    let candidates: Vec<DeviceCandidate> = devices
        .iter()
        .map(|&phys| {
            let props = unsafe { raw.get_physical_device_properties(phys) };
            let families = unsafe { raw.get_physical_device_queue_family_properties(phys) };
            let queue_family = pick_queue_family(&families, |i| unsafe {
                surface
                    .loader()
                    .get_physical_device_surface_support(phys, i, surface.handle())
                    .unwrap_or(false)
            });
            DeviceCandidate {
                name: props
                    .device_name_as_c_str()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                device_type: props.device_type,
                queue_family,
            }
        })
        .collect();

    for c in &candidates {
        debug!(
            "gpu candidate: {} ({:?}, queue family {:?})",
            c.name, c.device_type, c.queue_family
        );
    }

    let idx = select_device(&candidates).ok_or(FrameError::NoSuitableDevice)?;
    let chosen = &candidates[idx];
    let queue_family = chosen.queue_family.ok_or(FrameError::NoSuitableDevice)?;
    info!("using {} ({:?})", chosen.name, chosen.device_type);
    Ok((devices[idx], queue_family))
}
