// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::bootstrap::{pick_physical_device, InstanceConfig, InstanceContext};
use crate::device::DeviceContext;

/// The window surface and the instance-level loader that queries it.
pub struct SurfaceContext {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl SurfaceContext {
    pub fn new(
        instance: &InstanceContext,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let loader = surface::Instance::new(instance.entry(), instance.raw());
        // SAFETY: the handles come from a live window that outlives the surface.
        let surface = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .context("ash_window::create_surface")?;
        Ok(Self { loader, surface })
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for SurfaceContext {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Instance, surface and device for one window, passed explicitly to whoever
/// needs them.
///
/// Field order is drop order: device, then surface, then debug messenger and
/// instance. Anything built on the device (the swapchain manager) must be
/// dropped before this.
pub struct RenderContext {
    device: Arc<DeviceContext>,
    surface: SurfaceContext,
    instance: InstanceContext,
}

impl RenderContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        cfg: &InstanceConfig,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let instance = InstanceContext::new(dh, cfg)?;
        let surface = SurfaceContext::new(&instance, dh, wh)?;
        let (phys, queue_family) = pick_physical_device(&instance, &surface)?;
        let device = DeviceContext::new(instance.raw(), &surface, phys, queue_family)?;

        Ok(Self {
            device: Arc::new(device),
            surface,
            instance,
        })
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    pub fn instance(&self) -> &InstanceContext {
        &self.instance
    }
}
