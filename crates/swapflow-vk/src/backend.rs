// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use swapflow_render::{AcquireOutcome, FrameBackend, PresentOutcome, RenderSize};
use tracing::{debug, info};

use crate::bootstrap::InstanceConfig;
use crate::context::RenderContext;
use crate::device::{DeviceContext, FrameDevice};
use crate::error::FrameError;
use crate::swapchain::{Acquire, PresentResult, SwapchainManager, SwapchainSettings};

#[derive(Clone, Debug)]
pub struct VkOptions {
    pub instance: InstanceConfig,
    pub swapchain: SwapchainSettings,
    pub clear_color: [f32; 4],
}

impl Default for VkOptions {
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            swapchain: SwapchainSettings::default(),
            clear_color: [0.35, 0.35, 0.35, 1.0],
        }
    }
}

/// [`FrameBackend`] over a real Vulkan device. Each frame is one render pass
/// that clears color and depth.
pub struct VkFrameBackend {
    // Dropped first: the chain must go before the device it was built on.
    swapchain: SwapchainManager<DeviceContext>,
    ctx: RenderContext,
    clear: [f32; 4],
    size: RenderSize,
    paused: bool,
}

impl VkFrameBackend {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: VkOptions,
    ) -> Result<Self> {
        let ctx = RenderContext::new(window, display, &opts.instance)?;
        let hint = vk::Extent2D {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let swapchain = SwapchainManager::create(ctx.device().clone(), hint, opts.swapchain)
            .context("create swapchain")?;
        info!("vk backend ready");
        Ok(Self {
            swapchain,
            ctx,
            clear: opts.clear_color,
            size,
            paused: size.is_zero(),
        })
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn swapchain(&self) -> &SwapchainManager<DeviceContext> {
        &self.swapchain
    }

    /// For callers that queue deferred frees or one-shot uploads.
    pub fn swapchain_mut(&mut self) -> &mut SwapchainManager<DeviceContext> {
        &mut self.swapchain
    }

    fn surface_is_zero(&self) -> Result<bool> {
        let caps = self
            .ctx
            .device()
            .surface_capabilities()
            .context("get_physical_device_surface_capabilities")?;
        Ok(caps.current_extent.width == 0 || caps.current_extent.height == 0)
    }

    fn record(&self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let framebuffer = self
            .swapchain
            .framebuffer(image_index)
            .ok_or_else(|| anyhow!("no framebuffer for image {image_index}"))?;
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent(),
            })
            .clear_values(&clears);

        let d = self.ctx.device().raw();
        // SAFETY: `cmd` is the current slot's buffer, in the recording state
        // since acquire; the framebuffer belongs to the live chain generation.
        unsafe {
            d.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
            d.cmd_end_render_pass(cmd);
        }
        Ok(())
    }
}

impl FrameBackend for VkFrameBackend {
    fn name(&self) -> &'static str {
        "vk"
    }

    fn acquire_frame(&mut self) -> Result<AcquireOutcome> {
        if self.paused {
            return Ok(AcquireOutcome::Paused);
        }
        // A minimized surface can report 0x0 before the window says so.
        if self.surface_is_zero()? {
            return Ok(AcquireOutcome::Paused);
        }
        Ok(match self.swapchain.acquire_next()? {
            Acquire::Ready { image_index, frame } => AcquireOutcome::Ready { image_index, frame },
            Acquire::Stale => AcquireOutcome::Stale,
        })
    }

    fn submit(&mut self) -> Result<()> {
        let image_index = self.swapchain.image_index().ok_or(FrameError::NoActiveFrame)?;
        let cmd = self
            .swapchain
            .command_buffer(self.swapchain.current_frame())
            .ok_or(FrameError::NoActiveFrame)?;
        self.record(cmd, image_index)?;
        self.swapchain.submit()?;
        Ok(())
    }

    fn present(&mut self) -> Result<PresentOutcome> {
        Ok(match self.swapchain.present()? {
            PresentResult::Presented => PresentOutcome::Presented,
            PresentResult::Stale => PresentOutcome::Stale,
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_zero() {
            if !self.paused {
                info!("vk: resize to {}x{} → paused", size.width, size.height);
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{} → resumed", size.width, size.height);
        }
        self.paused = false;
        self.size = size;
        if self.swapchain.resize(size.width, size.height)? {
            debug!("vk: chain generation {}", self.swapchain.generation());
        }
        Ok(())
    }

    fn set_present_mode(&mut self, vsync: bool) -> Result<()> {
        self.swapchain.set_present_mode(vsync)?;
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn size(&self) -> RenderSize {
        self.size
    }
}
