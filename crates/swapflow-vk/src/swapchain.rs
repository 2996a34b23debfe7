// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain and everything whose lifetime is tied to it.
//!
//! Per-frame order, driven by one thread:
//!
//! ```text
//! acquire_next   platform image + FrameSynchronizer protocol on CurrentFrame
//! (record)       into command_buffer(frame)
//! submit         waits acquire signal, signals render-complete, fences slot
//! present        waits render-complete; CurrentFrame advances on success
//! ```
//!
//! Rebuilds happen only behind a device-idle barrier. The whole next
//! generation is built before the previous one is torn down, so a failed
//! rebuild leaves the installed chain untouched.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::depth::DepthAttachment;
use crate::device::{FrameDevice, FrameSubmit};
use crate::error::{FrameError, FrameResult, VkResultExt};
use crate::frame::{timeout_ns, FrameSlot, FrameSynchronizer, SyncSlot};
use crate::reclaim::DeferredResourceReclaimer;
use crate::surface::{
    choose_image_count, choose_present_mode, choose_surface_format, cs_name, extent_from_caps,
    fmt_name, pm_name, FormatRequest,
};

#[derive(Clone, Debug)]
pub struct SwapchainSettings {
    pub vsync: bool,
    /// Desired count, clamped to what the surface allows.
    pub image_count: u32,
    pub format: FormatRequest,
    pub fence_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for SwapchainSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            image_count: 3,
            format: FormatRequest::default(),
            fence_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// `frame` is the FrameSlot whose command buffer is now recording.
    Ready { image_index: u32, frame: usize },
    /// Skip this iteration and rebuild.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Stale,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// Everything a rebuild replaces.
#[derive(Debug, Default)]
struct ChainGeneration {
    swapchain: vk::SwapchainKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    images: Vec<SwapImage>,
    depth: Option<DepthAttachment>,
    sync: FrameSynchronizer,
}

impl ChainGeneration {
    fn destroy<D: FrameDevice + ?Sized>(self, device: &D) {
        for img in &self.images {
            if img.framebuffer != vk::Framebuffer::null() {
                device.destroy_framebuffer(img.framebuffer);
            }
            device.destroy_image_view(img.view);
        }
        if let Some(depth) = self.depth {
            depth.destroy(device);
        }
        self.sync.destroy(device);
        if self.swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.swapchain);
        }
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }
}

#[derive(Clone, Copy, Debug)]
struct ActiveFrame {
    image_index: u32,
    slot: usize,
    sync: usize,
    submitted: bool,
}

pub struct SwapchainManager<D: FrameDevice> {
    device: Arc<D>,
    settings: SwapchainSettings,
    surface_format: vk::SurfaceFormatKHR,
    render_pass: vk::RenderPass,
    // One-shot command buffers come from here, never from a slot pool.
    transient_pool: vk::CommandPool,
    desired: vk::Extent2D,

    chain: ChainGeneration,
    reclaimer: DeferredResourceReclaimer,

    current_frame: usize,
    sync_index: usize,
    active: Option<ActiveFrame>,
    // Newest slot with a submission this generation.
    last_submitted: Option<usize>,
    stale: bool,
    rebuild_pending: bool,
    generation: u64,
    closed: bool,
}

impl<D: FrameDevice> SwapchainManager<D> {
    /// Builds the first chain generation. `hint` is used only when the
    /// surface leaves the extent up to the swapchain.
    pub fn create(device: Arc<D>, hint: vk::Extent2D, settings: SwapchainSettings) -> FrameResult<Self> {
        let supported = device
            .surface_support()
            .or_fatal("get_physical_device_surface_support")?;
        if !supported {
            return Err(FrameError::SurfaceUnsupported);
        }

        let formats = device
            .surface_formats()
            .or_fatal("get_physical_device_surface_formats")?;
        let surface_format =
            choose_surface_format(&formats, &settings.format).ok_or(FrameError::NoSurfaceFormat)?;

        let render_pass = device
            .create_render_pass(surface_format.format, device.depth_format())
            .or_fatal("create_render_pass")?;
        let transient_pool = match device.create_command_pool(vk::CommandPoolCreateFlags::TRANSIENT) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_render_pass(render_pass);
                return Err(FrameError::from_vk("create_command_pool(transient)", e));
            }
        };

        let mut manager = Self {
            device,
            settings,
            surface_format,
            render_pass,
            transient_pool,
            desired: hint,
            chain: ChainGeneration::default(),
            reclaimer: DeferredResourceReclaimer::new(0),
            current_frame: 0,
            sync_index: 0,
            active: None,
            last_submitted: None,
            stale: false,
            rebuild_pending: false,
            generation: 0,
            closed: false,
        };

        // On error `manager` drops here and releases the pass and pool.
        let chain = manager.build_generation(vk::SwapchainKHR::null())?;
        manager.reclaimer = DeferredResourceReclaimer::new(chain.image_count());
        manager.chain = chain;
        manager.log_chain();
        Ok(manager)
    }

    fn build_generation(&self, old: vk::SwapchainKHR) -> FrameResult<ChainGeneration> {
        let mut next = ChainGeneration::default();
        match self.populate(&mut next, old) {
            Ok(()) => Ok(next),
            Err(e) => {
                next.destroy(&*self.device);
                Err(e)
            }
        }
    }

    fn populate(&self, next: &mut ChainGeneration, old: vk::SwapchainKHR) -> FrameResult<()> {
        let device = &*self.device;

        let caps = device
            .surface_capabilities()
            .or_fatal("get_physical_device_surface_capabilities")?;
        let modes = device
            .surface_present_modes()
            .or_fatal("get_physical_device_surface_present_modes")?;

        let extent = extent_from_caps(&caps, self.desired);
        let min_images = choose_image_count(&caps, self.settings.image_count);
        let present_mode = choose_present_mode(&modes, self.settings.vsync);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::INHERIT,
        ]
        .into_iter()
        .find(|&a| caps.supported_composite_alpha.contains(a))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let sc_info = vk::SwapchainCreateInfoKHR::default()
            .min_image_count(min_images)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        next.swapchain = device.create_swapchain(&sc_info).or_fatal("create_swapchain")?;
        next.extent = extent;
        next.present_mode = present_mode;

        let images = device
            .swapchain_images(next.swapchain)
            .or_fatal("get_swapchain_images")?;

        let depth = DepthAttachment::create(device, extent, device.depth_format())?;
        let depth_view = depth.view();
        next.depth = Some(depth);

        for image in images {
            let view = device
                .create_image_view(image, self.surface_format.format, vk::ImageAspectFlags::COLOR)
                .or_fatal("create_image_view(swap image)")?;
            next.images.push(SwapImage {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
            });
            let framebuffer = device
                .create_framebuffer(self.render_pass, &[view, depth_view], extent)
                .or_fatal("create_framebuffer")?;
            if let Some(last) = next.images.last_mut() {
                last.framebuffer = framebuffer;
            }
        }

        let n = next.images.len();
        next.sync = FrameSynchronizer::create(device, n, n + 1, self.settings.fence_timeout)?;
        Ok(())
    }

    fn log_chain(&self) {
        info!(
            "swapchain: {} / {} / {} {}x{} ({} images, generation {})",
            fmt_name(self.surface_format.format),
            cs_name(self.surface_format.color_space),
            pm_name(self.chain.present_mode),
            self.chain.extent.width,
            self.chain.extent.height,
            self.chain.image_count(),
            self.generation
        );
    }

    fn mark_stale(&mut self, what: &str) {
        if !self.stale {
            debug!("{}: chain is out of date", what);
        }
        self.stale = true;
    }

    /// Full rebuild behind a device-idle barrier.
    pub fn recreate(&mut self) -> FrameResult<()> {
        self.device.wait_idle().or_fatal("device_wait_idle")?;
        // Anything acquired or recorded against the old chain is abandoned.
        self.active = None;

        let next = self.build_generation(self.chain.swapchain)?;
        let old = std::mem::replace(&mut self.chain, next);
        self.reclaimer.resize(self.chain.image_count());
        old.destroy(&*self.device);

        self.current_frame = 0;
        self.sync_index = 0;
        self.last_submitted = None;
        self.stale = false;
        self.rebuild_pending = false;
        self.generation += 1;
        self.log_chain();
        Ok(())
    }

    // Mid-frame requests wait for the next acquire.
    fn request_rebuild(&mut self) -> FrameResult<()> {
        if self.active.is_some() {
            self.rebuild_pending = true;
            self.stale = true;
            Ok(())
        } else {
            self.recreate()
        }
    }

    /// Returns whether a rebuild ran or was scheduled.
    pub fn resize(&mut self, width: u32, height: u32) -> FrameResult<bool> {
        if width == 0 || height == 0 {
            debug!("resize to {}x{} ignored", width, height);
            return Ok(false);
        }
        let want = vk::Extent2D { width, height };
        self.desired = want;
        if want == self.chain.extent && !self.stale {
            return Ok(false);
        }
        self.request_rebuild()?;
        Ok(true)
    }

    /// Returns whether the derived mode changed (and a rebuild ran or was
    /// scheduled).
    pub fn set_present_mode(&mut self, vsync: bool) -> FrameResult<bool> {
        let modes = self
            .device
            .surface_present_modes()
            .or_fatal("get_physical_device_surface_present_modes")?;
        let mode = choose_present_mode(&modes, vsync);
        self.settings.vsync = vsync;
        if mode == self.chain.present_mode {
            debug!("present mode stays {}", pm_name(mode));
            return Ok(false);
        }
        self.request_rebuild()?;
        Ok(true)
    }

    /// Acquires the next image and prepares the current FrameSlot for
    /// recording. With a frame already open this returns it unchanged.
    pub fn acquire_next(&mut self) -> FrameResult<Acquire> {
        if let Some(active) = self.active {
            return Ok(Acquire::Ready {
                image_index: active.image_index,
                frame: active.slot,
            });
        }
        if self.rebuild_pending {
            self.recreate()?;
        }
        if self.stale {
            return Ok(Acquire::Stale);
        }

        let sync = self.sync_index;
        let signal = self
            .chain
            .sync
            .sync(sync)
            .map(SyncSlot::acquire)
            .ok_or(FrameError::SlotOutOfRange {
                slot: sync,
                count: self.chain.sync.sync_count(),
            })?;

        let timeout = self.settings.acquire_timeout;
        let image_index = match self.device.acquire_next_image(
            self.chain.swapchain,
            timeout_ns(timeout),
            signal,
        ) {
            Ok((index, false)) => index,
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.mark_stale("acquire_next_image");
                return Ok(Acquire::Stale);
            }
            Err(e) => return Err(FrameError::from_wait("acquire_next_image", e, timeout)),
        };

        let slot = self.current_frame;
        self.chain
            .sync
            .begin(&*self.device, slot, &mut self.reclaimer)?;

        self.sync_index = (sync + 1) % self.chain.sync.sync_count();
        self.active = Some(ActiveFrame {
            image_index,
            slot,
            sync,
            submitted: false,
        });
        Ok(Acquire::Ready {
            image_index,
            frame: slot,
        })
    }

    /// Ends the current frame's command buffer and submits it.
    pub fn submit(&mut self) -> FrameResult<()> {
        let Some(active) = self.active.as_mut().filter(|a| !a.submitted) else {
            return Err(FrameError::NoActiveFrame);
        };
        let frame_count = self.chain.sync.frame_count();
        let frame = self
            .chain
            .sync
            .frame(active.slot)
            .ok_or(FrameError::SlotOutOfRange {
                slot: active.slot,
                count: frame_count,
            })?;
        let (cmd, fence) = (frame.command_buffer(), frame.fence());
        let sync = *self
            .chain
            .sync
            .sync(active.sync)
            .ok_or(FrameError::SlotOutOfRange {
                slot: active.sync,
                count: self.chain.sync.sync_count(),
            })?;

        self.device
            .end_command_buffer(cmd)
            .or_fatal("end_command_buffer")?;
        self.device
            .queue_submit(&FrameSubmit {
                command_buffer: cmd,
                wait: Some((
                    sync.acquire(),
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )),
                signal: Some(sync.render_complete()),
                fence,
            })
            .or_fatal("queue_submit")?;

        self.chain.sync.mark_submitted(active.slot);
        active.submitted = true;
        self.last_submitted = Some(active.slot);
        Ok(())
    }

    /// Presents the submitted frame. `CurrentFrame` advances only on
    /// `Presented`.
    pub fn present(&mut self) -> FrameResult<PresentResult> {
        let Some(active) = self.active.filter(|a| a.submitted) else {
            return Err(FrameError::NoActiveFrame);
        };
        self.active = None;

        if self.rebuild_pending {
            debug!("present skipped, chain rebuild pending");
            return Ok(PresentResult::Stale);
        }

        let render_complete = self
            .chain
            .sync
            .sync(active.sync)
            .map(SyncSlot::render_complete)
            .ok_or(FrameError::SlotOutOfRange {
                slot: active.sync,
                count: self.chain.sync.sync_count(),
            })?;

        match self
            .device
            .queue_present(self.chain.swapchain, active.image_index, render_complete)
        {
            Ok(false) => {
                self.current_frame = (self.current_frame + 1) % self.chain.image_count();
                Ok(PresentResult::Presented)
            }
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.mark_stale("queue_present");
                Ok(PresentResult::Stale)
            }
            Err(e) => Err(FrameError::from_vk("queue_present", e)),
        }
    }

    /// Defers `callback` until slot `slot`'s next fence wait.
    pub fn submit_resource_free<F>(&mut self, slot: usize, callback: F) -> FrameResult<()>
    where
        F: FnOnce() + 'static,
    {
        self.reclaimer.submit(slot, callback)
    }

    /// [`submit_resource_free`](Self::submit_resource_free) on the slot whose
    /// work may still reference the resource: the open frame's slot, or
    /// between frames the most recently submitted one.
    pub fn defer_free<F>(&mut self, callback: F) -> FrameResult<()>
    where
        F: FnOnce() + 'static,
    {
        self.reclaimer.submit(self.free_slot(), callback)
    }

    fn free_slot(&self) -> usize {
        match (self.active, self.last_submitted) {
            (Some(active), _) => active.slot,
            (None, Some(slot)) => slot,
            (None, None) => self.current_frame,
        }
    }

    /// A recording command buffer outside the slot pools. Freed when the
    /// current slot comes around again.
    pub fn one_shot_command_buffer(&mut self) -> FrameResult<vk::CommandBuffer> {
        let cmd = self
            .device
            .allocate_command_buffers(self.transient_pool, 1)
            .or_fatal("allocate_command_buffers(one-shot)")?
            .into_iter()
            .next()
            .ok_or(FrameError::Vulkan {
                what: "allocate_command_buffers(one-shot)",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            })?;
        if let Err(e) = self.device.begin_one_time(cmd) {
            self.device.free_command_buffers(self.transient_pool, &[cmd]);
            return Err(FrameError::from_vk("begin_command_buffer(one-shot)", e));
        }
        self.chain
            .sync
            .track(self.current_frame, self.transient_pool, cmd)?;
        Ok(cmd)
    }

    /// Ends `cmd`, submits it alone and blocks until it has executed.
    pub fn flush_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        self.device
            .end_command_buffer(cmd)
            .or_fatal("end_command_buffer(one-shot)")?;
        let fence = self.device.create_fence(false).or_fatal("create_fence")?;
        let submitted = self.device.queue_submit(&FrameSubmit {
            command_buffer: cmd,
            wait: None,
            signal: None,
            fence,
        });
        if let Err(e) = submitted {
            self.device.destroy_fence(fence);
            return Err(FrameError::from_vk("queue_submit(one-shot)", e));
        }
        let timeout = self.settings.fence_timeout;
        // On failure the fence stays alive; the submission may still use it.
        self.device
            .wait_for_fence(fence, timeout_ns(timeout))
            .map_err(|r| FrameError::from_wait("wait_for_fences(one-shot)", r, timeout))?;
        self.device.destroy_fence(fence);
        Ok(())
    }

    pub fn track_command_buffer(
        &mut self,
        slot: usize,
        pool: vk::CommandPool,
        cmd: vk::CommandBuffer,
    ) -> FrameResult<()> {
        self.chain.sync.track(slot, pool, cmd)
    }

    pub fn command_buffer(&self, slot: usize) -> Option<vk::CommandBuffer> {
        self.chain.sync.frame(slot).map(FrameSlot::command_buffer)
    }

    pub fn frame_slot(&self, slot: usize) -> Option<&FrameSlot> {
        self.chain.sync.frame(slot)
    }

    pub fn sync_slot(&self, index: usize) -> Option<&SyncSlot> {
        self.chain.sync.sync(index)
    }

    pub fn frame_slot_count(&self) -> usize {
        self.chain.sync.frame_count()
    }

    pub fn sync_slot_count(&self) -> usize {
        self.chain.sync.sync_count()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// The acquired image of the open frame.
    pub fn image_index(&self) -> Option<u32> {
        self.active.map(|a| a.image_index)
    }

    pub fn image_count(&self) -> usize {
        self.chain.image_count()
    }

    pub fn images(&self) -> &[SwapImage] {
        &self.chain.images
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.chain.present_mode
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.chain
            .images
            .get(image_index as usize)
            .map(|img| img.framebuffer)
    }

    pub fn depth(&self) -> Option<&DepthAttachment> {
        self.chain.depth.as_ref()
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.chain.swapchain
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Bumped by every successful rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }

    /// Final idle wait, then every pending deferred free, then teardown.
    /// Idempotent; `Drop` calls it too.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.device.wait_idle() {
            warn!("device_wait_idle at shutdown: {:?}", e);
        }
        self.active = None;
        let ran = self.reclaimer.drain_all();
        if ran > 0 {
            debug!("shutdown ran {} deferred frees", ran);
        }

        let device = &*self.device;
        std::mem::take(&mut self.chain).destroy(device);
        device.destroy_command_pool(self.transient_pool);
        device.destroy_render_pass(self.render_pass);
        self.transient_pool = vk::CommandPool::null();
        self.render_pass = vk::RenderPass::null();
    }
}

impl<D: FrameDevice> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
