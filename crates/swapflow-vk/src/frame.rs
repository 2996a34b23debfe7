// SPDX-License-Identifier: CEPL-1.0
//! Frame-in-flight slots and the protocol that makes reusing one safe.
//!
//! A [`FrameSlot`] (command pool, primary command buffer, completion fence)
//! is indexed by the submission-order counter. A [`SyncSlot`] (acquire and
//! render-complete semaphores) is indexed separately, because the order the
//! platform hands out images does not follow submission order.
//!
//! Reuse protocol for a slot, in [`FrameSynchronizer::begin`]:
//!
//! ```text
//! 1. wait (bounded) on the slot fence
//! 2. reset the fence
//! 3. drain the slot's deferred-free queue
//! 4. free command buffers registered from outside the primary pool
//! 5. reset the primary pool, begin a one-time-submit command buffer
//! ```

use std::time::Duration;

use ash::vk;
use tracing::trace;

use crate::device::FrameDevice;
use crate::error::{FrameError, FrameResult, VkResultExt};
use crate::reclaim::DeferredResourceReclaimer;

pub(crate) fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug)]
pub struct FrameSlot {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    extra: Vec<(vk::CommandPool, vk::CommandBuffer)>,
    // Fence was reset but nothing was submitted against it yet.
    armed: bool,
}

impl FrameSlot {
    fn create<D: FrameDevice + ?Sized>(device: &D) -> FrameResult<Self> {
        let pool = device
            .create_command_pool(vk::CommandPoolCreateFlags::empty())
            .or_fatal("create_command_pool")?;

        let command_buffer = match device
            .allocate_command_buffers(pool, 1)
            .map(|bufs| bufs.into_iter().next())
        {
            Ok(Some(cmd)) => cmd,
            Ok(None) => {
                device.destroy_command_pool(pool);
                return Err(FrameError::from_vk(
                    "allocate_command_buffers",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
            Err(e) => {
                device.destroy_command_pool(pool);
                return Err(FrameError::from_vk("allocate_command_buffers", e));
            }
        };

        // Signaled, so the first wait on a fresh slot returns at once.
        let fence = match device.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                device.free_command_buffers(pool, &[command_buffer]);
                device.destroy_command_pool(pool);
                return Err(FrameError::from_vk("create_fence", e));
            }
        };

        Ok(Self {
            pool,
            command_buffer,
            fence,
            extra: Vec::new(),
            armed: false,
        })
    }

    fn destroy<D: FrameDevice + ?Sized>(self, device: &D) {
        free_extra(device, self.extra);
        device.destroy_fence(self.fence);
        device.free_command_buffers(self.pool, &[self.command_buffer]);
        device.destroy_command_pool(self.pool);
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    pub fn extra_command_buffers(&self) -> usize {
        self.extra.len()
    }
}

fn free_extra<D: FrameDevice + ?Sized>(
    device: &D,
    mut extra: Vec<(vk::CommandPool, vk::CommandBuffer)>,
) {
    extra.sort_by_key(|&(pool, _)| ash::vk::Handle::as_raw(pool));
    for group in extra.chunk_by(|a, b| a.0 == b.0) {
        let pool = group[0].0;
        let bufs: Vec<_> = group.iter().map(|&(_, cmd)| cmd).collect();
        device.free_command_buffers(pool, &bufs);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SyncSlot {
    acquire: vk::Semaphore,
    render_complete: vk::Semaphore,
}

impl SyncSlot {
    fn create<D: FrameDevice + ?Sized>(device: &D) -> FrameResult<Self> {
        let acquire = device.create_semaphore().or_fatal("create_semaphore")?;
        let render_complete = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(acquire);
                return Err(FrameError::from_vk("create_semaphore", e));
            }
        };
        Ok(Self {
            acquire,
            render_complete,
        })
    }

    fn destroy<D: FrameDevice + ?Sized>(self, device: &D) {
        device.destroy_semaphore(self.acquire);
        device.destroy_semaphore(self.render_complete);
    }

    /// Signaled by the platform when the acquired image is ready.
    pub fn acquire(&self) -> vk::Semaphore {
        self.acquire
    }

    /// Signaled by the submission, waited on by present.
    pub fn render_complete(&self) -> vk::Semaphore {
        self.render_complete
    }
}

/// Owns the slot arrays of one chain generation.
#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    frames: Vec<FrameSlot>,
    syncs: Vec<SyncSlot>,
    fence_timeout: Duration,
}

impl FrameSynchronizer {
    pub fn create<D: FrameDevice + ?Sized>(
        device: &D,
        frame_count: usize,
        sync_count: usize,
        fence_timeout: Duration,
    ) -> FrameResult<Self> {
        let mut sync = Self {
            frames: Vec::with_capacity(frame_count),
            syncs: Vec::with_capacity(sync_count),
            fence_timeout,
        };
        if let Err(e) = sync.populate(device, frame_count, sync_count) {
            sync.destroy(device);
            return Err(e);
        }
        Ok(sync)
    }

    fn populate<D: FrameDevice + ?Sized>(
        &mut self,
        device: &D,
        frame_count: usize,
        sync_count: usize,
    ) -> FrameResult<()> {
        for _ in 0..frame_count {
            self.frames.push(FrameSlot::create(device)?);
        }
        for _ in 0..sync_count {
            self.syncs.push(SyncSlot::create(device)?);
        }
        Ok(())
    }

    /// Caller holds the device-idle barrier.
    pub fn destroy<D: FrameDevice + ?Sized>(self, device: &D) {
        for frame in self.frames {
            frame.destroy(device);
        }
        for sync in self.syncs {
            sync.destroy(device);
        }
    }

    /// Runs the reuse protocol on `slot` and returns its command buffer in the
    /// recording state.
    pub fn begin<D: FrameDevice + ?Sized>(
        &mut self,
        device: &D,
        slot: usize,
        reclaimer: &mut DeferredResourceReclaimer,
    ) -> FrameResult<vk::CommandBuffer> {
        let timeout = self.fence_timeout;
        let count = self.frames.len();
        let frame = self
            .frames
            .get_mut(slot)
            .ok_or(FrameError::SlotOutOfRange { slot, count })?;

        if !frame.armed {
            device
                .wait_for_fence(frame.fence, timeout_ns(timeout))
                .map_err(|r| FrameError::from_wait("wait_for_fences(frame slot)", r, timeout))?;
            device.reset_fence(frame.fence).or_fatal("reset_fences")?;
            frame.armed = true;
        }

        reclaimer.drain(slot);

        let extra = std::mem::take(&mut frame.extra);
        if !extra.is_empty() {
            trace!("slot {}: freeing {} extra command buffers", slot, extra.len());
            free_extra(device, extra);
        }

        device
            .reset_command_pool(frame.pool)
            .or_fatal("reset_command_pool")?;
        device
            .begin_one_time(frame.command_buffer)
            .or_fatal("begin_command_buffer")?;
        Ok(frame.command_buffer)
    }

    /// The slot's fence now guards a real submission again.
    pub(crate) fn mark_submitted(&mut self, slot: usize) {
        if let Some(frame) = self.frames.get_mut(slot) {
            frame.armed = false;
        }
    }

    /// Registers a command buffer from another pool to be freed on `slot`'s
    /// next cycle.
    pub fn track(
        &mut self,
        slot: usize,
        pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
    ) -> FrameResult<()> {
        let count = self.frames.len();
        self.frames
            .get_mut(slot)
            .ok_or(FrameError::SlotOutOfRange { slot, count })?
            .extra
            .push((pool, command_buffer));
        Ok(())
    }

    pub fn frame(&self, slot: usize) -> Option<&FrameSlot> {
        self.frames.get(slot)
    }

    pub fn sync(&self, slot: usize) -> Option<&SyncSlot> {
        self.syncs.get(slot)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.len()
    }
}
