// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Result};
use tracing::{debug, info};

use crate::{AcquireOutcome, FrameBackend, PresentOutcome, RenderSize};

/// Backend without a GPU. Rotates a virtual image ring with the same
/// acquire/submit/present contract as the Vulkan backend, which makes it
/// useful for exercising the frame loop on machines without a driver.
pub struct HeadlessBackend {
    size: RenderSize,
    image_count: u32,
    current_frame: usize,
    next_image: u32,
    acquired: Option<u32>,
    submitted: bool,
    stale: bool,
    vsync: bool,
    clear: [f32; 4],
    generation: u64,
    submitted_frames: u64,
    presented_frames: u64,
}

impl HeadlessBackend {
    pub fn new(size: RenderSize, image_count: u32) -> Self {
        let image_count = image_count.max(1);
        info!(
            "headless chain ready ({}x{}, {} images)",
            size.width, size.height, image_count
        );
        Self {
            size,
            image_count,
            current_frame: 0,
            next_image: 0,
            acquired: None,
            submitted: false,
            stale: false,
            vsync: true,
            clear: [0.0, 0.0, 0.0, 1.0],
            generation: 0,
            submitted_frames: 0,
            presented_frames: 0,
        }
    }

    fn rebuild(&mut self) {
        self.stale = false;
        self.acquired = None;
        self.submitted = false;
        self.current_frame = 0;
        self.next_image = 0;
        self.generation += 1;
        debug!(
            "headless: rebuilt chain {}x{} vsync={} (generation {})",
            self.size.width, self.size.height, self.vsync, self.generation
        );
    }

    /// Marks the virtual chain out of date, as a platform would after a
    /// surface change the backend was not told about.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear
    }

    pub fn submitted_frames(&self) -> u64 {
        self.submitted_frames
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }
}

impl FrameBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn acquire_frame(&mut self) -> Result<AcquireOutcome> {
        if self.size.is_zero() {
            return Ok(AcquireOutcome::Paused);
        }
        if self.stale {
            return Ok(AcquireOutcome::Stale);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.acquired = Some(image_index);
        self.submitted = false;
        Ok(AcquireOutcome::Ready {
            image_index,
            frame: self.current_frame,
        })
    }

    fn submit(&mut self) -> Result<()> {
        if self.acquired.is_none() {
            return Err(anyhow!("submit without an acquired frame"));
        }
        self.submitted = true;
        self.submitted_frames += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<PresentOutcome> {
        if self.acquired.take().is_none() || !std::mem::take(&mut self.submitted) {
            return Err(anyhow!("present without a submitted frame"));
        }
        if self.stale {
            return Ok(PresentOutcome::Stale);
        }
        self.current_frame = (self.current_frame + 1) % self.image_count as usize;
        self.presented_frames += 1;
        Ok(PresentOutcome::Presented)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_zero() {
            debug!("headless: resize to {}x{} ignored", size.width, size.height);
            return Ok(());
        }
        if size == self.size && !self.stale {
            return Ok(());
        }
        self.size = size;
        self.rebuild();
        Ok(())
    }

    /// A change mid-frame marks the chain stale; the caller's resize then
    /// rebuilds it.
    fn set_present_mode(&mut self, vsync: bool) -> Result<()> {
        if vsync == self.vsync {
            debug!("headless: vsync stays {vsync}");
            return Ok(());
        }
        self.vsync = vsync;
        if self.acquired.is_some() {
            self.stale = true;
        } else {
            self.rebuild();
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn size(&self) -> RenderSize {
        self.size
    }
}
