// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

mod headless;

pub use headless::HeadlessBackend;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports 0 in one dimension.
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Result of asking the backend for the next drawable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `image_index` is the acquired swap image, `frame` the frame-in-flight
    /// slot recording into it. The two are not the same counter.
    Ready { image_index: u32, frame: usize },
    /// The image chain no longer matches the surface. Skip this frame and
    /// call `resize` with the current window size.
    Stale,
    /// Nothing to draw into (zero-sized surface).
    Paused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale,
}

/// What one pass of [`FrameBackend::render_frame`] achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Stale,
    Paused,
}

/// Frame lifecycle shared by every backend. One implementation is chosen at
/// startup and driven through `Box<dyn FrameBackend>`.
pub trait FrameBackend {
    fn name(&self) -> &'static str;

    fn acquire_frame(&mut self) -> Result<AcquireOutcome>;

    /// Records and submits the work for the frame returned by the last
    /// successful `acquire_frame`.
    fn submit(&mut self) -> Result<()>;

    fn present(&mut self) -> Result<PresentOutcome>;

    /// Zero in either dimension is ignored.
    fn resize(&mut self, size: RenderSize) -> Result<()>;

    fn set_present_mode(&mut self, vsync: bool) -> Result<()>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);

    fn size(&self) -> RenderSize;

    fn render_frame(&mut self) -> Result<FrameOutcome> {
        match self.acquire_frame()? {
            AcquireOutcome::Paused => return Ok(FrameOutcome::Paused),
            AcquireOutcome::Stale => return Ok(FrameOutcome::Stale),
            AcquireOutcome::Ready { .. } => {}
        }
        self.submit()?;
        Ok(match self.present()? {
            PresentOutcome::Presented => FrameOutcome::Presented,
            PresentOutcome::Stale => FrameOutcome::Stale,
        })
    }
}
