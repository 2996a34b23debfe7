// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use ash::vk;
use swapflow_core::Severity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no Vulkan physical device found; a driver update may help")]
    NoPhysicalDevice,

    #[error("no physical device exposes a graphics + compute queue family")]
    NoSuitableDevice,

    #[error("the selected device cannot present to this surface")]
    SurfaceUnsupported,

    #[error("the surface reports no formats")]
    NoSurfaceFormat,

    #[error("no device-local memory type fits the {what}")]
    NoMemoryType { what: &'static str },

    #[error("{what} failed: {result:?}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },

    #[error("device lost during {what}")]
    DeviceLost { what: &'static str },

    #[error("{what} did not complete within {timeout:?}")]
    Timeout {
        what: &'static str,
        timeout: Duration,
    },

    #[error("deferred free targets slot {slot}, only {count} slots exist")]
    SlotOutOfRange { slot: usize, count: usize },

    #[error("no acquired frame to submit or present")]
    NoActiveFrame,
}

impl FrameError {
    pub fn severity(&self) -> Severity {
        match self {
            FrameError::NoActiveFrame => Severity::Recoverable,
            FrameError::SlotOutOfRange { .. } => Severity::Advisory,
            _ => Severity::Fatal,
        }
    }

    /// Classifies the result of a bounded wait; `TIMEOUT` keeps its budget.
    pub(crate) fn from_wait(what: &'static str, result: vk::Result, timeout: Duration) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => FrameError::Timeout { what, timeout },
            other => FrameError::from_vk(what, other),
        }
    }

    pub(crate) fn from_vk(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost { what },
            result => FrameError::Vulkan { what, result },
        }
    }
}

pub type FrameResult<T> = Result<T, FrameError>;

/// `.or_fatal("what")` for raw `VkResult`s.
pub(crate) trait VkResultExt<T> {
    fn or_fatal(self, what: &'static str) -> FrameResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn or_fatal(self, what: &'static str) -> FrameResult<T> {
        self.map_err(|r| FrameError::from_vk(what, r))
    }
}
