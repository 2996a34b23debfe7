// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan frame lifecycle: bootstrap, the presentable image chain and the
//! per-frame resources gating its reuse.

mod backend;
mod bootstrap;
mod context;
mod depth;
mod device;
mod error;
mod frame;
#[cfg(test)]
mod mock;
mod reclaim;
mod surface;
mod swapchain;

pub use backend::{VkFrameBackend, VkOptions};
pub use bootstrap::{
    negotiate, pick_physical_device, pick_queue_family, select_device, DebugMessenger,
    DeviceCandidate, InstanceConfig, InstanceContext, Negotiated, VALIDATION_LAYER,
};
pub use context::{RenderContext, SurfaceContext};
pub use depth::DepthAttachment;
pub use device::{DeviceContext, FrameDevice, FrameSubmit};
pub use error::{FrameError, FrameResult};
pub use frame::{FrameSlot, FrameSynchronizer, SyncSlot};
pub use reclaim::{DeferredResourceReclaimer, FreeCallback};
pub use surface::{
    choose_image_count, choose_present_mode, choose_surface_format, extent_from_caps,
    find_memory_type, FormatRequest,
};
pub use swapchain::{Acquire, PresentResult, SwapImage, SwapchainManager, SwapchainSettings};

pub use ash::vk;
