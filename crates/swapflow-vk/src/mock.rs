// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`FrameDevice`] for unit tests.
//!
//! Work completes the moment it is submitted, unless the GPU is "hung". The
//! device tracks live handles and fence and semaphore states, and records an
//! event log so tests can assert on ordering. Anything the lifecycle must
//! never do (reset a pool with work in flight, destroy a handle twice, wait
//! on a semaphore nobody signaled) lands in `violations()` instead of
//! panicking, so one test can report every problem at once.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::device::{FrameDevice, FrameSubmit};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    Image,
    ImageView,
    Memory,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Create(Kind, u64),
    Destroy(Kind, u64),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetPool(vk::CommandPool),
    Begin(vk::CommandBuffer),
    Submit {
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    },
    Acquire {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    WaitIdle,
}

impl Event {
    pub fn is_wait(&self, fence: vk::Fence) -> bool {
        *self == Event::WaitFence(fence)
    }

    pub fn is_fence_reset(&self, fence: vk::Fence) -> bool {
        *self == Event::ResetFence(fence)
    }

    pub fn is_pool_reset(&self, pool: vk::CommandPool) -> bool {
        *self == Event::ResetPool(pool)
    }

    pub fn is_destroy(&self, kind: Kind, raw: u64) -> bool {
        *self == Event::Destroy(kind, raw)
    }
}

/// What a `create_swapchain` call asked for.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub old: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub format: vk::Format,
}

#[derive(Default)]
struct Chain {
    images: Vec<vk::Image>,
    next: usize,
    acquired: HashSet<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Recording {
    Initial,
    Recording,
    Executable,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, Kind>,
    fail_after: HashMap<Kind, (usize, vk::Result)>,

    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    pool_of: HashMap<u64, u64>,
    recording: HashMap<u64, Recording>,
    in_flight: Vec<(vk::Fence, vk::CommandBuffer)>,
    chains: HashMap<u64, Chain>,
    stale: HashSet<u64>,
    records: Vec<SwapchainRecord>,

    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    support: bool,
    memory: vk::PhysicalDeviceMemoryProperties,

    fence_wait_fault: Option<vk::Result>,
    acquire_fault: Option<vk::Result>,
    present_fault: Option<vk::Result>,
    submit_fault: Option<vk::Result>,
    bind_fault: Option<vk::Result>,
    acquire_suboptimal: bool,
    present_suboptimal: bool,
    hung: bool,
    acquire_calls: usize,

    events: Vec<Event>,
    violations: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory.memory_types[0].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        memory.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        Self {
            next_handle: 1,
            live: HashMap::new(),
            fail_after: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            pool_of: HashMap::new(),
            recording: HashMap::new(),
            in_flight: Vec::new(),
            chains: HashMap::new(),
            stale: HashSet::new(),
            records: Vec::new(),
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 8192,
                    height: 8192,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ],
            support: true,
            memory,
            fence_wait_fault: None,
            acquire_fault: None,
            present_fault: None,
            submit_fault: None,
            bind_fault: None,
            acquire_suboptimal: false,
            present_suboptimal: false,
            hung: false,
            acquire_calls: 0,
            events: Vec::new(),
            violations: Vec::new(),
        }
    }
}

impl State {
    fn alloc(&mut self, kind: Kind) -> VkResult<u64> {
        if let Some((remaining, result)) = self.fail_after.get_mut(&kind) {
            if *remaining == 0 {
                let result = *result;
                self.fail_after.remove(&kind);
                return Err(result);
            }
            *remaining -= 1;
        }
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw, kind);
        self.events.push(Event::Create(kind, raw));
        Ok(raw)
    }

    fn release(&mut self, kind: Kind, raw: u64) {
        if raw == 0 {
            return;
        }
        match self.live.remove(&raw) {
            Some(k) if k == kind => self.events.push(Event::Destroy(kind, raw)),
            Some(k) => {
                self.live.insert(raw, k);
                self.violations
                    .push(format!("destroyed {raw:#x} as {kind:?} but it is a {k:?}"));
            }
            None => self
                .violations
                .push(format!("destroyed {kind:?} {raw:#x} that is not alive")),
        }
    }

    fn release_chain_object(&mut self, kind: Kind, raw: u64) {
        if !self.in_flight.is_empty() {
            self.violations
                .push(format!("destroyed {kind:?} {raw:#x} with work in flight"));
        }
        self.release(kind, raw);
    }

    fn pool_busy(&self, pool: u64) -> bool {
        self.in_flight
            .iter()
            .any(|(_, cmd)| self.pool_of.get(&cmd.as_raw()) == Some(&pool))
    }
}

#[derive(Default)]
pub struct MockDevice {
    state: RefCell<State>,
}

impl MockDevice {
    /// The creation of the `skip + 1`-th object of `kind` from now fails.
    pub fn fail_after(&self, kind: Kind, skip: usize, result: vk::Result) {
        self.state.borrow_mut().fail_after.insert(kind, (skip, result));
    }

    pub fn fail_next_fence_wait(&self, result: vk::Result) {
        self.state.borrow_mut().fence_wait_fault = Some(result);
    }

    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.state.borrow_mut().acquire_fault = Some(result);
    }

    pub fn fail_next_present(&self, result: vk::Result) {
        self.state.borrow_mut().present_fault = Some(result);
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().submit_fault = Some(result);
    }

    pub fn fail_next_bind(&self, result: vk::Result) {
        self.state.borrow_mut().bind_fault = Some(result);
    }

    pub fn suboptimal_next_acquire(&self) {
        self.state.borrow_mut().acquire_suboptimal = true;
    }

    pub fn suboptimal_next_present(&self) {
        self.state.borrow_mut().present_suboptimal = true;
    }

    /// Every swapchain alive right now reports OUT_OF_DATE from here on.
    pub fn invalidate_surface(&self) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let alive: Vec<u64> = s.chains.keys().copied().collect();
        s.stale.extend(alive);
    }

    /// Submitted fences stop signaling.
    pub fn hang_gpu(&self) {
        self.state.borrow_mut().hung = true;
    }

    pub fn set_host_only_memory(&self) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        s.memory.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    }

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_min_image_count(&self, min: u32) {
        self.state.borrow_mut().caps.min_image_count = min;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().formats = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.state.borrow_mut().present_modes = modes;
    }

    pub fn set_surface_support(&self, support: bool) {
        self.state.borrow_mut().support = support;
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|&&k| k == kind)
            .count()
    }

    pub fn live_total(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.state.borrow().live.contains_key(&raw)
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.state.borrow().events.iter().position(pred)
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state.borrow().events.iter().filter(|e| pred(e)).count()
    }

    pub fn fence_waits(&self, fence: vk::Fence) -> usize {
        self.count(|e| e.is_wait(fence))
    }

    pub fn wait_idles(&self) -> usize {
        self.count(|e| *e == Event::WaitIdle)
    }

    pub fn submits(&self) -> usize {
        self.count(|e| matches!(e, Event::Submit { .. }))
    }

    pub fn presents(&self) -> usize {
        self.count(|e| matches!(e, Event::Present { .. }))
    }

    /// Every call, including the ones that failed.
    pub fn acquire_calls(&self) -> usize {
        self.state.borrow().acquire_calls
    }

    pub fn swapchain_records(&self) -> Vec<SwapchainRecord> {
        self.state.borrow().records.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }
}

impl FrameDevice for MockDevice {
    fn queue_family(&self) -> u32 {
        0
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.state.borrow().memory
    }

    fn surface_support(&self) -> VkResult<bool> {
        Ok(self.state.borrow().support)
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.borrow().caps)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().present_modes.clone())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        if s.hung {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        s.in_flight.clear();
        s.events.push(Event::WaitIdle);
        Ok(())
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        if info.image_extent.width == 0 || info.image_extent.height == 0 {
            s.violations.push("swapchain created with a zero extent".into());
        }
        let old = info.old_swapchain;
        if old != vk::SwapchainKHR::null() && !s.chains.contains_key(&old.as_raw()) {
            s.violations
                .push(format!("old_swapchain {:#x} is not alive", old.as_raw()));
        }
        let raw = s.alloc(Kind::Swapchain)?;
        let mut chain = Chain::default();
        for _ in 0..info.min_image_count {
            let img = s.next_handle;
            s.next_handle += 1;
            chain.images.push(vk::Image::from_raw(img));
        }
        s.chains.insert(raw, chain);
        let handle = vk::SwapchainKHR::from_raw(raw);
        s.records.push(SwapchainRecord {
            handle,
            old,
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            present_mode: info.present_mode,
            format: info.image_format,
        });
        Ok(handle)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .chains
            .get(&swapchain.as_raw())
            .map(|c| c.images.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = swapchain.as_raw();
        s.chains.remove(&raw);
        s.stale.remove(&raw);
        s.release_chain_object(Kind::Swapchain, raw);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        s.acquire_calls += 1;
        if let Some(r) = s.acquire_fault.take() {
            return Err(r);
        }
        let raw = swapchain.as_raw();
        if s.stale.contains(&raw) {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        match s.semaphores.get(&signal.as_raw()) {
            None => s.violations.push("acquire signals a dead semaphore".into()),
            Some(true) => s
                .violations
                .push(format!("acquire semaphore {:#x} still pending", signal.as_raw())),
            Some(false) => {}
        }
        let Some(chain) = s.chains.get_mut(&raw) else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        let n = chain.images.len();
        let Some(index) = (0..n)
            .map(|i| ((chain.next + i) % n) as u32)
            .find(|i| !chain.acquired.contains(i))
        else {
            return Err(vk::Result::TIMEOUT);
        };
        chain.acquired.insert(index);
        chain.next = (index as usize + 1) % n;
        s.semaphores.insert(signal.as_raw(), true);
        s.events.push(Event::Acquire {
            swapchain,
            image_index: index,
        });
        let suboptimal = std::mem::take(&mut s.acquire_suboptimal);
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        if let Some(r) = s.present_fault.take() {
            return Err(r);
        }
        match s.semaphores.get_mut(&wait.as_raw()) {
            Some(signaled) if *signaled => *signaled = false,
            _ => s
                .violations
                .push(format!("present waits on unsignaled {:#x}", wait.as_raw())),
        }
        let raw = swapchain.as_raw();
        let released = s
            .chains
            .get_mut(&raw)
            .is_some_and(|c| c.acquired.remove(&image_index));
        if !released {
            s.violations
                .push(format!("presented image {image_index} that was not acquired"));
        }
        if s.stale.contains(&raw) {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        s.events.push(Event::Present {
            swapchain,
            image_index,
        });
        Ok(std::mem::take(&mut s.present_suboptimal))
    }

    fn queue_submit(&self, submit: &FrameSubmit) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        if let Some(r) = s.submit_fault.take() {
            return Err(r);
        }
        let cmd = submit.command_buffer.as_raw();
        if s.recording.get(&cmd) != Some(&Recording::Executable) {
            s.violations
                .push(format!("submitted command buffer {cmd:#x} that is not ended"));
        }
        if let Some((sem, _)) = submit.wait {
            match s.semaphores.get_mut(&sem.as_raw()) {
                Some(signaled) if *signaled => *signaled = false,
                _ => s
                    .violations
                    .push(format!("submit waits on unsignaled {:#x}", sem.as_raw())),
            }
        }
        if let Some(sem) = submit.signal {
            if s.semaphores.insert(sem.as_raw(), true) == Some(true) {
                s.violations
                    .push(format!("submit signals pending {:#x}", sem.as_raw()));
            }
        }
        let fence = submit.fence.as_raw();
        if fence != 0 {
            if s.fences.get(&fence) != Some(&false) {
                s.violations
                    .push(format!("submit with fence {fence:#x} not reset"));
            }
            let hung = s.hung;
            s.fences.insert(fence, !hung);
        }
        s.in_flight.push((submit.fence, submit.command_buffer));
        s.events.push(Event::Submit {
            command_buffer: submit.command_buffer,
            fence: submit.fence,
        });
        Ok(())
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        self.state
            .borrow_mut()
            .alloc(Kind::ImageView)
            .map(vk::ImageView::from_raw)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state
            .borrow_mut()
            .release(Kind::ImageView, view.as_raw());
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        self.state
            .borrow_mut()
            .alloc(Kind::Image)
            .map(vk::Image::from_raw)
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 1 << 20,
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state.borrow_mut().release(Kind::Image, image.as_raw());
    }

    fn allocate_memory(
        &self,
        _size: vk::DeviceSize,
        _memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        self.state
            .borrow_mut()
            .alloc(Kind::Memory)
            .map(vk::DeviceMemory::from_raw)
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VkResult<()> {
        match self.state.borrow_mut().bind_fault.take() {
            Some(r) => Err(r),
            None => Ok(()),
        }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.state
            .borrow_mut()
            .release(Kind::Memory, memory.as_raw());
    }

    fn create_render_pass(
        &self,
        _color: vk::Format,
        _depth: vk::Format,
    ) -> VkResult<vk::RenderPass> {
        self.state
            .borrow_mut()
            .alloc(Kind::RenderPass)
            .map(vk::RenderPass::from_raw)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state
            .borrow_mut()
            .release_chain_object(Kind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        for view in attachments {
            if s.live.get(&view.as_raw()) != Some(&Kind::ImageView) {
                s.violations
                    .push(format!("framebuffer attaches dead view {:#x}", view.as_raw()));
            }
        }
        s.alloc(Kind::Framebuffer).map(vk::Framebuffer::from_raw)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state
            .borrow_mut()
            .release_chain_object(Kind::Framebuffer, framebuffer.as_raw());
    }

    fn create_command_pool(
        &self,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        self.state
            .borrow_mut()
            .alloc(Kind::CommandPool)
            .map(vk::CommandPool::from_raw)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = pool.as_raw();
        if s.pool_busy(raw) {
            s.violations
                .push(format!("destroyed pool {raw:#x} with work in flight"));
        }
        let owned: Vec<u64> = s
            .pool_of
            .iter()
            .filter(|&(_, &p)| p == raw)
            .map(|(&cmd, _)| cmd)
            .collect();
        for cmd in owned {
            s.pool_of.remove(&cmd);
            s.recording.remove(&cmd);
            s.release(Kind::CommandBuffer, cmd);
        }
        s.release(Kind::CommandPool, raw);
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = pool.as_raw();
        if s.pool_busy(raw) {
            s.violations
                .push(format!("reset pool {raw:#x} with work in flight"));
        }
        let owned: Vec<u64> = s
            .pool_of
            .iter()
            .filter(|&(_, &p)| p == raw)
            .map(|(&cmd, _)| cmd)
            .collect();
        for cmd in owned {
            s.recording.insert(cmd, Recording::Initial);
        }
        s.events.push(Event::ResetPool(pool));
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match s.alloc(Kind::CommandBuffer) {
                Ok(raw) => {
                    s.pool_of.insert(raw, pool.as_raw());
                    s.recording.insert(raw, Recording::Initial);
                    out.push(vk::CommandBuffer::from_raw(raw));
                }
                Err(e) => {
                    for cmd in out {
                        let raw = vk::CommandBuffer::as_raw(cmd);
                        s.pool_of.remove(&raw);
                        s.recording.remove(&raw);
                        s.release(Kind::CommandBuffer, raw);
                    }
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        for &cmd in buffers {
            if s.in_flight.iter().any(|&(_, c)| c == cmd) {
                s.violations
                    .push(format!("freed command buffer {:#x} in flight", cmd.as_raw()));
            }
            let raw = cmd.as_raw();
            s.pool_of.remove(&raw);
            s.recording.remove(&raw);
            s.release(Kind::CommandBuffer, raw);
        }
    }

    fn begin_one_time(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = command_buffer.as_raw();
        if s.recording.get(&raw) != Some(&Recording::Initial) {
            s.violations
                .push(format!("begin on command buffer {raw:#x} not in initial state"));
        }
        s.recording.insert(raw, Recording::Recording);
        s.events.push(Event::Begin(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = command_buffer.as_raw();
        if s.recording.get(&raw) != Some(&Recording::Recording) {
            s.violations
                .push(format!("end on command buffer {raw:#x} not recording"));
        }
        s.recording.insert(raw, Recording::Executable);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = s.alloc(Kind::Fence)?;
        s.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = fence.as_raw();
        if s.in_flight.iter().any(|&(f, _)| f == fence) {
            s.violations
                .push(format!("destroyed fence {raw:#x} in flight"));
        }
        s.fences.remove(&raw);
        s.release(Kind::Fence, raw);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        s.events.push(Event::WaitFence(fence));
        if let Some(r) = s.fence_wait_fault.take() {
            return Err(r);
        }
        match s.fences.get(&fence.as_raw()) {
            Some(true) => {
                s.in_flight.retain(|&(f, _)| f != fence);
                Ok(())
            }
            Some(false) => {
                let pending = s.in_flight.iter().any(|&(f, _)| f == fence);
                if !pending {
                    s.violations
                        .push(format!("waited on fence {:#x} nobody will signal", fence.as_raw()));
                }
                Err(vk::Result::TIMEOUT)
            }
            None => {
                s.violations.push("waited on a dead fence".into());
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = fence.as_raw();
        if s.in_flight.iter().any(|&(f, _)| f == fence) {
            s.violations
                .push(format!("reset fence {raw:#x} before observing it"));
        }
        s.fences.insert(raw, false);
        s.events.push(Event::ResetFence(fence));
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let raw = s.alloc(Kind::Semaphore)?;
        s.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        s.semaphores.remove(&semaphore.as_raw());
        s.release(Kind::Semaphore, semaphore.as_raw());
    }
}
