// SPDX-License-Identifier: CEPL-1.0
//! Window plumbing. Everything winit-facing goes through here.

use anyhow::{Context, Result};
use swapflow_render::RenderSize;
use tracing::info;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

pub use winit;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            title: "swapflow".into(),
            width: 800,
            height: 600,
        }
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, spec: &WindowSpec) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(spec.title.clone())
        .with_inner_size(PhysicalSize::new(spec.width.max(1), spec.height.max(1)));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = window.inner_size();
    info!(
        "window \"{}\" created ({}x{})",
        spec.title, size.width, size.height
    );
    Ok(window)
}

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Current drawable size; zero while minimized.
pub fn window_size(window: &Window) -> RenderSize {
    render_size(window.inner_size())
}
