// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use swapflow_core::{init_tracing, Severity};
use swapflow_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};
use swapflow_platform::{create_window, render_size, window_size};
use swapflow_render::{FrameBackend, FrameOutcome, HeadlessBackend, RenderSize};
use swapflow_vk::{FrameError, VkFrameBackend};
use tracing::{error, info, warn};

mod config;

use config::AppCfg;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Vk,
    Headless,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frame backend: vk | headless
    #[arg(long, value_enum, default_value_t = BackendKind::Vk)]
    backend: BackendKind,

    /// Config file; defaults to ./swapflow.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `present.vsync` from the config
    #[arg(long)]
    vsync: Option<bool>,

    /// Exit after this many presented frames (0 = run until closed)
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

/// Errors that are not a [`FrameError`] come from setup paths with no
/// alternative, so they count as fatal.
fn severity_of(err: &anyhow::Error) -> Severity {
    err.downcast_ref::<FrameError>()
        .map_or(Severity::Fatal, FrameError::severity)
}

struct App {
    kind: BackendKind,
    cfg: AppCfg,
    // Backend before window: the surface must die first.
    backend: Option<Box<dyn FrameBackend>>,
    window: Option<Window>,
    render_size: RenderSize,
    vsync: bool,

    exiting: bool,
    paused: bool,
    occluded: bool,
    frames: u32,
    presented: u64,
    frame_limit: u64,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(args: &Args, cfg: AppCfg) -> Self {
        let vsync = args.vsync.unwrap_or(cfg.present.vsync);
        Self {
            kind: args.backend,
            cfg,
            backend: None,
            window: None,
            render_size: RenderSize::default(),
            vsync,
            exiting: false,
            paused: false,
            occluded: false,
            frames: 0,
            presented: 0,
            frame_limit: args.frames,
            last_fps_instant: Instant::now(),
            fatal: None,
        }
    }

    fn build_backend(&self, window: &Window) -> Result<Box<dyn FrameBackend>> {
        let mut backend: Box<dyn FrameBackend> = match self.kind {
            BackendKind::Vk => {
                let mut opts = self.cfg.vk_options();
                opts.swapchain.vsync = self.vsync;
                Box::new(VkFrameBackend::new(
                    window,
                    window,
                    self.render_size,
                    opts,
                )?)
            }
            BackendKind::Headless => {
                let mut b = HeadlessBackend::new(self.render_size, self.cfg.present.image_count);
                b.set_present_mode(self.vsync)?;
                Box::new(b)
            }
        };
        backend.set_clear_color(self.cfg.present.clear_color);
        Ok(backend)
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("render loop stopped: {err:#}");
        self.exiting = true;
        self.fatal = Some(err);
        self.backend = None;
        self.window = None;
        event_loop.exit();
    }

    /// Recoverable failures skip the frame; anything else ends the loop.
    fn check(&mut self, event_loop: &ActiveEventLoop, res: Result<()>) {
        if let Err(e) = res {
            match severity_of(&e) {
                Severity::Fatal => self.stop(event_loop, e),
                sev => warn!("{sev}: {e:#}"),
            }
        }
    }

    fn update_paused(&mut self) {
        let now_paused = self.occluded || self.render_size.is_zero();
        if self.paused != now_paused {
            self.paused = now_paused;
            info!(
                "{}x{} occluded={} → paused={}",
                self.render_size.width, self.render_size.height, self.occluded, self.paused
            );
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match backend.render_frame() {
            Ok(FrameOutcome::Presented) => {
                self.frames = self.frames.saturating_add(1);
                self.presented += 1;
                if self.frame_limit > 0 && self.presented >= self.frame_limit {
                    info!("{} frames presented, exiting", self.presented);
                    self.exiting = true;
                    self.backend = None;
                    self.window = None;
                    event_loop.exit();
                }
            }
            Ok(FrameOutcome::Stale) => {
                let size = self
                    .window
                    .as_ref()
                    .map_or(self.render_size, window_size);
                if size.is_zero() {
                    self.render_size = size;
                    self.update_paused();
                } else {
                    let res = backend.resize(size);
                    self.check(event_loop, res);
                }
            }
            Ok(FrameOutcome::Paused) => {}
            Err(e) => {
                let res = Err(e);
                self.check(event_loop, res);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = match create_window(event_loop, &self.cfg.window_spec()) {
                Ok(w) => w,
                Err(e) => return self.stop(event_loop, e),
            };
            self.render_size = window_size(&window);

            match self.build_backend(&window) {
                Ok(backend) => {
                    info!("backend = {}", backend.name());
                    info!("vsync = {}", self.vsync);
                    self.backend = Some(backend);
                    self.window = Some(window);
                }
                Err(e) => return self.stop(event_loop, e.context("backend init")),
            }
        }

        event_loop.set_control_flow(if self.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        self.update_paused();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.backend = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = render_size(new_size);
                self.update_paused();
                if !self.render_size.is_zero() {
                    if let Some(backend) = self.backend.as_mut() {
                        let res = backend.resize(self.render_size);
                        self.check(event_loop, res);
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                self.update_paused();
            }

            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && event.physical_key == PhysicalKey::Code(KeyCode::KeyV) =>
            {
                self.vsync = !self.vsync;
                info!("vsync → {}", self.vsync);
                if let Some(backend) = self.backend.as_mut() {
                    let res = backend.set_present_mode(self.vsync);
                    self.check(event_loop, res);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                self.redraw(event_loop);
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // With vsync the present call paces us; without it spin as fast as
        // acquire allows.
        event_loop.set_control_flow(if self.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();
    let cfg = AppCfg::load(args.config.as_deref());
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(&args, cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(anyhow!("{e:#}")),
        None => Ok(()),
    }
}
