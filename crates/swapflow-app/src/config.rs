// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use swapflow_platform::WindowSpec;
use swapflow_vk::{InstanceConfig, SwapchainSettings, VkOptions};
use tracing::{debug, info, warn};

pub const DEFAULT_PATH: &str = "swapflow.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub present: PresentCfg,
    pub debug: DebugCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "swapflow".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PresentCfg {
    pub vsync: bool,
    pub image_count: u32,
    pub fence_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub clear_color: [f32; 4],
}

impl Default for PresentCfg {
    fn default() -> Self {
        Self {
            vsync: true,
            image_count: 3,
            fence_timeout_ms: 5000,
            acquire_timeout_ms: 2000,
            clear_color: [0.35, 0.35, 0.35, 1.0],
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DebugCfg {
    pub validation: bool,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
}

impl Default for DebugCfg {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            layers: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// `path` of `None` means `swapflow.toml` in the working directory, which
    /// may be absent. Unreadable or malformed files fall back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let explicit = path.is_some();
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_PATH), Path::to_path_buf);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                if explicit {
                    warn!("config {}: {e}; using defaults", path.display());
                } else {
                    debug!("no {}; using defaults", path.display());
                }
                return Self::default();
            }
        };
        match Self::parse(&text) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn swapchain_settings(&self) -> SwapchainSettings {
        SwapchainSettings {
            vsync: self.present.vsync,
            image_count: self.present.image_count,
            fence_timeout: Duration::from_millis(self.present.fence_timeout_ms),
            acquire_timeout: Duration::from_millis(self.present.acquire_timeout_ms),
            ..Default::default()
        }
    }

    pub fn instance_config(&self) -> InstanceConfig {
        InstanceConfig {
            app_name: self.window.title.clone(),
            validation: self.debug.validation,
            layers: self.debug.layers.clone(),
            extensions: self.debug.extensions.clone(),
        }
    }

    pub fn vk_options(&self) -> VkOptions {
        VkOptions {
            instance: self.instance_config(),
            swapchain: self.swapchain_settings(),
            clear_color: self.present.clear_color,
        }
    }
}
