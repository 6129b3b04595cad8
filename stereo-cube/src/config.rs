//! Settings file
//!
//! Read from `$STEREO_CUBE_CONFIG`, else `$XDG_CONFIG_HOME/stereo-cube/config.toml`
//! (or `~/.config/...`). Everything is optional; command-line options win.
//!
//! ```toml
//! winsys = "wayland"
//! renderer = "depth"
//!
//! [gbm]
//! device = "/dev/dri/card1"
//! connector = 42
//! layout = "sbsh"
//!
//! [wayland]
//! width = 1280
//! height = 720
//!
//! [image]
//! left = "left.png"
//! right = "right.png"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use stereo_kms::drm_device::DEFAULT_CARD;
use stereo_kms::StereoLayout;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Winsys used when `-w` is not given
    pub winsys: Option<String>,
    /// Renderer used when `-r` is not given
    pub renderer: Option<String>,
    pub gbm: GbmSettings,
    pub wayland: WaylandSettings,
    pub image: ImageSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GbmSettings {
    pub device: PathBuf,
    pub connector: Option<u32>,
    #[serde(deserialize_with = "deserialize_layout")]
    pub layout: Option<StereoLayout>,
}

impl Default for GbmSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_CARD),
            connector: None,
            layout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaylandSettings {
    pub width: i32,
    pub height: i32,
    pub title: String,
}

fn default_width() -> i32 { 800 }
fn default_height() -> i32 { 600 }

impl Default for WaylandSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: "stereo-cube".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSettings {
    pub left: Option<PathBuf>,
    pub right: Option<PathBuf>,
}

fn deserialize_layout<'de, D>(deserializer: D) -> std::result::Result<Option<StereoLayout>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|name| name.parse().map_err(serde::de::Error::custom))
        .transpose()
}

impl Settings {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("STEREO_CUBE_CONFIG") {
            return Some(PathBuf::from(path));
        }
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
            .ok()
            .map(|dir| dir.join("stereo-cube/config.toml"))
    }

    /// Load settings from the config file, or return defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(&path) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
