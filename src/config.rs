// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::device::{PixelFormat, PresentMode, SwapChainDesc};
use crate::surface::DEFAULT_BUFFER_COUNT;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub surface: SurfaceConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Viewport Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Presentation surface settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub buffer_count: u32,
    pub pixel_format: PixelFormat,
    pub present_mode: PresentMode,
    pub clear_color: [f32; 4],
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            pixel_format: PixelFormat::Bgra8Unorm,
            present_mode: PresentMode::Immediate,
            clear_color: [0.1, 0.2, 0.8, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "viewport_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Initial swap chain description for the main window
    pub fn surface_desc(&self) -> SwapChainDesc {
        SwapChainDesc::new(self.window.width, self.window.height, self.surface.pixel_format)
            .with_full_screen(self.window.fullscreen)
            .with_buffer_count(self.surface.buffer_count)
            .with_present_mode(self.surface.present_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.surface.buffer_count, DEFAULT_BUFFER_COUNT);
        assert_eq!(config.surface.pixel_format, PixelFormat::Bgra8Unorm);
        assert_eq!(config.surface.present_mode, PresentMode::Immediate);
        assert_eq!(config.controls.fullscreen_key, "F11");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 800
            fullscreen = true

            [surface]
            buffer_count = 2
            pixel_format = "rgba16_float"
            present_mode = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.window.title, "Viewport Renderer");

        let desc = config.surface_desc();
        assert_eq!((desc.width, desc.height), (800, 720));
        assert!(desc.full_screen);
        assert_eq!(desc.buffer_count, 2);
        assert_eq!(desc.format, PixelFormat::Rgba16Float);
        assert_eq!(desc.present_mode, PresentMode::Fifo);
    }

    #[test]
    fn unknown_pixel_format_is_an_error() {
        let result = Config::parse(
            r#"
            [surface]
            pixel_format = "rgb565"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn shipped_config_parses() {
        let config = Config::parse(include_str!("../config.toml")).unwrap();
        let desc = config.surface_desc();
        assert_eq!(desc.buffer_count, 3);
        assert_eq!(desc.format, PixelFormat::Bgra8Unorm);
        assert_eq!(config.controls.quit_key, "Escape");
    }
}
