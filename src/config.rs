// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to its defaults, so a missing file, a missing
// section or a missing key all yield a runnable configuration.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Looked up in the working directory
pub const CONFIG_PATH: &str = "config.toml";

/// Upper bound on frames in flight; more than this only adds latency.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 3;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Lava".to_string(),
            width: 1024,
            height: 768,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.3, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Shader and mesh locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// OBJ file to draw; the built-in triangle is used when unset
    pub mesh: Option<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            mesh: None,
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
            log_file: "lava.log".to_string(),
            show_fps: true,
        }
    }
}

/// Where the active configuration came from.
///
/// Loading happens before the logger exists (the logger itself is
/// configured from the file), so the outcome is kept and logged later.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn log(&self, config: &Config) {
        match self {
            ConfigSource::File(path) => {
                log::info!("Loaded configuration from {:?}", path);
                log::debug!("Config: {:?}", config);
            }
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path);
            }
            ConfigSource::Invalid(e) => {
                log::warn!("{:#}. Using defaults.", e);
            }
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when it is missing or invalid
    pub fn load<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        match Self::load_from_path(path) {
            Ok(Some(config)) => (config, ConfigSource::File(path.to_path_buf())),
            Ok(None) => (Config::default(), ConfigSource::Missing(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path; `None` if there is no file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode as a Vulkan enum.
    ///
    /// The swapchain still falls back to MAILBOX/FIFO when the surface does
    /// not support it.
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Number of frame slots, clamped to `1..=MAX_FRAMES_IN_FLIGHT_LIMIT`
    pub fn frames_in_flight(&self) -> usize {
        self.graphics
            .max_frames_in_flight
            .clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 768);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(
            config.assets.vertex_shader,
            PathBuf::from("shaders/mesh.vert.spv")
        );
        assert!(config.assets.mesh.is_none());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Bunny"
            width = 640

            [assets]
            mesh = "assets/models/bunny.obj"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Bunny");
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 768);
        assert_eq!(
            config.assets.mesh.as_deref(),
            Some(Path::new("assets/models/bunny.obj"))
        );
        assert_eq!(
            config.assets.fragment_shader,
            PathBuf::from("shaders/mesh.frag.spv")
        );
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        let mut config = Config::default();
        config.graphics.present_mode = "FIFO".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "Fifo_Relaxed".to_string();
        assert_eq!(
            config.preferred_present_mode(),
            vk::PresentModeKHR::FIFO_RELAXED
        );

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);

        config.graphics.max_frames_in_flight = 8;
        assert_eq!(config.frames_in_flight(), MAX_FRAMES_IN_FLIGHT_LIMIT);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        assert!(Config::load_from_path("definitely/not/here.toml").unwrap().is_none());

        let (config, source) = Config::load("definitely/not/here.toml");
        assert_eq!(config.window.title, "Lava");
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    fn write_temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("lava-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn existing_file_is_reported_as_the_source() {
        let path = write_temp_config("valid", "[window]\ntitle = \"From file\"\n");
        let (config, source) = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.title, "From file");
        assert!(matches!(source, ConfigSource::File(p) if p == path));
    }

    #[test]
    fn invalid_file_falls_back_to_defaults_with_the_error() {
        let path = write_temp_config("invalid", "[graphics]\nmax_frames_in_flight = \"many\"\n");
        let (config, source) = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.graphics.max_frames_in_flight, 2);
        match source {
            ConfigSource::Invalid(e) => assert!(format!("{:#}", e).contains("Failed to parse")),
            other => panic!("expected an invalid source, got {:?}", other),
        }
    }
}
