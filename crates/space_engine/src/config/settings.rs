//! Bootstrap, window and per-frame settings
//!
//! - **Bootstrap**: what the Vulkan instance is created with
//! - **Window**: the initial presentation surface
//! - **Frame**: constants the frame driver uses every frame

use serde::{Deserialize, Serialize};

use super::Config;

/// Instance creation parameters
///
/// Requested layers and extensions are wishes, not requirements. Anything the
/// runtime does not report is dropped with a warning when the instance is
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Engine name reported to the driver
    pub engine_name: String,
    /// Validation layers to enable when available
    pub validation_layers: Vec<String>,
    /// Instance extensions on top of the ones the window system needs
    pub instance_extensions: Vec<String>,
    /// Route validation messages to the log through a debug messenger
    pub enable_validation: bool,
}

impl BootstrapConfig {
    /// Create a bootstrap configuration with the given application name
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Self::default()
        }
    }

    /// Set the engine name
    #[must_use]
    pub fn with_engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = name.into();
        self
    }

    /// Request an additional validation layer
    #[must_use]
    pub fn with_validation_layer(mut self, layer: impl Into<String>) -> Self {
        self.validation_layers.push(layer.into());
        self
    }

    /// Request an additional instance extension
    #[must_use]
    pub fn with_instance_extension(mut self, extension: impl Into<String>) -> Self {
        self.instance_extensions.push(extension.into());
        self
    }

    /// Enable or disable validation
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.application_name.contains('\0') || self.engine_name.contains('\0') {
            return Err("Names cannot contain NUL bytes".to_string());
        }
        if let Some(bad) = self
            .validation_layers
            .iter()
            .chain(&self.instance_extensions)
            .find(|name| name.is_empty() || name.contains('\0'))
        {
            return Err(format!("Invalid layer or extension name: {bad:?}"));
        }
        Ok(())
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let enable_validation = cfg!(debug_assertions);
        Self {
            application_name: "Space".to_string(),
            engine_name: "SpaceEngine".to_string(),
            validation_layers: if enable_validation {
                vec!["VK_LAYER_KHRONOS_validation".to_string()]
            } else {
                Vec::new()
            },
            instance_extensions: Vec::new(),
            enable_validation,
        }
    }
}

/// Initial window parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl WindowConfig {
    /// Set the window size
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("Window size must be non-zero, got {}x{}", self.width, self.height));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Space".to_string(),
            width: 1024,
            height: 768,
        }
    }
}

/// Constants used by the frame driver
///
/// `frame_timeout_ns` bounds both the image acquire and each fence wait slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Background clear color (RGBA)
    pub clear_color: [f32; 4],
    /// Depth clear value
    pub clear_depth: f32,
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near clip plane
    pub near_plane: f32,
    /// Far clip plane
    pub far_plane: f32,
    /// Timeout for image acquisition and for each fence wait, in nanoseconds
    pub frame_timeout_ns: u64,
    /// Sleep between fence polls that timed out, in microseconds
    pub fence_poll_interval_us: u64,
    /// How many times a frame is re-run after a stale surface before giving up
    pub max_stale_retries: u32,
}

impl FrameConfig {
    /// Set the clear color
    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the stale-surface retry bound
    #[must_use]
    pub const fn with_max_stale_retries(mut self, retries: u32) -> Self {
        self.max_stale_retries = retries;
        self
    }

    /// Set the acquire and fence timeout
    #[must_use]
    pub const fn with_frame_timeout_ns(mut self, timeout: u64) -> Self {
        self.frame_timeout_ns = timeout;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            return Err(format!("Field of view must be in (0, 180), got {}", self.fov_degrees));
        }
        if !(self.near_plane > 0.0 && self.far_plane > self.near_plane) {
            return Err(format!(
                "Clip planes must satisfy 0 < near < far, got {} / {}",
                self.near_plane, self.far_plane
            ));
        }
        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(format!("Depth clear value must be in [0, 1], got {}", self.clear_depth));
        }
        if self.frame_timeout_ns == 0 {
            return Err("Frame timeout must be non-zero".to_string());
        }
        if self.max_stale_retries > 2 {
            return Err(format!(
                "At most 2 stale-surface retries are allowed, got {}",
                self.max_stale_retries
            ));
        }
        Ok(())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.8, 0.8, 0.8, 1.0],
            clear_depth: 1.0,
            fov_degrees: 60.0,
            near_plane: 0.1,
            far_plane: 100.0,
            frame_timeout_ns: 100_000_000,
            fence_poll_interval_us: 1_000,
            max_stale_retries: 2,
        }
    }
}

/// Top-level configuration for a space application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Instance creation
    pub bootstrap: BootstrapConfig,
    /// Window creation
    pub window: WindowConfig,
    /// Frame driver constants
    pub frame: FrameConfig,
    /// Directory holding compiled SPIR-V shaders
    pub shader_dir: String,
}

impl SpaceConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.bootstrap.validate()?;
        self.window.validate()?;
        self.frame.validate()?;
        if self.shader_dir.is_empty() {
            return Err("Shader directory cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapConfig::default(),
            window: WindowConfig::default(),
            frame: FrameConfig::default(),
            shader_dir: "target/shaders".to_string(),
        }
    }
}

impl Config for SpaceConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SpaceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_frame_defaults_match_render_constants() {
        let frame = FrameConfig::default();
        assert_eq!(frame.clear_color[3], 1.0);
        assert_eq!(frame.clear_depth, 1.0);
        assert_eq!(frame.fov_degrees, 60.0);
        assert_eq!(frame.near_plane, 0.1);
        assert_eq!(frame.far_plane, 100.0);
    }

    #[test]
    fn test_retry_bound_rejected_above_two() {
        let frame = FrameConfig::default().with_max_stale_retries(3);
        assert!(frame.validate().is_err());
        assert!(FrameConfig::default().with_max_stale_retries(0).validate().is_ok());
    }

    #[test]
    fn test_bootstrap_rejects_nul_names() {
        let config = BootstrapConfig::new("Space").with_instance_extension("VK_KHR\0bad");
        assert!(config.validate().is_err());
        assert!(BootstrapConfig::new("").validate().is_err());
    }

    #[test]
    fn test_window_rejects_zero_size() {
        assert!(WindowConfig::default().with_size(0, 600).validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let text = "shader_dir = \"shaders\"\n[frame]\nmax_stale_retries = 1\n";
        let config = SpaceConfig::parse("space.toml", text).unwrap();
        assert_eq!(config.shader_dir, "shaders");
        assert_eq!(config.frame.max_stale_retries, 1);
        assert_eq!(config.frame.fov_degrees, 60.0);
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn test_ron_parses() {
        let text = "(window: (title: \"Orbit\", width: 800, height: 600))";
        let config = SpaceConfig::parse("space.ron", text).unwrap();
        assert_eq!(config.window.title, "Orbit");
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn test_bootstrap_builder_chain() {
        let config = BootstrapConfig::new("Orbit")
            .with_engine_name("Orbit Engine")
            .with_validation(true)
            .with_validation_layer("VK_LAYER_KHRONOS_validation");
        assert!(config.validate().is_ok());
        assert!(config.enable_validation);
        assert_eq!(config.engine_name, "Orbit Engine");
        assert_eq!(config.validation_layers.last().map(String::as_str), Some("VK_LAYER_KHRONOS_validation"));

        assert!(config.clone().with_validation_layer("").validate().is_err());
        assert!(config.with_engine_name("Orbit\0").validate().is_err());
    }

    #[test]
    fn test_zero_frame_timeout_rejected() {
        let frame = FrameConfig::default()
            .with_clear_color([0.0, 0.0, 0.0, 1.0])
            .with_frame_timeout_ns(0);
        assert_eq!(frame.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(frame.validate().is_err());
        assert!(frame.with_frame_timeout_ns(1).validate().is_ok());
    }

    #[test]
    fn test_saved_config_reloads() {
        let mut config = SpaceConfig::default();
        config.window = WindowConfig::default().with_size(640, 480);
        config.frame = FrameConfig::default().with_max_stale_retries(1);

        let dir = std::env::temp_dir();
        for extension in ["toml", "ron"] {
            let path = dir.join(format!("space-config-{}.{extension}", std::process::id()));
            let path = path.to_string_lossy().into_owned();
            config.save_to_file(&path).unwrap();
            let loaded = SpaceConfig::load_from_file(&path);
            std::fs::remove_file(&path).unwrap();
            assert_eq!(loaded.unwrap(), config);
        }

        let result = config.save_to_file("space.json");
        assert!(matches!(result, Err(crate::config::ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = SpaceConfig::parse("space.json", "{}");
        assert!(matches!(result, Err(crate::config::ConfigError::UnsupportedFormat(_))));
    }
}
