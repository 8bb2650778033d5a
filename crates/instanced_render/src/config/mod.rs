//! Configuration system
//!
//! Capacity limits for every fixed-size table and buffer in the renderer.
//! Limits are loaded once at startup; nothing in this library grows past
//! them at runtime.

use serde::{Deserialize, Serialize};

/// Configuration trait for TOML-backed settings
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from a TOML file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a TOML file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Fixed capacity ceilings for the renderer
///
/// Every table in the renderer is sized from these values at startup and
/// asserts rather than grows when a ceiling is hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLimits {
    /// Number of frames that may be in flight on the GPU (at most
    /// [`crate::render::MAX_FRAMES_IN_FLIGHT`])
    pub frames_in_flight: usize,
    /// Maximum live instances per archetype registry
    pub max_instances: usize,
    /// Maximum distinct assets per archetype registry
    pub max_assets: usize,
    /// Maximum rows in the global batch table per archetype registry
    pub max_batches: usize,
    /// Maximum GPU instance records per frame (instances duplicated per batch)
    pub max_draw_records: usize,
    /// Maximum material records
    pub max_materials: usize,
    /// Maximum bindless texture slots
    pub max_texture_slots: u32,
    /// Capacity of the vertex geometry arena, in bytes
    pub vertex_arena_bytes: u32,
    /// Capacity of the index geometry arena, in bytes
    pub index_arena_bytes: u32,
    /// Capacity of the auxiliary data arena, in bytes
    pub data_arena_bytes: u32,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            max_instances: 4096,
            max_assets: 256,
            max_batches: 1024,
            max_draw_records: 8192,
            max_materials: 512,
            max_texture_slots: 1024,
            vertex_arena_bytes: 64 << 20,
            index_arena_bytes: 16 << 20,
            data_arena_bytes: 16 << 20,
        }
    }
}

impl Config for RenderLimits {}

impl RenderLimits {
    /// Check internal consistency of the limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 || self.frames_in_flight > crate::render::MAX_FRAMES_IN_FLIGHT
        {
            return Err(ConfigError::Validation(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                crate::render::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight
            )));
        }
        if self.max_instances == 0 || self.max_assets == 0 || self.max_batches == 0 {
            return Err(ConfigError::Validation(
                "instance, asset, and batch ceilings must be non-zero".to_string(),
            ));
        }
        if self.max_draw_records < self.max_instances {
            return Err(ConfigError::Validation(
                "max_draw_records must be at least max_instances".to_string(),
            ));
        }
        // Arena offsets are packed into 30 bits of a geometry handle; a
        // capacity past that range would let allocations overflow into the
        // handle's kind tag.
        let ceiling = crate::render::geometry::MAX_ARENA_CAPACITY;
        for (name, bytes) in [
            ("vertex_arena_bytes", self.vertex_arena_bytes),
            ("index_arena_bytes", self.index_arena_bytes),
            ("data_arena_bytes", self.data_arena_bytes),
        ] {
            if bytes > ceiling {
                return Err(ConfigError::Validation(format!(
                    "{name} is {bytes}, beyond the {ceiling}-byte handle offset range"
                )));
            }
        }
        Ok(())
    }
}
