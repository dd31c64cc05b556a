//! # Configuration Management
//!
//! Centralized configuration for the world server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! Validation catches common misconfigurations (empty bind address, zero
//! chunk radius, nonsensical keep-alive window) before the server starts.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Protocol version this server speaks.
pub const PROTOCOL_VERSION: i64 = 498;

/// Human-readable name of the supported protocol version.
pub const PROTOCOL_VERSION_NAME: &str = "1.14.4";

/// Main server configuration containing all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Listener and identity settings
    #[serde(default)]
    pub server: ServerSettings,

    /// World and session pacing settings
    #[serde(default)]
    pub game: GameSettings,

    /// Scripting engine settings
    #[serde(default)]
    pub scripting: ScriptingSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WORLD_PROTOCOL_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }
        if let Ok(motd) = std::env::var("WORLD_PROTOCOL_DESCRIPTION") {
            config.server.description = motd;
        }
        if let Ok(radius) = std::env::var("WORLD_PROTOCOL_CHUNK_RADIUS") {
            if let Ok(val) = radius.parse::<i32>() {
                config.game.chunk_radius = val;
            }
        }
        if let Ok(secs) = std::env::var("WORLD_PROTOCOL_KEEP_ALIVE_SECS") {
            if let Ok(val) = secs.parse::<u64>() {
                config.game.keep_alive_secs = val;
            }
        }

        Ok(config)
    }

    /// Generate example configuration file content.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address must not be empty".to_string());
        }
        if self.server.max_players == 0 {
            errors.push("server.max_players must be at least 1".to_string());
        }
        if self.game.main_world.is_empty() {
            errors.push("game.main_world must not be empty".to_string());
        }
        if self.game.chunk_radius < 1 {
            errors.push("game.chunk_radius must be at least 1".to_string());
        }
        if self.game.chunk_radius > 32 {
            errors.push("game.chunk_radius above 32 floods clients with chunk data".to_string());
        }
        if self.game.keep_alive_secs == 0 {
            errors.push("game.keep_alive_secs must be at least 1".to_string());
        }
        if self.scripting.idle_timeout_secs == 0 {
            errors.push("scripting.idle_timeout_secs must be at least 1".to_string());
        }

        errors
    }

    /// Validate and return Result - convenience method.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener and identity settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the TCP listener binds to
    pub bind_address: String,

    /// Server description shown in the status response
    pub description: String,

    /// Player capacity advertised in the status response
    pub max_players: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:25565".to_string(),
            description: "A world-protocol server".to_string(),
            max_players: 12,
        }
    }
}

/// World and session pacing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GameSettings {
    /// Name of the world new sessions join
    pub main_world: String,

    /// Radius (in chunks) of the square window kept loaded around a player
    pub chunk_radius: i32,

    /// Seconds of session ticks between keep-alive probes; a probe left
    /// unanswered for another window disconnects the client
    pub keep_alive_secs: u64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            main_world: "Main".to_string(),
            chunk_radius: 4,
            keep_alive_secs: 5,
        }
    }
}

/// Scripting engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptingSettings {
    /// Seconds a suspended script task may wait for a reply before the idle
    /// sweep abandons it
    pub idle_timeout_secs: u64,
}

impl ScriptingSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ScriptingSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default tracing filter directive (overridden by RUST_LOG)
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
