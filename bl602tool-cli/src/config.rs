//! Configuration file support for bl602tool.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BL602TOOL_*)
//! 3. Local config file (./bl602tool.toml)
//! 4. Global config file (~/.config/bl602tool/config.toml)
//!
//! `--config <path>` replaces both files.

use bl602tool::ReplyFraming;
use clap::ValueEnum;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "bl602tool.toml";

/// How command replies are delimited on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Wait a fixed delay after the status and take whatever arrived.
    #[default]
    Settle,
    /// Read the 16-bit length field and exactly that many bytes.
    LengthPrefixed,
}

impl From<Framing> for ReplyFraming {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Settle => Self::SettleDelay,
            Framing::LengthPrefixed => Self::LengthPrefixed,
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Requested baud rate.
    pub baud: Option<u32>,
}

/// RAM loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Path to the second-stage loader image.
    pub path: Option<PathBuf>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default flash start address.
    pub start_address: Option<u32>,
    /// Reply framing policy.
    pub framing: Option<Framing>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Loader settings.
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Flash settings.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from the global and local config files.
    pub fn load() -> Self {
        Self::load_layered(
            Self::global_config_path().as_deref(),
            Path::new(LOCAL_CONFIG_FILE),
        )
    }

    /// Load `global`, then let `local` override it.
    fn load_layered(global: Option<&Path>, local: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = global {
            if let Some(global_config) = Self::load_from_file(global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(local) {
            debug!("Loaded local config from {}", local.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Ignoring invalid TOML in {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bl602tool").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Keys set in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.loader.path.is_some() {
            self.loader.path = other.loader.path;
        }
        if other.flash.start_address.is_some() {
            self.flash.start_address = other.flash.start_address;
        }
        if other.flash.framing.is_some() {
            self.flash.framing = other.flash.framing;
        }
    }
}
