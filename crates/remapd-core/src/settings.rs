// Remapd Settings Module
// Daemon-level settings loaded from settings.toml in the config directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::compile::MacroLimits;
use crate::device::Backoff;

pub const SETTINGS_FILE: &str = "settings.toml";
const SOCKET_NAME: &str = "remapd.sock";

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// Settings for the remap daemon
///
/// Loaded from `<config_dir>/settings.toml`; every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    /// Control socket; defaults to `$XDG_RUNTIME_DIR/remapd.sock`
    pub socket_path: Option<PathBuf>,

    /// Profiles directory; defaults to `<config_dir>/profiles`
    pub profiles_dir: Option<PathBuf>,

    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,

    /// Upper bound on macro repeat counts
    pub max_macro_repeat: u32,

    /// Name of the uinput device we create
    pub virtual_device_name: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            profiles_dir: None,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 5_000,
            max_macro_repeat: 100,
            virtual_device_name: "remapd virtual device".to_string(),
        }
    }
}

impl DaemonSettings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `settings.toml` from `config_dir`, defaults when absent
    pub fn load(config_dir: &Path) -> Result<Self, SettingsError> {
        let path = config_dir.join(SETTINGS_FILE);
        if path.exists() {
            log::debug!("Loading settings from {}", path.display());
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.reconnect_initial_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnect_initial_ms must be at least 1".to_string(),
            ));
        }
        if self.max_macro_repeat == 0 {
            return Err(SettingsError::InvalidValue(
                "max_macro_repeat must be at least 1".to_string(),
            ));
        }
        if self.virtual_device_name.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "virtual_device_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_initial_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }

    pub fn macro_limits(&self) -> MacroLimits {
        MacroLimits {
            max_repeat: self.max_macro_repeat,
            ..MacroLimits::default()
        }
    }
}

/// `$XDG_RUNTIME_DIR/remapd.sock`, or the temp dir when no runtime dir exists
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}
