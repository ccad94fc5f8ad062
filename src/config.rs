//! Output configuration
//!
//! Values come from the host's key/value store at runtime; a TOML file is
//! supported for standalone use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BUFFER_MS, MAX_BUFFER_MS, MIN_BUFFER_MS};
use crate::error::{Error, Result};
use crate::host::Host;

pub const CONF_SERVER_ADDR: &str = "pulse.serveraddr";
pub const CONF_BUFFER_MS: &str = "pulse.buffer_ms";
pub const CONF_VOLUME_CONTROL: &str = "pulse.volumecontrol";
pub const CONF_PAUSE_ON_CORK: &str = "pulse.pauseoncork";

/// Output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Server address, empty for the system default
    pub server: String,
    /// Target buffer latency in milliseconds
    pub buffer_ms: u32,
    /// Mirror the host volume to the server's per-stream volume
    pub volume_control: bool,
    /// Pause when the server asks us to cork
    pub pause_on_cork: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            buffer_ms: DEFAULT_BUFFER_MS,
            volume_control: false,
            pause_on_cork: false,
        }
    }
}

impl OutputConfig {
    /// Read settings through the host's configuration store
    pub fn from_host(host: &dyn Host) -> Self {
        let defaults = Self::default();
        let buffer_ms = host.config_int(CONF_BUFFER_MS, defaults.buffer_ms as i64);
        Self {
            server: host.config_str(CONF_SERVER_ADDR, &defaults.server).trim().to_string(),
            buffer_ms: buffer_ms.clamp(MIN_BUFFER_MS as i64, MAX_BUFFER_MS as i64) as u32,
            volume_control: host.config_int(CONF_VOLUME_CONTROL, defaults.volume_control as i64) != 0,
            pause_on_cork: host.config_int(CONF_PAUSE_ON_CORK, defaults.pause_on_cork as i64) != 0,
        }
        .validated()
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        Ok(config.validated())
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/pulse-output/output.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "pulse-output", "pulse-output")
            .map(|dirs| dirs.config_dir().join("output.toml"))
    }

    /// Server address to connect to, `None` for the system default
    pub fn server_addr(&self) -> Option<&str> {
        if self.server.is_empty() {
            None
        } else {
            Some(self.server.as_str())
        }
    }

    fn validated(mut self) -> Self {
        self.server = self.server.trim().to_string();
        self.buffer_ms = self.buffer_ms.clamp(MIN_BUFFER_MS, MAX_BUFFER_MS);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{OutputEvent, TrackMetadata};
    use std::collections::HashMap;

    struct ConfigHost(HashMap<&'static str, String>);

    impl Host for ConfigHost {
        fn read(&self, _buf: &mut [u8]) -> isize {
            0
        }
        fn ok_to_read(&self) -> bool {
            false
        }
        fn volume(&self) -> f32 {
            1.0
        }
        fn set_volume(&self, _amplitude: f32) {}
        fn config_str(&self, key: &str, default: &str) -> String {
            self.0.get(key).cloned().unwrap_or_else(|| default.to_string())
        }
        fn config_int(&self, key: &str, default: i64) -> i64 {
            self.0.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn notify(&self, _event: OutputEvent) {}
        fn current_track(&self) -> Option<TrackMetadata> {
            None
        }
    }

    #[test]
    fn test_defaults() {
        let config = OutputConfig::default();
        assert_eq!(config.buffer_ms, 100);
        assert!(!config.volume_control);
        assert!(!config.pause_on_cork);
        assert_eq!(config.server_addr(), None);
    }

    #[test]
    fn test_from_host() {
        let host = ConfigHost(HashMap::from([
            (CONF_SERVER_ADDR, " tcp:media-box ".to_string()),
            (CONF_BUFFER_MS, "5".to_string()),
            (CONF_VOLUME_CONTROL, "1".to_string()),
        ]));
        let config = OutputConfig::from_host(&host);
        assert_eq!(config.server_addr(), Some("tcp:media-box"));
        assert_eq!(config.buffer_ms, MIN_BUFFER_MS);
        assert!(config.volume_control);
        assert!(!config.pause_on_cork);
    }

    #[test]
    fn test_partial_toml() {
        let config: OutputConfig = toml::from_str("pause_on_cork = true\nbuffer_ms = 250\n").unwrap();
        assert!(config.pause_on_cork);
        assert_eq!(config.buffer_ms, 250);
        assert_eq!(config.server, "");
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("pulse-output-test-{}", std::process::id()))
            .join("output.toml");
        let config = OutputConfig {
            server: "unix:/run/sound/native".to_string(),
            buffer_ms: 40,
            volume_control: true,
            pause_on_cork: true,
        };
        config.save(&path).unwrap();
        assert_eq!(OutputConfig::load(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
