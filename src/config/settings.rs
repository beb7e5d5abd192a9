use crate::{PeerShareError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub const MIN_BUFFER_SIZE: usize = 32;
pub const MAX_BUFFER_SIZE: usize = 4096;
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub device: DeviceSettings,
    pub network: NetworkSettings,
    pub share: ShareSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Address the hub listens on.
    pub hub_bind: String,
    /// Address peers dial to join the group.
    pub hub_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSettings {
    pub port_range_from: u16,
    pub port_range_to: u16,
    /// Fingerprint sample size and receive read chunk, in bytes.
    pub buffer_size: usize,
    /// How long a sender keeps retrying to reach a peer.
    pub timeout_seconds: u64,
    /// How long a receiver keeps its listener open. 0 waits forever.
    pub listen_timeout_seconds: u64,
    /// Where received files land. Defaults to the OS temp dir.
    pub receive_dir: Option<PathBuf>,
    pub failure_log: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: DeviceSettings {
                id: Uuid::new_v4(),
                name: gethostname::gethostname().to_string_lossy().to_string(),
            },
            network: NetworkSettings {
                hub_bind: "0.0.0.0:47000".to_string(),
                hub_address: "127.0.0.1:47000".to_string(),
            },
            share: ShareSettings::default(),
        }
    }
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            port_range_from: 47100,
            port_range_to: 47200,
            buffer_size: 1024,
            timeout_seconds: 10,
            listen_timeout_seconds: 120,
            receive_dir: None,
            failure_log: PathBuf::from("fileshare.log"),
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };

        let settings = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| PeerShareError::Config(format!("Failed to read config: {}", e)))?;

            toml::from_str::<Settings>(&content)
                .map_err(|e| PeerShareError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            let settings = Self::default();
            settings.save(Some(&path))?;
            settings
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PeerShareError::Config(format!("Failed to create config dir: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PeerShareError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&path, content)
            .map_err(|e| PeerShareError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.share.validate()
    }

    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "peershare", "peershare").ok_or_else(|| {
            PeerShareError::Config("Failed to get project directories".to_string())
        })?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

impl ShareSettings {
    pub fn validate(&self) -> Result<()> {
        if self.port_range_to < self.port_range_from {
            return Err(PeerShareError::Config(format!(
                "port_range_to ({}) must not be below port_range_from ({})",
                self.port_range_to, self.port_range_from
            )));
        }

        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(PeerShareError::Config(format!(
                "buffer_size must be within {}..={}, got {}",
                MIN_BUFFER_SIZE, MAX_BUFFER_SIZE, self.buffer_size
            )));
        }

        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&self.timeout_seconds) {
            return Err(PeerShareError::Config(format!(
                "timeout_seconds must be within {}..={}, got {}",
                MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS, self.timeout_seconds
            )));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn listen_timeout(&self) -> Option<Duration> {
        match self.listen_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn receive_dir(&self) -> PathBuf {
        self.receive_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
