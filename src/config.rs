use crate::defaults;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub stall: StallSection,
    pub queue: QueueSection,
}

/// Chapter pipeline and position synchronization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    pub prefetch_floor_secs: f64,
    pub tick_epsilon_secs: f64,
    pub marker_epsilon_secs: f64,
    pub want_audio: bool,
    pub manifest_base_url: Option<String>,
}

/// Stall recovery timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StallSection {
    pub verify_delay_ms: u64,
    pub cycle_delay_ms: u64,
    pub advance_epsilon_secs: f64,
}

/// Actor queue sizes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSection {
    pub input_buffer: usize,
    pub event_buffer: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            prefetch_floor_secs: defaults::PREFETCH_FLOOR_SECS,
            tick_epsilon_secs: defaults::TICK_EPSILON_SECS,
            marker_epsilon_secs: defaults::MARKER_EPSILON_SECS,
            want_audio: defaults::WANT_AUDIO,
            manifest_base_url: None,
        }
    }
}

impl Default for StallSection {
    fn default() -> Self {
        Self {
            verify_delay_ms: defaults::STALL_VERIFY_DELAY_MS,
            cycle_delay_ms: defaults::STALL_CYCLE_DELAY_MS,
            advance_epsilon_secs: defaults::ADVANCE_EPSILON_SECS,
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            input_buffer: defaults::INPUT_BUFFER,
            event_buffer: defaults::EVENT_BUFFER,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                let missing = e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound);
                if missing {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CHAPTERFLOW_PREFETCH_FLOOR → engine.prefetch_floor_secs
    /// - CHAPTERFLOW_TICK_EPSILON → engine.tick_epsilon_secs
    /// - CHAPTERFLOW_MANIFEST_BASE_URL → engine.manifest_base_url
    ///
    /// Empty or unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(floor) = std::env::var("CHAPTERFLOW_PREFETCH_FLOOR")
            && let Ok(value) = floor.trim().parse::<f64>()
        {
            self.engine.prefetch_floor_secs = value;
        }

        if let Ok(epsilon) = std::env::var("CHAPTERFLOW_TICK_EPSILON")
            && let Ok(value) = epsilon.trim().parse::<f64>()
        {
            self.engine.tick_epsilon_secs = value;
        }

        if let Ok(url) = std::env::var("CHAPTERFLOW_MANIFEST_BASE_URL")
            && !url.is_empty()
        {
            self.engine.manifest_base_url = Some(url);
        }

        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        fn positive(key: &str, value: f64) -> Result<(), EngineError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: format!("must be a positive number of seconds, got {value}"),
                })
            }
        }

        positive("engine.prefetch_floor_secs", self.engine.prefetch_floor_secs)?;
        positive("engine.tick_epsilon_secs", self.engine.tick_epsilon_secs)?;
        positive("engine.marker_epsilon_secs", self.engine.marker_epsilon_secs)?;
        positive("stall.advance_epsilon_secs", self.stall.advance_epsilon_secs)?;

        if self.queue.input_buffer == 0 {
            return Err(EngineError::ConfigInvalidValue {
                key: "queue.input_buffer".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue.event_buffer == 0 {
            return Err(EngineError::ConfigInvalidValue {
                key: "queue.event_buffer".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/chapterflow/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chapterflow")
            .join("config.toml")
    }
}
