use std::path::Path;

use serde::{Deserialize, Serialize};

/// Output device configuration.
///
/// Serialized as JSON so embedding applications can persist it.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Device sample rate in Hz. Sources are expected to match; no
    /// sample-rate conversion is performed.
    pub sample_rate: u32,

    /// Requested device buffer period in milliseconds. Determines the
    /// cadence of the real-time callback.
    pub buffer_period_ms: u32,

    /// Number of interleaved output channels.
    pub channels: u16,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_period_ms: 200,
            channels: 2,
        }
    }
}

impl MixerConfig {
    /// Load a configuration from a JSON file, falling back to defaults on any error.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded mixer config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse mixer config ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No mixer config file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Device buffer size in frames for one callback period.
    pub(crate) fn frames_per_period(&self) -> u32 {
        (self.sample_rate * self.buffer_period_ms / 1000).max(1)
    }
}
