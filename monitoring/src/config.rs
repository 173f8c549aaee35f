use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigurationError;
use crate::semaforo::SemaforoConfig;

/// Env variable naming a TOML file with engine settings.
pub const CONFIG_ENV: &str = "AEROTRACK_CONFIG";

/// Settings passed explicitly into the status resolver.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// `PROXIMO` margin used when no semáforo applies to a state.
    pub default_alert_threshold: f64,
    /// Band thresholds used when no semáforo applies to a state.
    pub default_semaforo: SemaforoConfig,
    /// Abort saves that would persist an invariant violation.
    pub strict_invariants: bool,
    /// Accepted gap between `hours_at_last_overhaul` and
    /// `current_cycle * interval` before it is reported.
    pub overhaul_anchor_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_alert_threshold: 50.0,
            default_semaforo: SemaforoConfig::default(),
            strict_invariants: false,
            overhaul_anchor_tolerance: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let value = self.default_alert_threshold;
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigurationError::InvalidAlertThreshold { value });
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("engine config {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_toml_str(&data)
    }

    /// Load from the file named by `AEROTRACK_CONFIG`, or the defaults.
    pub fn load_from_env() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }
}
