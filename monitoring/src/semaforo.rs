//! Five-band semáforo classification.
//!
//! Each threshold gates the band that carries its name, counting down from
//! the next boundary:
//!
//! ```text
//! remaining < 0 and remaining <= -morado  -> morado (overrun past the boundary)
//! remaining <= rojo                       -> rojo   (0 is always rojo)
//! remaining <= naranja                    -> naranja
//! remaining <= amarillo                   -> amarillo
//! otherwise                               -> verde
//! ```
//!
//! `verde` does not gate a band of its own; it is the horizon inside which a
//! component counts as upcoming work.

use serde::Deserialize;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::ConfigurationError;
use crate::types::Band;
use crate::types::MonitoredState;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "SemaforoFields")]
pub struct SemaforoConfig {
    enabled: bool,
    morado: f64,
    rojo: f64,
    naranja: f64,
    amarillo: f64,
    verde: f64,
}

/// Threshold values as read from storage or configuration, before
/// validation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SemaforoFields {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub morado: Option<f64>,
    pub rojo: Option<f64>,
    pub naranja: Option<f64>,
    pub amarillo: Option<f64>,
    pub verde: Option<f64>,
}

fn enabled_by_default() -> bool {
    true
}

impl SemaforoConfig {
    /// Build a threshold set; every value must be a non-negative number and
    /// `rojo <= naranja <= amarillo <= verde`.
    pub fn new(
        morado: f64,
        rojo: f64,
        naranja: f64,
        amarillo: f64,
        verde: f64,
    ) -> Result<Self, ConfigurationError> {
        let named = [
            ("morado", morado),
            ("rojo", rojo),
            ("naranja", naranja),
            ("amarillo", amarillo),
            ("verde", verde),
        ];
        for (field, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidThreshold { field, value });
            }
        }
        for pair in named[1..].windows(2) {
            let (lower, lower_value) = pair[0];
            let (upper, upper_value) = pair[1];
            if lower_value > upper_value {
                return Err(ConfigurationError::UnorderedThresholds {
                    lower,
                    lower_value,
                    upper,
                    upper_value,
                });
            }
        }
        Ok(Self {
            enabled: true,
            morado,
            rojo,
            naranja,
            amarillo,
            verde,
        })
    }

    /// Parse `morado,rojo,naranja,amarillo,verde`.
    pub fn parse_list(s: &str) -> anyhow::Result<Self> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()?;
        let &[morado, rojo, naranja, amarillo, verde] = values.as_slice() else {
            anyhow::bail!(
                "expected 5 thresholds (morado,rojo,naranja,amarillo,verde), got {}",
                values.len()
            );
        };
        Ok(Self::new(morado, rojo, naranja, amarillo, verde)?)
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn morado(&self) -> f64 {
        self.morado
    }

    pub fn rojo(&self) -> f64 {
        self.rojo
    }

    pub fn naranja(&self) -> f64 {
        self.naranja
    }

    pub fn amarillo(&self) -> f64 {
        self.amarillo
    }

    pub fn verde(&self) -> f64 {
        self.verde
    }

    pub fn is_upcoming(&self, hours_remaining: f64) -> bool {
        hours_remaining <= self.verde
    }
}

impl Default for SemaforoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            morado: 0.0,
            rojo: 10.0,
            naranja: 25.0,
            amarillo: 50.0,
            verde: 100.0,
        }
    }
}

impl TryFrom<SemaforoFields> for SemaforoConfig {
    type Error = ConfigurationError;

    fn try_from(fields: SemaforoFields) -> Result<Self, Self::Error> {
        let require = |field: &'static str, value: Option<f64>| {
            value.ok_or(ConfigurationError::MissingThreshold { field })
        };
        let config = Self::new(
            require("morado", fields.morado)?,
            require("rojo", fields.rojo)?,
            require("naranja", fields.naranja)?,
            require("amarillo", fields.amarillo)?,
            require("verde", fields.verde)?,
        )?;
        Ok(if fields.enabled {
            config
        } else {
            config.disabled()
        })
    }
}

/// Map the signed distance to the next boundary onto a band.
pub fn classify(hours_remaining: f64, config: &SemaforoConfig) -> Band {
    // unknown distance is treated as the worst case
    if hours_remaining.is_nan() {
        return Band::Morado;
    }
    if hours_remaining < 0.0 && hours_remaining <= -config.morado {
        Band::Morado
    } else if hours_remaining <= config.rojo {
        Band::Rojo
    } else if hours_remaining <= config.naranja {
        Band::Naranja
    } else if hours_remaining <= config.amarillo {
        Band::Amarillo
    } else {
        Band::Verde
    }
}

/// Threshold set that applies to a state: the overhaul semáforo when the
/// policy and its semáforo are enabled, then the state's own semáforo.
pub fn applicable_config(state: &MonitoredState) -> Option<&SemaforoConfig> {
    let overhaul = state
        .overhaul
        .as_ref()
        .filter(|policy| policy.enabled)
        .and_then(|policy| policy.semaforo.as_ref())
        .filter(|semaforo| semaforo.enabled);
    overhaul.or_else(|| state.semaforo.as_ref().filter(|semaforo| semaforo.enabled))
}

/// Margin before a boundary at which a state becomes `PROXIMO`.
pub fn alert_threshold(state: &MonitoredState, config: &EngineConfig) -> f64 {
    applicable_config(state)
        .map(SemaforoConfig::amarillo)
        .unwrap_or(config.default_alert_threshold)
}
