use serde::Deserialize;
use serde::Serialize;

/// Errors raised while computing or persisting a monitored state.
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("invalid usage value: {0}")]
    InvalidUsage(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Coarse classification so callers (HTTP layer, CLI) can map failures
/// without matching on every variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Configuration,
    InvariantViolation,
    InvalidUsage,
    Store,
}

impl MonitoringError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitoringError::NotFound(_) => ErrorKind::NotFound,
            MonitoringError::Configuration(_) => ErrorKind::Configuration,
            MonitoringError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            MonitoringError::InvalidUsage(_) => ErrorKind::InvalidUsage,
            MonitoringError::Store(_) => ErrorKind::Store,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("overhaul interval must be a positive number, got {interval}")]
    NonPositiveInterval { interval: f64 },

    #[error("overhaul policy needs at least one cycle")]
    ZeroMaxCycles,

    #[error("limit must be a non-negative number, got {value}")]
    InvalidLimit { value: f64 },

    #[error("`{field}` must be a finite number, got {value}")]
    NonFiniteValue { field: &'static str, value: f64 },

    #[error("semaforo threshold `{field}` is missing")]
    MissingThreshold { field: &'static str },

    #[error("semaforo threshold `{field}` must be a non-negative number, got {value}")]
    InvalidThreshold { field: &'static str, value: f64 },

    #[error("semaforo thresholds out of order: {lower} ({lower_value}) > {upper} ({upper_value})")]
    UnorderedThresholds {
        lower: &'static str,
        lower_value: f64,
        upper: &'static str,
        upper_value: f64,
    },

    #[error("default alert threshold must be a non-negative number, got {value}")]
    InvalidAlertThreshold { value: f64 },

    #[error("no enabled overhaul policy on {component_id}/{control_id}")]
    NoOverhaulPolicy {
        component_id: String,
        control_id: String,
    },

    #[error("overhaul capacity exhausted: cycle {current_cycle} of {max_cycles}")]
    OverhaulCapacityExhausted { current_cycle: u32, max_cycles: u32 },

    #[error("max cycles {requested} is below the current cycle {current_cycle}")]
    MaxCyclesBelowCurrent { requested: u32, current_cycle: u32 },
}

/// Inconsistencies detected in persisted data at read time.
///
/// These are reported on the status projection instead of aborting the
/// computation, unless the engine runs with `strict_invariants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    #[error("current cycle {current_cycle} exceeds max cycles {max_cycles}")]
    CycleOverrun { current_cycle: u32, max_cycles: u32 },

    #[error(
        "hours at last overhaul {hours_at_last_overhaul} diverge from the cycle anchor {expected} \
         (cycle {current_cycle} x interval {interval})"
    )]
    AnchorDivergence {
        hours_at_last_overhaul: f64,
        expected: f64,
        current_cycle: u32,
        interval: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        let config: MonitoringError = ConfigurationError::ZeroMaxCycles.into();
        assert_eq!(config.kind(), ErrorKind::Configuration);

        let violation: MonitoringError = InvariantViolation::CycleOverrun {
            current_cycle: 3,
            max_cycles: 2,
        }
        .into();
        assert_eq!(violation.kind(), ErrorKind::InvariantViolation);
        assert_eq!(
            violation.to_string(),
            "invariant violation: current cycle 3 exceeds max cycles 2"
        );

        let store: MonitoringError = anyhow::anyhow!("disk full").into();
        assert_eq!(store.kind(), ErrorKind::Store);
        assert_eq!(store.to_string(), "disk full");
    }
}
