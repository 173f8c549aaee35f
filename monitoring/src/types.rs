use chrono::DateTime;
use chrono::Utc;

use crate::error::ConfigurationError;
use crate::error::InvariantViolation;
use crate::semaforo::SemaforoConfig;

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
pub enum UsageUnit {
    Hours,
    Cycles,
    CalendarMonths,
    CalendarYears,
}

impl UsageUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageUnit::Hours => "hours",
            UsageUnit::Cycles => "cycles",
            UsageUnit::CalendarMonths => "calendar_months",
            UsageUnit::CalendarYears => "calendar_years",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "hours" => Ok(UsageUnit::Hours),
            "cycles" => Ok(UsageUnit::Cycles),
            "calendar_months" => Ok(UsageUnit::CalendarMonths),
            "calendar_years" => Ok(UsageUnit::CalendarYears),
            other => anyhow::bail!("unknown usage unit: {other}"),
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Proximo,
    Vencido,
    OverhaulRequerido,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Ok,
        Status::Proximo,
        Status::Vencido,
        Status::OverhaulRequerido,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Proximo => "PROXIMO",
            Status::Vencido => "VENCIDO",
            Status::OverhaulRequerido => "OVERHAUL_REQUERIDO",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Ok(Status::Ok),
            "PROXIMO" => Ok(Status::Proximo),
            "VENCIDO" => Ok(Status::Vencido),
            "OVERHAUL_REQUERIDO" => Ok(Status::OverhaulRequerido),
            other => anyhow::bail!("unknown status: {other}"),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semáforo severity band, ordered from least to most severe.
#[derive(
    Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Verde,
    Amarillo,
    Naranja,
    Rojo,
    Morado,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Verde => "verde",
            Band::Amarillo => "amarillo",
            Band::Naranja => "naranja",
            Band::Rojo => "rojo",
            Band::Morado => "morado",
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum ValueSource {
    Computed,
    Manual,
}

/// A derived field that an operator may also assert directly.
///
/// `Manual` means the current write set the value explicitly; the save hook
/// never recomputes a manual value. [`MonitoredState::begin_write`] demotes
/// every marker back to `Computed` before the next write applies its edits.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Tracked<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Tracked<T> {
    pub fn computed(value: T) -> Self {
        Self {
            value,
            source: ValueSource::Computed,
        }
    }

    pub fn manual(value: T) -> Self {
        Self {
            value,
            source: ValueSource::Manual,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.source == ValueSource::Manual
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct OverhaulPolicy {
    pub enabled: bool,
    pub interval: f64,
    pub max_cycles: u32,
    pub current_cycle: u32,
    pub hours_at_last_overhaul: f64,
    pub next_overhaul_at: Tracked<f64>,
    pub overhaul_required: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub semaforo: Option<SemaforoConfig>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct MonitoredState {
    pub id: String,
    pub component_id: String,
    pub control_id: String,
    /// Owner of the usage record read when `based_on_parent_usage` is set.
    /// Defaults to the component itself.
    pub parent_id: Option<String>,
    pub unit: UsageUnit,
    pub current_value: Tracked<f64>,
    pub limit_value: f64,
    pub based_on_parent_usage: bool,
    pub install_offset: f64,
    pub overhaul: Option<OverhaulPolicy>,
    pub semaforo: Option<SemaforoConfig>,
    pub status: Status,
    pub alert_active: bool,
    pub band: Option<Band>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl MonitoredState {
    pub fn new(
        component_id: impl Into<String>,
        control_id: impl Into<String>,
        unit: UsageUnit,
        limit_value: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            component_id: component_id.into(),
            control_id: control_id.into(),
            parent_id: None,
            unit,
            current_value: Tracked::computed(0.0),
            limit_value,
            based_on_parent_usage: false,
            install_offset: 0.0,
            overhaul: None,
            semaforo: None,
            status: Status::Ok,
            alert_active: false,
            band: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Id whose usage record feeds this state when it follows parent usage.
    pub fn usage_owner(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.component_id)
    }

    /// Reject values no status can be computed from. JSON has no encoding
    /// for NaN or infinity, so such a state would not survive a write either.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.limit_value.is_finite() || self.limit_value < 0.0 {
            return Err(ConfigurationError::InvalidLimit {
                value: self.limit_value,
            });
        }
        for (field, value) in [
            ("install_offset", self.install_offset),
            ("current_value", self.current_value.value),
        ] {
            if !value.is_finite() {
                return Err(ConfigurationError::NonFiniteValue { field, value });
            }
        }
        Ok(())
    }

    pub fn remaining(&self) -> f64 {
        self.limit_value - self.current_value.value
    }

    /// Start a new write: previous manual assertions no longer take
    /// precedence over recomputation.
    pub fn begin_write(&mut self) {
        self.current_value.source = ValueSource::Computed;
        if let Some(policy) = self.overhaul.as_mut() {
            policy.next_overhaul_at.source = ValueSource::Computed;
        }
    }

    /// Directly assert the current usage value for this write.
    pub fn set_current_value(&mut self, value: f64) -> Result<(), crate::MonitoringError> {
        if !value.is_finite() || value < 0.0 {
            return Err(crate::MonitoringError::InvalidUsage(format!(
                "current value must be a non-negative number, got {value}"
            )));
        }
        self.current_value = Tracked::manual(value);
        Ok(())
    }

    /// Directly assert the next overhaul boundary for this write.
    pub fn override_next_overhaul_at(&mut self, value: f64) -> Result<(), crate::MonitoringError> {
        if !value.is_finite() || value < 0.0 {
            return Err(crate::MonitoringError::InvalidUsage(format!(
                "next overhaul boundary must be a non-negative number, got {value}"
            )));
        }
        match self.overhaul.as_mut() {
            Some(policy) => {
                policy.next_overhaul_at = Tracked::manual(value);
                Ok(())
            }
            None => Err(ConfigurationError::NoOverhaulPolicy {
                component_id: self.component_id.clone(),
                control_id: self.control_id.clone(),
            }
            .into()),
        }
    }
}

/// Freshly computed, not yet persisted view of a monitored state.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct StatusProjection {
    pub status: Status,
    pub alert_active: bool,
    /// `limit_value - current_value`, negative past expiry.
    pub remaining: f64,
    /// Distance to the next boundary the semáforo is applied to: the next
    /// overhaul when a policy is enabled, the life limit otherwise.
    pub hours_to_next_boundary: f64,
    pub band: Band,
    pub next_overhaul_at: Option<f64>,
    pub overhaul_required: Option<bool>,
    pub tso: Option<f64>,
    pub legacy_hours_to_next: Option<f64>,
    pub violations: Vec<InvariantViolation>,
}
