//! Recurring overhaul tracking.
//!
//! The cycle counter is operator-asserted ground truth: it only moves through
//! [`complete_overhaul`]. The next boundary is indexed off the counter
//! (`(current_cycle + 1) * interval`) while TSO is measured from
//! `hours_at_last_overhaul`; the two agree only while
//! `hours_at_last_overhaul == current_cycle * interval`, and any gap beyond
//! the configured tolerance is reported as an anchor divergence.

use chrono::DateTime;
use chrono::Utc;

use crate::MonitoringError;
use crate::error::ConfigurationError;
use crate::error::InvariantViolation;
use crate::types::MonitoredState;
use crate::types::OverhaulPolicy;
use crate::types::Status;
use crate::types::Tracked;

impl OverhaulPolicy {
    pub fn new(interval: f64, max_cycles: u32) -> Result<Self, ConfigurationError> {
        let policy = Self {
            enabled: true,
            interval,
            max_cycles,
            current_cycle: 0,
            hours_at_last_overhaul: 0.0,
            next_overhaul_at: Tracked::computed(interval),
            overhaul_required: false,
            completed_at: None,
            semaforo: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err(ConfigurationError::NonPositiveInterval {
                interval: self.interval,
            });
        }
        if self.max_cycles == 0 {
            return Err(ConfigurationError::ZeroMaxCycles);
        }
        if !self.hours_at_last_overhaul.is_finite() {
            return Err(ConfigurationError::NonFiniteValue {
                field: "hours_at_last_overhaul",
                value: self.hours_at_last_overhaul,
            });
        }
        if self.next_overhaul_at.is_manual() && !self.next_overhaul_at.value.is_finite() {
            return Err(ConfigurationError::NonFiniteValue {
                field: "next_overhaul_at",
                value: self.next_overhaul_at.value,
            });
        }
        Ok(())
    }

    pub fn cycles_exhausted(&self) -> bool {
        self.current_cycle >= self.max_cycles
    }

    /// Cycle-indexed boundary; the canonical one.
    pub fn computed_next_overhaul_at(&self) -> f64 {
        f64::from(self.current_cycle.saturating_add(1)) * self.interval
    }

    /// Boundary in effect: a value asserted manually in the current write,
    /// otherwise the cycle-indexed one.
    pub fn effective_next_overhaul_at(&self) -> f64 {
        if self.next_overhaul_at.is_manual() {
            self.next_overhaul_at.value
        } else {
            self.computed_next_overhaul_at()
        }
    }

    /// Usage since the last completed overhaul; grows until the next one.
    pub fn tso(&self, current_value: f64) -> f64 {
        current_value - self.hours_at_last_overhaul
    }

    /// Remaining usage computed from TSO alone, wrapping every interval.
    pub fn legacy_hours_to_next(&self, current_value: f64) -> f64 {
        self.interval - self.tso(current_value).rem_euclid(self.interval)
    }

    pub fn cycle_violation(&self) -> Option<InvariantViolation> {
        (self.current_cycle > self.max_cycles).then_some(InvariantViolation::CycleOverrun {
            current_cycle: self.current_cycle,
            max_cycles: self.max_cycles,
        })
    }

    pub fn anchor_violation(&self, tolerance: f64) -> Option<InvariantViolation> {
        let expected = f64::from(self.current_cycle) * self.interval;
        ((self.hours_at_last_overhaul - expected).abs() > tolerance.max(f64::EPSILON)).then_some(
            InvariantViolation::AnchorDivergence {
                hours_at_last_overhaul: self.hours_at_last_overhaul,
                expected,
                current_cycle: self.current_cycle,
                interval: self.interval,
            },
        )
    }
}

/// Result of evaluating an enabled overhaul policy against a usage value.
#[derive(Debug, Clone, PartialEq)]
pub struct OverhaulAssessment {
    pub status: Status,
    pub tso: f64,
    pub next_overhaul_at: f64,
    pub hours_to_next: f64,
    pub legacy_hours_to_next: f64,
    pub due: bool,
    pub exhausted: bool,
}

impl OverhaulAssessment {
    pub fn alert_active(&self) -> bool {
        self.status != Status::Ok
    }

    pub fn overhaul_required(&self) -> bool {
        self.status == Status::OverhaulRequerido
    }
}

/// Evaluate the branch table; the first matching rule wins:
///
/// 1. at/over the life limit, cycles left and overhaul due -> overhaul required
/// 2. at/over the life limit, cycles exhausted -> vencido
/// 3. at/over the life limit -> vencido
/// 4. overhaul due and cycles left -> overhaul required
/// 5. within `alert_threshold` of the next boundary -> proximo
/// 6. ok
pub fn assess(
    policy: &OverhaulPolicy,
    current_value: f64,
    limit_value: f64,
    alert_threshold: f64,
) -> OverhaulAssessment {
    let next_overhaul_at = policy.effective_next_overhaul_at();
    let due = current_value >= next_overhaul_at;
    let exhausted = policy.cycles_exhausted();
    let expired = current_value >= limit_value;

    let status = if expired && !exhausted && due {
        Status::OverhaulRequerido
    } else if expired {
        Status::Vencido
    } else if due && !exhausted {
        Status::OverhaulRequerido
    } else if current_value >= next_overhaul_at - alert_threshold {
        Status::Proximo
    } else {
        Status::Ok
    };

    OverhaulAssessment {
        status,
        tso: policy.tso(current_value),
        next_overhaul_at,
        hours_to_next: next_overhaul_at - current_value,
        legacy_hours_to_next: policy.legacy_hours_to_next(current_value),
        due,
        exhausted,
    }
}

fn enabled_policy_mut(state: &mut MonitoredState) -> Result<&mut OverhaulPolicy, MonitoringError> {
    let (component_id, control_id) = (state.component_id.clone(), state.control_id.clone());
    state
        .overhaul
        .as_mut()
        .filter(|policy| policy.enabled)
        .ok_or_else(|| {
            ConfigurationError::NoOverhaulPolicy {
                component_id,
                control_id,
            }
            .into()
        })
}

/// Operator action: an overhaul was completed at the state's current value.
///
/// Advances the cycle counter and restarts TSO; status fields are refreshed
/// by the next save.
pub fn complete_overhaul(
    state: &mut MonitoredState,
    completed_at: DateTime<Utc>,
) -> Result<u32, MonitoringError> {
    let current_value = state.current_value.value;
    let policy = enabled_policy_mut(state)?;
    policy.validate()?;
    if policy.cycles_exhausted() {
        return Err(ConfigurationError::OverhaulCapacityExhausted {
            current_cycle: policy.current_cycle,
            max_cycles: policy.max_cycles,
        }
        .into());
    }
    policy.current_cycle += 1;
    policy.hours_at_last_overhaul = current_value;
    policy.completed_at = Some(completed_at);
    policy.overhaul_required = false;
    policy.next_overhaul_at = Tracked::computed(policy.computed_next_overhaul_at());
    let cycle = policy.current_cycle;
    tracing::info!(
        component = %state.component_id,
        control = %state.control_id,
        "overhaul {cycle} completed at {current_value}"
    );
    Ok(cycle)
}

/// Manual reconfiguration: the only way out of an exhausted policy.
pub fn raise_max_cycles(
    state: &mut MonitoredState,
    max_cycles: u32,
) -> Result<(), MonitoringError> {
    let policy = enabled_policy_mut(state)?;
    if max_cycles == 0 {
        return Err(ConfigurationError::ZeroMaxCycles.into());
    }
    if max_cycles < policy.current_cycle {
        return Err(ConfigurationError::MaxCyclesBelowCurrent {
            requested: max_cycles,
            current_cycle: policy.current_cycle,
        }
        .into());
    }
    policy.max_cycles = max_cycles;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::UsageUnit;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn policy(interval: f64, max_cycles: u32, current_cycle: u32, at_last: f64) -> OverhaulPolicy {
        let mut policy = OverhaulPolicy::new(interval, max_cycles).unwrap();
        policy.current_cycle = current_cycle;
        policy.hours_at_last_overhaul = at_last;
        policy
    }

    #[test]
    fn tso_and_boundaries_after_one_overhaul() {
        let policy = policy(50.0, 2, 1, 50.0);
        let assessment = assess(&policy, 60.0, 200.0, 30.0);
        assert_eq!(
            assessment,
            OverhaulAssessment {
                status: Status::Ok,
                tso: 10.0,
                next_overhaul_at: 100.0,
                hours_to_next: 40.0,
                legacy_hours_to_next: 40.0,
                due: false,
                exhausted: false,
            }
        );
        assert!(policy.anchor_violation(0.0).is_none());
    }

    #[test]
    fn tso_is_not_reduced_modulo_interval() {
        let policy = policy(50.0, 3, 1, 50.0);
        let assessment = assess(&policy, 130.0, 500.0, 10.0);
        assert_eq!(assessment.tso, 80.0);
        assert_eq!(assessment.hours_to_next, -30.0);
        assert_eq!(assessment.legacy_hours_to_next, 20.0);
        assert_eq!(assessment.status, Status::OverhaulRequerido);
    }

    #[test]
    fn branch_priority() {
        // limit reached with cycles left and overhaul due
        let p = policy(100.0, 3, 1, 100.0);
        assert_eq!(assess(&p, 200.0, 200.0, 10.0).status, Status::OverhaulRequerido);
        // limit reached with cycles exhausted
        let p = policy(100.0, 2, 2, 200.0);
        assert_eq!(assess(&p, 250.0, 250.0, 10.0).status, Status::Vencido);
        // limit reached, overhaul not due
        let p = policy(100.0, 3, 1, 100.0);
        assert_eq!(assess(&p, 150.0, 150.0, 10.0).status, Status::Vencido);
        // overhaul due under the limit
        let p = policy(100.0, 3, 0, 0.0);
        assert_eq!(assess(&p, 100.0, 1000.0, 10.0).status, Status::OverhaulRequerido);
        // inside the alert margin
        assert_eq!(assess(&p, 90.0, 1000.0, 10.0).status, Status::Proximo);
        assert_eq!(assess(&p, 89.9, 1000.0, 10.0).status, Status::Ok);
    }

    #[test]
    fn exhausted_policy_under_limit_is_not_overhaul_required() {
        let p = policy(100.0, 1, 1, 100.0);
        let assessment = assess(&p, 205.0, 1000.0, 10.0);
        assert!(assessment.due);
        assert!(assessment.exhausted);
        assert_eq!(assessment.status, Status::Proximo);
    }

    #[test]
    fn anchor_divergence_is_detected() {
        let late = policy(50.0, 3, 2, 105.0);
        assert_eq!(
            late.anchor_violation(0.0),
            Some(InvariantViolation::AnchorDivergence {
                hours_at_last_overhaul: 105.0,
                expected: 100.0,
                current_cycle: 2,
                interval: 50.0,
            })
        );
        assert!(late.anchor_violation(5.0).is_none());
        assert_eq!(late.computed_next_overhaul_at(), 150.0);
        assert_eq!(late.legacy_hours_to_next(120.0), 35.0);
    }

    #[test]
    fn invalid_policies_are_rejected() {
        assert_eq!(
            OverhaulPolicy::new(0.0, 1).unwrap_err(),
            ConfigurationError::NonPositiveInterval { interval: 0.0 }
        );
        assert_eq!(
            OverhaulPolicy::new(100.0, 0).unwrap_err(),
            ConfigurationError::ZeroMaxCycles
        );
        assert!(OverhaulPolicy::new(f64::NAN, 1).is_err());

        let mut anchorless = policy(100.0, 3, 1, f64::NAN);
        assert!(matches!(
            anchorless.validate(),
            Err(ConfigurationError::NonFiniteValue {
                field: "hours_at_last_overhaul",
                ..
            })
        ));
        anchorless.hours_at_last_overhaul = 100.0;
        assert_eq!(anchorless.validate(), Ok(()));
    }

    #[test]
    fn completing_overhauls_until_capacity_is_exhausted() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut state = MonitoredState::new("ENG-1", "tbo", UsageUnit::Hours, 300.0, now);
        state.overhaul = Some(OverhaulPolicy::new(100.0, 2).unwrap());
        state.current_value = Tracked::computed(100.0);

        assert_eq!(complete_overhaul(&mut state, now).unwrap(), 1);
        let p = state.overhaul.as_ref().unwrap();
        assert_eq!(p.hours_at_last_overhaul, 100.0);
        assert_eq!(p.tso(100.0), 0.0);
        assert_eq!(p.effective_next_overhaul_at(), 200.0);
        assert_eq!(p.completed_at, Some(now));

        state.current_value = Tracked::computed(200.0);
        assert_eq!(complete_overhaul(&mut state, now).unwrap(), 2);

        let err = complete_overhaul(&mut state, now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("capacity exhausted"));

        assert!(raise_max_cycles(&mut state, 1).is_err());
        raise_max_cycles(&mut state, 3).unwrap();
        assert_eq!(complete_overhaul(&mut state, now).unwrap(), 3);
    }

    #[test]
    fn completing_without_policy_fails() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut state = MonitoredState::new("ENG-1", "llp", UsageUnit::Cycles, 300.0, now);
        let err = complete_overhaul(&mut state, now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
