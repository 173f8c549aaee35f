//! Status resolution and the pre-persist hook.

use std::sync::Arc;

use crate::MonitoringError;
use crate::accumulator::UsageSource;
use crate::accumulator::refresh_current_value;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::overhaul;
use crate::semaforo;
use crate::store::MonitoredStateStore;
use crate::types::MonitoredState;
use crate::types::Status;
use crate::types::StatusProjection;
use crate::types::Tracked;

/// Compute the status of `state` as it stands, without touching usage
/// sources or storage. Same input, same output.
pub fn resolve_status(
    state: &MonitoredState,
    config: &EngineConfig,
) -> Result<StatusProjection, MonitoringError> {
    state.validate()?;
    let current = state.current_value.value;
    let remaining = state.remaining();
    let alert_threshold = semaforo::alert_threshold(state, config);
    let band_config = semaforo::applicable_config(state).unwrap_or(&config.default_semaforo);

    let Some(policy) = state.overhaul.as_ref().filter(|policy| policy.enabled) else {
        let status = if remaining <= 0.0 {
            Status::Vencido
        } else if remaining <= alert_threshold {
            Status::Proximo
        } else {
            Status::Ok
        };
        return Ok(StatusProjection {
            status,
            alert_active: status != Status::Ok,
            remaining,
            hours_to_next_boundary: remaining,
            band: semaforo::classify(remaining, band_config),
            next_overhaul_at: None,
            overhaul_required: None,
            tso: None,
            legacy_hours_to_next: None,
            violations: Vec::new(),
        });
    };

    policy.validate()?;
    let assessment = overhaul::assess(policy, current, state.limit_value, alert_threshold);
    let mut projection = StatusProjection {
        status: assessment.status,
        alert_active: assessment.alert_active(),
        remaining,
        hours_to_next_boundary: assessment.hours_to_next,
        band: semaforo::classify(assessment.hours_to_next, band_config),
        next_overhaul_at: Some(assessment.next_overhaul_at),
        overhaul_required: Some(assessment.overhaul_required()),
        tso: Some(assessment.tso),
        legacy_hours_to_next: Some(assessment.legacy_hours_to_next),
        violations: Vec::new(),
    };

    if let Some(violation) = policy.cycle_violation() {
        tracing::error!(
            component = %state.component_id,
            control = %state.control_id,
            "{violation}; forcing VENCIDO"
        );
        projection.status = Status::Vencido;
        projection.alert_active = true;
        projection.overhaul_required = Some(false);
        projection.violations.push(violation);
    }
    if let Some(violation) = policy.anchor_violation(config.overhaul_anchor_tolerance) {
        tracing::error!(
            component = %state.component_id,
            control = %state.control_id,
            "{violation}"
        );
        projection.violations.push(violation);
    }
    Ok(projection)
}

/// Result of re-saving every state that follows one usage owner.
#[derive(Debug, Default)]
pub struct DependentRefresh {
    pub refreshed: Vec<(MonitoredState, StatusProjection)>,
    pub failed: Vec<DependentFailure>,
}

/// A dependent whose save was rejected; its stored row is unchanged.
#[derive(Debug)]
pub struct DependentFailure {
    pub component_id: String,
    pub control_id: String,
    pub error: MonitoringError,
}

/// Recomputes derived fields whenever a monitored state is written.
pub struct StatusResolver {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl StatusResolver {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn with_system_clock(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Fresh projection for read-only paths: usage is refreshed on a copy,
    /// nothing is written back.
    pub fn preview(
        &self,
        state: &MonitoredState,
        usage: &dyn UsageSource,
    ) -> Result<StatusProjection, MonitoringError> {
        let mut scratch = state.clone();
        refresh_current_value(&mut scratch, usage);
        resolve_status(&scratch, &self.config)
    }

    /// Pre-persist hook. On error `state` is left untouched.
    pub fn prepare_save(
        &self,
        state: &mut MonitoredState,
        usage: &dyn UsageSource,
    ) -> Result<StatusProjection, MonitoringError> {
        let mut next = state.clone();
        refresh_current_value(&mut next, usage);
        let projection = resolve_status(&next, &self.config)?;
        if self.config.strict_invariants
            && let Some(violation) = projection.violations.first()
        {
            return Err(violation.clone().into());
        }

        next.status = projection.status;
        next.alert_active = projection.alert_active;
        next.band = Some(projection.band);
        if let Some(policy) = next.overhaul.as_mut() {
            policy.overhaul_required = projection.overhaul_required.unwrap_or(false);
            if !policy.next_overhaul_at.is_manual()
                && let Some(at) = projection.next_overhaul_at
            {
                policy.next_overhaul_at = Tracked::computed(at);
            }
        }
        next.last_updated = self.clock.now();
        *state = next;
        Ok(projection)
    }

    /// Run the hook and update an existing state.
    pub fn save(
        &self,
        store: &dyn MonitoredStateStore,
        state: &mut MonitoredState,
        usage: &dyn UsageSource,
    ) -> Result<StatusProjection, MonitoringError> {
        let projection = self.prepare_save(state, usage)?;
        store.save(state)?;
        Ok(projection)
    }

    /// Run the hook and insert a newly linked state.
    pub fn insert(
        &self,
        store: &dyn MonitoredStateStore,
        state: &mut MonitoredState,
        usage: &dyn UsageSource,
    ) -> Result<StatusProjection, MonitoringError> {
        let projection = self.prepare_save(state, usage)?;
        store.add(state.clone())?;
        Ok(projection)
    }

    /// Re-save every state that follows `owner_id`'s usage, after hours or
    /// cycles were posted against it. Each dependent is saved on its own: a
    /// rejected one is reported in `failed` and the rest are still refreshed.
    pub fn refresh_dependents(
        &self,
        store: &dyn MonitoredStateStore,
        owner_id: &str,
        usage: &dyn UsageSource,
    ) -> Result<DependentRefresh, MonitoringError> {
        let mut outcome = DependentRefresh::default();
        for mut state in store.list_for_parent(owner_id)? {
            state.begin_write();
            match self.save(store, &mut state, usage) {
                Ok(projection) => outcome.refreshed.push((state, projection)),
                Err(error) => {
                    tracing::warn!(
                        component = %state.component_id,
                        control = %state.control_id,
                        "refresh after usage on {owner_id} failed: {error}"
                    );
                    outcome.failed.push(DependentFailure {
                        component_id: state.component_id,
                        control_id: state.control_id,
                        error,
                    });
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ConfigurationError;
    use crate::semaforo::SemaforoConfig;
    use crate::types::Band;
    use crate::types::OverhaulPolicy;
    use crate::types::UsageUnit;
    use crate::types::ValueSource;
    use crate::usage::UsageLedger;
    use crate::usage::UsageRecord;
    use chrono::DateTime;
    use chrono::TimeZone;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn resolver_at(now: DateTime<Utc>) -> StatusResolver {
        StatusResolver::new(EngineConfig::default(), Arc::new(FixedClock(now)))
    }

    fn overhaul_state(current: f64, limit: f64, policy: OverhaulPolicy) -> MonitoredState {
        let mut state = MonitoredState::new("ENG-1", "tbo", UsageUnit::Hours, limit, t0());
        state.current_value = Tracked::computed(current);
        state.overhaul = Some(policy);
        state
    }

    fn policy(interval: f64, max_cycles: u32, current_cycle: u32, at_last: f64) -> OverhaulPolicy {
        let mut policy = OverhaulPolicy::new(interval, max_cycles).unwrap();
        policy.current_cycle = current_cycle;
        policy.hours_at_last_overhaul = at_last;
        policy
    }

    #[test]
    fn scenario_a_ok_then_proximo_by_alert_threshold() {
        // default alert threshold 50: 60 >= 100 - 50
        let state = overhaul_state(60.0, 1000.0, policy(50.0, 2, 1, 50.0));
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.tso, Some(10.0));
        assert_eq!(projection.next_overhaul_at, Some(100.0));
        assert_eq!(projection.overhaul_required, Some(false));
        assert_eq!(projection.status, Status::Proximo);
        assert!(projection.alert_active);

        // a 30 hour margin keeps it OK: 60 < 100 - 30
        let config = EngineConfig {
            default_alert_threshold: 30.0,
            ..EngineConfig::default()
        };
        let projection = resolve_status(&state, &config).unwrap();
        assert_eq!(projection.status, Status::Ok);
        assert!(!projection.alert_active);
        assert!(projection.violations.is_empty());
    }

    #[test]
    fn scenario_b_exhausted_at_limit_is_vencido() {
        let state = overhaul_state(200.0, 200.0, policy(100.0, 2, 2, 200.0));
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.status, Status::Vencido);
        assert_eq!(projection.overhaul_required, Some(false));
        assert!(projection.alert_active);
    }

    #[test]
    fn exhausted_at_limit_stays_vencido() {
        let mut state = overhaul_state(200.0, 200.0, policy(100.0, 2, 2, 200.0));
        for current in [200.0, 260.0, 500.0] {
            state.current_value = Tracked::computed(current);
            let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
            assert_eq!(projection.status, Status::Vencido, "at {current}");
        }
        if let Some(policy) = state.overhaul.as_mut() {
            policy.max_cycles = 3;
        }
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.status, Status::OverhaulRequerido);
    }

    #[test]
    fn scenario_c_fresh_overhaul_is_a_full_interval_away() {
        let resolver = resolver_at(t0());
        let mut overhaul_policy = policy(500.0, 3, 1, 500.0);
        overhaul_policy.semaforo =
            Some(SemaforoConfig::new(10.0, 20.0, 50.0, 100.0, 200.0).unwrap());
        let mut state = overhaul_state(1000.0, 5000.0, overhaul_policy);

        overhaul::complete_overhaul(&mut state, t0()).unwrap();
        let projection = resolver
            .prepare_save(&mut state, &UsageLedger::new())
            .unwrap();
        assert_eq!(projection.tso, Some(0.0));
        assert_eq!(projection.hours_to_next_boundary, 500.0);
        assert_eq!(projection.legacy_hours_to_next, Some(500.0));
        assert_eq!(projection.band, Band::Verde);
        assert_eq!(projection.status, Status::Ok);
        assert!(projection.violations.is_empty());
    }

    #[test]
    fn scenario_d_without_policy_is_proximo_near_limit() {
        let mut state = MonitoredState::new("APU-2", "llp", UsageUnit::Hours, 1000.0, t0());
        state.current_value = Tracked::computed(950.0);
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.status, Status::Proximo);
        assert!(projection.alert_active);
        assert_eq!(projection.remaining, 50.0);
        assert_eq!(projection.next_overhaul_at, None);

        state.current_value = Tracked::computed(1000.0);
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.status, Status::Vencido);
        state.current_value = Tracked::computed(900.0);
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.status, Status::Ok);
        assert!(!projection.alert_active);
    }

    #[test]
    fn scenario_e_parent_lookup_failure_keeps_value() {
        let resolver = resolver_at(t0());
        let mut state = MonitoredState::new("PROP-7", "tbo", UsageUnit::Hours, 3000.0, t0());
        state.based_on_parent_usage = true;
        state.parent_id = Some("LV-GONE".to_string());
        state.current_value = Tracked::computed(1234.0);

        let projection = resolver
            .prepare_save(&mut state, &UsageLedger::new())
            .unwrap();
        assert_eq!(state.current_value.value, 1234.0);
        assert_eq!(projection.remaining, 3000.0 - 1234.0);
    }

    #[test]
    fn resolution_is_idempotent() {
        let state = overhaul_state(480.0, 2000.0, policy(250.0, 4, 1, 250.0));
        let config = EngineConfig::default();
        let first = resolve_status(&state, &config).unwrap();
        let second = resolve_status(&state, &config).unwrap();
        assert_eq!(first, second);

        let resolver = resolver_at(t0());
        let mut saved = state.clone();
        let a = resolver
            .prepare_save(&mut saved, &UsageLedger::new())
            .unwrap();
        let snapshot = saved.clone();
        let b = resolver
            .prepare_save(&mut saved, &UsageLedger::new())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(saved, snapshot);
    }

    #[test]
    fn cycle_overrun_forces_vencido() {
        let state = overhaul_state(10.0, 1000.0, policy(100.0, 2, 3, 300.0));
        let projection = resolve_status(&state, &EngineConfig::default()).unwrap();
        assert_eq!(projection.status, Status::Vencido);
        assert!(projection.alert_active);
        assert!(projection.violations.iter().any(|v| matches!(
            v,
            crate::error::InvariantViolation::CycleOverrun {
                current_cycle: 3,
                max_cycles: 2
            }
        )));
    }

    #[test]
    fn strict_mode_aborts_on_anchor_divergence() {
        let mut state = overhaul_state(120.0, 1000.0, policy(50.0, 3, 2, 105.0));
        let original = state.clone();

        let lenient = resolver_at(t0());
        let projection = lenient.preview(&state, &UsageLedger::new()).unwrap();
        assert_eq!(projection.violations.len(), 1);
        assert_eq!(projection.hours_to_next_boundary, 30.0);

        let strict = StatusResolver::new(
            EngineConfig {
                strict_invariants: true,
                ..EngineConfig::default()
            },
            Arc::new(FixedClock(t0())),
        );
        let err = strict
            .prepare_save(&mut state, &UsageLedger::new())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvariantViolation);
        assert_eq!(state, original);
    }

    #[test]
    fn invalid_interval_aborts_without_partial_write() {
        let mut p = policy(100.0, 2, 0, 0.0);
        p.interval = 0.0;
        let mut state = overhaul_state(10.0, 1000.0, p);
        let original = state.clone();
        let err = resolver_at(t0())
            .prepare_save(&mut state, &UsageLedger::new())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert_eq!(state, original);
    }

    #[test]
    fn non_finite_inputs_are_configuration_errors() {
        let resolver = resolver_at(t0());
        let config = EngineConfig::default();

        let mut unlimited = MonitoredState::new("ENG-1", "tbo", UsageUnit::Hours, f64::NAN, t0());
        unlimited.current_value = Tracked::computed(5000.0);
        let err = resolve_status(&unlimited, &config).unwrap_err();
        assert!(matches!(
            err,
            MonitoringError::Configuration(ConfigurationError::InvalidLimit { .. })
        ));
        let result = resolver.prepare_save(&mut unlimited, &UsageLedger::new());
        assert!(result.is_err());
        assert_eq!(unlimited.status, Status::Ok);
        assert_eq!(unlimited.current_value, Tracked::computed(5000.0));

        let mut drifting = overhaul_state(10.0, 1000.0, policy(100.0, 3, 0, 0.0));
        drifting.install_offset = f64::INFINITY;
        let err = resolve_status(&drifting, &config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        let anchorless = overhaul_state(10.0, 1000.0, policy(100.0, 3, 1, f64::NAN));
        let err = resolve_status(&anchorless, &config).unwrap_err();
        assert!(err.to_string().contains("hours_at_last_overhaul"), "{err}");

        let mut disabled = policy(100.0, 3, 1, f64::NAN);
        disabled.enabled = false;
        let plain = overhaul_state(10.0, 1000.0, disabled);
        assert_eq!(resolve_status(&plain, &config).unwrap().status, Status::Ok);
    }

    #[test]
    fn manual_next_overhaul_wins_for_one_write() {
        let resolver = resolver_at(t0());
        let mut state = overhaul_state(100.0, 2000.0, policy(500.0, 3, 0, 0.0));

        state.begin_write();
        state.override_next_overhaul_at(120.0).unwrap();
        let projection = resolver
            .prepare_save(&mut state, &UsageLedger::new())
            .unwrap();
        assert_eq!(projection.next_overhaul_at, Some(120.0));
        assert_eq!(projection.status, Status::Proximo);
        let policy = state.overhaul.as_ref().unwrap();
        assert_eq!(policy.next_overhaul_at.source, ValueSource::Manual);
        assert_eq!(policy.next_overhaul_at.value, 120.0);

        state.begin_write();
        let projection = resolver
            .prepare_save(&mut state, &UsageLedger::new())
            .unwrap();
        assert_eq!(projection.next_overhaul_at, Some(500.0));
        assert_eq!(
            state.overhaul.as_ref().unwrap().next_overhaul_at,
            Tracked::computed(500.0)
        );
    }

    #[test]
    fn save_hook_follows_parent_and_stamps_time() {
        let later = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();
        let resolver = resolver_at(later);
        let mut ledger = UsageLedger::new();
        ledger
            .register("LV-ABC", None)
            .track(UsageRecord::with_accumulated(UsageUnit::Hours, 30000.0, 2960.0).unwrap());

        let mut state = MonitoredState::new("PROP-7", "tbo", UsageUnit::Hours, 3000.0, t0());
        state.based_on_parent_usage = true;
        state.parent_id = Some("LV-ABC".to_string());
        state.install_offset = 0.0;

        let projection = resolver.prepare_save(&mut state, &ledger).unwrap();
        assert_eq!(state.current_value, Tracked::computed(2960.0));
        assert_eq!(projection.status, Status::Proximo);
        assert_eq!(state.status, Status::Proximo);
        assert!(state.alert_active);
        assert_eq!(state.band, Some(Band::Amarillo));
        assert_eq!(state.last_updated, later);
        assert_eq!(state.created_at, t0());
    }
}
