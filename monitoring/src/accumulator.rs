//! Current usage value of a monitored state.

use crate::types::MonitoredState;
use crate::types::Tracked;
use crate::types::UsageUnit;

/// Read access to the accumulated usage of the component that owns a
/// monitored state (usually the aircraft or parent assembly).
pub trait UsageSource {
    /// `Ok(None)` when the component or its record for `unit` does not exist.
    fn accumulated_usage(
        &self,
        component_id: &str,
        unit: UsageUnit,
    ) -> anyhow::Result<Option<f64>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorOutcome {
    /// The state is not based on parent usage.
    Direct,
    /// The current write asserted the value manually.
    ManualOverride,
    Refreshed { previous: f64, current: f64 },
    /// Owner or matching-unit record missing; last value kept.
    ParentMissing { owner: String },
    /// Usage source failed; last value kept.
    SourceFailed { owner: String, reason: String },
}

/// Offset fixed at install time so that
/// `current = parent_usage + offset` equals the component's own usage then.
pub fn install_offset(component_usage_at_install: f64, parent_usage_at_install: f64) -> f64 {
    component_usage_at_install - parent_usage_at_install
}

/// Recompute `current_value` from the owner's usage when the state follows
/// parent usage. A missing or failing source never fails the caller; the
/// previously stored value is kept.
pub fn refresh_current_value(
    state: &mut MonitoredState,
    source: &dyn UsageSource,
) -> AccumulatorOutcome {
    if !state.based_on_parent_usage {
        return AccumulatorOutcome::Direct;
    }
    if state.current_value.is_manual() {
        return AccumulatorOutcome::ManualOverride;
    }
    let owner = state.usage_owner().to_string();
    match source.accumulated_usage(&owner, state.unit) {
        Ok(Some(parent)) => {
            let previous = state.current_value.value;
            let current = (parent + state.install_offset).max(0.0);
            state.current_value = Tracked::computed(current);
            tracing::debug!(
                component = %state.component_id,
                control = %state.control_id,
                previous,
                current,
                "current value refreshed from {owner}"
            );
            AccumulatorOutcome::Refreshed { previous, current }
        }
        Ok(None) => {
            tracing::warn!(
                component = %state.component_id,
                control = %state.control_id,
                "no {} usage record for {owner}; keeping last value {}",
                state.unit.as_str(),
                state.current_value.value
            );
            AccumulatorOutcome::ParentMissing { owner }
        }
        Err(e) => {
            tracing::warn!(
                component = %state.component_id,
                control = %state.control_id,
                "usage lookup for {owner} failed: {e:#}; keeping last value {}",
                state.current_value.value
            );
            AccumulatorOutcome::SourceFailed {
                owner,
                reason: format!("{e:#}"),
            }
        }
    }
}
