use crate::types::MonitoredState;
use crate::types::Status;

/// Persistence port for monitored states. One state per
/// `(component_id, control_id)`; writers are last-write-wins.
pub trait MonitoredStateStore: Send + Sync {
    /// Fails when a state for the same component and control exists.
    fn add(&self, state: MonitoredState) -> anyhow::Result<()>;
    /// Fails when no state for the component and control exists.
    fn save(&self, state: &MonitoredState) -> anyhow::Result<()>;
    fn get(&self, component_id: &str, control_id: &str) -> anyhow::Result<Option<MonitoredState>>;
    fn delete(&self, component_id: &str, control_id: &str) -> anyhow::Result<()>;
    /// Cascade for a removed component; returns the number of states deleted.
    fn delete_component(&self, component_id: &str) -> anyhow::Result<usize>;
    fn list(&self, status: Option<Status>) -> anyhow::Result<Vec<MonitoredState>>;
    fn export(&self, out: &mut dyn std::io::Write) -> anyhow::Result<()>;
    fn import(&self, input: &mut dyn std::io::Read) -> anyhow::Result<usize>;
    fn stats(&self) -> anyhow::Result<serde_json::Value>;

    /// States whose current value follows `owner_id`'s usage.
    fn list_for_parent(&self, owner_id: &str) -> anyhow::Result<Vec<MonitoredState>> {
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|s| s.based_on_parent_usage && s.usage_owner() == owner_id)
            .collect())
    }
}

pub(crate) fn summarize(states: &[MonitoredState]) -> serde_json::Value {
    let mut by_status = serde_json::Map::new();
    for status in Status::ALL {
        let n = states.iter().filter(|s| s.status == status).count();
        by_status.insert(status.as_str().to_string(), serde_json::json!(n));
    }
    let alerts = states.iter().filter(|s| s.alert_active).count();
    let with_overhaul = states
        .iter()
        .filter(|s| s.overhaul.as_ref().is_some_and(|p| p.enabled))
        .count();
    serde_json::json!({
        "total": states.len(),
        "alerts": alerts,
        "with_overhaul": with_overhaul,
        "by_status": by_status,
    })
}

pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
