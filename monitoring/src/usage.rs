//! Accumulated usage per component and unit.

use std::collections::BTreeMap;
use std::path::Path;

use crate::MonitoringError;
use crate::accumulator::UsageSource;
use crate::types::UsageUnit;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(try_from = "UsageRecordFields")]
pub struct UsageRecord {
    pub unit: UsageUnit,
    pub limit: f64,
    accumulated: f64,
}

/// Record as read from a ledger file, before validation.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct UsageRecordFields {
    pub unit: UsageUnit,
    pub limit: f64,
    pub accumulated: f64,
}

impl TryFrom<UsageRecordFields> for UsageRecord {
    type Error = MonitoringError;

    fn try_from(fields: UsageRecordFields) -> Result<Self, Self::Error> {
        Self::with_accumulated(fields.unit, fields.limit, fields.accumulated)
    }
}

impl UsageRecord {
    pub fn new(unit: UsageUnit, limit: f64) -> Self {
        Self {
            unit,
            limit,
            accumulated: 0.0,
        }
    }

    pub fn with_accumulated(
        unit: UsageUnit,
        limit: f64,
        accumulated: f64,
    ) -> Result<Self, MonitoringError> {
        if !limit.is_finite() {
            return Err(MonitoringError::InvalidUsage(format!(
                "usage limit must be a finite number, got {limit}"
            )));
        }
        let mut record = Self::new(unit, limit);
        record.correct(accumulated)?;
        Ok(record)
    }

    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }

    /// Negative once the limit has been passed.
    pub fn remaining(&self) -> f64 {
        self.limit - self.accumulated
    }

    /// Add a flight-hour / cycle increment and return the new total.
    pub fn post(&mut self, amount: f64) -> Result<f64, MonitoringError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MonitoringError::InvalidUsage(format!(
                "usage increments must be non-negative, got {amount}; use a correction instead"
            )));
        }
        self.accumulated += amount;
        Ok(self.accumulated)
    }

    /// Explicit correction; the only way usage may go down.
    pub fn correct(&mut self, value: f64) -> Result<(), MonitoringError> {
        if !value.is_finite() || value < 0.0 {
            return Err(MonitoringError::InvalidUsage(format!(
                "accumulated usage must be non-negative, got {value}"
            )));
        }
        self.accumulated = value;
        Ok(())
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ComponentUsage {
    pub component_id: String,
    pub parent_id: Option<String>,
    pub records: Vec<UsageRecord>,
}

impl ComponentUsage {
    pub fn record(&self, unit: UsageUnit) -> Option<&UsageRecord> {
        self.records.iter().find(|r| r.unit == unit)
    }

    pub fn record_mut(&mut self, unit: UsageUnit) -> Option<&mut UsageRecord> {
        self.records.iter_mut().find(|r| r.unit == unit)
    }

    /// Insert or replace the record for `record.unit`.
    pub fn track(&mut self, record: UsageRecord) {
        match self.record_mut(record.unit) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }
}

/// Local usage source: accumulated usage of every registered component,
/// persisted as a JSON document.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct UsageLedger {
    components: BTreeMap<String, ComponentUsage>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a ledger file; a missing file is an empty ledger.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Register a component, or update its parent if already known.
    pub fn register(
        &mut self,
        component_id: &str,
        parent_id: Option<String>,
    ) -> &mut ComponentUsage {
        let entry = self
            .components
            .entry(component_id.to_string())
            .or_insert_with(|| ComponentUsage {
                component_id: component_id.to_string(),
                parent_id: None,
                records: Vec::new(),
            });
        if parent_id.is_some() {
            entry.parent_id = parent_id;
        }
        entry
    }

    pub fn get(&self, component_id: &str) -> Option<&ComponentUsage> {
        self.components.get(component_id)
    }

    pub fn remove(&mut self, component_id: &str) -> Option<ComponentUsage> {
        self.components.remove(component_id)
    }

    pub fn post_usage(
        &mut self,
        component_id: &str,
        unit: UsageUnit,
        amount: f64,
    ) -> Result<f64, MonitoringError> {
        self.record_mut(component_id, unit)?.post(amount)
    }

    pub fn correct_usage(
        &mut self,
        component_id: &str,
        unit: UsageUnit,
        value: f64,
    ) -> Result<(), MonitoringError> {
        self.record_mut(component_id, unit)?.correct(value)
    }

    fn record_mut(
        &mut self,
        component_id: &str,
        unit: UsageUnit,
    ) -> Result<&mut UsageRecord, MonitoringError> {
        let component = self
            .components
            .get_mut(component_id)
            .ok_or_else(|| MonitoringError::NotFound(format!("component {component_id}")))?;
        component.record_mut(unit).ok_or_else(|| {
            MonitoringError::NotFound(format!(
                "{} usage record for component {component_id}",
                unit.as_str()
            ))
        })
    }
}

impl UsageSource for UsageLedger {
    fn accumulated_usage(
        &self,
        component_id: &str,
        unit: UsageUnit,
    ) -> anyhow::Result<Option<f64>> {
        Ok(self
            .get(component_id)
            .and_then(|c| c.record(unit))
            .map(UsageRecord::accumulated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn posting_accumulates_and_rejects_negative_increments() {
        let mut record = UsageRecord::new(UsageUnit::Hours, 1000.0);
        assert_eq!(record.post(400.0).unwrap(), 400.0);
        assert_eq!(record.post(700.0).unwrap(), 1100.0);
        assert_eq!(record.remaining(), -100.0);

        let err = record.post(-5.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUsage);
        assert_eq!(record.accumulated(), 1100.0);

        record.correct(900.0).unwrap();
        assert_eq!(record.remaining(), 100.0);
        assert!(record.correct(-1.0).is_err());
    }

    #[test]
    fn ledger_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.json");

        let mut ledger = UsageLedger::new();
        ledger
            .register("LV-ABC", None)
            .track(UsageRecord::with_accumulated(UsageUnit::Hours, 30000.0, 1200.0).unwrap());
        ledger
            .register("ENG-1", Some("LV-ABC".to_string()))
            .track(UsageRecord::new(UsageUnit::Cycles, 20000.0));
        ledger.post_usage("LV-ABC", UsageUnit::Hours, 3.5).unwrap();
        ledger.save(&path).unwrap();

        let loaded = UsageLedger::load(&path).unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(
            loaded
                .accumulated_usage("LV-ABC", UsageUnit::Hours)
                .unwrap(),
            Some(1203.5)
        );
        assert_eq!(
            loaded
                .accumulated_usage("ENG-1", UsageUnit::Hours)
                .unwrap(),
            None
        );
        assert_eq!(loaded.get("ENG-1").unwrap().parent_id.as_deref(), Some("LV-ABC"));
    }

    #[test]
    fn ledger_file_cannot_bypass_record_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let record = |accumulated: f64| {
            serde_json::json!({
                "components": {
                    "LV-ABC": {
                        "component_id": "LV-ABC",
                        "parent_id": null,
                        "records": [
                            {"unit": "Hours", "limit": 30000.0, "accumulated": accumulated}
                        ]
                    }
                }
            })
            .to_string()
        };

        std::fs::write(&path, record(-40.0)).unwrap();
        let err = UsageLedger::load(&path).unwrap_err();
        assert!(err.to_string().contains("non-negative"), "{err}");

        std::fs::write(&path, record(40.0)).unwrap();
        let ledger = UsageLedger::load(&path).unwrap();
        assert_eq!(
            ledger
                .accumulated_usage("LV-ABC", UsageUnit::Hours)
                .unwrap(),
            Some(40.0)
        );
        assert!(UsageRecord::with_accumulated(UsageUnit::Hours, f64::NAN, 0.0).is_err());
    }

    #[test]
    fn posting_to_unknown_component_is_not_found() {
        let mut ledger = UsageLedger::new();
        let err = ledger
            .post_usage("ghost", UsageUnit::Hours, 1.0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        ledger.register("ENG-1", None);
        let err = ledger
            .post_usage("ENG-1", UsageUnit::Hours, 1.0)
            .unwrap_err();
        assert!(err.to_string().contains("hours usage record"));
    }
}
