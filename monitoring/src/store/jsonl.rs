use anyhow::Context;

use super::*;

/// JSONL-backed store. Each line encodes one `MonitoredState`.
#[derive(Debug, Clone)]
pub struct JsonlStateStore {
    path: std::path::PathBuf,
}

impl JsonlStateStore {
    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read_all(&self) -> anyhow::Result<Vec<MonitoredState>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut states = Vec::new();
        for (n, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // Never skipped: the next rewrite would drop the state for good.
            let state = serde_json::from_str::<MonitoredState>(line).with_context(|| {
                format!(
                    "unreadable state on line {} of {}; run `compact` to drop it",
                    n + 1,
                    self.path.display()
                )
            })?;
            states.push(state);
        }
        Ok(states)
    }

    fn write_all(&self, states: &[MonitoredState]) -> anyhow::Result<()> {
        let mut out = String::new();
        for state in states {
            out.push_str(&serde_json::to_string(state)?);
            out.push('\n');
        }
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

fn same_key(state: &MonitoredState, component_id: &str, control_id: &str) -> bool {
    state.component_id == component_id && state.control_id == control_id
}

impl MonitoredStateStore for JsonlStateStore {
    fn add(&self, state: MonitoredState) -> anyhow::Result<()> {
        let mut states = self.read_all()?;
        if states
            .iter()
            .any(|s| same_key(s, &state.component_id, &state.control_id))
        {
            let (component, control) = (&state.component_id, &state.control_id);
            anyhow::bail!("add: state already exists for {component}/{control}");
        }
        states.push(state);
        self.write_all(&states)
    }

    fn save(&self, state: &MonitoredState) -> anyhow::Result<()> {
        let mut states = self.read_all()?;
        let slot = states
            .iter_mut()
            .find(|s| same_key(s, &state.component_id, &state.control_id));
        match slot {
            Some(slot) => *slot = state.clone(),
            None => {
                let (component, control) = (&state.component_id, &state.control_id);
                anyhow::bail!("save: state not found: {component}/{control}");
            }
        }
        self.write_all(&states)
    }

    fn get(&self, component_id: &str, control_id: &str) -> anyhow::Result<Option<MonitoredState>> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|s| same_key(s, component_id, control_id)))
    }

    fn delete(&self, component_id: &str, control_id: &str) -> anyhow::Result<()> {
        let mut states = self.read_all()?;
        states.retain(|s| !same_key(s, component_id, control_id));
        self.write_all(&states)
    }

    fn delete_component(&self, component_id: &str) -> anyhow::Result<usize> {
        let mut states = self.read_all()?;
        let before = states.len();
        states.retain(|s| s.component_id != component_id);
        let removed = before - states.len();
        if removed > 0 {
            self.write_all(&states)?;
        }
        Ok(removed)
    }

    fn list(&self, status: Option<Status>) -> anyhow::Result<Vec<MonitoredState>> {
        let mut states = self.read_all()?;
        if let Some(status) = status {
            states.retain(|s| s.status == status);
        }
        states.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(states)
    }

    fn export(&self, out: &mut dyn std::io::Write) -> anyhow::Result<()> {
        for state in self.list(None)? {
            let line = serde_json::to_string(&state)?;
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    fn import(&self, input: &mut dyn std::io::Read) -> anyhow::Result<usize> {
        let mut data = String::new();
        input.read_to_string(&mut data)?;
        let mut states = self.read_all()?;
        let mut count = 0usize;
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let incoming: MonitoredState = serde_json::from_str(line)?;
            match states
                .iter_mut()
                .find(|s| same_key(s, &incoming.component_id, &incoming.control_id))
            {
                Some(existing) => *existing = incoming,
                None => states.push(incoming),
            }
            count += 1;
        }
        self.write_all(&states)?;
        Ok(count)
    }

    fn stats(&self) -> anyhow::Result<serde_json::Value> {
        Ok(summarize(&self.read_all()?))
    }
}
