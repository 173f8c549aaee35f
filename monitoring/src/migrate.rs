use std::collections::HashMap;

use crate::types::MonitoredState;

/// Migrate a JSONL state file into a SQLite database file.
///
/// Rows are upserted by `(component_id, control_id)`. Returns the count of
/// imported rows.
#[cfg(feature = "sqlite")]
pub fn migrate_jsonl_to_sqlite(
    jsonl_path: &std::path::Path,
    sqlite_path: &std::path::Path,
) -> anyhow::Result<usize> {
    use crate::store::MonitoredStateStore;
    use crate::store::sqlite::SqliteStateStore;

    if let Some(dir) = sqlite_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::File::open(jsonl_path)?;
    let store = SqliteStateStore::new(sqlite_path);
    let n = store.import(&mut file)?;
    tracing::info!(
        "migrated {n} states from {} to {}",
        jsonl_path.display(),
        sqlite_path.display()
    );
    Ok(n)
}

#[cfg(not(feature = "sqlite"))]
pub fn migrate_jsonl_to_sqlite(
    _jsonl_path: &std::path::Path,
    _sqlite_path: &std::path::Path,
) -> anyhow::Result<usize> {
    anyhow::bail!(
        "sqlite backend not compiled; enable with `--features aerotrack-monitoring/sqlite`"
    );
}

/// Rewrite a JSONL state file keeping one line per
/// `(component_id, control_id)`. The last line for a key wins; empty and
/// unreadable lines are dropped. Output keeps first-seen key order.
///
/// Returns `(lines_read, states_written)`. A missing input is treated as empty.
pub fn compact_jsonl(
    input: &std::path::Path,
    output: &std::path::Path,
) -> anyhow::Result<(usize, usize)> {
    let data = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut read = 0usize;
    let mut order: Vec<(String, String)> = Vec::new();
    let mut latest: HashMap<(String, String), MonitoredState> = HashMap::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        read += 1;
        let state = match serde_json::from_str::<MonitoredState>(line) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("compact: dropping unreadable line: {e}");
                continue;
            }
        };
        let key = (state.component_id.clone(), state.control_id.clone());
        if latest.insert(key.clone(), state).is_none() {
            order.push(key);
        }
    }

    let mut out = String::new();
    for key in &order {
        if let Some(state) = latest.get(key) {
            out.push_str(&serde_json::to_string(state)?);
            out.push('\n');
        }
    }
    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(output, out)?;
    Ok((read, order.len()))
}
