use super::*;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

const COLUMNS: &str = "id, component_id, control_id, parent_id, based_on_parent_usage,
    status, alert_active, last_updated, state_json";

fn init_db(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS monitored_states (
            id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            control_id TEXT NOT NULL,
            parent_id TEXT,
            based_on_parent_usage INTEGER NOT NULL,
            status TEXT NOT NULL,
            alert_active INTEGER NOT NULL,
            last_updated TEXT NOT NULL,
            state_json TEXT NOT NULL,
            PRIMARY KEY (component_id, control_id)
        );
        CREATE INDEX IF NOT EXISTS idx_states_status ON monitored_states(status);
        CREATE INDEX IF NOT EXISTS idx_states_parent ON monitored_states(parent_id);
        CREATE INDEX IF NOT EXISTS idx_states_updated ON monitored_states(last_updated);
        "#,
    )?;
    Ok(())
}

fn open_conn(path: &std::path::Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

struct Cols<'a> {
    id: &'a str,
    component_id: &'a str,
    control_id: &'a str,
    parent_id: Option<&'a str>,
    based_on_parent_usage: bool,
    status: &'static str,
    alert_active: bool,
    last_updated: String,
    state_json: String,
}

fn state_to_cols(state: &MonitoredState) -> anyhow::Result<Cols<'_>> {
    Ok(Cols {
        id: &state.id,
        component_id: &state.component_id,
        control_id: &state.control_id,
        parent_id: state.parent_id.as_deref(),
        based_on_parent_usage: state.based_on_parent_usage,
        status: state.status.as_str(),
        alert_active: state.alert_active,
        // Fixed-width timestamps keep ORDER BY on the text column chronological.
        last_updated: state
            .last_updated
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        state_json: serde_json::to_string(state)?,
    })
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<MonitoredState> {
    let json: String = row.get(8)?;
    serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn collect(mut rows: rusqlite::Rows<'_>) -> anyhow::Result<Vec<MonitoredState>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_state(row)?);
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    path: std::path::PathBuf,
}

impl SqliteStateStore {
    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

}

impl MonitoredStateStore for SqliteStateStore {
    fn add(&self, state: MonitoredState) -> anyhow::Result<()> {
        let conn = open_conn(&self.path)?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM monitored_states WHERE component_id=?1 AND control_id=?2",
                params![state.component_id, state.control_id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            let (component, control) = (&state.component_id, &state.control_id);
            anyhow::bail!("add: state already exists for {component}/{control}");
        }
        let c = state_to_cols(&state)?;
        conn.execute(
            &format!(
                "INSERT INTO monitored_states ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                c.id,
                c.component_id,
                c.control_id,
                c.parent_id,
                c.based_on_parent_usage,
                c.status,
                c.alert_active,
                c.last_updated,
                c.state_json
            ],
        )?;
        Ok(())
    }

    fn save(&self, state: &MonitoredState) -> anyhow::Result<()> {
        let conn = open_conn(&self.path)?;
        let c = state_to_cols(state)?;
        let n = conn.execute(
            "UPDATE monitored_states SET
                id=?1, parent_id=?4, based_on_parent_usage=?5,
                status=?6, alert_active=?7, last_updated=?8, state_json=?9
             WHERE component_id=?2 AND control_id=?3",
            params![
                c.id,
                c.component_id,
                c.control_id,
                c.parent_id,
                c.based_on_parent_usage,
                c.status,
                c.alert_active,
                c.last_updated,
                c.state_json
            ],
        )?;
        if n == 0 {
            let (component, control) = (&state.component_id, &state.control_id);
            anyhow::bail!("save: state not found: {component}/{control}");
        }
        Ok(())
    }

    fn get(&self, component_id: &str, control_id: &str) -> anyhow::Result<Option<MonitoredState>> {
        let conn = open_conn(&self.path)?;
        let state = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM monitored_states WHERE component_id=?1 AND control_id=?2"
                ),
                params![component_id, control_id],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    fn delete(&self, component_id: &str, control_id: &str) -> anyhow::Result<()> {
        let conn = open_conn(&self.path)?;
        conn.execute(
            "DELETE FROM monitored_states WHERE component_id=?1 AND control_id=?2",
            params![component_id, control_id],
        )?;
        Ok(())
    }

    fn delete_component(&self, component_id: &str) -> anyhow::Result<usize> {
        let conn = open_conn(&self.path)?;
        let n = conn.execute(
            "DELETE FROM monitored_states WHERE component_id=?1",
            params![component_id],
        )?;
        Ok(n)
    }

    fn list(&self, status: Option<Status>) -> anyhow::Result<Vec<MonitoredState>> {
        let conn = open_conn(&self.path)?;
        let base = format!("SELECT {COLUMNS} FROM monitored_states");
        match status {
            None => {
                let mut stmt = conn.prepare(&format!("{base} ORDER BY last_updated DESC"))?;
                collect(stmt.query([])?)
            }
            Some(st) => {
                let mut stmt =
                    conn.prepare(&format!("{base} WHERE status=?1 ORDER BY last_updated DESC"))?;
                collect(stmt.query(params![st.as_str()])?)
            }
        }
    }

    fn list_for_parent(&self, owner_id: &str) -> anyhow::Result<Vec<MonitoredState>> {
        let conn = open_conn(&self.path)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM monitored_states
             WHERE based_on_parent_usage=1 AND COALESCE(parent_id, component_id)=?1
             ORDER BY component_id, control_id"
        ))?;
        collect(stmt.query(params![owner_id])?)
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
        let mut conn = open_conn(&self.path)?;
        let tx = conn.transaction()?;
        let mut count = 0usize;
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let state: MonitoredState = serde_json::from_str(line)?;
            let c = state_to_cols(&state)?;
            tx.execute(
                &format!(
                    "INSERT INTO monitored_states ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(component_id, control_id) DO UPDATE SET
                        id=excluded.id,
                        parent_id=excluded.parent_id,
                        based_on_parent_usage=excluded.based_on_parent_usage,
                        status=excluded.status,
                        alert_active=excluded.alert_active,
                        last_updated=excluded.last_updated,
                        state_json=excluded.state_json"
                ),
                params![
                    c.id,
                    c.component_id,
                    c.control_id,
                    c.parent_id,
                    c.based_on_parent_usage,
                    c.status,
                    c.alert_active,
                    c.last_updated,
                    c.state_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn stats(&self) -> anyhow::Result<serde_json::Value> {
        Ok(summarize(&self.list(None)?))
    }
}
