use crate::store::MonitoredStateStore;
use crate::store::jsonl::JsonlStateStore;

#[cfg(feature = "sqlite")]
use crate::store::sqlite::SqliteStateStore;

pub const BACKEND_ENV: &str = "AEROTRACK_BACKEND";
pub const STATES_JSONL_ENV: &str = "AEROTRACK_STATES_JSONL";
pub const STATES_DB_ENV: &str = "AEROTRACK_STATES_DB";
pub const USAGE_LEDGER_ENV: &str = "AEROTRACK_USAGE_LEDGER";

/// Backend selection for monitored-state persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Jsonl,
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// Choose backend using env `AEROTRACK_BACKEND` if present: `sqlite` or `jsonl`.
/// Defaults to JSONL; if `sqlite` is requested but not compiled in, falls back to JSONL.
pub fn choose_backend_from_env() -> Backend {
    let v = std::env::var(BACKEND_ENV).unwrap_or_default();
    match v.to_ascii_lowercase().as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => Backend::Sqlite,
        "" | "jsonl" => Backend::Jsonl,
        other => {
            tracing::warn!("unsupported {BACKEND_ENV}={other}; using jsonl");
            Backend::Jsonl
        }
    }
}

/// `<root>/.aerotrack/`
pub fn data_dir(root: &std::path::Path) -> std::path::PathBuf {
    root.join(".aerotrack")
}

/// Location of the usage ledger, overridable via `AEROTRACK_USAGE_LEDGER`.
pub fn usage_ledger_path(root: &std::path::Path) -> std::path::PathBuf {
    std::env::var(USAGE_LEDGER_ENV)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| data_dir(root).join("usage.json"))
}

/// Location of the JSONL state file, overridable via `AEROTRACK_STATES_JSONL`.
pub fn states_jsonl_path(root: &std::path::Path) -> std::path::PathBuf {
    std::env::var(STATES_JSONL_ENV)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| data_dir(root).join("states.jsonl"))
}

/// Location of the SQLite state database, overridable via `AEROTRACK_STATES_DB`.
pub fn states_db_path(root: &std::path::Path) -> std::path::PathBuf {
    std::env::var(STATES_DB_ENV)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| data_dir(root).join("states.db"))
}

/// Build the state store rooted at `<root>/.aerotrack/`.
pub fn open_store(
    root: &std::path::Path,
    backend: Option<Backend>,
) -> anyhow::Result<Box<dyn MonitoredStateStore>> {
    let be = backend.unwrap_or_else(choose_backend_from_env);
    tracing::debug!("opening {be:?} state store under {}", root.display());
    Ok(match be {
        Backend::Jsonl => Box::new(JsonlStateStore::new(states_jsonl_path(root))),
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => {
            let path = states_db_path(root);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            Box::new(SqliteStateStore::new(path))
        }
    })
}
