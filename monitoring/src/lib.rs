//! Component life-limit and overhaul monitoring.
//!
//! Derives the categorical status (`OK` / `PROXIMO` / `VENCIDO` /
//! `OVERHAUL_REQUERIDO`) and the five-band semáforo alert of a monitored
//! component from its accumulated usage, life limit and optional recurring
//! overhaul policy. Persistence, usage sources and the clock are ports so the
//! engine can run behind any storage or transport layer.

pub mod accumulator;
pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod migrate;
pub mod overhaul;
pub mod resolver;
pub mod semaforo;
pub mod store;
pub mod types;
pub mod usage;

pub use error::MonitoringError;
pub use resolver::DependentRefresh;
pub use resolver::StatusResolver;
pub use resolver::resolve_status;
pub use semaforo::classify;
