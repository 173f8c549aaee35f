use aerotrack_monitoring::StatusResolver;
use aerotrack_monitoring::accumulator::UsageSource;
use aerotrack_monitoring::accumulator::install_offset;
use aerotrack_monitoring::config::EngineConfig;
use aerotrack_monitoring::factory;
use aerotrack_monitoring::overhaul;
use aerotrack_monitoring::semaforo;
use aerotrack_monitoring::semaforo::SemaforoConfig;
use aerotrack_monitoring::store::MonitoredStateStore;
use aerotrack_monitoring::types::MonitoredState;
use aerotrack_monitoring::types::OverhaulPolicy;
use aerotrack_monitoring::types::Status;
use aerotrack_monitoring::types::UsageUnit;
use aerotrack_monitoring::usage::UsageLedger;
use aerotrack_monitoring::usage::UsageRecord;
use chrono::DateTime;
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::path::PathBuf;

/// Component life-limit and overhaul monitoring.
#[derive(Debug, Parser)]
#[command(name = "aerotrack")]
pub struct MonitorCli {
    /// Directory holding `.aerotrack/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Engine settings (TOML); falls back to `AEROTRACK_CONFIG`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: MonitorCommand,
}

#[derive(Debug, clap::Args)]
pub struct LinkArgs {
    pub component: String,
    pub control: String,
    /// hours, cycles, calendar_months or calendar_years
    #[arg(long, default_value = "hours")]
    pub unit: String,
    /// Life limit in `unit`
    #[arg(long)]
    pub limit: f64,
    /// Parent component (aircraft or assembly) the component is installed on
    #[arg(long)]
    pub parent: Option<String>,
    /// Derive the current value from the parent's accumulated usage
    #[arg(long)]
    pub follow_parent: bool,
    /// Component usage at install time (defaults to `--current` or 0)
    #[arg(long)]
    pub component_at_install: Option<f64>,
    /// Parent usage at install time (defaults to the parent's usage now)
    #[arg(long)]
    pub parent_at_install: Option<f64>,
    /// Assert the current value directly
    #[arg(long)]
    pub current: Option<f64>,
    /// Overhaul interval; enables the overhaul policy
    #[arg(long, requires = "max_cycles")]
    pub interval: Option<f64>,
    #[arg(long, requires = "interval")]
    pub max_cycles: Option<u32>,
    #[arg(long, default_value_t = 0)]
    pub current_cycle: u32,
    /// Usage at the last completed overhaul (defaults to `current_cycle * interval`)
    #[arg(long, requires = "interval")]
    pub hours_at_last: Option<f64>,
    /// Thresholds `morado,rojo,naranja,amarillo,verde` for this state
    #[arg(long)]
    pub semaforo: Option<String>,
    /// Thresholds applied to the overhaul boundary
    #[arg(long, requires = "interval")]
    pub overhaul_semaforo: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
pub enum MonitorCommand {
    /// Link a control to a component and compute its first status.
    Link(LinkArgs),
    /// List monitored states, newest first.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a stored state with a freshly computed projection.
    Show { component: String, control: String },
    /// Set the current usage value of a state for this write.
    SetUsage {
        component: String,
        control: String,
        value: f64,
    },
    /// Override the next overhaul boundary for this write.
    OverrideNext {
        component: String,
        control: String,
        value: f64,
    },
    /// Register a component in the usage ledger.
    RegisterComponent {
        id: String,
        #[arg(long)]
        parent: Option<String>,
        /// Track a usage record in this unit
        #[arg(long)]
        unit: Option<String>,
        #[arg(long, requires = "unit")]
        limit: Option<f64>,
        #[arg(long, requires = "unit", default_value_t = 0.0)]
        accumulated: f64,
    },
    /// Post usage against a component and refresh the states that follow it.
    PostUsage {
        id: String,
        #[arg(allow_negative_numbers = true)]
        amount: f64,
        #[arg(long, default_value = "hours")]
        unit: String,
    },
    /// Record a completed overhaul at the state's current value.
    CompleteOverhaul { component: String, control: String },
    /// Allow more overhaul cycles.
    RaiseMaxCycles {
        component: String,
        control: String,
        max_cycles: u32,
    },
    /// Map a remaining distance onto a semáforo band.
    Classify {
        #[arg(allow_negative_numbers = true)]
        remaining: f64,
        /// Thresholds `morado,rojo,naranja,amarillo,verde`
        #[arg(long)]
        semaforo: Option<String>,
    },
    /// States within the verde horizon of their next boundary.
    Upcoming,
    /// Remove a monitored state.
    Rm { component: String, control: String },
    /// Remove a component, its usage records and every state linked to it.
    RmComponent { id: String },
    /// Export monitored states to stdout.
    Export,
    /// Import monitored states from stdin.
    Import,
    /// Show basic statistics about monitored states.
    Stats,
    /// Migrate a JSONL file to a SQLite database.
    Migrate {
        /// Path to the source JSONL file
        #[arg(long)]
        jsonl: PathBuf,
        /// Path to the destination SQLite database file
        #[arg(long)]
        sqlite: PathBuf,
    },
    /// Compact a JSONL file keeping the last line per component and control.
    Compact {
        /// Input JSONL file to compact
        #[arg(long)]
        input: PathBuf,
        /// Output JSONL file to write results
        #[arg(long)]
        output: PathBuf,
    },
}

struct Session {
    root: PathBuf,
    store: Box<dyn MonitoredStateStore>,
    resolver: StatusResolver,
    ledger: UsageLedger,
}

impl Session {
    fn open(root: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        let store = factory::open_store(&root, None)?;
        let ledger = UsageLedger::load(&factory::usage_ledger_path(&root))?;
        Ok(Self {
            root,
            store,
            resolver: StatusResolver::with_system_clock(config),
            ledger,
        })
    }

    fn save_ledger(&self) -> anyhow::Result<()> {
        self.ledger.save(&factory::usage_ledger_path(&self.root))
    }

    fn fetch(&self, component: &str, control: &str) -> anyhow::Result<MonitoredState> {
        let mut state = self
            .store
            .get(component, control)?
            .ok_or_else(|| anyhow::anyhow!("not found: state {component}/{control}"))?;
        state.begin_write();
        Ok(state)
    }

    /// Violations are already logged by the resolver.
    fn save(&self, state: &mut MonitoredState) -> anyhow::Result<()> {
        self.resolver
            .save(self.store.as_ref(), state, &self.ledger)?;
        println!("{}", summary_line(state));
        Ok(())
    }
}

fn summary_line(state: &MonitoredState) -> String {
    let band = state.band.map(|b| b.as_str()).unwrap_or("-");
    format!(
        "{}\t{}\t{}\t{band}\t{}/{}",
        state.component_id,
        state.control_id,
        state.status,
        state.current_value.value,
        state.limit_value
    )
}

fn build_state(
    args: &LinkArgs,
    ledger: &UsageLedger,
    now: DateTime<Utc>,
) -> anyhow::Result<MonitoredState> {
    for (flag, value) in [
        ("limit", Some(args.limit)),
        ("component-at-install", args.component_at_install),
        ("parent-at-install", args.parent_at_install),
        ("interval", args.interval),
        ("hours-at-last", args.hours_at_last),
    ] {
        if let Some(value) = value
            && !value.is_finite()
        {
            anyhow::bail!("--{flag} must be a finite number, got {value}");
        }
    }
    let unit = UsageUnit::parse(&args.unit)?;
    let mut state = MonitoredState::new(&args.component, &args.control, unit, args.limit, now);
    state.parent_id = args.parent.clone();
    if let Some(list) = &args.semaforo {
        state.semaforo = Some(SemaforoConfig::parse_list(list)?);
    }
    if let (Some(interval), Some(max_cycles)) = (args.interval, args.max_cycles) {
        let mut policy = OverhaulPolicy::new(interval, max_cycles)?;
        policy.current_cycle = args.current_cycle;
        policy.hours_at_last_overhaul = args
            .hours_at_last
            .unwrap_or(f64::from(args.current_cycle) * interval);
        if let Some(list) = &args.overhaul_semaforo {
            policy.semaforo = Some(SemaforoConfig::parse_list(list)?);
        }
        state.overhaul = Some(policy);
    }
    if args.follow_parent {
        state.based_on_parent_usage = true;
        let parent_now = ledger
            .accumulated_usage(state.usage_owner(), unit)?
            .unwrap_or(0.0);
        let component_at_install = args.component_at_install.or(args.current).unwrap_or(0.0);
        let parent_at_install = args.parent_at_install.unwrap_or(parent_now);
        state.install_offset = install_offset(component_at_install, parent_at_install);
    }
    if let Some(current) = args.current {
        state.set_current_value(current)?;
    }
    Ok(state)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::load_from_env(),
    }
}

/// Execute the monitoring command.
pub fn run(cli: MonitorCli) -> anyhow::Result<()> {
    match cli.cmd {
        MonitorCommand::Migrate { jsonl, sqlite } => {
            let n = aerotrack_monitoring::migrate::migrate_jsonl_to_sqlite(&jsonl, &sqlite)?;
            println!("Migrated {n} states");
        }
        MonitorCommand::Compact { input, output } => {
            let (read, written) = aerotrack_monitoring::migrate::compact_jsonl(&input, &output)?;
            println!("Read {read} entries, wrote {written} entries");
        }
        MonitorCommand::Classify {
            remaining,
            semaforo,
        } => {
            let config = match semaforo {
                Some(list) => SemaforoConfig::parse_list(&list)?,
                None => load_config(cli.config.as_deref())?.default_semaforo,
            };
            println!("{}", semaforo::classify(remaining, &config));
        }
        cmd => {
            let root = match cli.root {
                Some(root) => root,
                None => std::env::current_dir()?,
            };
            let config = load_config(cli.config.as_deref())?;
            let mut session = Session::open(root, config)?;
            run_session(&mut session, cmd)?;
        }
    }
    Ok(())
}

fn run_session(session: &mut Session, cmd: MonitorCommand) -> anyhow::Result<()> {
    match cmd {
        MonitorCommand::Link(args) => {
            let now = session.resolver.clock().now();
            let mut state = build_state(&args, &session.ledger, now)?;
            session
                .resolver
                .insert(session.store.as_ref(), &mut state, &session.ledger)?;
            println!("{}", summary_line(&state));
        }
        MonitorCommand::List { status } => {
            let status = status.as_deref().map(Status::parse).transpose()?;
            for state in session.store.list(status)? {
                println!("{}", summary_line(&state));
            }
        }
        MonitorCommand::Show { component, control } => {
            let state = session
                .store
                .get(&component, &control)?
                .ok_or_else(|| anyhow::anyhow!("not found: state {component}/{control}"))?;
            let projection = session.resolver.preview(&state, &session.ledger)?;
            let view = serde_json::json!({
                "state": state,
                "projection": projection,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        MonitorCommand::SetUsage {
            component,
            control,
            value,
        } => {
            let mut state = session.fetch(&component, &control)?;
            state.set_current_value(value)?;
            session.save(&mut state)?;
        }
        MonitorCommand::OverrideNext {
            component,
            control,
            value,
        } => {
            let mut state = session.fetch(&component, &control)?;
            state.override_next_overhaul_at(value)?;
            session.save(&mut state)?;
        }
        MonitorCommand::RegisterComponent {
            id,
            parent,
            unit,
            limit,
            accumulated,
        } => {
            let record = match unit {
                Some(unit) => {
                    let Some(limit) = limit else {
                        anyhow::bail!("--limit is required with --unit");
                    };
                    Some(UsageRecord::with_accumulated(
                        UsageUnit::parse(&unit)?,
                        limit,
                        accumulated,
                    )?)
                }
                None => None,
            };
            let component = session.ledger.register(&id, parent);
            if let Some(record) = record {
                component.track(record);
            }
            session.save_ledger()?;
            println!("Registered {id}");
        }
        MonitorCommand::PostUsage { id, amount, unit } => {
            let unit = UsageUnit::parse(&unit)?;
            let total = session.ledger.post_usage(&id, unit, amount)?;
            session.save_ledger()?;
            let outcome = session.resolver.refresh_dependents(
                session.store.as_ref(),
                &id,
                &session.ledger,
            )?;
            for (state, _) in &outcome.refreshed {
                println!("{}", summary_line(state));
            }
            println!(
                "Posted {amount} {} to {id} (total {total}); refreshed {} states",
                unit.as_str(),
                outcome.refreshed.len()
            );
            for failure in &outcome.failed {
                eprintln!(
                    "{}\t{}\tnot refreshed: {}",
                    failure.component_id,
                    failure.control_id,
                    failure.error
                );
            }
            if !outcome.failed.is_empty() {
                anyhow::bail!("{} dependent states could not be refreshed", outcome.failed.len());
            }
        }
        MonitorCommand::CompleteOverhaul { component, control } => {
            let mut state = session.fetch(&component, &control)?;
            let now = session.resolver.clock().now();
            let cycle = overhaul::complete_overhaul(&mut state, now)?;
            session.save(&mut state)?;
            println!("Overhaul {cycle} completed");
        }
        MonitorCommand::RaiseMaxCycles {
            component,
            control,
            max_cycles,
        } => {
            let mut state = session.fetch(&component, &control)?;
            overhaul::raise_max_cycles(&mut state, max_cycles)?;
            session.save(&mut state)?;
        }
        MonitorCommand::Upcoming => {
            let default_semaforo = session.resolver.config().default_semaforo.clone();
            for state in session.store.list(None)? {
                let projection = match session.resolver.preview(&state, &session.ledger) {
                    Ok(projection) => projection,
                    Err(e) => {
                        tracing::warn!(
                            "skipping {}/{}: {e}",
                            state.component_id,
                            state.control_id
                        );
                        continue;
                    }
                };
                let horizon = semaforo::applicable_config(&state).unwrap_or(&default_semaforo);
                if horizon.is_upcoming(projection.hours_to_next_boundary) {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        state.component_id,
                        state.control_id,
                        projection.status,
                        projection.band,
                        projection.hours_to_next_boundary
                    );
                }
            }
        }
        MonitorCommand::Rm { component, control } => {
            session.store.delete(&component, &control)?;
        }
        MonitorCommand::RmComponent { id } => {
            let n = session.store.delete_component(&id)?;
            if session.ledger.remove(&id).is_some() {
                session.save_ledger()?;
            }
            println!("Removed {n} states");
        }
        MonitorCommand::Export => {
            let mut out = std::io::stdout();
            session.store.export(&mut out)?;
        }
        MonitorCommand::Import => {
            let mut input = std::io::stdin();
            let n = session.store.import(&mut input)?;
            println!("Imported {n} states");
        }
        MonitorCommand::Stats => {
            let stats = session.store.stats()?;
            println!("{stats}");
        }
        MonitorCommand::Migrate { .. }
        | MonitorCommand::Compact { .. }
        | MonitorCommand::Classify { .. } => unreachable!(),
    }
    Ok(())
}
