use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;

use drive_ledger::capabilities::{resolve_tank_capacity, HttpTankOracle, NoopWakeLock, TerminalBell};
use drive_ledger::dashboard;
use drive_ledger::live_status::LiveStatus;
use drive_ledger::maintenance;
use drive_ledger::model::{AppProfile, Car, MaintenanceTask, UserProfile};
use drive_ledger::report::{self, ReportWindow};
use drive_ledger::sampler::{LocationSource, ReplaySource, SimulatedRoute};
use drive_ledger::storage::Storage;
use drive_ledger::store::{Action, ExpenseInput, RefuelInput};
use drive_ledger::{AppState, LedgerConfig, Phase, Tracker};

#[derive(Parser, Debug)]
#[command(name = "drive_ledger")]
#[command(about = "Shift, ride and fuel ledger for ride-hailing drivers", long_about = None)]
struct Args {
    /// Directory holding the ledger snapshot and live status
    #[arg(long, global = true, default_value = "drive_ledger_data")]
    data_dir: PathBuf,

    /// JSON file overriding numeric defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set up driver, vehicle and reserve percentages
    Onboard {
        #[arg(long)]
        name: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        year: Option<u16>,
        /// Liters; looked up through --oracle-url when omitted
        #[arg(long)]
        tank_capacity: Option<f64>,
        #[arg(long)]
        oracle_url: Option<String>,
        #[arg(long)]
        km_per_liter: Option<f64>,
        /// Percent of gross set aside for maintenance
        #[arg(long, default_value = "5")]
        maintenance_pct: f64,
        /// Percent of gross set aside for emergencies
        #[arg(long, default_value = "3")]
        emergency_pct: f64,
        /// Current fuel in liters (defaults to a full tank)
        #[arg(long)]
        fuel_level: Option<f64>,
        #[arg(long, default_value = "0")]
        odometer: f64,
    },

    /// Add or replace an app commission profile
    AppProfile {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        commission_pct: f64,
        /// Flat fare used when a ride is finished without an amount
        #[arg(long)]
        fixed_gross: Option<f64>,
        /// Select this profile for new shifts
        #[arg(long)]
        default: bool,
    },

    /// Run a shift with live location tracking; commands are read from stdin
    Track {
        /// Odometer at shift start (defaults to the last known reading)
        #[arg(long)]
        start_odometer: Option<f64>,
        /// App profile for this shift
        #[arg(long)]
        app: Option<String>,
        /// Replay fixes from a JSON-lines file instead of simulating
        #[arg(long)]
        replay: Option<PathBuf>,
        #[arg(long, default_value = "-23.5505")]
        lat: f64,
        #[arg(long, default_value = "-46.6333")]
        lon: f64,
        /// Serve live status on this port
        #[arg(long)]
        dashboard: Option<u16>,
    },

    /// Log a fuel purchase
    Refuel {
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "0")]
        amount: f64,
        #[arg(long, default_value = "0")]
        liters: f64,
        #[arg(long)]
        odometer: f64,
        #[arg(long)]
        full_tank: bool,
        #[arg(long)]
        station: Option<String>,
    },

    /// Log an expense
    Expense {
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        category: String,
        /// Deduct from the open shift
        #[arg(long)]
        work: bool,
        #[arg(long)]
        description: Option<String>,
    },

    /// Maintenance tasks and due dates
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceCommand,
    },

    /// Totals over the last N days
    Report {
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Export closed sessions as CSV
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum MaintenanceCommand {
    Upsert {
        /// Existing task id to replace
        #[arg(long, default_value = "")]
        id: String,
        #[arg(long)]
        service: String,
        #[arg(long)]
        interval_km: f64,
        #[arg(long)]
        last_odometer: f64,
        #[arg(long, default_value = "0")]
        last_cost: f64,
    },
    List,
    Delete {
        #[arg(long)]
        id: String,
    },
}

/// One line typed while tracking
#[derive(Debug, PartialEq)]
enum TrackInput {
    Action(Action),
    Quote(Option<f64>),
    Status,
    Quit,
}

fn parse_amount(word: Option<&str>, what: &str) -> Result<f64> {
    match word {
        Some(w) => w
            .replace(',', ".")
            .parse::<f64>()
            .with_context(|| format!("invalid {}: {}", what, w)),
        None => bail!("missing {}", what),
    }
}

fn parse_track_input(line: &str) -> Result<TrackInput> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(TrackInput::Status);
    };

    let input = match verb.to_ascii_lowercase().as_str() {
        "accept" | "a" => TrackInput::Action(Action::AcceptRide),
        "board" | "b" => TrackInput::Action(Action::BoardPassenger),
        // An empty amount is not an error; the ride closes with zero gross
        "finish" | "f" => TrackInput::Action(Action::FinishRide {
            gross: words.next().and_then(|w| w.replace(',', ".").parse().ok()),
        }),
        "cancel" | "c" => TrackInput::Action(Action::CancelRide),
        "end" | "e" => TrackInput::Action(Action::EndShift {
            end_odometer: parse_amount(words.next(), "odometer")?,
        }),
        "expense" | "x" => {
            let amount = parse_amount(words.next(), "amount")?;
            let category = words.next().unwrap_or("other").to_string();
            let work_expense = words.next().map(|w| w == "work").unwrap_or(false);
            TrackInput::Action(Action::LogExpense(ExpenseInput {
                category,
                amount,
                description: None,
                work_expense,
            }))
        }
        "refuel" | "r" => {
            let price_per_liter = parse_amount(words.next(), "price per liter")?;
            let (liters, full_tank) = match words.next() {
                Some("full") => (0.0, true),
                other => (parse_amount(other, "liters")?, false),
            };
            let station = words.collect::<Vec<_>>().join(" ");
            TrackInput::Action(Action::Refuel(RefuelInput {
                price_per_liter,
                amount_spent: price_per_liter * liters,
                liters,
                odometer: 0.0,
                full_tank,
                station: Some(station).filter(|s| !s.is_empty()),
            }))
        }
        "quote" | "q" => TrackInput::Quote(match words.next() {
            Some(w) => Some(parse_amount(Some(w), "gross")?),
            None => None,
        }),
        "status" | "s" => TrackInput::Status,
        "quit" | "exit" => TrackInput::Quit,
        other => bail!("unknown command: {}", other),
    };
    Ok(input)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn load(config: &LedgerConfig) -> (Storage, AppState) {
    let storage = Storage::new(config.snapshot_path());
    let state = storage.load();
    (storage, state)
}

fn apply_and_save(config: &LedgerConfig, action: Action) -> Result<AppState> {
    let storage = Storage::new(config.snapshot_path());
    Ok(storage.apply_offline(action, Utc::now(), config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => LedgerConfig::load(path),
        None => LedgerConfig::default(),
    }
    .with_data_dir(&args.data_dir);

    match args.command {
        Command::Onboard {
            name,
            brand,
            model,
            year,
            tank_capacity,
            oracle_url,
            km_per_liter,
            maintenance_pct,
            emergency_pct,
            fuel_level,
            odometer,
        } => {
            let mut car = Car {
                brand,
                model,
                year,
                tank_capacity_l: 0.0,
                km_per_liter,
            };
            let timeout = Duration::from_secs(config.oracle_timeout_secs);
            let oracle = oracle_url.map(|url| HttpTankOracle::new(url, timeout));
            car.tank_capacity_l = resolve_tank_capacity(tank_capacity, oracle.as_ref(), &car, timeout).await;

            let (_, state) = load(&config);
            let profile = UserProfile {
                name,
                current_fuel_level: fuel_level.unwrap_or(car.tank_capacity_l),
                car,
                maintenance_reserve_rate: maintenance_pct / 100.0,
                emergency_reserve_rate: emergency_pct / 100.0,
                default_app_profile: state.profile.default_app_profile.clone(),
                last_odometer: odometer,
            };
            let state = apply_and_save(&config, Action::UpdateProfile(profile))?;
            println!(
                "Onboarded {} with a {:.0} L {} {}",
                state.profile.name,
                state.profile.car.tank_capacity_l,
                state.profile.car.brand,
                state.profile.car.model
            );
            if state.profile.car.tank_capacity_l <= 0.0 {
                println!("Tank size unknown; run onboard again with --tank-capacity <liters> to set it");
            }
        }

        Command::AppProfile {
            id,
            name,
            commission_pct,
            fixed_gross,
            default,
        } => {
            let mut state = apply_and_save(
                &config,
                Action::UpsertAppProfile(AppProfile {
                    id: id.clone(),
                    name,
                    commission_rate: commission_pct / 100.0,
                    fixed_gross,
                }),
            )?;
            if default {
                let mut profile = state.profile.clone();
                profile.default_app_profile = Some(id.clone());
                state = apply_and_save(&config, Action::UpdateProfile(profile))?;
            }
            println!("{} app profiles configured", state.app_profiles.len());
        }

        Command::Track {
            start_odometer,
            app,
            replay,
            lat,
            lon,
            dashboard: port,
        } => run_track(config, start_odometer, app, replay, lat, lon, port).await?,

        Command::Refuel {
            price,
            amount,
            liters,
            odometer,
            full_tank,
            station,
        } => {
            let state = apply_and_save(
                &config,
                Action::Refuel(RefuelInput {
                    price_per_liter: price,
                    amount_spent: amount,
                    liters,
                    odometer,
                    full_tank,
                    station,
                }),
            )?;
            println!(
                "Fuel now {:.1} L of {:.0} L",
                state.profile.current_fuel_level, state.profile.car.tank_capacity_l
            );
        }

        Command::Expense {
            amount,
            category,
            work,
            description,
        } => {
            let state = apply_and_save(
                &config,
                Action::LogExpense(ExpenseInput {
                    category,
                    amount,
                    description,
                    work_expense: work,
                }),
            )?;
            if work && !state.is_shift_open() {
                println!("No shift open: expense recorded but not deducted from any shift");
            }
        }

        Command::Maintenance { action } => match action {
            MaintenanceCommand::Upsert {
                id,
                service,
                interval_km,
                last_odometer,
                last_cost,
            } => {
                apply_and_save(
                    &config,
                    Action::UpsertMaintenance(MaintenanceTask {
                        id,
                        service,
                        interval_km,
                        last_service_odometer: last_odometer,
                        last_cost,
                    }),
                )?;
            }
            MaintenanceCommand::List => {
                let (_, state) = load(&config);
                let outlook = maintenance::outlook(
                    &state.maintenance,
                    &state.sessions,
                    state.profile.last_odometer,
                    Utc::now(),
                    &config,
                );
                println!(
                    "Reserve {:.3}/km, {:.0} km in {} days -> {:.2}",
                    outlook.rate_per_km, outlook.rolling_km, config.rolling_window_days, outlook.monthly_reserve
                );
                for task in outlook.tasks {
                    println!(
                        "{:<8?} {:<20} due at {:>9.0} km ({:+.0} km) [{}]",
                        task.status, task.service, task.due_odometer, task.remaining_km, task.task_id
                    );
                }
            }
            MaintenanceCommand::Delete { id } => {
                apply_and_save(&config, Action::DeleteMaintenance { id })?;
            }
        },

        Command::Report { days } => {
            let (_, state) = load(&config);
            let totals = report::aggregate(&state.sessions, ReportWindow::Days(days), Utc::now());
            println!("=== Last {} days ===", days);
            println!("Shifts:        {}", totals.sessions);
            println!("Rides:         {}", totals.rides);
            println!("Gross:         {:.2}", totals.gross);
            println!("App tax:       {:.2}", totals.app_tax);
            println!("Fuel:          {:.2}", totals.fuel_cost);
            println!("Reserves:      {:.2}", totals.reserves());
            println!("Work expenses: {:.2}", totals.work_expenses);
            println!("Net:           {:.2}", totals.net);
            println!("Km:            {:.1} ({:.2}/km)", totals.km, totals.net_per_km());
        }

        Command::Export { output } => {
            let (_, state) = load(&config);
            let csv = report::sessions_csv(&state.sessions);
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    println!("Exported {} sessions to {}", state.sessions.len(), path.display());
                }
                None => print!("{}", csv),
            }
        }
    }

    Ok(())
}

async fn run_track(
    config: LedgerConfig,
    start_odometer: Option<f64>,
    app: Option<String>,
    replay: Option<PathBuf>,
    lat: f64,
    lon: f64,
    port: Option<u16>,
) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let (storage, state) = load(&config);
    let needs_start = state.phase == Phase::Idle;
    let last_odometer = state.profile.last_odometer;

    let period = Duration::from_secs(config.simulated_fix_interval_secs.max(1));
    let source: Box<dyn LocationSource> = match replay {
        Some(path) => Box::new(ReplaySource::new(path, period)),
        None => Box::new(SimulatedRoute::new(lat, lon, period)),
    };

    let tracker = Tracker::new(
        state,
        config.clone(),
        storage,
        source,
        Box::new(NoopWakeLock::default()),
        Box::new(TerminalBell),
    );
    let (handle, join) = tracker.spawn();

    if let Some(port) = port {
        let dashboard_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::start_dashboard(dashboard_handle, port).await {
                log::error!("[DASHBOARD] {}", e);
            }
        });
    }

    if needs_start {
        let status = handle
            .apply(Action::StartShift {
                start_odometer: start_odometer.unwrap_or(last_odometer),
                app_profile_id: app,
            })
            .await?;
        println!("[{}] Shift started | {}", ts_now(), status.summary_line());
    } else {
        println!("[{}] Resumed open shift", ts_now());
    }
    println!("Commands: accept, board, finish <gross>, cancel, quote [gross], refuel <price> <liters|full> [station], expense <amount> <category> [work], end <odometer>, status, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_track_input(&line) {
            Ok(input) => input,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match input {
            TrackInput::Action(action) => match handle.apply(action).await {
                Ok(status) => {
                    println!("[{}] {}", ts_now(), status.summary_line());
                    if status.phase == Phase::Idle {
                        break;
                    }
                }
                Err(e) if e.is_user_error() => println!("{}", e),
                Err(e) => return Err(e.into()),
            },
            TrackInput::Quote(gross) => {
                let state = handle.snapshot().await?;
                match LiveStatus::quote(&state, gross, &config) {
                    Some(q) => println!(
                        "gross {:.2} - app {:.2} - fuel {:.2} - reserves {:.2} = net {:.2}",
                        q.gross,
                        q.app_tax,
                        q.fuel_cost,
                        q.reserves(),
                        q.net_profit
                    ),
                    None => println!("No ride in progress"),
                }
            }
            TrackInput::Status => println!("[{}] {}", ts_now(), handle.status().await?.summary_line()),
            TrackInput::Quit => break,
        }
    }

    handle.shutdown().await;
    let state = join.await?;
    if let Some(session) = state.sessions.last().filter(|_| state.phase == Phase::Idle) {
        println!(
            "Shift closed: {} rides, gross {:.2}, net {:.2}, {:.1} km",
            session.rides.len(),
            session.total_gross,
            session.total_net,
            session.driven_km()
        );
    } else {
        println!("Shift left open; run `track` again to resume");
    }
    Ok(())
}
