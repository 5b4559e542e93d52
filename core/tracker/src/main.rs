//! roster-tracker: host binary for the Roster detection core.
//!
//! Wires the spool-backed page adapter and the socket-backed registry sink
//! into the lifecycle controller, watches the spool for mutations, and serves
//! the control surface on its own socket.
//!
//! ## Subcommands
//!
//! - `run`: run the tracker loop against the snapshot spool
//! - `status`: query a running tracker's status

mod control;
mod logging;
mod watch;

use clap::{Parser, Subcommand};
use roster_core::{
    load_config, LifecycleController, RosterPaths, Scheduler, SocketRegistrySink,
    SpoolPageAdapter,
};
use roster_registry_protocol::Method;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "roster-tracker")]
#[command(about = "Roster meeting attendance tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker against the snapshot spool
    Run {
        /// Spool directory the page shim writes into (default: ~/.roster/spool)
        #[arg(long, value_name = "DIR")]
        spool: Option<PathBuf>,

        /// Tracker config file (default: ~/.roster/tracker.toml)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Query the running tracker's status
    Status,
}

static SHUTDOWN_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_signal: libc::c_int) {
    if let Some(flag) = SHUTDOWN_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_signal_handlers(flag: Arc<AtomicBool>) {
    let _ = SHUTDOWN_FLAG.set(flag);
    unsafe {
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { spool, config } => {
            let _logging_guard = logging::init();
            if let Err(err) = run(spool, config) {
                error!(error = %err, "roster-tracker run failed");
                std::process::exit(1);
            }
        }
        Commands::Status => {
            if let Err(err) = status() {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        }
    }
}

fn run(spool: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<(), String> {
    let paths = RosterPaths::resolve().map_err(|err| err.to_string())?;
    let config = load_config(config_path).map_err(|err| err.to_string())?;

    let spool_dir = spool.unwrap_or_else(|| paths.spool_dir());
    fs_err::create_dir_all(&spool_dir)
        .map_err(|err| format!("Failed to create spool directory: {}", err))?;
    let adapter = Arc::new(SpoolPageAdapter::new(&spool_dir));
    let sink = SocketRegistrySink::new(paths.registry_socket());

    let (scheduler, trigger_rx) = Scheduler::start(&config);
    let scheduler = Arc::new(scheduler);

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&shutdown));

    control::spawn_listener(paths.tracker_socket(), scheduler.sender())?;
    watch::spawn_spool_watcher(
        SpoolPageAdapter::new(&spool_dir),
        Arc::clone(&scheduler),
        Arc::clone(&shutdown),
    );

    info!(
        spool = %spool_dir.display(),
        socket = %paths.tracker_socket().display(),
        "Roster tracker started"
    );

    let controller = LifecycleController::new(
        config,
        adapter,
        sink,
        scheduler.sender(),
        Arc::clone(&shutdown),
    );
    // Blocks until StopTracking or a shutdown signal; the controller
    // finalizes any active session on its way out.
    controller.run(trigger_rx);

    shutdown.store(true, Ordering::SeqCst);
    scheduler.stop();
    info!("Roster tracker stopped");
    Ok(())
}

fn status() -> Result<(), String> {
    let paths = RosterPaths::resolve().map_err(|err| err.to_string())?;
    let response = control::query(&paths.tracker_socket(), Method::GetStatus)?;
    if !response.ok {
        let detail = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(format!("Tracker returned an error: {}", detail));
    }

    let data = response.data.unwrap_or(serde_json::Value::Null);
    let rendered = serde_json::to_string_pretty(&data)
        .map_err(|err| format!("Failed to render status: {}", err))?;
    println!("{}", rendered);
    Ok(())
}
