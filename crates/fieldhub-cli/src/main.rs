//! `fieldhub` – sensor gateway daemon.
//!
//! 1. Loads the JSON config named by the first argument (default
//!    `./config.json`); a missing file means defaults.
//! 2. Starts the persistence scheduler, the gateway coordinator and the
//!    realtime broadcaster, plus a simulated report source when `mock` is
//!    configured.
//! 3. Serves HTTP and WebSocket clients until **Ctrl-C**, then stops the
//!    listeners, the coordinator and finally flushes any pending config save.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use fieldhub_cockpit::CockpitServer;
use fieldhub_hal::SimulatedSource;
use fieldhub_kernel::{FileStore, Gateway, PersistenceScheduler};
use fieldhub_middleware::{Broadcaster, EventBus};
use fieldhub_types::ConfigDocument;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("fieldhub");
    print_banner();

    let path = config::path_from_args(std::env::args().skip(1));
    match run(path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("{}: {e}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    // ── Config ────────────────────────────────────────────────────────────
    let document = match config::load_from(&path)? {
        Some(document) => {
            info!(path = %path.display(), devices = document.devices.len(), "config loaded");
            document
        }
        None => {
            warn!(path = %path.display(), "config not found; using defaults");
            ConfigDocument::default()
        }
    };
    let mut runtime = document.clone();
    config::apply_env_overrides(&mut runtime);

    // ── Core tasks ────────────────────────────────────────────────────────
    let store = Arc::new(FileStore::new(&path));
    info!(path = %store.path().display(), "config changes are saved here");
    let delay = Duration::from_millis(runtime.persistence.delay);
    let (persistence, persistence_task) = PersistenceScheduler::new(store, delay).spawn();

    let bus = EventBus::default();
    let broadcaster = Broadcaster::new(Broadcaster::ping_interval_from_millis(
        runtime.ws.ping_interval,
    ));
    let broadcaster_task = broadcaster.clone().spawn(bus.subscribe());

    let mut gateway = Gateway::new(document, persistence.clone());
    gateway.observe(Arc::new(bus));
    let (gateway, gateway_task) = gateway.spawn();

    if let Some(mock) = &runtime.mock {
        let source = SimulatedSource::new(mock.macs.clone())
            .with_interval(Duration::from_millis(mock.interval));
        info!(devices = mock.macs.len(), "starting simulated devices");
        gateway.attach(Arc::new(source));
    }

    // ── Front end ─────────────────────────────────────────────────────────
    let server = CockpitServer::new(gateway.clone(), broadcaster)
        .with_http(runtime.http.clone())
        .with_ws(runtime.ws.clone())
        .bind()
        .await?;

    let (stop, mut shutdown) = watch::channel(false);
    let on_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = on_signal.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown will not be available");
    }

    let mut server_task = tokio::spawn(server.serve(shutdown.clone()));
    let served = tokio::select! {
        _ = shutdown.changed() => (&mut server_task).await,
        result = &mut server_task => {
            if matches!(result, Ok(Ok(()))) {
                // No listener enabled; keep the gateway running until Ctrl-C.
                let _ = shutdown.changed().await;
            }
            result
        }
    };
    match served {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "server failed"),
        Err(e) => error!(error = %e, "server task failed"),
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    drop(stop);
    gateway.shutdown().await;
    let _ = gateway_task.await;
    persistence.shutdown().await;
    let _ = persistence_task.await;
    let _ = broadcaster_task.await;

    println!("{}", "  ✓ Exiting fieldhub.".green());
    Ok(())
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____     __   ____        __ "#.bold().cyan());
    println!("{}", r#"  / __/__ _/ /__/ / /  __ __/ / "#.bold().cyan());
    println!("{}", r#" / _// / -_) / _  / _ \/ // / _ \"#.bold().cyan());
    println!("{}", r#"/_/ /_/\__/_/\_,_/_//_/\_,_/_.__/"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "fieldhub".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Sensor gateway");
    println!();
}
