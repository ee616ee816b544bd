//! Connects to a running simulator and prints the leaderboard
//!
//! Usage: live_leaderboard [broadcasting.json] [reference lap directory]
//!
//! Set `RUST_LOG=acc_leaderboard=debug` for protocol diagnostics.

use std::path::PathBuf;

use acc_leaderboard::core::BroadcastingSettings;
use acc_leaderboard::{
    BroadcastClient, ClientConfig, EngineConfig, Gap, LeaderboardEngine, LeaderboardSnapshot, SessionContext,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn format_gap(gap: Option<Gap>) -> String {
    match gap {
        Some(Gap::Time(secs)) => format!("{:+.1}s", secs),
        Some(Gap::Laps(laps)) => format!("{}L", laps),
        None => "-".to_string(),
    }
}

fn print_snapshot(snapshot: &LeaderboardSnapshot) {
    println!(
        "\n{:?} session {} at {:.0}s",
        snapshot.session_type,
        snapshot.session_index,
        snapshot.session_time_ms / 1000.0
    );
    for entry in &snapshot.entries {
        println!(
            "{:>3} {:>3} #{:<4} {:<6} {:<24} {:>8} {:>8} laps {}",
            entry.overall_rank,
            entry.class_rank,
            entry.race_number,
            entry.class.name(),
            entry.driver.as_deref().unwrap_or(&entry.team_name),
            format_gap(entry.gaps.to_leader),
            format_gap(entry.gaps.to_ahead),
            entry.laps,
        );
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = ClientConfig {
        display_name: "live_leaderboard".to_string(),
        ..ClientConfig::default()
    };
    if let Some(path) = args.next() {
        match BroadcastingSettings::from_json_file(&path) {
            Ok(settings) => config = config.with_broadcasting_settings(&settings),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read broadcasting settings");
                return;
            }
        }
    }
    let engine_config = EngineConfig {
        reference_dir: args.next().map(PathBuf::from),
        ..EngineConfig::default()
    };

    let ctx = SessionContext::named("live_leaderboard");
    let engine = match LeaderboardEngine::from_config(engine_config, ctx.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Invalid engine configuration");
            return;
        }
    };

    info!(remote = %config.remote_addr, "Connecting to simulator");
    let (mut client, events) = match BroadcastClient::connect(config, ctx.clone()).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(error = %e, "Failed to connect");
            return;
        }
    };

    let (snapshot_tx, mut snapshot_rx) = watch::channel(None);
    let engine_task = tokio::spawn(engine.run(events, snapshot_tx));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = snapshot_rx.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    print_snapshot(&snapshot);
                }
            }
        }
    }

    if let Err(e) = client.shutdown().await {
        error!(error = %e, "Client stopped with error");
    }
    let _ = engine_task.await;

    for (name, stats) in ctx.timings().snapshot() {
        info!(
            timer = name,
            count = stats.count,
            mean_us = stats.mean().as_micros() as u64,
            max_us = stats.max.as_micros() as u64,
            "Timing"
        );
    }
}
