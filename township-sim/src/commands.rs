//! Command implementations for the `township` binary.
//!
//! Handles:
//! - run: load config and world, tick until done or interrupted, flush, print
//! - check: validate a world definition without running it

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use township_core::config::TownConfig;
use township_core::loader::WorldDefinition;

use crate::clock::TickReport;
use crate::error::SimError;
use crate::world::World;

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // a second init (tests, embedding) keeps the first subscriber
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Load the config file, or defaults when none is given.
///
/// # Errors
/// Unreadable or invalid config files.
pub fn load_config(path: Option<&Path>) -> Result<TownConfig> {
    match path {
        Some(path) => TownConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(TownConfig::default()),
    }
}

/// Run a world for `ticks` ticks and print the final snapshot as JSON.
///
/// Ctrl-C cancels the tick in flight; the world is still flushed.
///
/// # Errors
/// Config and world loading failures, snapshot store failures, and a world
/// in which every runtime has failed.
pub async fn run_world(
    config_path: Option<&Path>,
    world_path: &Path,
    ticks: u64,
    stream: bool,
    log_level_override: Option<&str>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let level = log_level_override.unwrap_or(&config.general.log_level).to_string();
    init_tracing(&level, false);

    let definition = WorldDefinition::from_file(world_path)
        .with_context(|| format!("Failed to load world from {}", world_path.display()))?;
    let mut world = World::init(definition, config).context("Failed to initialise world")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after the current tick is discarded");
            let _ = shutdown_tx.send(true);
        }
    });

    let printer = stream.then(|| tokio::spawn(print_reports(world.subscribe())));

    info!(ticks, "Starting simulation");
    match world.run(ticks, shutdown_rx).await {
        Ok(_) => {}
        Err(SimError::Cancelled { tick }) => warn!(tick, "Simulation interrupted"),
        Err(err) => return Err(err).context("Simulation aborted"),
    }

    let snapshot = world.teardown().context("Failed to flush world state")?;
    if let Some(printer) = printer {
        // teardown dropped the sender, so the printer drains and exits
        let _ = printer.await;
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn print_reports(mut reports: broadcast::Receiver<TickReport>) {
    loop {
        match reports.recv().await {
            Ok(report) => println!("{}", report_line(&report)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Report printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn report_line(report: &TickReport) -> serde_json::Value {
    serde_json::json!({
        "tick": report.tick,
        "time": report.time.to_string(),
        "committed": report.committed,
        "memories_appended": report.memories_appended,
        "failed": report.failed.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "decayed": report.decay.as_ref().map(|d| d.decayed),
    })
}

/// Validate a world definition against the config without running it.
///
/// # Errors
/// Anything [`World::init`] would reject.
pub fn check_world(config_path: Option<&Path>, world_path: &Path, log_level_override: Option<&str>) -> Result<()> {
    let mut config = load_config(config_path)?;
    init_tracing(log_level_override.unwrap_or(&config.general.log_level), false);
    // checking must not create or read a database
    config.persistence.enabled = false;

    let definition = WorldDefinition::from_file(world_path)
        .with_context(|| format!("Failed to load world from {}", world_path.display()))?;
    let locations = definition.locations.len();
    let world = World::init(definition, config).context("World definition is invalid")?;
    let snapshot = world.snapshot();

    println!(
        "ok: {} agents ({} live), {} locations",
        snapshot.agents.len(),
        snapshot.live_agents().count(),
        locations
    );
    for (agent, reason) in &snapshot.failed {
        println!("  {agent}: {reason}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_path_gives_defaults() {
        let config = load_config(None).expect("defaults");
        assert_eq!(config.clock.step_secs, TownConfig::default().clock.step_secs);
    }

    #[test]
    fn check_rejects_unknown_home() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("town.json");
        std::fs::write(
            &path,
            r#"{
                "locations": [{"id": "park", "name": "Park", "type": "town", "position": {"x": 0.0, "y": 0.0}}],
                "personas": [{"id": "a", "name": "A", "age": 30, "home": "nowhere",
                              "schedule": [{"time": "08:00", "activity": "walk", "location": "park"}]}]
            }"#,
        )
        .expect("write world");
        assert!(check_world(None, &path, Some("error")).is_err());
    }
}
