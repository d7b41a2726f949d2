//! Supervisor: discovers worker instances and keeps them running
//!
//! Each `<name>.json` in the config directory is one worker instance.
//! A worker that exits is restarted; rapid restarts build up an error
//! streak that escalates the restart delay to a cooldown so a
//! crash-looping worker cannot spin the host.

use clap::Parser;
use std::path::PathBuf;
use std::process::{self, Command};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const RESTART_WINDOW: Duration = Duration::from_secs(30);
const ERROR_STREAK_LIMIT: u32 = 3;
const RESTART_DELAY: Duration = Duration::from_millis(10);
const COOLDOWN_DELAY: Duration = Duration::from_secs(5);

/// Protocol-aware RADIUS relay supervisor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radrelay")]
struct Cli {
    /// Directory holding one <instance>.json per worker
    #[arg(value_name = "CONFIG_DIR", default_value = "/etc/radrelay")]
    config_dir: PathBuf,

    /// Worker binary to spawn
    #[arg(long, default_value = "radrelayd")]
    worker: String,

    /// Enable debug logging in workers
    #[arg(short, long)]
    debug: bool,
}

fn discover_instances(dir: &PathBuf) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut instances = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        instances.push((stem.to_string(), path.clone()));
    }
    instances.sort();
    Ok(instances)
}

fn run_instance(worker: String, instance: String, config: PathBuf, debug: bool) {
    let mut last = Instant::now();
    let mut errors: u32 = 0;
    loop {
        info!(instance = instance.as_str(), "starting worker");
        let mut command = Command::new(&worker);
        command
            .arg(&config)
            .arg("--instance")
            .arg(&instance);
        if debug {
            command.arg("--debug");
        }
        match command.status() {
            Ok(status) => {
                warn!(instance = instance.as_str(), %status, "worker ended")
            }
            Err(e) => {
                warn!(instance = instance.as_str(), error = %e, "worker failed to spawn")
            }
        }
        let now = Instant::now();
        let mut sleep = RESTART_DELAY;
        if now.duration_since(last) < RESTART_WINDOW {
            if errors > ERROR_STREAK_LIMIT {
                warn!(instance = instance.as_str(), "cool down for restart");
                sleep = COOLDOWN_DELAY;
            } else {
                errors += 1;
            }
        } else {
            errors = 0;
        }
        thread::sleep(sleep);
        last = now;
    }
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let instances = match discover_instances(&cli.config_dir) {
        Ok(instances) => instances,
        Err(e) => {
            eprintln!(
                "unable to read instances from {}: {}",
                cli.config_dir.display(),
                e
            );
            process::exit(1);
        }
    };
    if instances.is_empty() {
        eprintln!(
            "no instances found in {}, please configure some",
            cli.config_dir.display()
        );
        process::exit(1);
    }

    let mut handles = Vec::new();
    for (instance, config) in instances {
        let worker = cli.worker.clone();
        let debug = cli.debug;
        handles.push(thread::spawn(move || {
            run_instance(worker, instance, config, debug)
        }));
    }
    for handle in handles {
        // workers run forever; joining keeps the supervisor alive
        let _ = handle.join();
    }
}
