//! Worker lifecycle: health counters, termination monitors and the
//! graceful shutdown path
//!
//! The worker is designed to be supervised: rather than trying to
//! repair a degraded state in place, a monitor asks for termination
//! and the supervisor restarts the process fresh.

use crate::logbuf::LogBuffer;
use crate::pipeline::AuthorizationPipeline;
use chrono::{Duration as ChronoDuration, Local, Timelike};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared health counters, reset on reload
#[derive(Debug, Default)]
pub struct Counters {
    client_failures: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    pub fn record_client_failure(&self) {
        self.client_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_failures(&self) -> u64 {
        self.client_failures.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.client_failures.store(0, Ordering::Relaxed);
    }
}

/// Why the worker is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Connections,
    ClientFailures,
    Lifespan,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Termination::Interrupt => "interrupt",
            Termination::Connections => "too many connections",
            Termination::ClientFailures => "too many client failures",
            Termination::Lifespan => "lifespan reached",
        };
        write!(f, "{}", reason)
    }
}

/// Periodically sample a gauge and request termination once it crosses
/// the ceiling. Used for the connection-table size and the
/// client-failure counter.
pub fn spawn_threshold_monitor<F, Fut>(
    reason: Termination,
    check: Duration,
    ceiling: u64,
    sample: F,
    tx: mpsc::Sender<Termination>,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = u64> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(check).await;
            let value = sample().await;
            if value > ceiling {
                warn!(%reason, value, ceiling, "threshold exceeded");
                let _ = tx.send(reason).await;
                return;
            }
        }
    })
}

/// Request termination once the worker has been up for `lifespan` and
/// the wall clock has entered one of the configured restart hours.
/// Restarts outside those hours are deferred to the next check.
pub fn spawn_lifespan_monitor(
    lifespan: ChronoDuration,
    check: Duration,
    restart_hours: Vec<u32>,
    tx: mpsc::Sender<Termination>,
) -> JoinHandle<()> {
    let end = Local::now() + lifespan;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(check).await;
            debug!("lifespan wakeup");
            let now = Local::now();
            if !restart_hours.contains(&now.hour()) {
                debug!("lifespan outside restart hours");
                continue;
            }
            if now > end {
                let _ = tx.send(Termination::Lifespan).await;
                return;
            }
        }
    })
}

/// Flush module logs and unload every module, bounded by the
/// configured timeout. A hung module hook must not block process exit.
pub async fn graceful_shutdown(
    reason: Termination,
    pipeline: Arc<AuthorizationPipeline>,
    logbuf: Arc<LogBuffer>,
    log_dir: impl AsRef<Path>,
    instance: &str,
    timeout: Duration,
) {
    info!(%reason, "shutting down");
    let log_dir = log_dir.as_ref().to_path_buf();
    let instance = instance.to_string();
    let work = tokio::task::spawn_blocking(move || {
        pipeline.unload();
        logbuf.flush(&log_dir, &instance);
    });
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(())) => info!("shutdown complete"),
        Ok(Err(e)) => warn!(error = %e, "shutdown work panicked"),
        Err(_) => warn!("shutdown timed out, exiting anyway"),
    }
}
