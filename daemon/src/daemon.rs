//! Shared daemon state, the tick loop and the control request handler.

use crate::activity_log;
use crate::config::Config;
use crate::controller::{ThrottleController, TickReport, Transition};
use crate::protocol::{Request, Response, StatusData, DEFAULT_TAIL_LINES};
use crate::socket::RequestHandler;
use crate::status::StatusReport;
use crate::watch_state::WatchEntry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{error, info};

pub struct DaemonState {
    /// Held for a whole tick, so scheduled and manual passes never overlap.
    controller: Mutex<ThrottleController>,
    config: Config,
    log_path: PathBuf,
    latest_status: RwLock<Option<StatusReport>>,
    watch_snapshot: RwLock<Vec<WatchEntry>>,
    tick_count: AtomicU64,
    broadcast_tx: broadcast::Sender<String>,
}

impl DaemonState {
    pub fn new(
        config: Config,
        controller: ThrottleController,
        broadcast_tx: broadcast::Sender<String>,
    ) -> Self {
        let log_path = controller.log_path().to_path_buf();
        Self {
            controller: Mutex::new(controller),
            config,
            log_path,
            latest_status: RwLock::new(None),
            watch_snapshot: RwLock::new(Vec::new()),
            tick_count: AtomicU64::new(0),
            broadcast_tx,
        }
    }

    /// Runs one pass, publishes snapshots for readers and broadcasts a summary.
    pub async fn run_pass(&self) -> TickReport {
        let (report, snapshot) = {
            let mut controller = self.controller.lock().await;
            let report = controller.run_tick().await;
            (report, controller.watch_state().snapshot())
        };

        *self.latest_status.write().await = Some(report.status.clone());
        *self.watch_snapshot.write().await = snapshot;
        let tick_count = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;

        let throttled = report
            .transitions
            .iter()
            .filter(|t| matches!(t, Transition::Throttled { .. }))
            .count();
        let status = Response::Status {
            data: StatusData {
                watched_count: report.status.rows.len() as u32,
                running_count: report.status.running_count() as u32,
                throttled_count: throttled as u32,
                tick_count,
            },
        };
        if let Ok(json) = serde_json::to_string(&status) {
            // No receivers is fine.
            let _ = self.broadcast_tx.send(json);
        }
        report
    }

    /// Passes completed so far, scheduled and manual.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub async fn flush(&self) {
        if let Err(e) = self.controller.lock().await.flush() {
            error!("Failed to flush activity log: {}", e);
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DaemonState {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::ThrottleNow => {
                info!("Manual throttle pass requested");
                let report = self.run_pass().await;
                match serde_json::to_value(&report) {
                    Ok(data) => Response::data(data),
                    Err(e) => Response::error(e),
                }
            }

            Request::TailLog { params } => {
                let lines = params.lines.unwrap_or(DEFAULT_TAIL_LINES);
                let path = self.log_path.clone();
                match tokio::task::spawn_blocking(move || activity_log::tail(&path, lines)).await {
                    Ok(Ok(lines)) => Response::data(serde_json::json!(lines)),
                    Ok(Err(e)) => Response::error(e),
                    Err(e) => Response::error(e),
                }
            }

            Request::GetStatus => {
                let status = self.latest_status.read().await.clone();
                match serde_json::to_value(&status) {
                    Ok(data) => Response::data(data),
                    Err(e) => Response::error(e),
                }
            }

            Request::GetWatchState => {
                let entries = self.watch_snapshot.read().await.clone();
                match serde_json::to_value(&entries) {
                    Ok(data) => Response::data(data),
                    Err(e) => Response::error(e),
                }
            }

            Request::GetConfig => Response::Config {
                data: Box::new(self.config.clone()),
            },
        }
    }
}

/// Ticks until `shutdown` flips to true. The sleep starts after a tick
/// finishes, so the period is processing time plus the interval.
pub async fn monitoring_loop(state: Arc<DaemonState>, mut shutdown: watch::Receiver<bool>) {
    let interval = state.config.tick_interval();
    info!(
        interval_secs = interval.as_secs(),
        target = state.config.general.target_priority,
        "Monitoring loop started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        state.run_pass().await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                // A dropped sender also means stop.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    state.flush().await;
    info!("Monitoring loop stopped");
}
