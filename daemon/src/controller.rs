//! Throttle controller: keeps every watched process at the target priority.
//!
//! Each tick queries the provider for every watched name and applies the drift
//! rule to each instance found:
//!
//! 1. priority off target: correct it and log `Throttled ...`;
//! 2. at target but the (name, pid) pair is new: log `Rediscovered ...`;
//! 3. at target and already corrected: stay silent.
//!
//! Failures never leave this module. They become log lines and the next tick
//! re-evaluates from scratch.

use crate::activity_log::{self, ActivityLog};
use crate::collector::{ProcessInstance, SnapshotProvider};
use crate::config::{Config, WatchTarget};
use crate::status::{StatusReport, StatusRow, StatusSink};
use crate::watch_state::{PairState, WatchState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Correct,
    Rediscovered,
    Quiet,
}

pub fn decide(previous: Option<PairState>, observed: i32, target: i32) -> Decision {
    if observed != target {
        return Decision::Correct;
    }
    match previous {
        Some(PairState::Corrected) => Decision::Quiet,
        // First sighting, restart under a new pid, or a drift fixed elsewhere.
        None | Some(PairState::Drifted) => Decision::Rediscovered,
    }
}

/// A logged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Throttled {
        name: String,
        pid: u32,
        from: i32,
        to: i32,
    },
    Rediscovered {
        name: String,
        pid: u32,
    },
    CorrectionFailed {
        name: String,
        pid: u32,
        from: i32,
        to: i32,
        error: String,
    },
    QueryFailed {
        name: String,
        error: String,
    },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Throttled { name, pid, from, to } => {
                write!(f, "Throttled {} (pid={}) from {} to {}", name, pid, from, to)
            }
            Transition::Rediscovered { name, pid } => {
                write!(f, "Rediscovered {} (pid={}) already at target priority", name, pid)
            }
            Transition::CorrectionFailed {
                name,
                pid,
                from,
                to,
                error,
            } => write!(
                f,
                "Failed to throttle {} (pid={}) from {} to {}: {}",
                name, pid, from, to, error
            ),
            Transition::QueryFailed { name, error } => {
                write!(f, "Failed to query {}: {}", name, error)
            }
        }
    }
}

/// Outcome of one pass over the watch-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Transitions written to the activity log, in order.
    pub transitions: Vec<Transition>,
    pub corrections_applied: usize,
    pub corrections_failed: usize,
    pub status: StatusReport,
}

pub struct ThrottleController {
    provider: Arc<dyn SnapshotProvider>,
    targets: Vec<WatchTarget>,
    target_priority: i32,
    state: WatchState,
    failing_queries: HashSet<String>,
    log: ActivityLog,
    status_sink: Option<StatusSink>,
}

impl ThrottleController {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        targets: Vec<WatchTarget>,
        target_priority: i32,
        log: ActivityLog,
    ) -> Self {
        Self {
            provider,
            targets,
            target_priority,
            state: WatchState::new(),
            failing_queries: HashSet::new(),
            log,
            status_sink: None,
        }
    }

    pub fn from_config(config: &Config, provider: Arc<dyn SnapshotProvider>) -> io::Result<Self> {
        let log = ActivityLog::open(&config.log_path())?;
        let mut controller = Self::new(
            provider,
            config.watch_targets(),
            config.general.target_priority,
            log,
        );
        if let Some(path) = config.status_path() {
            controller = controller.with_status_sink(StatusSink::new(&path));
        }
        Ok(controller)
    }

    pub fn with_status_sink(mut self, sink: StatusSink) -> Self {
        self.status_sink = Some(sink);
        self
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn target_priority(&self) -> i32 {
        self.target_priority
    }

    pub fn watch_state(&self) -> &WatchState {
        &self.state
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Runs one full pass. Never fails; problems end up in the log.
    pub async fn run_tick(&mut self) -> TickReport {
        let mut report = TickReport {
            transitions: Vec::new(),
            corrections_applied: 0,
            corrections_failed: 0,
            status: StatusReport {
                timestamp: activity_log::timestamp(),
                target_priority: self.target_priority,
                rows: Vec::with_capacity(self.targets.len()),
            },
        };

        let targets = self.targets.clone();
        for target in &targets {
            let row = self.check_target(target, &mut report).await;
            report.status.rows.push(row);
        }

        if let Some(sink) = self.status_sink.clone() {
            let status = report.status.clone();
            match tokio::task::spawn_blocking(move || sink.write(&status)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to write status report: {}", e),
                Err(e) => warn!("Status report writer failed: {}", e),
            }
        }
        debug!(
            corrections = report.corrections_applied,
            failures = report.corrections_failed,
            tracked = self.state.len(),
            "tick complete"
        );
        report
    }

    async fn check_target(&mut self, target: &WatchTarget, report: &mut TickReport) -> StatusRow {
        let mut row = StatusRow {
            name: target.name.clone(),
            class: target.class,
            instances: Vec::new(),
            query_failed: false,
        };

        let instances = match self.provider.find_by_name(&target.name).await {
            Ok(instances) => {
                self.failing_queries.remove(&target.name);
                instances
            }
            Err(e) => {
                row.query_failed = true;
                if self.failing_queries.insert(target.name.clone()) {
                    self.emit(
                        Transition::QueryFailed {
                            name: target.name.clone(),
                            error: e.to_string(),
                        },
                        report,
                    );
                } else {
                    debug!(name = %target.name, error = %e, "query still failing");
                }
                // Keep existing pairs: evicting here would re-log them later.
                return row;
            }
        };

        for mut instance in instances {
            self.check_instance(target, &mut instance, report).await;
            row.instances.push(instance);
        }

        let live: Vec<u32> = row.instances.iter().map(|p| p.pid).collect();
        let evicted = self.state.evict_missing(&target.name, &live);
        if evicted > 0 {
            debug!(name = %target.name, evicted, "dropped exited pids");
        }
        row
    }

    async fn check_instance(
        &mut self,
        target: &WatchTarget,
        instance: &mut ProcessInstance,
        report: &mut TickReport,
    ) {
        let name = &target.name;
        let pid = instance.pid;
        let previous = self.state.get(name, pid);

        match decide(previous, instance.priority, self.target_priority) {
            Decision::Quiet => {}
            Decision::Rediscovered => {
                self.state.set(name, pid, PairState::Corrected);
                self.emit(
                    Transition::Rediscovered {
                        name: name.clone(),
                        pid,
                    },
                    report,
                );
            }
            Decision::Correct => {
                let from = instance.priority;
                let to = self.target_priority;
                match self.provider.set_priority(pid, to, target.class).await {
                    Ok(()) => {
                        report.corrections_applied += 1;
                        instance.priority = to;
                        self.state.set(name, pid, PairState::Corrected);
                        self.emit(
                            Transition::Throttled {
                                name: name.clone(),
                                pid,
                                from,
                                to,
                            },
                            report,
                        );
                    }
                    Err(e) => {
                        report.corrections_failed += 1;
                        let was = self.state.set(name, pid, PairState::Drifted);
                        if was == Some(PairState::Drifted) {
                            debug!(name = %name, pid, error = %e, "correction still failing");
                        } else {
                            self.emit(
                                Transition::CorrectionFailed {
                                    name: name.clone(),
                                    pid,
                                    from,
                                    to,
                                    error: e.to_string(),
                                },
                                report,
                            );
                        }
                    }
                }
            }
        }
    }

    fn emit(&mut self, transition: Transition, report: &mut TickReport) {
        let message = transition.to_string();
        match &transition {
            Transition::Throttled { .. } | Transition::Rediscovered { .. } => info!("{}", message),
            Transition::CorrectionFailed { .. } | Transition::QueryFailed { .. } => {
                warn!("{}", message)
            }
        }
        if let Err(e) = self.log.record(&message) {
            error!("Failed to write activity log {:?}: {}", self.log.path(), e);
        }
        report.transitions.push(transition);
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.log.flush()
    }
}
