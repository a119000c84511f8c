//! Tabular per-tick snapshot of the watch-list.

use crate::collector::{PrivilegeClass, ProcessInstance};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub name: String,
    pub class: PrivilegeClass,
    /// Empty when the process is not running or the query failed.
    pub instances: Vec<ProcessInstance>,
    #[serde(default)]
    pub query_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub timestamp: String,
    pub target_priority: i32,
    pub rows: Vec<StatusRow>,
}

impl StatusReport {
    pub fn running_count(&self) -> usize {
        self.rows.iter().map(|row| row.instances.len()).sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} (target priority {})", self.timestamp, self.target_priority);
        let _ = writeln!(out, "{:<24} {:>8} {:>8} {:>7}", "NAME", "PID", "NICE", "CPU%");
        for row in &self.rows {
            if row.instances.is_empty() {
                let _ = writeln!(
                    out,
                    "{:<24} {:>8} {:>8} {:>7}",
                    row.name, PLACEHOLDER, PLACEHOLDER, PLACEHOLDER
                );
                continue;
            }
            for instance in &row.instances {
                let _ = writeln!(
                    out,
                    "{:<24} {:>8} {:>8} {:>7.1}",
                    row.name, instance.pid, instance.priority, instance.cpu_percent
                );
            }
        }
        out
    }
}

/// Rewrites its file with the latest report every tick.
#[derive(Debug, Clone)]
pub struct StatusSink {
    path: PathBuf,
}

impl StatusSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn write(&self, report: &StatusReport) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write then rename so readers never see a half-written table.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, report.render())?;
        fs::rename(&tmp, &self.path)
    }
}
