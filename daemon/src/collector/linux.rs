use super::{PrivilegeClass, ProcessInstance, ProviderError, SnapshotProvider};
use crate::executor;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// The kernel keeps at most 15 bytes of the executable name in `comm`.
const COMM_LEN: usize = 15;

#[derive(Clone)]
struct CpuSample {
    name: String,
    total_ticks: u64, // utime + stime
    timestamp: Instant,
}

/// Fields of `/proc/<pid>/stat` the collector cares about.
#[derive(Debug, PartialEq)]
pub(crate) struct StatFields {
    pub comm: String,
    pub nice: i32,
    pub total_ticks: u64,
}

/// Parses a stat line. `comm` can hold spaces and parentheses, so the line is
/// split at the last `)`.
pub(crate) fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let comm = content[open + 1..close].to_string();
    // Fields after comm, starting at `state` (field 3 in proc(5)).
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 17 {
        return None;
    }
    let utime: u64 = rest[11].parse().ok()?;
    let stime: u64 = rest[12].parse().ok()?;
    let nice: i32 = rest[16].parse().ok()?;
    Some(StatFields {
        comm,
        nice,
        total_ticks: utime + stime,
    })
}

/// Truncates a configured name the way the kernel truncates `comm`.
pub(crate) fn comm_name(name: &str) -> &str {
    if name.len() <= COMM_LEN {
        return name;
    }
    let mut end = COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Basename of a path-like string, minus the ` (deleted)` suffix the kernel
/// appends to `exe` links of replaced binaries.
fn base_name(path: &str) -> &str {
    let path = path.strip_suffix(" (deleted)").unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path)
}

/// Confirms a long name against the executable path, falling back to
/// `argv[0]` when `exe` is unreadable (processes of other users).
fn full_name_matches(proc_dir: &Path, name: &str) -> bool {
    if let Ok(exe) = fs::read_link(proc_dir.join("exe")) {
        if base_name(&exe.to_string_lossy()) == name {
            return true;
        }
    }
    fs::read(proc_dir.join("cmdline"))
        .ok()
        .and_then(|raw| {
            let argv0 = raw.split(|b| *b == 0).next()?;
            Some(base_name(&String::from_utf8_lossy(argv0)) == name)
        })
        .unwrap_or(false)
}

/// Reads `/proc` directly. Cheap to clone; clones share CPU samples.
#[derive(Clone)]
pub struct LinuxProcessCollector {
    clock_ticks: u64,
    timeout: Duration,
    escalation: Arc<Vec<String>>,
    cpu_samples: Arc<Mutex<HashMap<u32, CpuSample>>>,
}

impl LinuxProcessCollector {
    pub fn new(timeout: Duration, escalation: Vec<String>) -> Self {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            timeout,
            escalation: Arc::new(escalation),
            cpu_samples: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn read_instance(&self, pid: u32, name: &str) -> Option<ProcessInstance> {
        let proc_dir = Path::new("/proc").join(pid.to_string());
        // The process may exit between readdir and here.
        let content = fs::read_to_string(proc_dir.join("stat")).ok()?;
        let stat = parse_stat(&content)?;
        if stat.comm != comm_name(name) {
            return None;
        }
        // `comm` only holds a prefix of long names.
        if name.len() > COMM_LEN && !full_name_matches(&proc_dir, name) {
            return None;
        }

        let now = Instant::now();
        let mut samples = self.cpu_samples.lock().unwrap_or_else(|e| e.into_inner());
        let cpu_percent = match samples.get(&pid) {
            Some(prev) => {
                let tick_delta = stat.total_ticks.saturating_sub(prev.total_ticks);
                let elapsed = now.duration_since(prev.timestamp).as_secs_f64();
                if elapsed > 0.0 {
                    (tick_delta as f64 / self.clock_ticks as f64) / elapsed * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        samples.insert(
            pid,
            CpuSample {
                name: stat.comm.clone(),
                total_ticks: stat.total_ticks,
                timestamp: now,
            },
        );

        Some(ProcessInstance {
            pid,
            name: name.to_string(),
            priority: stat.nice,
            cpu_percent,
        })
    }

    /// Scans `/proc` for every pid whose executable name equals `name`.
    pub fn scan(&self, name: &str) -> std::io::Result<Vec<ProcessInstance>> {
        let wanted = comm_name(name);
        let mut found = Vec::new();
        for entry in fs::read_dir("/proc")?.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if let Some(instance) = self.read_instance(pid, name) {
                found.push(instance);
            }
        }

        // Drop samples of this name whose pid is gone.
        let mut samples = self.cpu_samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.retain(|pid, sample| sample.name != wanted || found.iter().any(|p| p.pid == *pid));
        found.sort_by_key(|p| p.pid);
        Ok(found)
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for LinuxProcessCollector {
    async fn find_by_name(&self, name: &str) -> Result<Vec<ProcessInstance>, ProviderError> {
        let collector = self.clone();
        let name = name.to_string();
        let scan = tokio::task::spawn_blocking(move || collector.scan(&name));
        match tokio::time::timeout(self.timeout, scan).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_err)) => Err(std::io::Error::other(join_err).into()),
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }

    async fn set_priority(
        &self,
        pid: u32,
        priority: i32,
        class: PrivilegeClass,
    ) -> Result<(), ProviderError> {
        debug!(pid, priority, %class, "applying priority");
        match class {
            PrivilegeClass::Unprivileged => executor::set_priority(pid, priority),
            PrivilegeClass::Privileged => {
                executor::renice_escalated(&self.escalation, pid, priority, self.timeout).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nice_and_cpu_ticks() {
        let line = "4242 (baloo_file) S 1 4242 4242 0 -1 4194560 1520 0 0 0 \
                    37 12 0 0 39 19 1 0 8812 0 0";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.comm, "baloo_file");
        assert_eq!(stat.nice, 19);
        assert_eq!(stat.total_ticks, 49);
    }

    #[test]
    fn parses_comm_with_spaces_and_parens() {
        let line = "77 (Web (Content) x) R 1 77 77 0 -1 0 0 0 0 0 \
                    5 5 0 0 20 -5 1 0 100 0 0";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.comm, "Web (Content) x");
        assert_eq!(stat.nice, -5);
        assert_eq!(stat.total_ticks, 10);
    }

    #[test]
    fn rejects_truncated_line() {
        assert!(parse_stat("12 (short) S 1 2 3").is_none());
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn base_name_strips_directory_and_deleted_marker() {
        assert_eq!(base_name("/usr/libexec/tracker-miner-fs-3"), "tracker-miner-fs-3");
        assert_eq!(base_name("/opt/x/syncd (deleted)"), "syncd");
        assert_eq!(base_name("syncd"), "syncd");
    }

    #[test]
    fn truncates_long_names_like_the_kernel() {
        assert_eq!(comm_name("tracker-miner-fs-3"), "tracker-miner-f");
        assert_eq!(comm_name("mds"), "mds");
    }
}
