//! Scripted in-memory process table for controller tests.

#![allow(dead_code)]

use nicewatch_daemon::collector::{PrivilegeClass, ProcessInstance, ProviderError, SnapshotProvider};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityCall {
    pub pid: u32,
    pub priority: i32,
    pub class: PrivilegeClass,
}

#[derive(Default)]
struct Table {
    processes: HashMap<u32, ProcessInstance>,
    failing_pids: HashSet<u32>,
    failing_queries: HashSet<String>,
    calls: Vec<PriorityCall>,
}

#[derive(Default)]
pub struct FakeProvider {
    table: Mutex<Table>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, name: &str, pid: u32, priority: i32) {
        self.table.lock().unwrap().processes.insert(
            pid,
            ProcessInstance {
                pid,
                name: name.to_string(),
                priority,
                cpu_percent: 1.5,
            },
        );
    }

    pub fn exit(&self, pid: u32) {
        self.table.lock().unwrap().processes.remove(&pid);
    }

    pub fn priority_of(&self, pid: u32) -> Option<i32> {
        self.table.lock().unwrap().processes.get(&pid).map(|p| p.priority)
    }

    /// Reniced outside the daemon.
    pub fn set_external(&self, pid: u32, priority: i32) {
        if let Some(p) = self.table.lock().unwrap().processes.get_mut(&pid) {
            p.priority = priority;
        }
    }

    pub fn fail_corrections_for(&self, pid: u32, fail: bool) {
        let mut table = self.table.lock().unwrap();
        if fail {
            table.failing_pids.insert(pid);
        } else {
            table.failing_pids.remove(&pid);
        }
    }

    pub fn fail_queries_for(&self, name: &str, fail: bool) {
        let mut table = self.table.lock().unwrap();
        if fail {
            table.failing_queries.insert(name.to_string());
        } else {
            table.failing_queries.remove(name);
        }
    }

    pub fn calls(&self) -> Vec<PriorityCall> {
        self.table.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.table.lock().unwrap().calls.clear();
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for FakeProvider {
    async fn find_by_name(&self, name: &str) -> Result<Vec<ProcessInstance>, ProviderError> {
        let table = self.table.lock().unwrap();
        if table.failing_queries.contains(name) {
            return Err(std::io::Error::other("process table unavailable").into());
        }
        let mut found: Vec<ProcessInstance> = table
            .processes
            .values()
            .filter(|p| p.name == name)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.pid);
        Ok(found)
    }

    async fn set_priority(
        &self,
        pid: u32,
        priority: i32,
        class: PrivilegeClass,
    ) -> Result<(), ProviderError> {
        let mut table = self.table.lock().unwrap();
        table.calls.push(PriorityCall { pid, priority, class });
        if table.failing_pids.contains(&pid) {
            return Err(ProviderError::PermissionDenied(pid));
        }
        match table.processes.get_mut(&pid) {
            Some(p) => {
                p.priority = priority;
                Ok(())
            }
            None => Err(ProviderError::NotFound(pid)),
        }
    }
}
