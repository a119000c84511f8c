//! Per-(name, pid) record of what the controller has already handled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchKey {
    pub name: String,
    pub pid: u32,
}

impl WatchKey {
    pub fn new(name: &str, pid: u32) -> Self {
        Self {
            name: name.to_string(),
            pid,
        }
    }
}

/// A pair with no entry is unseen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    /// Last known priority equals the target.
    Corrected,
    /// Observed off target and the correction has not succeeded yet.
    Drifted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub name: String,
    pub pid: u32,
    pub state: PairState,
}

#[derive(Debug, Default)]
pub struct WatchState {
    pairs: HashMap<WatchKey, PairState>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, pid: u32) -> Option<PairState> {
        self.pairs.get(&WatchKey::new(name, pid)).copied()
    }

    /// Returns the previous state.
    pub fn set(&mut self, name: &str, pid: u32, state: PairState) -> Option<PairState> {
        self.pairs.insert(WatchKey::new(name, pid), state)
    }

    /// Drops pairs of `name` whose pid is not in `live_pids`; returns how many.
    pub fn evict_missing(&mut self, name: &str, live_pids: &[u32]) -> usize {
        let before = self.pairs.len();
        self.pairs
            .retain(|key, _| key.name != name || live_pids.contains(&key.pid));
        before - self.pairs.len()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Sorted copy for read-only reporters.
    pub fn snapshot(&self) -> Vec<WatchEntry> {
        let mut keys: Vec<&WatchKey> = self.pairs.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| WatchEntry {
                name: key.name.clone(),
                pid: key.pid,
                state: self.pairs[key],
            })
            .collect()
    }
}
