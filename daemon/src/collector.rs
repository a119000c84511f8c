//! Process snapshot provider: finds running instances by name and applies
//! priority corrections.

mod linux;

pub(crate) use linux::comm_name;
pub use linux::LinuxProcessCollector;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest nice value accepted by Linux `setpriority`.
pub const NICE_MIN: i32 = -20;
/// Highest nice value accepted by Linux `setpriority`.
pub const NICE_MAX: i32 = 19;

/// One running instance of a watched process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub pid: u32,
    pub name: String,
    /// Nice value at the time of the query.
    pub priority: i32,
    /// Informational only.
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeClass {
    Unprivileged,
    Privileged,
}

impl fmt::Display for PrivilegeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeClass::Unprivileged => f.write_str("unprivileged"),
            PrivilegeClass::Privileged => f.write_str("privileged"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no such process (pid={0})")]
    NotFound(u32),
    #[error("permission denied (pid={0})")]
    PermissionDenied(u32),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Access to the OS process table.
///
/// `find_by_name` returns an empty vector when nothing matches; an error means
/// the enumeration itself failed. `set_priority` must be idempotent.
#[async_trait::async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Vec<ProcessInstance>, ProviderError>;

    async fn set_priority(
        &self,
        pid: u32,
        priority: i32,
        class: PrivilegeClass,
    ) -> Result<(), ProviderError>;
}
