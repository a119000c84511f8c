//! IPC protocol definitions (JSON lines)

use crate::config::Config;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    /// Run one throttle pass immediately.
    ThrottleNow,
    TailLog {
        #[serde(default)]
        params: TailLogParams,
    },
    GetStatus,
    GetWatchState,
    GetConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailLogParams {
    pub lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Status { data: StatusData },
    Config { data: Box<Config> },
}

impl Response {
    pub fn data(data: serde_json::Value) -> Self {
        Response::Response { id: None, data }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Response {
            id: None,
            data: serde_json::json!({ "error": message.to_string() }),
        }
    }
}

/// Broadcast to every client after each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub watched_count: u32,
    pub running_count: u32,
    pub throttled_count: u32,
    pub tick_count: u64,
}
