//! nicewatch: keeps a fixed set of named processes reniced to a target priority.

pub mod activity_log;
pub mod collector;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod executor;
pub mod protocol;
pub mod socket;
pub mod status;
pub mod watch_state;
