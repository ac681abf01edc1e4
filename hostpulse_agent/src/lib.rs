//! hostpulse agent: point-in-time host metrics (CPU, memory, disk, network)
//! served as JSON over HTTP.

pub mod collector;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod rate;
pub mod source;
pub mod state;
pub mod types;
