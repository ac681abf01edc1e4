//! Injected access to the machine: external commands, pseudo-files and the OS
//! queries the metric sources build on.
//!
//! Sources only ever talk to a [`Host`], so every parsing and fallback path can
//! be driven by recorded output through `FakeHost` instead of real OS state.

use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::error::CollectionError;

#[cfg(any(test, feature = "test-util"))]
mod fake;
mod system;

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeHost;
pub use system::SystemHost;

/// Space on the filesystem holding a path, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total: u64,
    pub free: u64,
}

/// Physical memory, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySpace {
    pub total: u64,
    pub free: u64,
}

/// Cumulative byte counters for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx: u64,
    pub tx: u64,
}

#[async_trait]
pub trait Host: Send + Sync {
    /// Runs `program` with `args` and returns captured stdout. Non-zero exit,
    /// spawn failure and timeout are all errors.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, CollectionError>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Entry names (not paths) of a directory.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    fn disk_space(&self, path: &Path) -> io::Result<DiskSpace>;

    /// 1-minute load average, where the platform has one.
    fn load_average(&self) -> Option<f64>;

    fn logical_cpus(&self) -> Option<usize>;

    fn memory(&self) -> Option<MemorySpace>;

    fn interface_counters(&self) -> Vec<InterfaceCounters>;

    fn env_var(&self, key: &str) -> Option<String>;

    /// Human-readable platform line for the snapshot's `os` field.
    fn os_description(&self) -> String;
}

/// Decodes captured command output. Windows tools sometimes emit UTF-16LE
/// with a BOM when their stdout is a pipe.
pub fn decode_output(bytes: &[u8]) -> String {
    let text = match bytes {
        [0xFF, 0xFE, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    text.replace('\r', "")
}
