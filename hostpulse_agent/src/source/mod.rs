//! Metric sources: one implementation per platform family, each producing the
//! four metric groups and server info independently of one another.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CollectionError;
use crate::host::Host;
use crate::types::{Capacity, CpuMetric, DiskMetric, NetworkMetric, RamMetric, ServerInfo};

mod table;
mod unix;
mod windows;

pub use unix::UnixSource;
pub use windows::WindowsSource;

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn cpu(&self) -> Result<CpuMetric, CollectionError>;
    async fn ram(&self) -> Result<RamMetric, CollectionError>;
    async fn disk(&self) -> Result<DiskMetric, CollectionError>;
    async fn network(&self) -> Result<NetworkMetric, CollectionError>;
    async fn server_info(&self) -> Result<ServerInfo, CollectionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// The family this binary was built for.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unix" | "linux" | "macos" | "darwin" => Ok(Platform::Unix),
            "windows" | "win" => Ok(Platform::Windows),
            other => Err(format!("unknown platform '{other}' (expected unix or windows)")),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Unix => f.write_str("unix"),
            Platform::Windows => f.write_str("windows"),
        }
    }
}

/// The closed set of sources, chosen once at startup.
pub enum PlatformSource {
    Unix(UnixSource),
    Windows(WindowsSource),
}

impl PlatformSource {
    pub fn new(platform: Platform, host: Arc<dyn Host>, disk_path: Option<String>) -> Self {
        match platform {
            Platform::Unix => {
                PlatformSource::Unix(UnixSource::new(host, disk_path.unwrap_or_else(|| "/".into())))
            }
            Platform::Windows => {
                let volume = disk_path.unwrap_or_else(windows::service_volume);
                PlatformSource::Windows(WindowsSource::new(host, volume))
            }
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformSource::Unix(_) => Platform::Unix,
            PlatformSource::Windows(_) => Platform::Windows,
        }
    }
}

#[async_trait]
impl MetricSource for PlatformSource {
    async fn cpu(&self) -> Result<CpuMetric, CollectionError> {
        match self {
            PlatformSource::Unix(s) => s.cpu().await,
            PlatformSource::Windows(s) => s.cpu().await,
        }
    }

    async fn ram(&self) -> Result<RamMetric, CollectionError> {
        match self {
            PlatformSource::Unix(s) => s.ram().await,
            PlatformSource::Windows(s) => s.ram().await,
        }
    }

    async fn disk(&self) -> Result<DiskMetric, CollectionError> {
        match self {
            PlatformSource::Unix(s) => s.disk().await,
            PlatformSource::Windows(s) => s.disk().await,
        }
    }

    async fn network(&self) -> Result<NetworkMetric, CollectionError> {
        match self {
            PlatformSource::Unix(s) => s.network().await,
            PlatformSource::Windows(s) => s.network().await,
        }
    }

    async fn server_info(&self) -> Result<ServerInfo, CollectionError> {
        match self {
            PlatformSource::Unix(s) => s.server_info().await,
            PlatformSource::Windows(s) => s.server_info().await,
        }
    }
}

pub(crate) const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
pub(crate) const KB_PER_MB: f64 = 1024.0;

pub(crate) fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

/// Builds a capacity triple from a total and a free figure already in the
/// reported unit. `percentage` is derived from the reported (rounded) values.
pub(crate) fn capacity(total: f64, free: f64) -> Capacity {
    let total = round_to(total.max(0.0), 2);
    let free = round_to(free.clamp(0.0, total), 2);
    let used = round_to((total - free).max(0.0), 2);
    let percentage = if total > 0.0 {
        round_to(used / total * 100.0, 2).clamp(0.0, 100.0)
    } else {
        0.0
    };
    Capacity {
        total,
        used,
        free,
        percentage,
    }
}

pub(crate) fn server_info(host: &dyn Host) -> ServerInfo {
    ServerInfo {
        runtime_version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        server_software: host
            .env_var("SERVER_SOFTWARE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
    }
}
