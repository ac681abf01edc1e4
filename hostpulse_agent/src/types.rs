//! Data types sent to the dashboard as JSON.
//! Keep this module minimal and stable; it defines the wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CpuMetric {
    pub cores: u32,
    // raw OS figure: 1-minute load average on Unix, busy fraction (0..1) on Windows
    pub load: f64,
    pub percentage: f64,
}

/// Total/used/free triple shared by RAM (MB) and disk (GB).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Capacity {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub percentage: f64,
}

pub type RamMetric = Capacity;
pub type DiskMetric = Capacity;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct NetworkMetric {
    // delta over the last poll interval, never the cumulative counter
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_mbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_mbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NetworkMetric {
    /// Zero-valued reading that explains why no rate could be derived.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            rx_mbps: Some(0.0),
            tx_mbps: Some(0.0),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerInfo {
    pub runtime_version: String,
    pub server_software: String,
}

/// Outcome of one probe: the metric itself, or the reason it is missing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Probe<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> Probe<T> {
    pub fn ok(&self) -> Option<&T> {
        match self {
            Probe::Ok(v) => Some(v),
            Probe::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Probe::Ok(_) => None,
            Probe::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub time: String,
    pub os: String,
    pub cpu: Probe<CpuMetric>,
    pub ram: Probe<RamMetric>,
    pub disk: Probe<DiskMetric>,
    pub network: Probe<NetworkMetric>,
    pub server: ServerInfo,
}
