//! Linux/BSD/macOS source: load average, `/proc`, `/sys/class/net` and a few
//! standard commands, with sysinfo-backed host queries as the last resort.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::{capacity, round_to, server_info, MetricSource, BYTES_PER_GB, KB_PER_MB};
use crate::error::CollectionError;
use crate::host::Host;
use crate::rate::{Counters, NetworkRateTracker};
use crate::types::{CpuMetric, DiskMetric, NetworkMetric, RamMetric, ServerInfo};

const PROC_LOADAVG: &str = "/proc/loadavg";
const PROC_MEMINFO: &str = "/proc/meminfo";
const SYS_CLASS_NET: &str = "/sys/class/net";

pub struct UnixSource {
    host: Arc<dyn Host>,
    disk_path: PathBuf,
    tracker: NetworkRateTracker,
}

impl UnixSource {
    pub fn new(host: Arc<dyn Host>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            host,
            disk_path: disk_path.into(),
            tracker: NetworkRateTracker::default(),
        }
    }

    async fn cores(&self) -> u32 {
        let counted = self
            .host
            .run("nproc", &[])
            .await
            .ok()
            .and_then(|out| out.trim().parse::<u32>().ok())
            .filter(|n| *n > 0);
        counted
            .or_else(|| {
                debug!("nproc unavailable, using host cpu count");
                self.host.logical_cpus().and_then(|n| u32::try_from(n).ok())
            })
            .unwrap_or(1)
            .max(1)
    }

    fn load_one(&self) -> Result<f64, CollectionError> {
        if let Some(load) = self.host.load_average().filter(|l| l.is_finite() && *l >= 0.0) {
            return Ok(load);
        }
        let text = self
            .host
            .read_to_string(Path::new(PROC_LOADAVG))
            .map_err(|e| CollectionError::io(PROC_LOADAVG, e))?;
        text.split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|l| l.is_finite() && *l >= 0.0)
            .ok_or_else(|| CollectionError::parse(PROC_LOADAVG, "no 1-minute load figure"))
    }

    /// (total, free) in kB.
    fn meminfo(&self) -> Result<(f64, f64), CollectionError> {
        let text = self
            .host
            .read_to_string(Path::new(PROC_MEMINFO))
            .map_err(|e| CollectionError::io(PROC_MEMINFO, e))?;
        let field = |name: &str| {
            text.lines()
                .find_map(|l| l.strip_prefix(name)?.strip_prefix(':'))
                .and_then(|rest| rest.split_whitespace().next()?.parse::<f64>().ok())
        };
        let total = field("MemTotal")
            .ok_or_else(|| CollectionError::parse(PROC_MEMINFO, "missing MemTotal"))?;
        let free = field("MemAvailable")
            .or_else(|| field("MemFree"))
            .ok_or_else(|| CollectionError::parse(PROC_MEMINFO, "missing MemAvailable/MemFree"))?;
        Ok((total, free))
    }

    /// (total, free) in kB from `free -k`, preferring the `available` column.
    async fn free_command(&self) -> Result<(f64, f64), CollectionError> {
        let out = self.host.run("free", &["-k"]).await?;
        let mut lines = out.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<&str> = lines
            .next()
            .map(|h| h.split_whitespace().collect())
            .unwrap_or_default();
        let row: Vec<&str> = lines
            .find(|l| l.trim_start().starts_with("Mem:"))
            .map(|l| l.split_whitespace().collect())
            .ok_or_else(|| CollectionError::parse("free -k", "no Mem: row"))?;
        // Data rows carry a leading label the header lacks.
        let column = |name: &str| {
            let idx = header.iter().position(|h| *h == name)?;
            row.get(idx + 1)?.parse::<f64>().ok()
        };
        let total = column("total").ok_or_else(|| CollectionError::parse("free -k", "no total column"))?;
        let free = column("available")
            .or_else(|| column("free"))
            .ok_or_else(|| CollectionError::parse("free -k", "no free column"))?;
        Ok((total, free))
    }

    async fn default_route_interface(&self) -> Option<String> {
        if let Ok(out) = self.host.run("ip", &["route", "show", "default"]).await {
            let found = out
                .lines()
                .filter(|l| l.trim_start().starts_with("default"))
                .find_map(|l| {
                    let mut it = l.split_whitespace();
                    it.find(|t| *t == "dev")?;
                    it.next().map(str::to_string)
                });
            if found.is_some() {
                return found;
            }
        }
        // BSD/macOS
        let out = self.host.run("route", &["-n", "get", "default"]).await.ok()?;
        out.lines()
            .find_map(|l| l.trim().strip_prefix("interface:"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    async fn active_interface(&self) -> Option<String> {
        if let Some(name) = self.default_route_interface().await.filter(|n| valid_name(n)) {
            return Some(name);
        }
        debug!("no default route interface, falling back to first non-loopback");
        if let Ok(mut names) = self.host.list_dir(Path::new(SYS_CLASS_NET)) {
            names.sort();
            if let Some(name) = names.into_iter().find(|n| valid_name(n) && !is_loopback(n)) {
                return Some(name);
            }
        }
        self.host
            .interface_counters()
            .into_iter()
            .map(|c| c.name)
            .find(|n| valid_name(n) && !is_loopback(n))
    }

    fn read_counters(&self, interface: &str) -> Option<Counters> {
        let stats = Path::new(SYS_CLASS_NET).join(interface).join("statistics");
        let read = |file: &str| {
            self.host
                .read_to_string(&stats.join(file))
                .ok()?
                .trim()
                .parse::<u64>()
                .ok()
        };
        if let (Some(rx), Some(tx)) = (read("rx_bytes"), read("tx_bytes")) {
            return Some(Counters { rx, tx });
        }
        self.host
            .interface_counters()
            .into_iter()
            .find(|c| c.name == interface)
            .map(|c| Counters { rx: c.rx, tx: c.tx })
    }
}

fn is_loopback(name: &str) -> bool {
    matches!(name, "lo" | "lo0") || name.to_ascii_lowercase().contains("loopback")
}

// Names end up in a /sys path.
fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}

#[async_trait]
impl MetricSource for UnixSource {
    async fn cpu(&self) -> Result<CpuMetric, CollectionError> {
        let cores = self.cores().await;
        let load = self.load_one()?;
        let percentage = round_to(load / f64::from(cores) * 100.0, 1).clamp(0.0, 100.0);
        Ok(CpuMetric {
            cores,
            load: round_to(load, 2),
            percentage,
        })
    }

    async fn ram(&self) -> Result<RamMetric, CollectionError> {
        let (total_kb, free_kb) = match self.meminfo() {
            Ok(r) => r,
            Err(meminfo_err) => {
                debug!(error = %meminfo_err, "meminfo unavailable, trying free");
                match self.free_command().await {
                    Ok(r) => r,
                    Err(free_err) => match self.host.memory() {
                        Some(m) => (m.total as f64 / 1024.0, m.free as f64 / 1024.0),
                        None => {
                            return Err(CollectionError::Unavailable(format!(
                                "memory totals unavailable ({meminfo_err}; {free_err})"
                            )))
                        }
                    },
                }
            }
        };
        Ok(capacity(total_kb / KB_PER_MB, free_kb / KB_PER_MB))
    }

    async fn disk(&self) -> Result<DiskMetric, CollectionError> {
        let space = self
            .host
            .disk_space(&self.disk_path)
            .map_err(|e| CollectionError::io(&self.disk_path, e))?;
        Ok(capacity(
            space.total as f64 / BYTES_PER_GB,
            space.free as f64 / BYTES_PER_GB,
        ))
    }

    async fn network(&self) -> Result<NetworkMetric, CollectionError> {
        let Some(interface) = self.active_interface().await else {
            return Ok(NetworkMetric::unavailable("No network interface found"));
        };

        let mut window = self.tracker.window().await;
        let Some(counters) = self.read_counters(&interface) else {
            return Ok(NetworkMetric {
                interface: Some(interface),
                ..NetworkMetric::unavailable("Could not read interface statistics")
            });
        };
        Ok(window.advance(&interface, counters, Instant::now()))
    }

    async fn server_info(&self) -> Result<ServerInfo, CollectionError> {
        Ok(server_info(self.host.as_ref()))
    }
}
