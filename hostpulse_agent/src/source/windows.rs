//! Windows source. Every figure comes from a WMI class, read through `wmic`
//! first and PowerShell's CIM cmdlets when `wmic` is missing or its output
//! lacks the requested fields.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::table::{parse_table, Record};
use super::{capacity, round_to, server_info, MetricSource, BYTES_PER_GB, KB_PER_MB};
use crate::error::CollectionError;
use crate::host::Host;
use crate::rate::{Counters, NetworkRateTracker};
use crate::types::{CpuMetric, DiskMetric, NetworkMetric, RamMetric, ServerInfo};

/// One WMI class query, expressible both as `wmic` arguments and as a
/// PowerShell pipeline.
#[derive(Debug, Clone)]
struct WmiQuery {
    class: &'static str,
    fields: &'static [&'static str],
    filter: Option<String>,
}

impl WmiQuery {
    const fn new(class: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            class,
            fields,
            filter: None,
        }
    }

    fn wmic_args(&self) -> Vec<String> {
        let mut args = vec!["path".to_string(), self.class.to_string()];
        if let Some(filter) = &self.filter {
            args.push("where".into());
            args.push(filter.clone());
        }
        args.push("get".into());
        args.push(self.fields.join(","));
        args.push("/format:csv".into());
        args
    }

    fn powershell_args(&self) -> Vec<String> {
        let filter = self
            .filter
            .as_ref()
            .map(|f| format!(" -Filter \"{f}\""))
            .unwrap_or_default();
        let script = format!(
            "Get-CimInstance -ClassName {}{filter} | Select-Object {} | ConvertTo-Csv -NoTypeInformation",
            self.class,
            self.fields.join(","),
        );
        vec![
            "-NoProfile".into(),
            "-NonInteractive".into(),
            "-Command".into(),
            script,
        ]
    }

    /// Rows carrying every requested field.
    fn usable(&self, rows: Vec<Record>) -> Vec<Record> {
        rows.into_iter()
            .filter(|r| self.fields.iter().all(|f| r.has(f)))
            .collect()
    }
}

const LOGICAL_PROCESSORS: WmiQuery =
    WmiQuery::new("Win32_Processor", &["NumberOfLogicalProcessors"]);
const PROCESSOR_TIME: WmiQuery = WmiQuery::new(
    "Win32_PerfFormattedData_PerfOS_Processor",
    &["Name", "PercentProcessorTime"],
);
const LOAD_PERCENTAGE: WmiQuery = WmiQuery::new("Win32_Processor", &["LoadPercentage"]);
const OPERATING_SYSTEM: WmiQuery = WmiQuery::new(
    "Win32_OperatingSystem",
    &["FreePhysicalMemory", "TotalVisibleMemorySize"],
);
const NETWORK_COUNTERS: WmiQuery = WmiQuery::new(
    "Win32_PerfRawData_Tcpip_NetworkInterface",
    &["Name", "BytesReceivedPersec", "BytesSentPersec"],
);

fn default_routes() -> WmiQuery {
    WmiQuery {
        filter: Some("Destination='0.0.0.0'".to_string()),
        ..WmiQuery::new("Win32_IP4RouteTable", &["InterfaceIndex", "Metric1"])
    }
}

fn enabled_adapters() -> WmiQuery {
    WmiQuery {
        filter: Some("NetEnabled=TRUE".to_string()),
        ..WmiQuery::new("Win32_NetworkAdapter", &["InterfaceIndex", "Name"])
    }
}

fn logical_disk(volume: &str) -> WmiQuery {
    WmiQuery {
        filter: Some(format!("DeviceID='{volume}'")),
        ..WmiQuery::new("Win32_LogicalDisk", &["FreeSpace", "Size"])
    }
}

/// Drive letter of the volume holding the running executable, `C:` if unknown.
pub(super) fn service_volume() -> String {
    use std::path::{Component, Prefix};

    let drive = std::env::current_exe()
        .ok()
        .and_then(|exe| match exe.components().next() {
            Some(Component::Prefix(p)) => match p.kind() {
                Prefix::Disk(d) | Prefix::VerbatimDisk(d) => Some(format!("{}:", d as char)),
                _ => None,
            },
            _ => None,
        });
    drive.unwrap_or_else(|| "C:".to_string())
}

pub struct WindowsSource {
    host: Arc<dyn Host>,
    volume: String,
    tracker: NetworkRateTracker,
}

impl WindowsSource {
    pub fn new(host: Arc<dyn Host>, volume: impl Into<String>) -> Self {
        let volume = volume.into().trim_end_matches(['\\', '/']).to_string();
        Self {
            host,
            volume,
            tracker: NetworkRateTracker::default(),
        }
    }

    async fn run_args(&self, program: &str, args: &[String]) -> Result<String, CollectionError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.host.run(program, &args).await
    }

    async fn query(&self, q: &WmiQuery) -> Result<Vec<Record>, CollectionError> {
        let wmic_problem = match self.run_args("wmic", &q.wmic_args()).await {
            Ok(out) => {
                let rows = q.usable(parse_table(&out));
                if !rows.is_empty() {
                    return Ok(rows);
                }
                "no usable rows".to_string()
            }
            Err(e) => e.to_string(),
        };
        debug!(class = q.class, problem = %wmic_problem, "wmic query failed, trying powershell");

        let ps_problem = match self.run_args("powershell", &q.powershell_args()).await {
            Ok(out) => {
                let rows = q.usable(parse_table(&out));
                if !rows.is_empty() {
                    return Ok(rows);
                }
                "no usable rows".to_string()
            }
            Err(e) => e.to_string(),
        };
        Err(CollectionError::Unavailable(format!(
            "{} {} unavailable (wmic: {wmic_problem}; powershell: {ps_problem})",
            q.class,
            q.fields.join(","),
        )))
    }

    async fn cores(&self) -> u32 {
        let counted = match self.query(&LOGICAL_PROCESSORS).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| r.integer("NumberOfLogicalProcessors"))
                .sum::<u64>(),
            Err(e) => {
                debug!(error = %e, "processor count query failed, using host cpu count");
                0
            }
        };
        u32::try_from(counted)
            .ok()
            .filter(|n| *n > 0)
            .or_else(|| self.host.logical_cpus().and_then(|n| u32::try_from(n).ok()))
            .unwrap_or(1)
            .max(1)
    }

    /// Perf-counter instance names of the enabled adapters, and of the one
    /// carrying the cheapest default route.
    async fn adapter_hints(&self) -> AdapterHints {
        let adapters = match self.query(&enabled_adapters()).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(error = %e, "enabled adapter query failed");
                return AdapterHints::default();
            }
        };
        let route_index = match self.query(&default_routes()).await {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| Some((r.integer("Metric1")?, r.integer("InterfaceIndex")?)))
                .min()
                .map(|(_, index)| index),
            Err(e) => {
                debug!(error = %e, "default route query failed");
                None
            }
        };

        let default_route = route_index.and_then(|index| {
            adapters
                .iter()
                .find(|a| a.integer("InterfaceIndex") == Some(index))
                .and_then(|a| a.get("Name"))
                .map(perf_instance_name)
        });
        AdapterHints {
            default_route,
            enabled: adapters
                .iter()
                .filter_map(|a| a.get("Name"))
                .map(perf_instance_name)
                .collect(),
        }
    }

    /// Average busy percentage across logical processors.
    async fn utilization(&self) -> Result<f64, CollectionError> {
        match self.query(&PROCESSOR_TIME).await {
            Ok(rows) => {
                let per_cpu: Vec<f64> = rows
                    .iter()
                    .filter(|r| r.get("Name") != Some("_Total"))
                    .filter_map(|r| r.number("PercentProcessorTime"))
                    .collect();
                if let Some(avg) = average(&per_cpu) {
                    return Ok(avg);
                }
            }
            Err(e) => debug!(error = %e, "per-processor query failed, using LoadPercentage"),
        }

        let rows = self.query(&LOAD_PERCENTAGE).await?;
        let loads: Vec<f64> = rows
            .iter()
            .filter_map(|r| r.number("LoadPercentage"))
            .collect();
        average(&loads)
            .ok_or_else(|| CollectionError::parse("Win32_Processor", "LoadPercentage is not numeric"))
    }
}

fn average(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// (total, free) in kB from a `Win32_OperatingSystem` row.
fn os_memory_kb(rows: &[Record]) -> Result<(f64, f64), CollectionError> {
    let row = rows
        .first()
        .ok_or_else(|| CollectionError::parse("Win32_OperatingSystem", "no rows"))?;
    let total = row
        .number("TotalVisibleMemorySize")
        .ok_or_else(|| CollectionError::parse("Win32_OperatingSystem", "TotalVisibleMemorySize"))?;
    let free = row
        .number("FreePhysicalMemory")
        .ok_or_else(|| CollectionError::parse("Win32_OperatingSystem", "FreePhysicalMemory"))?;
    Ok((total, free))
}

/// (total, available) in MB from the `Total Physical Memory: 16,384 MB` and
/// `Available Physical Memory` lines of `systeminfo`.
fn parse_systeminfo(text: &str) -> Option<(f64, f64)> {
    let field = |label: &str| {
        let value = text
            .lines()
            .find_map(|l| l.trim().strip_prefix(label)?.trim_start().strip_prefix(':'))?
            .trim()
            .strip_suffix("MB")?;
        // group separators vary by locale
        let digits: String = value.chars().filter(char::is_ascii_digit).collect();
        digits.parse::<f64>().ok()
    };
    Some((field("Total Physical Memory")?, field("Available Physical Memory")?))
}

#[derive(Debug, Default)]
struct AdapterHints {
    default_route: Option<String>,
    enabled: Vec<String>,
}

/// Perf counters name adapters with `()#/\` replaced, e.g.
/// `Intel(R) Ethernet #2` becomes `Intel[R] Ethernet _2`.
fn perf_instance_name(adapter: &str) -> String {
    adapter
        .chars()
        .map(|c| match c {
            '(' => '[',
            ')' => ']',
            '#' | '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

fn is_pseudo_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["loopback", "isatap", "teredo", "6to4"]
        .iter()
        .any(|p| lower.contains(p))
}

#[async_trait]
impl MetricSource for WindowsSource {
    async fn cpu(&self) -> Result<CpuMetric, CollectionError> {
        let cores = self.cores().await;
        let busy = self.utilization().await?;
        Ok(CpuMetric {
            cores,
            load: round_to(busy / 100.0, 2).max(0.0),
            percentage: round_to(busy, 1).clamp(0.0, 100.0),
        })
    }

    async fn ram(&self) -> Result<RamMetric, CollectionError> {
        let queried = self
            .query(&OPERATING_SYSTEM)
            .await
            .and_then(|rows| os_memory_kb(&rows));
        let wmi_err = match queried {
            Ok((total_kb, free_kb)) => {
                return Ok(capacity(total_kb / KB_PER_MB, free_kb / KB_PER_MB))
            }
            Err(e) => e,
        };
        debug!(error = %wmi_err, "Win32_OperatingSystem unavailable, trying systeminfo");

        let unavailable = |detail: String| {
            CollectionError::Unavailable(format!(
                "memory totals unavailable ({wmi_err}; {detail})"
            ))
        };
        let out = self
            .host
            .run("systeminfo", &[])
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let (total_mb, free_mb) = parse_systeminfo(&out)
            .ok_or_else(|| unavailable("systeminfo lacks physical memory lines".to_string()))?;
        Ok(capacity(total_mb, free_mb))
    }

    async fn disk(&self) -> Result<DiskMetric, CollectionError> {
        let root = PathBuf::from(format!("{}\\", self.volume));
        let (total, free) = match self.host.disk_space(&root) {
            Ok(space) => (space.total as f64, space.free as f64),
            Err(io_err) => {
                debug!(volume = %self.volume, error = %io_err, "filesystem stat failed, querying Win32_LogicalDisk");
                let rows = self.query(&logical_disk(&self.volume)).await.map_err(|e| {
                    CollectionError::Unavailable(format!("{}: {io_err}; {e}", root.display()))
                })?;
                let row = &rows[0];
                let size = row
                    .number("Size")
                    .ok_or_else(|| CollectionError::parse("Win32_LogicalDisk", "Size"))?;
                let free = row
                    .number("FreeSpace")
                    .ok_or_else(|| CollectionError::parse("Win32_LogicalDisk", "FreeSpace"))?;
                (size, free)
            }
        };
        Ok(capacity(total / BYTES_PER_GB, free / BYTES_PER_GB))
    }

    async fn network(&self) -> Result<NetworkMetric, CollectionError> {
        // Counters come from a command, so the window stays locked across it.
        let mut window = self.tracker.window().await;
        let rows = match self.query(&NETWORK_COUNTERS).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(error = %e, "network counter query failed");
                return Ok(NetworkMetric::unavailable("Could not read interface statistics"));
            }
        };

        let candidates: Vec<&Record> = rows
            .iter()
            .filter(|r| r.get("Name").is_some_and(|n| !is_pseudo_interface(n)))
            .collect();
        let busy = |r: &Record| {
            r.integer("BytesReceivedPersec")
                .unwrap_or(0)
                .saturating_add(r.integer("BytesSentPersec").unwrap_or(0))
                > 0
        };
        let named = |wanted: &str| {
            candidates
                .iter()
                .copied()
                .find(|r| r.get("Name").is_some_and(|n| n.eq_ignore_ascii_case(wanted)))
        };
        let hints = self.adapter_hints().await;
        let enabled: Vec<&Record> = hints.enabled.iter().filter_map(|n| named(n.as_str())).collect();

        // Default route first, then enabled adapters, then anything that has
        // carried traffic.
        let Some(row) = hints
            .default_route
            .as_deref()
            .and_then(named)
            .or_else(|| enabled.iter().copied().find(|r| busy(*r)))
            .or_else(|| enabled.first().copied())
            .or_else(|| candidates.iter().copied().find(|r| busy(*r)))
            .or_else(|| candidates.first().copied())
        else {
            return Ok(NetworkMetric::unavailable("No network interface found"));
        };

        let interface = row.get("Name").unwrap_or_default().to_string();
        let counters = match (row.integer("BytesReceivedPersec"), row.integer("BytesSentPersec")) {
            (Some(rx), Some(tx)) => Counters { rx, tx },
            _ => {
                return Ok(NetworkMetric {
                    interface: Some(interface),
                    ..NetworkMetric::unavailable("Could not read interface statistics")
                })
            }
        };
        Ok(window.advance(&interface, counters, Instant::now()))
    }

    async fn server_info(&self) -> Result<ServerInfo, CollectionError> {
        Ok(server_info(self.host.as_ref()))
    }
}
