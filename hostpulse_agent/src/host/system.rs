//! The real machine: sysinfo handles, the filesystem and `tokio::process`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

use super::{decode_output, DiskSpace, Host, InterfaceCounters, MemorySpace};
use crate::error::CollectionError;

pub struct SystemHost {
    // Persistent sysinfo handles, refreshed on demand
    sys: Mutex<System>,
    nets: Mutex<Networks>,
    command_timeout: Duration,
}

impl SystemHost {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            sys: Mutex::new(System::new()),
            nets: Mutex::new(Networks::new_with_refreshed_list()),
            command_timeout,
        }
    }
}

#[async_trait]
impl Host for SystemHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, CollectionError> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child.
        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(CollectionError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
            Err(_) => {
                warn!(program, ?args, "command timed out");
                return Err(CollectionError::Timeout {
                    program: program.to_string(),
                    after: self.command_timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(CollectionError::Exit {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: decode_output(&output.stderr).trim().to_string(),
            });
        }
        debug!(program, ?args, bytes = output.stdout.len(), "command finished");
        Ok(decode_output(&output.stdout))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn disk_space(&self, path: &Path) -> io::Result<DiskSpace> {
        let target = strip_verbatim(std::fs::canonicalize(path)?);
        let disks = Disks::new_with_refreshed_list();
        holding_mount(&target, disks.list(), |d| d.mount_point())
            .map(|d| DiskSpace {
                total: d.total_space(),
                free: d.available_space(),
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted filesystem holds {}", target.display()),
                )
            })
    }

    fn load_average(&self) -> Option<f64> {
        if cfg!(unix) {
            Some(System::load_average().one)
        } else {
            None
        }
    }

    fn logical_cpus(&self) -> Option<usize> {
        std::thread::available_parallelism().ok().map(|n| n.get())
    }

    fn memory(&self) -> Option<MemorySpace> {
        let mut sys = self.sys.lock().ok()?;
        sys.refresh_memory();
        let total = sys.total_memory();
        (total > 0).then(|| MemorySpace {
            total,
            free: sys.available_memory(),
        })
    }

    fn interface_counters(&self) -> Vec<InterfaceCounters> {
        let Ok(mut nets) = self.nets.lock() else {
            return Vec::new();
        };
        nets.refresh(true);
        let mut list: Vec<InterfaceCounters> = nets
            .iter()
            .map(|(name, data)| InterfaceCounters {
                name: name.clone(),
                rx: data.total_received(),
                tx: data.total_transmitted(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn os_description(&self) -> String {
        let family = match std::env::consts::OS {
            "linux" => "Linux",
            "macos" => "Darwin",
            "windows" => "Windows",
            "freebsd" => "FreeBSD",
            other => other,
        };
        let mut details: Vec<String> = Vec::new();
        if let Some(v) = System::long_os_version() {
            details.push(v);
        }
        if let Some(k) = System::kernel_version() {
            details.push(format!("kernel {k}"));
        }
        if let Some(h) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
            details.push(h);
        }
        details.push(std::env::consts::ARCH.to_string());
        format!("{family} ({})", details.join(", "))
    }
}

/// `canonicalize` yields verbatim paths on Windows (`\\?\C:\dir`) while
/// mount points are plain (`C:\`), and the two never share a prefix component.
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let plain = path.to_str().and_then(|text| {
        if let Some(rest) = text.strip_prefix(r"\\?\UNC\") {
            return Some(format!(r"\\{rest}"));
        }
        text.strip_prefix(r"\\?\")
            .filter(|rest| rest.as_bytes().get(1) == Some(&b':'))
            .map(str::to_string)
    });
    plain.map(PathBuf::from).unwrap_or(path)
}

/// The entry whose mount point is the longest prefix of `target`.
fn holding_mount<'a, T>(
    target: &Path,
    mounts: &'a [T],
    mount_point: impl Fn(&T) -> &Path,
) -> Option<&'a T> {
    mounts
        .iter()
        .filter(|m| target.starts_with(mount_point(*m)))
        .max_by_key(|m| mount_point(*m).as_os_str().len())
}
