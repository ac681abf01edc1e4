//! In-memory host for driving metric sources with recorded output.
//!
//! Everything sits behind one mutex so tests can change files or command
//! output between polls through a shared reference.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DiskSpace, Host, InterfaceCounters, MemorySpace};
use crate::error::CollectionError;

#[derive(Debug, Default)]
struct State {
    commands: HashMap<String, Result<String, String>>,
    files: BTreeMap<PathBuf, String>,
    disks: BTreeMap<PathBuf, DiskSpace>,
    load_average: Option<f64>,
    logical_cpus: Option<usize>,
    memory: Option<MemorySpace>,
    counters: Vec<InterfaceCounters>,
    env: HashMap<String, String>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

fn command_key(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records stdout for `program args...`. Unrecorded commands fail to spawn.
    pub fn with_command(self, program: &str, args: &[&str], stdout: &str) -> Self {
        self.set_command(program, args, Ok(stdout.to_string()));
        self
    }

    /// Records a command that runs but exits non-zero with `stderr`.
    pub fn with_failing_command(self, program: &str, args: &[&str], stderr: &str) -> Self {
        self.set_command(program, args, Err(stderr.to_string()));
        self
    }

    pub fn set_command(&self, program: &str, args: &[&str], outcome: Result<String, String>) {
        self.state()
            .commands
            .insert(command_key(program, args), outcome);
    }

    pub fn with_file(self, path: impl AsRef<Path>, content: &str) -> Self {
        self.set_file(path, content);
        self
    }

    pub fn set_file(&self, path: impl AsRef<Path>, content: &str) {
        self.state()
            .files
            .insert(path.as_ref().to_path_buf(), content.to_string());
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.state().files.remove(path.as_ref());
    }

    pub fn with_disk(self, path: impl AsRef<Path>, total: u64, free: u64) -> Self {
        self.state()
            .disks
            .insert(path.as_ref().to_path_buf(), DiskSpace { total, free });
        self
    }

    pub fn with_load_average(self, one: f64) -> Self {
        self.state().load_average = Some(one);
        self
    }

    pub fn with_logical_cpus(self, n: usize) -> Self {
        self.state().logical_cpus = Some(n);
        self
    }

    pub fn with_memory(self, total: u64, free: u64) -> Self {
        self.state().memory = Some(MemorySpace { total, free });
        self
    }

    pub fn with_interface(self, name: &str, rx: u64, tx: u64) -> Self {
        self.set_interface(name, rx, tx);
        self
    }

    pub fn set_interface(&self, name: &str, rx: u64, tx: u64) {
        let mut state = self.state();
        state.counters.retain(|c| c.name != name);
        state.counters.push(InterfaceCounters {
            name: name.to_string(),
            rx,
            tx,
        });
    }

    pub fn with_env(self, key: &str, value: &str) -> Self {
        self.state().env.insert(key.to_string(), value.to_string());
        self
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

#[async_trait]
impl Host for FakeHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, CollectionError> {
        let key = command_key(program, args);
        let mut state = self.state();
        state.calls.push(key.clone());
        match state.commands.get(&key) {
            Some(Ok(stdout)) => Ok(stdout.clone()),
            Some(Err(stderr)) => Err(CollectionError::Exit {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            }),
            None => Err(CollectionError::Spawn {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "program not found"),
            }),
        }
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.state()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let state = self.state();
        let mut names: Vec<String> = state
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(path).ok())
            .filter_map(|rest| rest.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        names.dedup();
        if names.is_empty() {
            return Err(not_found(path));
        }
        Ok(names)
    }

    fn disk_space(&self, path: &Path) -> io::Result<DiskSpace> {
        self.state()
            .disks
            .get(path)
            .copied()
            .ok_or_else(|| not_found(path))
    }

    fn load_average(&self) -> Option<f64> {
        self.state().load_average
    }

    fn logical_cpus(&self) -> Option<usize> {
        self.state().logical_cpus
    }

    fn memory(&self) -> Option<MemorySpace> {
        self.state().memory
    }

    fn interface_counters(&self) -> Vec<InterfaceCounters> {
        self.state().counters.clone()
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.state().env.get(key).cloned()
    }

    fn os_description(&self) -> String {
        "FakeOS (test host)".to_string()
    }
}
