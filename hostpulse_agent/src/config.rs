//! Command line and environment configuration for the agent.

use std::net::IpAddr;
use std::time::Duration;

use crate::source::Platform;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub path: String,
    pub platform: Platform,
    pub disk_path: Option<String>,
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            path: "/".to_string(),
            platform: Platform::detect(),
            disk_path: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(Config),
    Help(String),
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT] [--bind ADDR|-b ADDR] [--path /ROUTE] \
         [--platform unix|windows] [--disk-path PATH] [--command-timeout-ms MS]\n\
         Environment: HOSTPULSE_PORT, HOSTPULSE_BIND, HOSTPULSE_DISK_PATH, \
         HOSTPULSE_COMMAND_TIMEOUT_MS, RUST_LOG"
    )
}

/// Parses `args` (program name first). `env` supplies `HOSTPULSE_*` defaults
/// that flags override.
pub fn parse_args<I, E>(args: I, env: E) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
    E: Fn(&str) -> Option<String>,
{
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hostpulse_agent".into());
    let mut cfg = Config::default();

    if let Some(v) = env("HOSTPULSE_PORT") {
        cfg.port = parse_port(&v)?;
    }
    if let Some(v) = env("HOSTPULSE_BIND") {
        cfg.bind = parse_bind(&v)?;
    }
    if let Some(v) = env("HOSTPULSE_DISK_PATH").filter(|v| !v.is_empty()) {
        cfg.disk_path = Some(v);
    }
    if let Some(v) = env("HOSTPULSE_COMMAND_TIMEOUT_MS") {
        cfg.command_timeout = parse_timeout(&v)?;
    }

    while let Some(arg) = it.next() {
        // --flag=value and --flag value are equivalent
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| {
            inline
                .clone()
                .or_else(|| it.next())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("{name} needs a value\n{}", usage(&prog)))
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(Command::Help(usage(&prog))),
            "--port" | "-p" => cfg.port = parse_port(&value("--port")?)?,
            "--bind" | "-b" => cfg.bind = parse_bind(&value("--bind")?)?,
            "--path" => cfg.path = parse_route(&value("--path")?)?,
            "--platform" => cfg.platform = value("--platform")?.parse()?,
            "--disk-path" => cfg.disk_path = Some(value("--disk-path")?),
            "--command-timeout-ms" => {
                cfg.command_timeout = parse_timeout(&value("--command-timeout-ms")?)?
            }
            _ => return Err(format!("Unexpected argument '{arg}'\n{}", usage(&prog))),
        }
    }
    Ok(Command::Run(cfg))
}

fn parse_port(v: &str) -> Result<u16, String> {
    v.trim()
        .parse::<u16>()
        .map_err(|_| format!("invalid port '{v}'"))
}

fn parse_bind(v: &str) -> Result<IpAddr, String> {
    v.trim()
        .parse::<IpAddr>()
        .map_err(|_| format!("invalid bind address '{v}'"))
}

/// A literal route. `:` and `*` would turn into router captures.
fn parse_route(v: &str) -> Result<String, String> {
    if !v.starts_with('/') {
        return Err(format!("--path must start with '/': {v}"));
    }
    if v.contains([':', '*', '{', '}']) {
        return Err(format!("--path must be a literal route without ':', '*' or braces: {v}"));
    }
    Ok(v.to_string())
}

fn parse_timeout(v: &str) -> Result<Duration, String> {
    match v.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(format!("invalid command timeout '{v}' (milliseconds > 0)")),
    }
}
