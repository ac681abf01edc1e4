//! Argument and environment parsing for the agent configuration.
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use hostpulse_agent::config::{parse_args, Command, Config, DEFAULT_PORT};
use hostpulse_agent::source::Platform;

fn args(list: &[&str]) -> Vec<String> {
    std::iter::once("agent")
        .chain(list.iter().copied())
        .map(String::from)
        .collect()
}

fn run(list: &[&str], env: &[(&str, &str)]) -> Result<Config, String> {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    match parse_args(args(list), |k| env.get(k).cloned())? {
        Command::Run(cfg) => Ok(cfg),
        Command::Help(_) => Err("help".into()),
    }
}

#[test]
fn defaults() {
    let cfg = run(&[], &[]).unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.path, "/");
    assert_eq!(cfg.bind, IpAddr::from([0, 0, 0, 0]));
    assert_eq!(cfg.platform, Platform::detect());
    assert_eq!(cfg.disk_path, None);
    assert_eq!(cfg.command_timeout, Duration::from_millis(5_000));
}

#[test]
fn port_long_short_and_assign() {
    assert_eq!(run(&["--port", "9001"], &[]).unwrap().port, 9001);
    assert_eq!(run(&["-p", "9002"], &[]).unwrap().port, 9002);
    assert_eq!(run(&["--port=9003"], &[]).unwrap().port, 9003);
    assert!(run(&["--port", "http"], &[]).is_err());
}

#[test]
fn flags_override_environment() {
    let env = [
        ("HOSTPULSE_PORT", "4000"),
        ("HOSTPULSE_DISK_PATH", "/data"),
        ("HOSTPULSE_COMMAND_TIMEOUT_MS", "750"),
        ("HOSTPULSE_BIND", "127.0.0.1"),
    ];
    let cfg = run(&[], &env).unwrap();
    assert_eq!(cfg.port, 4000);
    assert_eq!(cfg.disk_path.as_deref(), Some("/data"));
    assert_eq!(cfg.command_timeout, Duration::from_millis(750));
    assert_eq!(cfg.bind, IpAddr::from([127, 0, 0, 1]));

    let cfg = run(&["--port", "5000", "--disk-path=/srv"], &env).unwrap();
    assert_eq!(cfg.port, 5000);
    assert_eq!(cfg.disk_path.as_deref(), Some("/srv"));
}

#[test]
fn platform_path_and_timeout_flags() {
    let cfg = run(
        &["--platform", "windows", "--path", "/metrics", "--command-timeout-ms", "1200"],
        &[],
    )
    .unwrap();
    assert_eq!(cfg.platform, Platform::Windows);
    assert_eq!(cfg.path, "/metrics");
    assert_eq!(cfg.command_timeout, Duration::from_millis(1200));

    assert!(run(&["--path", "metrics"], &[]).is_err());
    assert!(run(&["--path", "/x/*"], &[]).is_err());
    assert!(run(&["--path=/hosts/:id"], &[]).is_err());
    assert!(run(&["--command-timeout-ms", "0"], &[]).is_err());
    assert!(run(&["--platform", "beos"], &[]).is_err());
}

#[test]
fn invalid_environment_is_an_error() {
    assert!(run(&[], &[("HOSTPULSE_PORT", "99999")]).is_err());
    assert!(run(&[], &[("HOSTPULSE_BIND", "localhost")]).is_err());
}

#[test]
fn help_and_unknown_arguments() {
    assert!(matches!(
        parse_args(args(&["-h"]), |_| None),
        Ok(Command::Help(text)) if text.starts_with("Usage: agent")
    ));
    let err = parse_args(args(&["ws://example"]), |_| None).unwrap_err();
    assert!(err.starts_with("Unexpected argument 'ws://example'"));
}
