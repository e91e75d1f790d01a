// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use super::Config;

#[allow(clippy::expect_used)]
fn parse(args: &[&str]) -> Config {
    Config::try_parse_from(std::iter::once("corral").chain(args.iter().copied()))
        .expect("args parse")
}

#[test]
#[serial_test::serial]
fn defaults() -> anyhow::Result<()> {
    let config = parse(&[]);
    config.validate()?;
    assert_eq!(config.log_level, "info");
    assert_eq!(config.log_format, "text");
    assert_eq!(config.log_lines, 1000);
    assert!(!config.stall);
    assert_eq!(config.stall_timeout_ms, 30_000);
    Ok(())
}

#[test]
#[serial_test::serial]
fn invalid_log_format_rejected() {
    let config = parse(&["--log-format", "yaml"]);
    assert!(config.validate().is_err());
}

#[test]
#[serial_test::serial]
fn zero_log_lines_rejected() {
    let config = parse(&["--log-lines", "0"]);
    assert!(config.validate().is_err());
}

#[test]
#[serial_test::serial]
fn manager_config_mapping() {
    let config = parse(&[
        "--stall",
        "--stall-timeout-ms",
        "5000",
        "--ready-settle-ms",
        "250",
        "--task-settle-ms",
        "900",
        "--log-lines",
        "50",
    ]);
    let manager = config.manager_config();
    assert_eq!(manager.log_capacity, 50);
    assert!(manager.defaults.stall_enabled);
    assert_eq!(manager.defaults.stall_timeout, Duration::from_millis(5000));
    assert_eq!(manager.defaults.ready_settle, Duration::from_millis(250));
    assert_eq!(manager.defaults.task_settle, Duration::from_millis(900));
}
