#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

const ZP_ENV_VARS: &[&str] = &[
    "ZP_PADDING_PATH",
    "ZP_MIN_FREE_PCT",
    "ZP_MAX_FREE_PCT",
    "ZP_POLL_INTERVAL_SECS",
    "ZP_MAX_WRITE_RATE_KBPS",
    "ZP_ON_INTERRUPT",
    "ZP_OPEN_MODE",
    "ZP_LOG_PATH",
    "ZP_VERBOSE",
];

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_zeropad") {
        return PathBuf::from(path);
    }

    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join("zeropad"));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve zeropad binary path for integration test"),
    }
}

/// A zeropad command with ambient `ZP_*` overrides stripped.
pub fn zeropad_command(args: &[&str]) -> Command {
    let mut cmd = Command::new(resolve_bin_path());
    cmd.args(args).env("RUST_BACKTRACE", "1");
    for var in ZP_ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// Run zeropad to completion, keeping a transcript under the temp dir.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("zeropad-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));

    let output = zeropad_command(args)
        .output()
        .expect("execute zeropad command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", resolve_bin_path().display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Start zeropad in the foreground without waiting for it.
pub fn spawn_foreground(args: &[&str]) -> Child {
    zeropad_command(args)
        .arg("--foreground")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn zeropad")
}
