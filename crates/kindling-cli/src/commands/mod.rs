pub mod completions;
pub mod create;
pub mod delete;
pub mod doctor;
pub mod export;
pub mod get;
pub mod load;
pub mod man_pages;

use indicatif::{ProgressBar, ProgressStyle};
use kindling_core::{CoreError, LogStatus, Status};
use kindling_runtime::provider::process_env;
use kindling_runtime::{detect_provider, LocalRunner, Provider};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_ENGINE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Renders each status step as a spinner that resolves to ✓ or ✗.
#[derive(Default)]
pub struct SpinnerStatus {
    current: Mutex<Option<(ProgressBar, String)>>,
}

impl Status for SpinnerStatus {
    fn start(&self, message: &str) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((pb, previous)) = current.take() {
            spin_ok(&pb, &previous);
        }
        *current = Some((spinner(&format!("{message} ...")), message.to_owned()));
    }

    fn end(&self, success: bool) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((pb, message)) = current.take() {
            if success {
                spin_ok(&pb, &message);
            } else {
                spin_fail(&pb, &message);
            }
        }
    }
}

/// Spinners on a terminal, log lines when the output is JSON.
pub fn status_sink(json: bool) -> Box<dyn Status> {
    if json {
        Box::new(LogStatus)
    } else {
        Box::new(SpinnerStatus::default())
    }
}

pub fn colorize_role(role: &str) -> String {
    use console::Style;
    match role {
        "control-plane" => Style::new().cyan().bold().apply_to(role).to_string(),
        "worker" => Style::new().green().apply_to(role).to_string(),
        "external-load-balancer" => Style::new().yellow().apply_to(role).to_string(),
        other => other.to_owned(),
    }
}

/// The provider named by `KIND_EXPERIMENTAL_PROVIDER`, else the first
/// engine found on this host.
pub fn connect() -> Result<Box<dyn Provider>, String> {
    detect_provider(Arc::new(LocalRunner::new()), &process_env()).map_err(|e| e.to_string())
}

/// The error message, followed by the output of the failed command if there
/// was one.
pub fn describe(err: &CoreError) -> String {
    let mut msg = err.to_string();
    if let Some(run) = err.run_error() {
        let output = run.output_str();
        let output = output.trim_end();
        if !output.is_empty() {
            msg.push_str("\nCommand Output: ");
            msg.push_str(output);
        }
    }
    msg
}

/// Exit code for an error message produced by a command.
pub fn exit_code_for(msg: &str) -> u8 {
    const CONFIG_PREFIXES: [&str; 6] = [
        "config error:",
        "failed to read cluster config",
        "failed to parse cluster config",
        "invalid cluster config",
        "unsupported cluster config",
        "unsupported config",
    ];
    if CONFIG_PREFIXES.iter().any(|p| msg.starts_with(p)) {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("container engine") {
        EXIT_ENGINE_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Parse `90`, `90s`, `5m` or `1h` into a duration.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;
    let seconds = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => return Err(format!("invalid duration unit '{unit}', expected s, m or h")),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindling_runtime::{RunError, RuntimeError};

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"name": "kind"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"name\""));
        assert!(result.contains("\"kind\""));
    }

    #[test]
    fn colorize_role_keeps_text() {
        for role in ["control-plane", "worker", "external-load-balancer"] {
            assert!(colorize_role(role).contains(role));
        }
        assert_eq!(colorize_role("other"), "other");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_ENGINE_ERROR);
    }

    #[test]
    fn exit_code_classification() {
        assert_eq!(
            exit_code_for("config error: invalid cluster config: bad"),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            exit_code_for("failed to parse cluster config: line 3"),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            exit_code_for("container engine 'lxc' is not available on this system"),
            EXIT_ENGINE_ERROR
        );
        assert_eq!(exit_code_for("no nodes found for cluster \"kind\""), EXIT_FAILURE);
    }

    #[test]
    fn describe_appends_command_output() {
        let err = CoreError::Runtime(RuntimeError::Run(RunError {
            command: vec!["docker".to_owned(), "run".to_owned()],
            output: b"port is already allocated\n".to_vec(),
            exit_code: Some(125),
        }));
        let msg = describe(&err);
        assert!(msg.starts_with("command \"docker run\" failed with exit code 125"));
        assert!(msg.ends_with("\nCommand Output: port is already allocated"));
    }

    #[test]
    fn describe_without_command_output() {
        let err = CoreError::ClusterNotFound("kind".to_owned());
        assert_eq!(describe(&err), "no nodes found for cluster \"kind\"");
    }

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn spinner_status_balances_steps() {
        let status = SpinnerStatus::default();
        status.start("Preparing nodes");
        status.end(true);
        status.start("Starting the control-plane");
        status.end(false);
        assert!(status.current.lock().unwrap().is_none());
    }
}
