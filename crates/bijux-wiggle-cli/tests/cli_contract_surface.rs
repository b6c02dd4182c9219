// SPDX-License-Identifier: Apache-2.0

use assert_cmd::Command;

fn parse_commands_from_help(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut in_commands = false;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed == "Commands:" {
            in_commands = true;
            continue;
        }
        if in_commands {
            if trimmed.is_empty() {
                break;
            }
            let name = trimmed.split_whitespace().next().unwrap_or("");
            if !name.is_empty() && name != "help" {
                commands.push(name.to_string());
            }
        }
    }
    commands.sort();
    commands
}

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bijux-wiggle"))
}

#[test]
fn help_command_surface_is_stable() {
    let output = bin().arg("--help").output().expect("run help");
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).expect("utf8 help");
    assert_eq!(
        parse_commands_from_help(&text),
        vec![
            "annotations",
            "attributes",
            "cache",
            "clean",
            "clear-cache",
            "completion",
            "config",
            "datasets",
            "finish",
            "jobs",
            "load-assembly",
            "load-datasets",
            "request",
            "result",
            "run-task",
        ]
    );
    assert!(text.contains("BIJUX_WIGGLE_CONFIG"));
}

#[test]
fn unknown_flag_returns_usage_exit_code_with_machine_error() {
    let output = bin()
        .args(["--json", "--unknown-flag"])
        .output()
        .expect("run bad cli");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("utf8 stderr");
    let error: serde_json::Value = serde_json::from_str(stderr.trim()).expect("json error");
    assert_eq!(error["code"], "usage_error");
}

#[test]
fn missing_database_is_a_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("wiggle.toml");
    std::fs::write(&config, "batch_system = \"SYNC\"\n").expect("config");
    let output = bin()
        .args(["--json", "--config"])
        .arg(&config)
        .arg("cache")
        .output()
        .expect("run cache");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_config_key_is_a_validation_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("wiggle.toml");
    std::fs::write(&config, "database = \"x.db\"\nverbose = true\n").expect("config");
    let output = bin()
        .arg("--config")
        .arg(&config)
        .arg("cache")
        .output()
        .expect("run cache");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn run_task_without_index_outside_an_array_job_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = bin()
        .env_remove("LSB_JOBINDEX")
        .env_remove("SGE_TASK_ID")
        .args(["run-task", "--tasks"])
        .arg(dir.path().join("tasks.json"))
        .output()
        .expect("run task");
    assert_eq!(output.status.code(), Some(2));
}
