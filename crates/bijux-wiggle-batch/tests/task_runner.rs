// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_batch::{failed_task_codes, run_task, BatchErrorCode, SystemRunner, TaskFile};

#[test]
fn run_task_executes_the_indexed_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("second.txt");
    let tasks = dir.path().join("tasks.json");
    TaskFile::new(vec![
        vec!["false".to_string()],
        vec!["touch".to_string(), marker.display().to_string()],
    ])
    .write(&tasks)
    .expect("write");

    assert_eq!(run_task(&SystemRunner, &tasks, 2).expect("task 2"), 0);
    assert!(marker.exists());
    assert!(failed_task_codes(&tasks).is_empty());
    let code = run_task(&SystemRunner, &tasks, 1).expect("task 1");
    assert_ne!(code, 0);
    assert_eq!(failed_task_codes(&tasks), vec![code]);
    assert_eq!(
        run_task(&SystemRunner, &tasks, 3).expect_err("out of range").code,
        BatchErrorCode::InvalidTask
    );
}

#[test]
fn task_file_rejects_unknown_fields() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tasks = dir.path().join("tasks.json");
    std::fs::write(&tasks, r#"{"schema_version":1,"commands":[],"shell":"sh"}"#).expect("write");
    assert_eq!(
        TaskFile::read(&tasks).expect_err("unknown").code,
        BatchErrorCode::InvalidTask
    );
}
