// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rocket runs against an in-memory LaunchPad and in offline mode.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::{Map, json};

use fireworks_core::config::Config;
use fireworks_core::model::{Firework, State, Task};
use fireworks_core::offline::{self, OfflineData};
use fireworks_core::rocket::Rocket;

async fn last_launch_action(lp: &fireworks_core::LaunchPad, fw_id: i64) -> Map<String, serde_json::Value> {
    let fw = lp.get_fw_by_id(fw_id).await.expect("Failed to load firework");
    let launch_id = *fw.launch_ids().last().expect("firework has a launch");
    lp.get_launch_by_id(launch_id)
        .await
        .expect("Failed to load launch")
        .action
        .expect("launch has an action")
        .stored_data
}

#[tokio::test]
async fn test_rocket_returns_false_when_nothing_is_ready() {
    let lp = test_launchpad().await;
    let dir = tempfile::tempdir().unwrap();

    let ran = Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket should not fail");
    assert!(!ran);
}

#[tokio::test]
async fn test_rocket_completes_and_passes_spec_updates() {
    let lp = test_launchpad().await;
    let parent = Firework::new(
        vec![store_task(json!("kept")), update_task(json!({"from_parent": 7}))],
        Map::new(),
    )
    .with_name("parent");
    let ids = add_chain(&lp, vec![parent, firework("child")]).await;
    let dir = tempfile::tempdir().unwrap();

    let ran = Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket failed");
    assert!(ran);

    assert_eq!(fw_state(&lp, ids[0]).await, State::Completed);
    let stored = last_launch_action(&lp, ids[0]).await;
    assert_eq!(stored["value"], json!("kept"));

    let child = lp.get_fw_by_id(ids[1]).await.expect("Failed to load child");
    assert_eq!(child.state, State::Ready);
    assert_eq!(child.spec["from_parent"], json!(7));
    assert!(dir.path().join(offline::FW_FILE).exists());
}

#[tokio::test]
async fn test_script_task_output_is_stored() {
    let lp = test_launchpad().await;
    let script = Task::new(
        "ScriptTask",
        json!({"script": "echo hello", "store_stdout": true}),
    );
    let ids = add_chain(&lp, vec![Firework::new(vec![script], Map::new()).with_name("echo")]).await;
    let dir = tempfile::tempdir().unwrap();

    Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket failed");

    let stored = last_launch_action(&lp, ids[0]).await;
    assert_eq!(stored["stdout"], json!("hello\n"));
    assert_eq!(stored["returncode"], json!(0));
}

#[tokio::test]
async fn test_failing_task_fizzles_with_recovery_record() {
    let lp = test_launchpad().await;
    let fw = Firework::new(vec![store_task(json!("before")), fail_task()], Map::new())
        .with_name("fails");
    let ids = add_chain(&lp, vec![fw]).await;
    let dir = tempfile::tempdir().unwrap();

    let ran = Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Task errors must not surface as rocket errors");
    assert!(ran);

    assert_eq!(fw_state(&lp, ids[0]).await, State::Fizzled);
    let stored = last_launch_action(&lp, ids[0]).await;
    assert_eq!(stored["_message"], json!("runtime error during task"));
    assert_eq!(stored["_task"]["_fw_name"], json!(FAIL_TASK));
    assert_eq!(stored["_exception"]["_failed_task_n"], json!(1));
    assert!(
        stored["_exception"]["_stacktrace"]
            .as_str()
            .unwrap()
            .contains("task failed on purpose")
    );
    assert_eq!(stored["_recovery"]["_all_stored_data"]["value"], json!("before"));
}

#[tokio::test]
async fn test_task_level_rerun_resumes_at_failed_task() {
    let lp = test_launchpad().await;
    let counter = Task::new("ScriptTask", json!({"script": "echo run >> runs.txt"}));
    let fw = Firework::new(vec![counter, flaky_task()], Map::new())
        .with_name("flaky")
        .with_spec("break_me", json!(true));
    let ids = add_chain(&lp, vec![fw]).await;
    let dir = tempfile::tempdir().unwrap();

    Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket failed");
    assert_eq!(fw_state(&lp, ids[0]).await, State::Fizzled);

    let reruns = lp
        .rerun_fws_task_level(ids[0], false, None, None)
        .await
        .expect("Failed to rerun");
    assert_eq!(reruns, vec![ids[0]]);

    let mut fix = Map::new();
    fix.insert("break_me".into(), json!(false));
    lp.update_spec(&ids, &fix).await.expect("Failed to update spec");

    Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket failed");
    assert_eq!(fw_state(&lp, ids[0]).await, State::Completed);

    let runs = std::fs::read_to_string(dir.path().join("runs.txt")).unwrap();
    assert_eq!(runs.lines().count(), 1, "first task must not run again");
    let stored = last_launch_action(&lp, ids[0]).await;
    assert_eq!(stored["returncode"], json!(0));
}

#[tokio::test]
async fn test_job_info_and_fworker_are_passed_on() {
    let lp = test_launchpad().await;
    let parent = firework("parent")
        .with_spec("_pass_job_info", json!(true))
        .with_spec("_preserve_fworker", json!(true));
    let ids = add_chain(&lp, vec![parent, firework("child")]).await;
    let dir = tempfile::tempdir().unwrap();

    Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket failed");

    let child = lp.get_fw_by_id(ids[1]).await.expect("Failed to load child");
    let job_info = child.spec["_job_info"].as_array().expect("job info passed");
    assert_eq!(job_info.len(), 1);
    assert_eq!(job_info[0]["fw_id"], json!(ids[0]));
    assert_eq!(job_info[0]["name"], json!("parent"));
    assert_eq!(child.spec["_fworker"], json!("test-worker"));
}

#[tokio::test]
async fn test_launch_dir_redirects_the_run() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("moved").with_spec("_launch_dir", json!("sub"))]).await;
    let dir = tempfile::tempdir().unwrap();

    Rocket::new(lp.clone(), worker(), None)
        .run(dir.path())
        .await
        .expect("Rocket failed");

    let fw = lp.get_fw_by_id(ids[0]).await.expect("Failed to load firework");
    let launch = lp
        .get_launch_by_id(fw.launch_ids()[0])
        .await
        .expect("Failed to load launch");
    assert_eq!(launch.launch_dir, dir.path().join("sub").to_string_lossy());
    assert!(dir.path().join("sub").join(offline::FW_FILE).exists());
}

#[tokio::test]
async fn test_offline_rocket_writes_result_file() {
    let dir = tempfile::tempdir().unwrap();
    let fw = firework("offline").with_id(3);
    offline::write_firework(dir.path(), &fw).await.unwrap();
    offline::write_offline(
        dir.path(),
        &OfflineData {
            launch_id: 9,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let rocket = Rocket::offline(worker(), Arc::new(test_registry()), Config::default());
    assert!(rocket.run(dir.path()).await.expect("Rocket failed"));

    let data = offline::read_offline(dir.path()).await.unwrap();
    assert_eq!(data.launch_id, 9);
    assert_eq!(data.state, Some(State::Completed));
    assert!(data.started_on.is_some());
    assert!(data.completed_on.is_some());
    assert_eq!(data.fwaction.unwrap().stored_data["value"], json!("offline"));
    assert!(offline::read_ping(dir.path()).await.unwrap().is_some());
}
