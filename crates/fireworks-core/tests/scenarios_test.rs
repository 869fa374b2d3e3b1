// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end LaunchPad scenarios: submission, checkout, completion and the dynamic
//! workflow actions.

mod common;

use common::*;
use serde_json::{Map, json};

use fireworks_core::model::{Category, FWAction, FWorker, Firework, State, Task};
use fireworks_core::workflow::Workflow;

#[tokio::test]
async fn test_chain_runs_in_order_and_passes_update_spec() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("first"), firework("second")]).await;

    assert_eq!(fw_state(&lp, ids[0]).await, State::Ready);
    assert_eq!(fw_state(&lp, ids[1]).await, State::Waiting);

    let (fw, launch_id) = checkout(&lp).await;
    assert_eq!(fw.fw_id, ids[0]);
    assert_eq!(fw_state(&lp, ids[0]).await, State::Running);

    let action = FWAction::new().with_update_spec("input", json!(42));
    lp.complete_launch(launch_id, Some(action), State::Completed)
        .await
        .expect("Failed to complete launch");

    assert_eq!(fw_state(&lp, ids[0]).await, State::Completed);
    let child = lp.get_fw_by_id(ids[1]).await.expect("Failed to load child");
    assert_eq!(child.state, State::Ready);
    assert_eq!(child.spec["input"], json!(42));

    let wf = lp.get_wf_by_fw_id(ids[0]).await.expect("Failed to load workflow");
    assert_eq!(wf.state(), State::Ready);

    let (fw, launch_id) = checkout(&lp).await;
    assert_eq!(fw.fw_id, ids[1]);
    lp.complete_launch(launch_id, None, State::Completed)
        .await
        .expect("Failed to complete launch");

    let wf = lp.get_wf_by_fw_id(ids[1]).await.expect("Failed to load workflow");
    assert_eq!(wf.state(), State::Completed);
}

#[tokio::test]
async fn test_nothing_ready_returns_none() {
    let lp = test_launchpad().await;
    let checked_out = lp
        .checkout_fw(&worker(), "/tmp", None, None, None, State::Running)
        .await
        .expect("Checkout should not fail");
    assert!(checked_out.is_none());
}

#[tokio::test]
async fn test_checkout_rejects_non_launch_states() {
    let lp = test_launchpad().await;
    let err = lp
        .checkout_fw(&worker(), "/tmp", None, None, None, State::Completed)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_higher_priority_is_checked_out_first() {
    let lp = test_launchpad().await;
    let low = add_chain(&lp, vec![firework("low").with_spec("_priority", json!(1))]).await;
    let high = add_chain(&lp, vec![firework("high").with_spec("_priority", json!(10))]).await;

    let (fw, _) = checkout(&lp).await;
    assert_eq!(fw.fw_id, high[0]);
    let (fw, _) = checkout(&lp).await;
    assert_eq!(fw.fw_id, low[0]);
}

#[tokio::test]
async fn test_category_limits_what_a_worker_sees() {
    let lp = test_launchpad().await;
    add_chain(&lp, vec![firework("cpu-job").with_spec("_category", json!("cpu"))]).await;

    let gpu_worker = FWorker::new("gpu-box").with_category(Category::One("gpu".into()));
    let none = lp
        .checkout_fw(&gpu_worker, "/tmp", None, None, None, State::Running)
        .await
        .expect("Checkout should not fail");
    assert!(none.is_none());

    let cpu_worker = FWorker::new("cpu-box").with_category(Category::One("cpu".into()));
    let some = lp
        .checkout_fw(&cpu_worker, "/tmp", None, None, None, State::Running)
        .await
        .expect("Checkout should not fail");
    assert!(some.is_some());
}

#[tokio::test]
async fn test_pinned_fworker_is_respected() {
    let lp = test_launchpad().await;
    add_chain(&lp, vec![firework("pinned").with_spec("_fworker", json!("special"))]).await;

    let none = lp
        .checkout_fw(&worker(), "/tmp", None, None, None, State::Running)
        .await
        .expect("Checkout should not fail");
    assert!(none.is_none());

    let some = lp
        .checkout_fw(&FWorker::new("special"), "/tmp", None, None, None, State::Running)
        .await
        .expect("Checkout should not fail");
    assert!(some.is_some());
}

#[tokio::test]
async fn test_unknown_task_kind_is_fizzled_at_checkout() {
    let lp = test_launchpad().await;
    let bad = Firework::new(vec![Task::new("NoSuchTask", json!({}))], Map::new()).with_name("bad");
    let ids = add_chain(&lp, vec![bad]).await;

    let checked_out = lp
        .checkout_fw(&worker(), "/tmp", None, None, None, State::Running)
        .await
        .expect("Checkout should not fail");
    assert!(checked_out.is_none());
    assert_eq!(fw_state(&lp, ids[0]).await, State::Fizzled);
}

#[tokio::test]
async fn test_addition_creates_ready_child() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("parent")]).await;
    let (_, launch_id) = checkout(&lp).await;

    let action = FWAction::new().with_addition(Workflow::from_firework(firework("added")));
    lp.complete_launch(launch_id, Some(action), State::Completed)
        .await
        .expect("Failed to complete launch");

    let wf = lp.get_wf_by_fw_id(ids[0]).await.expect("Failed to load workflow");
    assert_eq!(wf.len(), 2);
    let children = wf.links().children(ids[0]).to_vec();
    assert_eq!(children.len(), 1);
    assert!(children[0] > 0, "added firework must get a stored id");
    assert_eq!(fw_state(&lp, children[0]).await, State::Ready);
}

#[tokio::test]
async fn test_detour_runs_before_existing_children() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("parent"), firework("child")]).await;
    let (_, launch_id) = checkout(&lp).await;

    let action = FWAction::new().with_detour(Workflow::from_firework(firework("detour")));
    lp.complete_launch(launch_id, Some(action), State::Completed)
        .await
        .expect("Failed to complete launch");

    let wf = lp.get_wf_by_fw_id(ids[0]).await.expect("Failed to load workflow");
    let detour = wf.links().children(ids[0]).to_vec();
    assert_eq!(detour.len(), 1);
    assert_ne!(detour[0], ids[1]);
    assert_eq!(wf.links().children(detour[0]).to_vec(), vec![ids[1]]);
    assert_eq!(fw_state(&lp, detour[0]).await, State::Ready);
    assert_eq!(fw_state(&lp, ids[1]).await, State::Waiting);
}

#[tokio::test]
async fn test_defuse_children_stops_downstream() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("a"), firework("b"), firework("c")]).await;
    let (_, launch_id) = checkout(&lp).await;

    let action = FWAction {
        defuse_children: true,
        ..FWAction::default()
    };
    lp.complete_launch(launch_id, Some(action), State::Completed)
        .await
        .expect("Failed to complete launch");

    assert_eq!(fw_state(&lp, ids[0]).await, State::Completed);
    assert_eq!(fw_state(&lp, ids[1]).await, State::Defused);
    assert_eq!(fw_state(&lp, ids[2]).await, State::Defused);
    let wf = lp.get_wf_by_fw_id(ids[0]).await.expect("Failed to load workflow");
    assert_eq!(wf.state(), State::Defused);
}

#[tokio::test]
async fn test_fizzled_parent_blocks_unless_allowed() {
    let lp = test_launchpad().await;
    let tolerant = firework("tolerant").with_spec("_allow_fizzled_parents", json!(true));
    let ids = add_chain(&lp, vec![firework("parent"), tolerant]).await;
    let (_, launch_id) = checkout(&lp).await;

    lp.mark_fizzled(launch_id).await.expect("Failed to fizzle");

    assert_eq!(fw_state(&lp, ids[0]).await, State::Fizzled);
    let child = lp.get_fw_by_id(ids[1]).await.expect("Failed to load child");
    assert_eq!(child.state, State::Ready);
    let fizzled = child.spec["_fizzled_parents"].as_array().expect("parents injected");
    assert_eq!(fizzled.len(), 1);
    assert_eq!(fizzled[0]["fw_id"], json!(ids[0]));
}

#[tokio::test]
async fn test_completing_twice_is_a_no_op() {
    let lp = test_launchpad().await;
    add_chain(&lp, vec![firework("once")]).await;
    let (_, launch_id) = checkout(&lp).await;

    lp.complete_launch(launch_id, None, State::Completed)
        .await
        .expect("Failed to complete launch");
    let again = lp
        .complete_launch(launch_id, None, State::Fizzled)
        .await
        .expect("Second completion should be ignored");
    assert_eq!(again.state(), State::Completed);
}

#[tokio::test]
async fn test_append_wf_under_running_parent() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("root")]).await;

    let new_ids = lp
        .append_wf(Workflow::from_firework(firework("appended")), &ids, false, false)
        .await
        .expect("Failed to append");
    assert_eq!(new_ids.len(), 1);
    assert_eq!(fw_state(&lp, new_ids[0]).await, State::Waiting);

    let (_, launch_id) = checkout(&lp).await;
    lp.complete_launch(launch_id, None, State::Completed)
        .await
        .expect("Failed to complete launch");
    assert_eq!(fw_state(&lp, new_ids[0]).await, State::Ready);
}
