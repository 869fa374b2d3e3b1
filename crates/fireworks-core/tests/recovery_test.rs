// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lost runs, stale reservations and the maintenance pass.

mod common;

use std::time::Duration;

use common::*;

use fireworks_core::config::Config;
use fireworks_core::launchpad::LostRunOptions;
use fireworks_core::maintain::{Maintainer, MaintainerConfig};
use fireworks_core::model::State;

async fn let_heartbeat_age() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_fresh_runs_are_not_lost() {
    let lp = test_launchpad().await;
    add_chain(&lp, vec![firework("fresh")]).await;
    checkout(&lp).await;

    let found = lp
        .detect_lostruns(&LostRunOptions::default())
        .await
        .expect("Failed to detect lost runs");
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_detection_alone_changes_nothing() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("silent")]).await;
    let (_, launch_id) = checkout(&lp).await;
    let_heartbeat_age().await;

    let found = lp
        .detect_lostruns(&LostRunOptions::default().with_expiration(0))
        .await
        .expect("Failed to detect lost runs");
    assert_eq!(found.lost_launch_ids, vec![launch_id]);
    assert_eq!(found.lost_fw_ids, vec![ids[0]]);
    assert_eq!(fw_state(&lp, ids[0]).await, State::Running);
}

#[tokio::test]
async fn test_lost_run_is_fizzled() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("lost")]).await;
    let (_, launch_id) = checkout(&lp).await;
    let_heartbeat_age().await;

    let found = lp
        .detect_lostruns(&LostRunOptions::default().with_expiration(0).fizzle())
        .await
        .expect("Failed to detect lost runs");
    assert_eq!(found.lost_launch_ids, vec![launch_id]);
    assert_eq!(fw_state(&lp, ids[0]).await, State::Fizzled);
}

#[tokio::test]
async fn test_lost_run_can_be_rerun() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("again")]).await;
    let (_, launch_id) = checkout(&lp).await;
    let_heartbeat_age().await;

    lp.detect_lostruns(&LostRunOptions::default().with_expiration(0).rerun())
        .await
        .expect("Failed to detect lost runs");

    let fw = lp.get_fw_by_id(ids[0]).await.expect("Failed to load firework");
    assert_eq!(fw.state, State::Ready);
    assert!(fw.launches.is_empty());
    assert_eq!(fw.archived_launch_ids(), vec![launch_id]);
}

#[tokio::test]
async fn test_pinged_run_survives() {
    let lp = test_launchpad().await;
    add_chain(&lp, vec![firework("alive")]).await;
    let (_, launch_id) = checkout(&lp).await;
    let_heartbeat_age().await;

    lp.ping_launch(launch_id, None, None)
        .await
        .expect("Failed to ping");
    let found = lp
        .detect_lostruns(&LostRunOptions::default().with_expiration(60))
        .await
        .expect("Failed to detect lost runs");
    assert!(found.lost_launch_ids.is_empty());
}

#[tokio::test]
async fn test_stale_reservation_is_cancelled() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("queued")]).await;
    let (_, launch_id) = lp
        .reserve_fw(&worker(), "/tmp", None, None)
        .await
        .expect("Failed to reserve")
        .expect("Nothing was ready");
    assert_eq!(fw_state(&lp, ids[0]).await, State::Reserved);
    let_heartbeat_age().await;

    let stale = lp
        .detect_unreserved(0, true)
        .await
        .expect("Failed to detect stale reservations");
    assert_eq!(stale, vec![launch_id]);
    assert_eq!(fw_state(&lp, ids[0]).await, State::Ready);
}

#[tokio::test]
async fn test_reserved_launch_is_reused_at_checkout() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("queued")]).await;
    let (_, reserved_id) = lp
        .reserve_fw(&worker(), "/tmp", None, None)
        .await
        .expect("Failed to reserve")
        .expect("Nothing was ready");

    let (fw, running_id) = lp
        .checkout_fw(&worker(), "/tmp", Some(ids[0]), None, None, State::Running)
        .await
        .expect("Failed to check out")
        .expect("Reserved firework not found");
    assert_eq!(running_id, reserved_id);
    assert_eq!(fw.launches.len(), 1);

    let launch = lp.get_launch_by_id(running_id).await.expect("Failed to load launch");
    let states: Vec<State> = launch.state_history().iter().map(|e| e.state).collect();
    assert_eq!(states, vec![State::Reserved, State::Running]);
}

#[tokio::test]
async fn test_reservation_ids_round_trip_to_fireworks() {
    let lp = test_launchpad().await;
    let ids = add_chain(&lp, vec![firework("queued")]).await;
    let (_, launch_id) = lp
        .reserve_fw(&worker(), "/tmp", None, None)
        .await
        .expect("Failed to reserve")
        .expect("Nothing was ready");

    lp.set_reservation_id(launch_id, "job.4242")
        .await
        .expect("Failed to set reservation id");
    assert_eq!(
        lp.get_fw_ids_from_reservation_id("job.4242").await.unwrap(),
        vec![ids[0]]
    );
    assert_eq!(
        lp.get_reservation_id_from_fw_id(ids[0]).await.unwrap().as_deref(),
        Some("job.4242")
    );

    lp.cancel_reservation_by_reservation_id("job.4242")
        .await
        .expect("Failed to cancel");
    assert_eq!(fw_state(&lp, ids[0]).await, State::Ready);

    // Unknown ids are only logged.
    lp.cancel_reservation_by_reservation_id("job.0")
        .await
        .expect("Unknown reservation id must not fail");
}

#[tokio::test]
async fn test_maintenance_pass_fixes_lost_and_stale_launches() {
    let config = Config {
        run_expiration_secs: 0,
        reservation_expiration_secs: 0,
        ..Config::default()
    };
    let lp = test_launchpad_with(config.clone()).await;
    let running = add_chain(&lp, vec![firework("running")]).await;
    let reserved = add_chain(&lp, vec![firework("reserved")]).await;

    lp.checkout_fw(&worker(), "/tmp", Some(running[0]), None, None, State::Running)
        .await
        .expect("Failed to check out")
        .expect("Nothing was ready");
    lp.checkout_fw(&worker(), "/tmp", Some(reserved[0]), None, None, State::Reserved)
        .await
        .expect("Failed to reserve")
        .expect("Nothing was ready");
    let_heartbeat_age().await;

    let maintainer = Maintainer::new(lp.clone(), MaintainerConfig::from_config(&config));
    let report = maintainer.maintain_once().await.expect("Maintenance failed");

    assert_eq!(report.lost.lost_fw_ids, vec![running[0]]);
    assert_eq!(report.unreserved_launch_ids.len(), 1);
    assert_eq!(fw_state(&lp, running[0]).await, State::Fizzled);
    assert_eq!(fw_state(&lp, reserved[0]).await, State::Ready);
}

#[tokio::test]
async fn test_maintainer_stops_on_shutdown() {
    let lp = test_launchpad().await;
    let config = MaintainerConfig {
        poll_interval: Duration::from_secs(3600),
        ..MaintainerConfig::default()
    };
    let maintainer = Maintainer::new(lp, config);
    let shutdown = maintainer.shutdown_handle();

    let handle = tokio::spawn(async move { maintainer.run().await });
    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Maintainer did not stop")
        .expect("Maintainer panicked");
}
