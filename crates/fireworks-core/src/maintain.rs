// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background maintenance of a LaunchPad.
//!
//! Each pass fizzles RUNNING launches that stopped pinging (see
//! [`LaunchPad::detect_lostruns`]) and cancels RESERVED launches whose reservation
//! expired (see [`LaunchPad::detect_unreserved`]). Workers that die mid-run thereby
//! stop holding their fireworks hostage.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Result;
use crate::launchpad::{LaunchPad, LostRunOptions, LostRuns};

/// Configuration for the [`Maintainer`].
#[derive(Debug, Clone)]
pub struct MaintainerConfig {
    /// Pause between passes.
    pub poll_interval: Duration,
    /// RUNNING launches silent this long are fizzled.
    pub run_expiration_secs: u64,
    /// RESERVED launches silent this long are cancelled.
    pub reservation_expiration_secs: u64,
}

impl MaintainerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.maintain_interval(),
            run_expiration_secs: config.run_expiration_secs,
            reservation_expiration_secs: config.reservation_expiration_secs,
        }
    }
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What one pass found and fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub lost: LostRuns,
    pub unreserved_launch_ids: Vec<i64>,
}

/// Background worker that maintains a LaunchPad.
pub struct Maintainer {
    launchpad: Arc<LaunchPad>,
    config: MaintainerConfig,
    shutdown: Arc<Notify>,
}

impl Maintainer {
    pub fn new(launchpad: Arc<LaunchPad>, config: MaintainerConfig) -> Self {
        Self {
            launchpad,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run passes until the shutdown signal is received. A failed pass is logged and
    /// the loop continues.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            run_expiration_secs = self.config.run_expiration_secs,
            reservation_expiration_secs = self.config.reservation_expiration_secs,
            "Maintainer started"
        );

        loop {
            if let Err(e) = self.maintain_once().await {
                error!(error = %e, "Maintenance pass failed");
            }

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Maintainer received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Maintainer stopped");
    }

    /// One pass: fizzle lost runs, then cancel stale reservations.
    pub async fn maintain_once(&self) -> Result<MaintenanceReport> {
        info!("Performing maintenance on Launchpad...");

        debug!("Tracking down FIZZLED jobs...");
        let opts = LostRunOptions::from_config(self.launchpad.config())
            .with_expiration(self.config.run_expiration_secs)
            .fizzle();
        let lost = self.launchpad.detect_lostruns(&opts).await?;
        if !lost.lost_launch_ids.is_empty() {
            info!(
                count = lost.lost_launch_ids.len(),
                launches = ?lost.lost_launch_ids,
                "Detected FIZZLED launches"
            );
        }
        if !lost.inconsistent_fw_ids.is_empty() {
            info!(
                fws = ?lost.inconsistent_fw_ids,
                "Detected inconsistent fireworks, refresh them to fix"
            );
        }

        debug!("Tracking down stuck RESERVED jobs...");
        let unreserved_launch_ids = self
            .launchpad
            .detect_unreserved(self.config.reservation_expiration_secs, true)
            .await?;
        if !unreserved_launch_ids.is_empty() {
            info!(
                count = unreserved_launch_ids.len(),
                launches = ?unreserved_launch_ids,
                "Unreserved stale launches"
            );
        }

        info!("LaunchPad was MAINTAINED.");
        Ok(MaintenanceReport {
            lost,
            unreserved_launch_ids,
        })
    }
}

impl LaunchPad {
    /// Maintain this LaunchPad once, or with `infinite` until `shutdown` is notified.
    pub async fn maintain(self: &Arc<Self>, infinite: bool, shutdown: Option<Arc<Notify>>) -> Result<()> {
        let maintainer = Maintainer::new(self.clone(), MaintainerConfig::from_config(self.config()));
        if !infinite {
            maintainer.maintain_once().await?;
            return Ok(());
        }
        if let Some(signal) = shutdown {
            let handle = maintainer.shutdown_handle();
            tokio::spawn(async move {
                signal.notified().await;
                handle.notify_one();
            });
        }
        maintainer.run().await;
        Ok(())
    }
}
