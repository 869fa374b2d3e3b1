// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FireWorks Core - maintenance daemon
//!
//! Keeps a LaunchPad healthy while workers come and go:
//! - fizzles RUNNING launches that stopped sending heartbeats
//! - cancels RESERVED launches whose reservation expired
//!
//! Workers run in their own processes through [`fireworks_core::Rocket`].

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use fireworks_core::config::Config;
use fireworks_core::launchpad::LaunchPad;
use fireworks_core::maintain::{Maintainer, MaintainerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fireworks_core=info".parse()?),
        )
        .init();

    info!("Starting FireWorks maintenance daemon");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        run_expiration_secs = config.run_expiration_secs,
        reservation_expiration_secs = config.reservation_expiration_secs,
        maintain_interval_secs = config.maintain_interval_secs,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let launchpad = Arc::new(LaunchPad::connect(config.clone()).await?);
    launchpad.store().health_check().await?;
    info!("Database health check passed");

    let maintainer = Maintainer::new(launchpad.clone(), MaintainerConfig::from_config(&config));
    let shutdown = maintainer.shutdown_handle();
    let maintainer_handle = tokio::spawn(async move {
        maintainer.run().await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = maintainer_handle.await {
        error!("Maintainer task error: {}", e);
    }

    info!("Shutdown complete");

    Ok(())
}
