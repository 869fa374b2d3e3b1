// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advisory per-workflow lock.
//!
//! The lock is the `locked` flag of the workflow row. Acquisition is a
//! compare-and-set; contenders back off for `iteration/10 + rand/100` seconds until
//! the configured expiration, after which the lock is either forced or the caller
//! gets [`CoreError::LockedWorkflow`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::error::{CoreError, Result};
use crate::store::{LockAttempt, Store};

/// Holds a workflow lock until released.
///
/// Release with [`WFLock::release`]. A guard dropped without release (early `?`
/// return, panic) spawns the release on the current runtime.
#[must_use = "the workflow stays locked until the guard is released"]
pub struct WFLock {
    store: Arc<dyn Store>,
    fw_id: i64,
    released: bool,
}

impl WFLock {
    /// Lock the workflow containing `fw_id`.
    pub async fn acquire(
        store: Arc<dyn Store>,
        fw_id: i64,
        expire_secs: u64,
        kill: bool,
    ) -> Result<Self> {
        let mut waited = 0.0_f64;
        let mut iteration: u32 = 0;

        loop {
            match store.try_lock_workflow(fw_id).await? {
                LockAttempt::Acquired => break,
                LockAttempt::Missing => return Err(CoreError::WorkflowNotFound { fw_id }),
                LockAttempt::Busy => {}
            }

            if waited > expire_secs as f64 {
                if !kill {
                    return Err(CoreError::LockedWorkflow {
                        fw_id,
                        waited_secs: waited,
                    });
                }
                warn!(fw_id, waited_secs = waited, "FORCIBLY ACQUIRING LOCK, WF: {}", fw_id);
                if !store.force_lock_workflow(fw_id).await? {
                    return Err(CoreError::WorkflowNotFound { fw_id });
                }
                break;
            }

            iteration += 1;
            let delay = f64::from(iteration) / 10.0 + rand::thread_rng().r#gen::<f64>() / 100.0;
            debug!(fw_id, iteration, delay_secs = delay, "Workflow locked, waiting");
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            waited += delay;
        }

        Ok(Self {
            store,
            fw_id,
            released: false,
        })
    }

    /// The firework id the lock was taken through.
    pub fn fw_id(&self) -> i64 {
        self.fw_id
    }

    /// Release the lock.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.unlock_workflow(self.fw_id).await
    }
}

impl Drop for WFLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let fw_id = self.fw_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.unlock_workflow(fw_id).await {
                        error!(fw_id, error = %e, "Failed to release workflow lock");
                    }
                });
            }
            Err(_) => {
                error!(fw_id, "Workflow lock dropped outside a runtime; it stays locked");
            }
        }
    }
}
