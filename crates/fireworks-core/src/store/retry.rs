// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retries for transient SQLite contention.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Attempts before the last error surfaces.
pub const MAX_ATTEMPTS: u32 = 5;

/// Base delay; attempt n waits `BASE_DELAY_MS * 2^(n-1)`.
pub const BASE_DELAY_MS: u64 = 100;

/// SQLITE_BUSY / SQLITE_LOCKED and their extended codes, plus pool exhaustion.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
        ),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(operation: &'static str, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                let delay_ms = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                debug!(operation, attempt, delay_ms, error = %e, "Database busy, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
