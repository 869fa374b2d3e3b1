// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for fireworks-core.
//!
//! This module exposes the embedded LaunchPad schema so that embedding applications
//! can prepare a database before handing the pool to [`crate::store::SqliteStore::new`].
//!
//! # Example
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use fireworks_core::migrations;
//!
//! let pool = SqlitePool::connect("sqlite:launchpad.db?mode=rwc").await?;
//! migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// SQLite migrator with the LaunchPad schema embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
