// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FireWorks Core - Workflow Coordination Engine
//!
//! This crate stores workflows of fireworks (jobs) in a shared SQLite database and
//! coordinates any number of workers that pull ready jobs, run their tasks and report
//! results that may reshape the remaining workflow.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Submitters / Admin tools                         │
//! │        (add_wf, append_wf, rerun, defuse, pause, queries, reset)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              LaunchPad                                   │
//! │     (workflow lock, state refresh, action application, recovery)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           ▲                        │                        ▲
//!           │ checkout / complete    │                        │ maintain
//!           │ ping                   ▼                        │
//! ┌───────────────────────┐  ┌───────────────────────┐  ┌─────────────────┐
//! │       Rockets         │  │        Store          │  │   Maintainer    │
//! │  (run tasks, report   │  │   (SQLite, atomic     │  │  (lost runs,    │
//! │   FWActions)          │  │    claim, WF locks)   │  │   reservations) │
//! └───────────────────────┘  └───────────────────────┘  └─────────────────┘
//!           │
//!           ▼ offline
//! ┌───────────────────────┐
//! │ FW.json / FW_offline  │
//! │ FW_ping.json          │
//! └───────────────────────┘
//! ```
//!
//! # Firework State Machine
//!
//! ```text
//!    ┌─────────┐  parents done  ┌───────┐  reserve  ┌──────────┐
//!    │ WAITING │───────────────►│ READY │──────────►│ RESERVED │
//!    └─────────┘                └───┬───┘           └────┬─────┘
//!                                   │ checkout           │ checkout
//!                                   ▼                    ▼
//!                              ┌─────────┐◄──────────────┘
//!                              │ RUNNING │
//!                              └────┬────┘
//!                        complete   │   task error / lost
//!                   ┌───────────────┴───────────────┐
//!                   ▼                               ▼
//!             ┌───────────┐                   ┌─────────┐
//!             │ COMPLETED │                   │ FIZZLED │
//!             └───────────┘                   └─────────┘
//! ```
//!
//! Held states (`PAUSED`, `DEFUSED`) and `ARCHIVED` are set by operators and never
//! overwritten by a refresh.
//!
//! ## Workflow State
//!
//! | Condition | Workflow state |
//! |-----------|----------------|
//! | every firework ARCHIVED | `ARCHIVED` |
//! | every leaf COMPLETED | `COMPLETED` |
//! | any DEFUSED | `DEFUSED` |
//! | any PAUSED | `PAUSED` |
//! | a FIZZLED leaf, or a FIZZLED parent of a child without `_allow_fizzled_parents` | `FIZZLED` |
//! | otherwise the first present of RUNNING, RESERVED, READY | that state |
//! | nothing live | `WAITING` |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FIREWORKS_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `FIREWORKS_RUN_EXPIRATION_SECS` | No | `14400` | Heartbeat silence before a run is lost |
//! | `FIREWORKS_RESERVATION_EXPIRATION_SECS` | No | `1209600` | Age of a stale reservation |
//! | `FIREWORKS_MAINTAIN_INTERVAL` | No | `120` | Seconds between maintenance passes |
//! | `FIREWORKS_WFLOCK_EXPIRATION_SECS` | No | `300` | Wait budget for a workflow lock |
//!
//! See [`config::Config::from_env`] for the full list.
//!
//! # Modules
//!
//! - [`launchpad`]: every coordination operation
//! - [`rocket`]: the worker side of a launch
//! - [`workflow`]: the in-memory workflow graph and its refresh rules
//! - [`store`]: persistence trait and SQLite backend
//! - [`maintain`]: periodic lost-run and reservation cleanup

/// Configuration loaded from environment variables.
pub mod config;

/// Duplicate detection between fireworks.
pub mod dupefinder;

/// Error types with stable error codes.
pub mod error;

/// Mongo-style document filters.
pub mod filter;

/// Partially loaded workflows for read-mostly callers.
pub mod lazy;

/// The LaunchPad and its operations.
pub mod launchpad;

/// Per-workflow mutual exclusion.
pub mod lock;

/// Background maintenance loop.
pub mod maintain;

/// Embedded SQL migrations.
pub mod migrations;

/// Fireworks, launches, actions, tasks and workers.
pub mod model;

/// Files exchanged with offline launches.
pub mod offline;

/// Task and duplicate-finder lookup by name.
pub mod registry;

/// Runs checked-out fireworks.
pub mod rocket;

/// Persistence.
pub mod store;

/// Workflow graph and state rules.
pub mod workflow;

pub use config::{Config, SortOrder};
pub use error::{CoreError, Result};
pub use launchpad::LaunchPad;
pub use maintain::{Maintainer, MaintainerConfig};
pub use model::{FWAction, FWorker, FireTask, Firework, Launch, State, Task, TaskContext};
pub use registry::Registry;
pub use rocket::Rocket;
pub use store::{SqliteStore, Store};
pub use workflow::Workflow;
