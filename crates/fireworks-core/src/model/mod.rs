// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted entities.

pub mod action;
pub mod firework;
pub mod fworker;
pub mod launch;
pub mod spec_keys;
pub mod state;
pub mod task;
pub mod tracker;

pub use action::FWAction;
pub use firework::Firework;
pub use fworker::{Category, FWorker};
pub use launch::{Launch, StateHistoryEntry};
pub use state::State;
pub use task::{FireTask, ScriptTask, Task, TaskContext};
pub use tracker::Tracker;
