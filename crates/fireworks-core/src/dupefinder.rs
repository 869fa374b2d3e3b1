// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Duplicate detection between fireworks.
//!
//! A firework opts in with `spec._dupefinder = {"_fw_name": <kind>, ...}`. At checkout
//! the LaunchPad runs [`DupeFinder::query`] over the stored fireworks and, for every
//! candidate that passes [`DupeFinder::verify`], copies its launches onto the firework
//! being checked out instead of running it again.

use serde_json::{Map, Value, json};

/// Finds fireworks that would produce the same result.
pub trait DupeFinder: Send + Sync {
    /// Filter over firework documents selecting candidate duplicates of `spec`.
    fn query(&self, spec: &Map<String, Value>) -> Value;

    /// Confirm a candidate. `None` means the finder does not verify and the query result
    /// is trusted.
    fn verify(&self, _spec1: &Map<String, Value>, _spec2: &Map<String, Value>) -> Option<bool> {
        None
    }
}

/// Duplicates are fireworks with an identical spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DupeFinderExact;

impl DupeFinderExact {
    /// Registered kind.
    pub const NAME: &'static str = "DupeFinderExact";
}

impl DupeFinder for DupeFinderExact {
    fn query(&self, spec: &Map<String, Value>) -> Value {
        json!({ "spec": spec })
    }

    fn verify(&self, spec1: &Map<String, Value>, spec2: &Map<String, Value>) -> Option<bool> {
        Some(spec1 == spec2)
    }
}
