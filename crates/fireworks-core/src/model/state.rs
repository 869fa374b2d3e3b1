// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Life-cycle labels shared by fireworks, launches and workflows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// State of a firework, launch or workflow.
///
/// States are totally ordered by [`State::rank`]; the rank decides which launch
/// represents a firework and which states count as "ready or beyond".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Tombstone; no action permitted.
    Archived,
    /// A task raised; may be rerun.
    Fizzled,
    /// User-cancelled; reignitable.
    Defused,
    /// User-paused; resumable.
    Paused,
    /// At least one parent is not yet done.
    Waiting,
    /// Runnable and unclaimed.
    Ready,
    /// Claimed by a queue submission but not yet running.
    Reserved,
    /// Actively executing.
    Running,
    /// Finished successfully.
    Completed,
}

impl State {
    /// Every state, lowest rank first.
    pub const ALL: [State; 9] = [
        State::Archived,
        State::Fizzled,
        State::Defused,
        State::Paused,
        State::Waiting,
        State::Ready,
        State::Reserved,
        State::Running,
        State::Completed,
    ];

    /// Rank used for tie-breaks.
    pub fn rank(self) -> u8 {
        match self {
            State::Archived => 0,
            State::Fizzled => 1,
            State::Defused => 2,
            State::Paused => 3,
            State::Waiting => 4,
            State::Ready => 5,
            State::Reserved => 6,
            State::Running => 7,
            State::Completed => 8,
        }
    }

    /// States set by an administrator and kept by refresh until lifted.
    pub fn is_held(self) -> bool {
        matches!(self, State::Paused | State::Defused | State::Archived)
    }

    /// RESERVED and RUNNING carry a lease heartbeat.
    pub fn is_live(self) -> bool {
        matches!(self, State::Reserved | State::Running)
    }

    /// COMPLETED and FIZZLED end a launch.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Fizzled)
    }

    /// The upper-case label stored in documents and columns.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Archived => "ARCHIVED",
            State::Fizzled => "FIZZLED",
            State::Defused => "DEFUSED",
            State::Paused => "PAUSED",
            State::Waiting => "WAITING",
            State::Ready => "READY",
            State::Reserved => "RESERVED",
            State::Running => "RUNNING",
            State::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CoreError::deserialization("state", format!("unknown state '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        let ranks: Vec<u8> = State::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, (0..9).collect::<Vec<u8>>());
        assert!(State::Completed.rank() > State::Running.rank());
    }

    #[test]
    fn test_serde_uses_upper_case() {
        let json = serde_json::to_string(&State::Reserved).unwrap();
        assert_eq!(json, "\"RESERVED\"");
        let state: State = serde_json::from_str("\"FIZZLED\"").unwrap();
        assert_eq!(state, State::Fizzled);
    }

    #[test]
    fn test_parse() {
        assert_eq!("PAUSED".parse::<State>().unwrap(), State::Paused);
        let err = "paused".parse::<State>().unwrap_err();
        assert_eq!(err.error_code(), "DESERIALIZATION_FAILURE");
    }

    #[test]
    fn test_held_states() {
        assert!(State::Defused.is_held());
        assert!(State::Archived.is_held());
        assert!(!State::Fizzled.is_held());
        assert!(!State::Waiting.is_held());
    }
}
