// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File trackers: the last lines of a file in the launch directory, refreshed on every ping.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Upper bound on `nlines`.
pub const MAX_TRACKER_LINES: usize = 1000;

/// Default number of tracked lines.
pub const DEFAULT_TRACKER_LINES: usize = 25;

/// Tails a file and keeps its last `nlines` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TrackerDoc")]
pub struct Tracker {
    /// File to monitor, relative to the launch directory unless absolute.
    pub filename: String,
    nlines: usize,
    /// Last content read.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Accept a gzipped sibling (`<filename>.gz`).
    #[serde(default)]
    pub allow_zipped: bool,
}

#[derive(Deserialize)]
struct TrackerDoc {
    filename: String,
    #[serde(default = "default_nlines")]
    nlines: usize,
    #[serde(default)]
    content: String,
    #[serde(default)]
    allow_zipped: bool,
}

fn default_nlines() -> usize {
    DEFAULT_TRACKER_LINES
}

impl TryFrom<TrackerDoc> for Tracker {
    type Error = CoreError;

    fn try_from(doc: TrackerDoc) -> Result<Self> {
        let mut tracker = Tracker::new(doc.filename, doc.nlines)?;
        tracker.content = doc.content;
        tracker.allow_zipped = doc.allow_zipped;
        Ok(tracker)
    }
}

impl Tracker {
    /// Create a tracker; `nlines` above [`MAX_TRACKER_LINES`] is rejected.
    pub fn new(filename: impl Into<String>, nlines: usize) -> Result<Self> {
        if nlines > MAX_TRACKER_LINES {
            return Err(CoreError::validation(
                "nlines",
                format!(
                    "Tracker only supports a maximum of {} lines; you put {}",
                    MAX_TRACKER_LINES, nlines
                ),
            ));
        }
        Ok(Self {
            filename: filename.into(),
            nlines,
            content: String::new(),
            allow_zipped: false,
        })
    }

    /// Number of lines kept.
    pub fn nlines(&self) -> usize {
        self.nlines
    }

    /// Re-read the tracked file and return the new content.
    ///
    /// A missing file keeps the previous content. Compressed siblings are not
    /// decoded: when only `<filename>.gz` exists the previous content is kept.
    pub async fn track_file(&mut self, launch_dir: Option<&Path>) -> Result<&str> {
        let path = match launch_dir {
            Some(dir) if Path::new(&self.filename).is_relative() => dir.join(&self.filename),
            _ => Path::new(&self.filename).to_path_buf(),
        };

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if self.allow_zipped {
                debug!(file = %path.display(), "Tracked file missing, compressed sibling not read");
            }
            return Ok(&self.content);
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(self.nlines);
        self.content = lines[start..].join("\n");
        Ok(&self.content)
    }
}

impl std::fmt::Display for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "### Filename: {}\n{}", self.filename, self.content)
    }
}
