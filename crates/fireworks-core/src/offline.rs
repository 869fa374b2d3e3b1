// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Files exchanged with launches that run without database access.
//!
//! An offline launch directory holds `FW.json` (the firework to run),
//! `FW_offline.json` (progress written by the worker) and `FW_ping.json` (the last
//! heartbeat). The LaunchPad folds them back in with `recover_offline`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::model::{FWAction, Firework, State};

pub const FW_FILE: &str = "FW.json";
pub const OFFLINE_FILE: &str = "FW_offline.json";
pub const PING_FILE: &str = "FW_ping.json";

/// Content of `FW_offline.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineData {
    pub launch_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwaction: Option<FWAction>,
    /// Final state, written with `fwaction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_on: Option<DateTime<Utc>>,
}

/// Content of `FW_ping.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingData {
    pub ping_time: DateTime<Utc>,
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CoreError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::deserialization(path.display().to_string(), e))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, data)
        .await
        .map_err(|e| CoreError::io(path, e))
}

pub async fn read_firework(dir: &Path) -> Result<Firework> {
    read_json(&dir.join(FW_FILE)).await
}

pub async fn write_firework(dir: &Path, fw: &Firework) -> Result<()> {
    write_json(&dir.join(FW_FILE), fw).await
}

/// Read `FW_offline.json`; it must exist.
pub async fn read_offline(dir: &Path) -> Result<OfflineData> {
    read_json(&dir.join(OFFLINE_FILE)).await
}

pub async fn write_offline(dir: &Path, data: &OfflineData) -> Result<()> {
    write_json(&dir.join(OFFLINE_FILE), data).await
}

/// Read `FW_ping.json` if the worker wrote one.
pub async fn read_ping(dir: &Path) -> Result<Option<PingData>> {
    let path = dir.join(PING_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(None);
    }
    read_json(&path).await.map(Some)
}

pub async fn write_ping(dir: &Path, ping_time: DateTime<Utc>) -> Result<()> {
    write_json(&dir.join(PING_FILE), &PingData { ping_time }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_offline_file_keeps_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let data = OfflineData {
            launch_id: 7,
            checkpoint: Some(json!({"step": 2})),
            ..Default::default()
        };
        write_offline(dir.path(), &data).await.unwrap();

        let raw: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(OFFLINE_FILE)).unwrap()).unwrap();
        assert_eq!(raw, json!({"launch_id": 7, "checkpoint": {"step": 2}}));
        assert_eq!(read_offline(dir.path()).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_missing_ping_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_ping(dir.path()).await.unwrap().is_none());

        let now = Utc::now();
        write_ping(dir.path(), now).await.unwrap();
        assert_eq!(read_ping(dir.path()).await.unwrap().unwrap().ping_time, now);
    }

    #[tokio::test]
    async fn test_missing_offline_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_offline(dir.path()).await.unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
