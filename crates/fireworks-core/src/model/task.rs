// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tasks: the serialized form stored in a firework and the executable trait
//! resolved through the [`crate::registry::Registry`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;

use super::action::FWAction;
use super::fworker::FWorker;
use crate::error::{CoreError, Result};
use crate::launchpad::LaunchPad;

/// A task as stored in a firework: its registered kind plus free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Registered kind.
    #[serde(rename = "_fw_name")]
    pub fw_name: String,
    /// Parameters handed to the constructor.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Task {
    /// A task of `fw_name` with parameters taken from a JSON object.
    pub fn new(fw_name: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            fw_name: fw_name.into(),
            params,
        }
    }

    /// A [`ScriptTask`] running a single shell command.
    pub fn script(command: impl Into<String>) -> Self {
        Self::new(ScriptTask::NAME, json!({"script": command.into()}))
    }
}

/// What a running task can see besides its spec.
#[derive(Clone, Default)]
pub struct TaskContext {
    /// Directory the launch runs in.
    pub launch_dir: PathBuf,
    /// Firework id, exposed when `_add_launchpad_and_fw_id` is set.
    pub fw_id: Option<i64>,
    /// LaunchPad handle, exposed when `_add_launchpad_and_fw_id` is set and online.
    pub launchpad: Option<Arc<LaunchPad>>,
    /// Worker descriptor, exposed when `_add_fworker` is set.
    pub fworker: Option<FWorker>,
}

/// An executable task.
///
/// Returning an error fizzles the launch; returning an action feeds the dynamic
/// workflow machinery.
#[async_trait]
pub trait FireTask: Send + Sync {
    /// Run the task against the current spec.
    async fn run_task(
        &self,
        fw_spec: &Map<String, Value>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Option<FWAction>>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Script {
    One(String),
    Many(Vec<String>),
}

/// Runs shell commands and records their return codes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptTask {
    script: Script,
    #[serde(default)]
    store_stdout: bool,
    #[serde(default)]
    store_stderr: bool,
    #[serde(default)]
    stdout_file: Option<String>,
    #[serde(default)]
    stderr_file: Option<String>,
    #[serde(default)]
    stdin_key: Option<String>,
    #[serde(default = "default_shell")]
    shell_exe: String,
    #[serde(default)]
    defuse_bad_rc: bool,
    #[serde(default)]
    fizzle_bad_rc: Option<bool>,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl ScriptTask {
    /// Registered kind.
    pub const NAME: &'static str = "ScriptTask";

    /// Build from task parameters.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let task: ScriptTask = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| CoreError::deserialization(Self::NAME, e))?;
        if task.defuse_bad_rc && task.fizzle_bad_rc == Some(true) {
            return Err(CoreError::validation(
                Self::NAME,
                "cannot both fizzle and defuse on a bad return code",
            ));
        }
        Ok(task)
    }

    fn commands(&self) -> Vec<&str> {
        match &self.script {
            Script::One(s) => vec![s.as_str()],
            Script::Many(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

#[async_trait]
impl FireTask for ScriptTask {
    async fn run_task(
        &self,
        fw_spec: &Map<String, Value>,
        ctx: &TaskContext,
    ) -> anyhow::Result<Option<FWAction>> {
        let stdin_data = match &self.stdin_key {
            Some(key) => Some(match fw_spec.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => anyhow::bail!("stdin_key '{}' not found in spec", key),
            }),
            None => None,
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut returncodes = Vec::new();

        for command in self.commands() {
            let mut cmd = tokio::process::Command::new(&self.shell_exe);
            cmd.arg("-c")
                .arg(command)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(if stdin_data.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                });
            if ctx.launch_dir.is_dir() {
                cmd.current_dir(&ctx.launch_dir);
            }

            let mut child = cmd.spawn()?;
            if let (Some(data), Some(mut pipe)) = (&stdin_data, child.stdin.take()) {
                pipe.write_all(data.as_bytes()).await?;
            }
            let output = child.wait_with_output().await?;
            stdout.push_str(&String::from_utf8_lossy(&output.stdout));
            stderr.push_str(&String::from_utf8_lossy(&output.stderr));
            let rc = output.status.code().unwrap_or(-1);
            returncodes.push(rc);
            if rc != 0 {
                break;
            }
        }

        if let Some(file) = &self.stdout_file {
            append_file(ctx.launch_dir.join(file), &stdout).await?;
        }
        if let Some(file) = &self.stderr_file {
            append_file(ctx.launch_dir.join(file), &stderr).await?;
        }

        let mut action = FWAction::new();
        if self.store_stdout {
            action.stored_data.insert("stdout".into(), json!(stdout));
        }
        if self.store_stderr {
            action.stored_data.insert("stderr".into(), json!(stderr));
        }
        let last = returncodes.last().copied().unwrap_or(0);
        action.stored_data.insert("returncode".into(), json!(last));
        action
            .stored_data
            .insert("all_returncodes".into(), json!(returncodes));

        let failed = returncodes.iter().any(|rc| *rc != 0);
        if failed && self.defuse_bad_rc {
            action.defuse_children = true;
        } else if failed && self.fizzle_bad_rc.unwrap_or(!self.defuse_bad_rc) {
            anyhow::bail!("ScriptTask fizzled! Return code: {:?}", returncodes);
        }
        Ok(Some(action))
    }
}

async fn append_file(path: PathBuf, content: &str) -> anyhow::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_task_serde_shape() {
        let task = Task::script("echo hi");
        let doc = serde_json::to_value(&task).unwrap();
        assert_eq!(doc, json!({"_fw_name": "ScriptTask", "script": "echo hi"}));
        let back: Task = serde_json::from_value(doc).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_conflicting_rc_policy() {
        let err = ScriptTask::from_params(&params(
            json!({"script": "true", "defuse_bad_rc": true, "fizzle_bad_rc": true}),
        ))
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_script_stores_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let task = ScriptTask::from_params(&params(
            json!({"script": ["echo hello", "echo world"], "store_stdout": true}),
        ))
        .unwrap();
        let ctx = TaskContext {
            launch_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let action = task.run_task(&Map::new(), &ctx).await.unwrap().unwrap();
        assert_eq!(action.stored_data["stdout"], json!("hello\nworld\n"));
        assert_eq!(action.stored_data["returncode"], json!(0));
    }

    #[tokio::test]
    async fn test_bad_return_code() {
        let ctx = TaskContext::default();
        let fizzle = ScriptTask::from_params(&params(json!({"script": "exit 3"}))).unwrap();
        assert!(fizzle.run_task(&Map::new(), &ctx).await.is_err());

        let defuse =
            ScriptTask::from_params(&params(json!({"script": "exit 3", "defuse_bad_rc": true})))
                .unwrap();
        let action = defuse.run_task(&Map::new(), &ctx).await.unwrap().unwrap();
        assert!(action.defuse_children);
        assert_eq!(action.stored_data["returncode"], json!(3));
    }
}
