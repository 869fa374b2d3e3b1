// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The LaunchPad: every coordination operation against the shared store.
//!
//! A [`LaunchPad`] is cheap to share behind an `Arc`. It holds no workflow state of
//! its own; every operation reads the store, changes a [`Workflow`] in memory under
//! the workflow lock, and writes the changed fireworks back.
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`submit`] | `add_wf`, `bulk_add_wfs`, `append_wf` |
//! | [`checkout`] | `checkout_fw`, `reserve_fw` |
//! | [`complete`] | `complete_launch`, `ping_launch`, `mark_fizzled`, backups |
//! | [`admin`] | rerun, defuse, pause, reignite, archive, delete, priorities |
//! | [`recovery`] | `detect_lostruns`, `detect_unreserved`, reservations |
//! | [`offline`] | offline run registration and recovery |
//! | [`queries`] | lock-free lookups and summaries |

pub mod admin;
pub mod checkout;
pub mod complete;
pub mod offline;
pub mod queries;
pub mod recovery;
pub mod submit;

pub use admin::{RecoverLaunch, RecoverMode, Recovery};
pub use queries::{Direction, FwIdQuery, QueryOutput, SummaryMode, TrackerData};
pub use recovery::{LostRunOptions, LostRuns};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::lock::WFLock;
use crate::model::{Firework, Launch, State};
use crate::registry::Registry;
use crate::store::{SqliteStore, Store};
use crate::workflow::Workflow;

/// Launch and firework documents as they were at checkout.
#[derive(Default)]
struct Backups {
    launches: HashMap<i64, Launch>,
    fws: HashMap<i64, Firework>,
}

/// Builder for a [`LaunchPad`].
pub struct LaunchPadBuilder {
    store: Option<Arc<dyn Store>>,
    config: Config,
    registry: Registry,
}

impl std::fmt::Debug for LaunchPadBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchPadBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl LaunchPadBuilder {
    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration. Default: [`Config::default`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the task and dupefinder registry. Default: [`Registry::new`].
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Build the LaunchPad.
    pub fn build(self) -> Result<LaunchPad> {
        let store = self
            .store
            .ok_or_else(|| CoreError::validation("store", "a store is required"))?;
        Ok(LaunchPad {
            store,
            config: self.config,
            registry: Arc::new(self.registry),
            backups: Mutex::new(Backups::default()),
        })
    }
}

/// Coordinates submitters, workers and maintenance over one store.
pub struct LaunchPad {
    store: Arc<dyn Store>,
    config: Config,
    registry: Arc<Registry>,
    backups: Mutex<Backups>,
}

impl std::fmt::Debug for LaunchPad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchPad")
            .field("store", &"...")
            .field("config", &self.config)
            .finish()
    }
}

impl LaunchPad {
    /// Start building a LaunchPad.
    pub fn builder() -> LaunchPadBuilder {
        LaunchPadBuilder {
            store: None,
            config: Config::default(),
            registry: Registry::new(),
        }
    }

    /// A LaunchPad over `store` with the built-in registry.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            config,
            registry: Arc::new(Registry::new()),
            backups: Mutex::new(Backups::default()),
        }
    }

    /// Open the SQLite database named by `config.database_url`.
    pub async fn connect(config: Config) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Wipe the database and reseed the id counters.
    ///
    /// `password` must be today's date (`%Y-%m-%d`). Without `require_password` the
    /// reset is still allowed for databases holding at most `pw_check_num` workflows.
    #[instrument(skip(self, password))]
    pub async fn reset(&self, password: &str, require_password: bool) -> Result<()> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let allowed = password == today
            || (!require_password
                && self.store.count_workflows().await? <= self.config.pw_check_num as i64);

        if !allowed {
            let message = if require_password {
                format!("Invalid password! Password is today's date: {}", today)
            } else {
                format!(
                    "Password check cannot be overridden since the size of DB ({} workflows) \
                     is greater than pw_check_num ({})",
                    self.store.count_workflows().await?,
                    self.config.pw_check_num
                )
            };
            return Err(CoreError::validation("password", message));
        }

        self.store.reset().await?;
        self.store.tuneup(false).await?;
        info!("LaunchPad was RESET.");
        Ok(())
    }

    /// Refresh planner statistics; `full` also compacts the database file.
    pub async fn tuneup(&self, full: bool) -> Result<()> {
        debug!(full, "Tuning up the database");
        self.store.tuneup(full).await
    }

    /// Recompute every state downstream of `fw_id` and persist the changes.
    #[instrument(skip(self))]
    pub async fn refresh_wf(&self, fw_id: i64) -> Result<()> {
        self.modify_wf(fw_id, |wf| Ok(((), wf.refresh(fw_id)?)))
            .await
            .map(|_| ())
    }

    pub(crate) async fn lock(&self, fw_id: i64) -> Result<WFLock> {
        WFLock::acquire(
            self.store.clone(),
            fw_id,
            self.config.wflock_expiration_secs,
            self.config.wflock_expiration_kill,
        )
        .await
    }

    pub(crate) async fn load_wf(&self, fw_id: i64) -> Result<Workflow> {
        self.store
            .get_workflow(fw_id)
            .await?
            .ok_or(CoreError::WorkflowNotFound { fw_id })
    }

    /// Persist the `updated` fireworks of a locked workflow.
    ///
    /// Placeholder ids get real ids first; the returned map translates them.
    pub(crate) async fn update_wf(
        &self,
        wf: &mut Workflow,
        updated: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, i64>> {
        let placeholders = wf.placeholder_ids();
        let mut old_new = HashMap::with_capacity(placeholders.len());
        if !placeholders.is_empty() {
            let first = self.store.allocate_fw_ids(placeholders.len() as i64).await?;
            for (offset, old) in placeholders.iter().enumerate() {
                old_new.insert(*old, first + offset as i64);
            }
            wf.reassign_ids(&old_new);
        }

        let mut ids: BTreeSet<i64> = updated
            .iter()
            .map(|id| old_new.get(id).copied().unwrap_or(*id))
            .collect();
        ids.extend(old_new.values().copied());
        self.store.save_workflow(wf, &ids).await?;
        Ok(old_new)
    }

    /// Load the workflow of `fw_id` under its lock, let `f` change it, and persist
    /// the fireworks `f` reports as updated.
    pub(crate) async fn modify_wf<T, F>(&self, fw_id: i64, f: F) -> Result<(T, HashMap<i64, i64>)>
    where
        F: FnOnce(&mut Workflow) -> Result<(T, BTreeSet<i64>)>,
    {
        let lock = self.lock(fw_id).await?;
        let result: Result<(T, HashMap<i64, i64>)> = async {
            let mut wf = self.load_wf(fw_id).await?;
            let (value, updated) = f(&mut wf)?;
            let old_new = self.update_wf(&mut wf, &updated).await?;
            Ok((value, old_new))
        }
        .await;
        let released = lock.release().await;
        let value = result?;
        released?;
        Ok(value)
    }

    /// Persist a launch, moving an oversize action into the blob bucket when enabled.
    pub(crate) async fn save_launch(&self, launch: &Launch) -> Result<()> {
        let mut blob = None;
        if let Some(action) = &launch.action {
            let size = serde_json::to_vec(launch)?.len();
            let limit = self.config.store_size_limit_bytes;
            if size > limit {
                let Some(bucket) = &self.config.action_fallback else {
                    return Err(CoreError::DocumentTooLarge {
                        launch_id: launch.launch_id,
                        size,
                        limit,
                    });
                };
                let data = serde_json::to_string(action)?;
                let blob_id = self.store.insert_action_blob(launch.launch_id, &data).await?;
                debug!(
                    launch_id = launch.launch_id,
                    size,
                    bucket = %bucket,
                    blob_id,
                    "Stored oversize action out of line"
                );
                blob = Some(blob_id);
            }
        }
        self.store.put_launch(launch, blob).await
    }

    pub(crate) async fn get_launch(&self, launch_id: i64) -> Result<Launch> {
        self.store
            .get_launch(launch_id)
            .await?
            .ok_or(CoreError::LaunchNotFound { launch_id })
    }

    /// State from the indexed column, without loading the document or its launches.
    pub(crate) async fn fw_state(&self, fw_id: i64) -> Result<State> {
        self.store
            .firework_heads(&[fw_id])
            .await?
            .pop()
            .map(|head| head.state)
            .ok_or(CoreError::FireworkNotFound { fw_id })
    }

    pub(crate) async fn get_fw(&self, fw_id: i64) -> Result<Firework> {
        self.store
            .get_firework(fw_id)
            .await?
            .ok_or(CoreError::FireworkNotFound { fw_id })
    }
}
