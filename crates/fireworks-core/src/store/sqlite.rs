// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};

use super::retry::with_retry;
use super::{FireworkHead, FireworkRow, LockAttempt, OfflineRun, Store, WorkflowRecord};
use crate::config::SortOrder;
use crate::error::{CoreError, Result};
use crate::migrations::SQLITE as MIGRATOR;
use crate::model::{Firework, Launch, State};
use crate::workflow::{Links, Workflow};

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

fn id_list(ids: impl IntoIterator<Item = i64>) -> String {
    Value::from(ids.into_iter().collect::<Vec<i64>>()).to_string()
}

/// Pre-serialized firework write.
struct FireworkWrite {
    fw_id: i64,
    name: String,
    state: &'static str,
    priority: i64,
    category: Option<String>,
    created_on: i64,
    updated_on: i64,
    doc: String,
    launches: Vec<i64>,
    archived: Vec<i64>,
}

impl FireworkWrite {
    fn new(fw: &Firework) -> Result<Self> {
        let mut doc = serde_json::to_value(fw)?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("launches".into(), json!(fw.launch_ids()));
            obj.insert("archived_launches".into(), json!(fw.archived_launch_ids()));
        }
        Ok(Self {
            fw_id: fw.fw_id,
            name: fw.name.clone(),
            state: fw.state.as_str(),
            priority: fw.priority(),
            category: fw.category().map(str::to_string),
            created_on: micros(fw.created_on),
            updated_on: micros(fw.updated_on),
            doc: doc.to_string(),
            launches: fw.launch_ids(),
            archived: fw.archived_launch_ids(),
        })
    }

    async fn write(&self, conn: &mut SqliteConnection) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO fireworks (fw_id, name, state, priority, category, created_on, updated_on, doc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fw_id) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                priority = excluded.priority,
                category = excluded.category,
                updated_on = excluded.updated_on,
                doc = excluded.doc
            "#,
        )
        .bind(self.fw_id)
        .bind(&self.name)
        .bind(self.state)
        .bind(self.priority)
        .bind(&self.category)
        .bind(self.created_on)
        .bind(self.updated_on)
        .bind(&self.doc)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM firework_launches WHERE fw_id = ?")
            .bind(self.fw_id)
            .execute(&mut *conn)
            .await?;

        for (archived, ids) in [(false, &self.launches), (true, &self.archived)] {
            for (position, launch_id) in ids.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO firework_launches (fw_id, launch_id, archived, position)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(self.fw_id)
                .bind(launch_id)
                .bind(archived)
                .bind(position as i64)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }
}

/// Pre-serialized workflow row.
struct WorkflowWrite {
    name: String,
    state: &'static str,
    created_on: i64,
    updated_on: i64,
    doc: String,
    nodes: Vec<i64>,
}

impl WorkflowWrite {
    fn new(wf: &Workflow) -> Result<Self> {
        let doc = json!({
            "links": wf.links(),
            "fw_states": wf.fw_states(),
            "metadata": wf.metadata,
        });
        Ok(Self {
            name: wf.name.clone(),
            state: wf.state().as_str(),
            created_on: micros(wf.created_on),
            updated_on: micros(wf.updated_on),
            doc: serde_json::to_string(&doc)?,
            nodes: wf.fw_ids(),
        })
    }
}

#[derive(Deserialize)]
struct WorkflowDocColumns {
    #[serde(default)]
    links: Links,
    #[serde(default)]
    fw_states: BTreeMap<i64, State>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: i64,
    name: String,
    state: String,
    locked: bool,
    created_on: i64,
    updated_on: i64,
    doc: String,
}

impl WorkflowRow {
    fn into_record(self) -> Result<WorkflowRecord> {
        let cols: WorkflowDocColumns = serde_json::from_str(&self.doc)
            .map_err(|e| CoreError::deserialization(format!("workflow {}", self.id), e))?;
        Ok(WorkflowRecord {
            id: self.id,
            name: self.name,
            state: self.state.parse()?,
            links: cols.links,
            fw_states: cols.fw_states,
            metadata: cols.metadata,
            created_on: from_micros(self.created_on),
            updated_on: from_micros(self.updated_on),
            locked: self.locked,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FireworkDbRow {
    fw_id: i64,
    name: String,
    state: String,
    doc: String,
}

impl TryFrom<FireworkDbRow> for FireworkRow {
    type Error = CoreError;

    fn try_from(row: FireworkDbRow) -> Result<Self> {
        let state: State = row.state.parse()?;
        let (doc, malformed) = match serde_json::from_str::<Value>(&row.doc) {
            Ok(mut doc) if doc.is_object() => {
                doc["state"] = json!(state);
                (doc, false)
            }
            _ => (
                json!({"fw_id": row.fw_id, "state": state, "name": row.name, "spec": {}}),
                true,
            ),
        };
        Ok(FireworkRow {
            fw_id: row.fw_id,
            state,
            doc,
            malformed,
        })
    }
}

fn order_by(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Fifo => "priority DESC, created_on ASC, fw_id ASC",
        SortOrder::Filo => "priority DESC, created_on DESC, fw_id ASC",
        SortOrder::Unspecified => "priority DESC, fw_id ASC",
    }
}

#[derive(sqlx::FromRow)]
struct OfflineRow {
    launch_id: i64,
    fw_id: i64,
    name: String,
    created_on: i64,
    updated_on: i64,
    deprecated: bool,
    completed: bool,
}

impl From<OfflineRow> for OfflineRun {
    fn from(row: OfflineRow) -> Self {
        OfflineRun {
            launch_id: row.launch_id,
            fw_id: row.fw_id,
            name: row.name,
            created_on: from_micros(row.created_on),
            updated_on: from_micros(row.updated_on),
            deprecated: row.deprecated,
            completed: row.completed,
        }
    }
}

const WORKFLOW_COLUMNS: &str = "w.id, w.name, w.state, w.locked, w.created_on, w.updated_on, w.doc";

impl SqliteStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file as needed, then runs all
    /// migrations.
    ///
    /// ```ignore
    /// let store = SqliteStore::from_path(".data/launchpad.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Connect to a database URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn workflow_row_id(&self, fw_ids: &[i64]) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT workflow_id FROM workflow_nodes
            WHERE fw_id IN (SELECT value FROM json_each(?))
            LIMIT 1
            "#,
        )
        .bind(id_list(fw_ids.iter().copied()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Replace an `{"gridfs_id": ..}` action pointer with the stored action.
    async fn deref_action(&self, doc: &mut Value) -> Result<()> {
        let blob_id = match doc.get("action").and_then(|a| a.get("gridfs_id")) {
            Some(Value::String(s)) => s.parse::<i64>().ok(),
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        };
        let Some(blob_id) = blob_id else {
            return Ok(());
        };
        let data = sqlx::query_scalar::<_, String>("SELECT data FROM action_blobs WHERE blob_id = ?")
            .bind(blob_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                CoreError::deserialization("launch", format!("action blob {} is missing", blob_id))
            })?;
        doc["action"] = serde_json::from_str(&data)?;
        Ok(())
    }

    async fn launch_docs(&self, launch_ids: &BTreeSet<i64>) -> Result<HashMap<i64, Value>> {
        if launch_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT launch_id, doc FROM launches
            WHERE launch_id IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(id_list(launch_ids.iter().copied()))
        .fetch_all(&self.pool)
        .await?;

        let mut docs = HashMap::with_capacity(rows.len());
        for (launch_id, doc) in rows {
            let mut doc: Value = serde_json::from_str(&doc)
                .map_err(|e| CoreError::deserialization(format!("launch {}", launch_id), e))?;
            self.deref_action(&mut doc).await?;
            docs.insert(launch_id, doc);
        }
        Ok(docs)
    }

    /// Parse stored documents and expand their launch-id lists.
    async fn hydrate_docs(&self, rows: Vec<FireworkDbRow>) -> Result<Vec<(i64, Value)>> {
        let mut parsed = Vec::with_capacity(rows.len());
        let mut launch_ids = BTreeSet::new();
        for row in rows {
            let mut doc: Value = serde_json::from_str(&row.doc)
                .map_err(|e| CoreError::deserialization(format!("firework {}", row.fw_id), e))?;
            if !doc.is_object() {
                return Err(CoreError::deserialization(
                    format!("firework {}", row.fw_id),
                    "document is not an object",
                ));
            }
            for key in ["launches", "archived_launches"] {
                if let Some(ids) = doc.get(key).and_then(Value::as_array) {
                    launch_ids.extend(ids.iter().filter_map(Value::as_i64));
                }
            }
            doc["state"] = Value::String(row.state);
            parsed.push((row.fw_id, doc));
        }

        let launches = self.launch_docs(&launch_ids).await?;
        for (_, doc) in parsed.iter_mut() {
            for key in ["launches", "archived_launches"] {
                let expanded: Vec<Value> = doc
                    .get(key)
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_i64)
                            .filter_map(|id| launches.get(&id).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                doc[key] = Value::Array(expanded);
            }
        }
        Ok(parsed)
    }

    async fn hydrate(&self, rows: Vec<FireworkDbRow>) -> Result<Vec<Firework>> {
        self.hydrate_docs(rows)
            .await?
            .into_iter()
            .map(|(fw_id, doc)| {
                serde_json::from_value(doc)
                    .map_err(|e| CoreError::deserialization(format!("firework {}", fw_id), e))
            })
            .collect()
    }

    /// A parseable replacement for a firework whose stored document cannot be read.
    ///
    /// The raw text is kept under `spec._malformed_doc`; launches are recovered from
    /// the membership table.
    async fn stand_in_firework(&self, fw_id: i64, name: String, raw: String) -> Result<Firework> {
        let created_on: i64 = sqlx::query_scalar("SELECT created_on FROM fireworks WHERE fw_id = ?")
            .bind(fw_id)
            .fetch_one(&self.pool)
            .await?;
        let members: Vec<(i64, bool)> = sqlx::query_as(
            r#"
            SELECT launch_id, archived FROM firework_launches
            WHERE fw_id = ?
            ORDER BY archived, position
            "#,
        )
        .bind(fw_id)
        .fetch_all(&self.pool)
        .await?;
        let docs = self
            .launch_docs(&members.iter().map(|(id, _)| *id).collect())
            .await?;

        let mut fw = Firework::new(Vec::new(), Map::new())
            .with_id(fw_id)
            .with_name(name)
            .with_spec("_malformed_doc", Value::String(raw));
        fw.created_on = from_micros(created_on);
        for (launch_id, archived) in members {
            let Some(doc) = docs.get(&launch_id) else {
                continue;
            };
            let launch: Launch = serde_json::from_value(doc.clone())
                .map_err(|e| CoreError::deserialization(format!("launch {}", launch_id), e))?;
            if archived {
                fw.archived_launches.push(launch);
            } else {
                fw.launches.push(launch);
            }
        }
        Ok(fw)
    }

    async fn parse_launch(&self, launch_id: i64, doc: &str) -> Result<Launch> {
        let mut doc: Value = serde_json::from_str(doc)
            .map_err(|e| CoreError::deserialization(format!("launch {}", launch_id), e))?;
        self.deref_action(&mut doc).await?;
        serde_json::from_value(doc)
            .map_err(|e| CoreError::deserialization(format!("launch {}", launch_id), e))
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "workflow_nodes",
            "workflows",
            "firework_launches",
            "fireworks",
            "launches",
            "offline_runs",
            "action_blobs",
            "fw_id_assigner",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("INSERT INTO fw_id_assigner (id, next_fw_id, next_launch_id) VALUES (1, 1, 1)")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn tuneup(&self, full: bool) -> Result<()> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        if full {
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }

    async fn allocate_fw_ids(&self, n: i64) -> Result<i64> {
        let pool = &self.pool;
        let first = with_retry("allocate_fw_ids", || async move {
            sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE fw_id_assigner SET next_fw_id = next_fw_id + ?
                WHERE id = 1
                RETURNING next_fw_id - ?
                "#,
            )
            .bind(n)
            .bind(n)
            .fetch_optional(pool)
            .await
        })
        .await?;
        first.ok_or(CoreError::NotInitialized)
    }

    async fn allocate_launch_id(&self) -> Result<i64> {
        let pool = &self.pool;
        let id = with_retry("allocate_launch_id", || async move {
            sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE fw_id_assigner SET next_launch_id = next_launch_id + 1
                WHERE id = 1
                RETURNING next_launch_id - 1
                "#,
            )
            .fetch_optional(pool)
            .await
        })
        .await?;
        id.ok_or(CoreError::NotInitialized)
    }

    async fn insert_workflows(&self, wfs: &[Workflow]) -> Result<()> {
        let mut writes = Vec::with_capacity(wfs.len());
        for wf in wfs {
            let fws = wf
                .fws()
                .map(FireworkWrite::new)
                .collect::<Result<Vec<_>>>()?;
            writes.push((WorkflowWrite::new(wf)?, fws));
        }

        let pool = &self.pool;
        let writes = &writes;
        with_retry("insert_workflows", || async move {
            let mut tx = pool.begin().await?;
            for (wf, fws) in writes {
                let workflow_id = sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO workflows (name, state, locked, created_on, updated_on, doc)
                    VALUES (?, ?, 0, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&wf.name)
                .bind(wf.state)
                .bind(wf.created_on)
                .bind(wf.updated_on)
                .bind(&wf.doc)
                .fetch_one(&mut *tx)
                .await?;

                for fw in fws {
                    fw.write(&mut tx).await?;
                }
                for fw_id in &wf.nodes {
                    sqlx::query("INSERT INTO workflow_nodes (fw_id, workflow_id) VALUES (?, ?)")
                        .bind(fw_id)
                        .bind(workflow_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            tx.commit().await
        })
        .await?;
        Ok(())
    }

    async fn save_workflow(&self, wf: &Workflow, fw_ids: &BTreeSet<i64>) -> Result<()> {
        let nodes = wf.fw_ids();
        let workflow_id = self
            .workflow_row_id(&nodes)
            .await?
            .ok_or(CoreError::WorkflowNotFound {
                fw_id: nodes.first().copied().unwrap_or_default(),
            })?;

        let row = WorkflowWrite::new(wf)?;
        let fws = fw_ids
            .iter()
            .filter_map(|id| wf.fw(*id))
            .map(FireworkWrite::new)
            .collect::<Result<Vec<_>>>()?;

        let pool = &self.pool;
        let (row, fws) = (&row, &fws);
        with_retry("save_workflow", || async move {
            let mut tx = pool.begin().await?;
            sqlx::query(
                r#"
                UPDATE workflows SET name = ?, state = ?, updated_on = ?, doc = ?
                WHERE id = ?
                "#,
            )
            .bind(&row.name)
            .bind(row.state)
            .bind(row.updated_on)
            .bind(&row.doc)
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;

            for fw in fws {
                fw.write(&mut tx).await?;
            }
            for fw_id in &row.nodes {
                sqlx::query("INSERT OR IGNORE INTO workflow_nodes (fw_id, workflow_id) VALUES (?, ?)")
                    .bind(fw_id)
                    .bind(workflow_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        })
        .await?;
        Ok(())
    }

    async fn get_workflow_record(&self, fw_id: i64) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {}
            FROM workflows w JOIN workflow_nodes n ON n.workflow_id = w.id
            WHERE n.fw_id = ?
            "#,
            WORKFLOW_COLUMNS
        ))
        .bind(fw_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowRow::into_record).transpose()
    }

    async fn get_workflow(&self, fw_id: i64) -> Result<Option<Workflow>> {
        let Some(record) = self.get_workflow_record(fw_id).await? else {
            return Ok(None);
        };
        let rows = sqlx::query_as::<_, FireworkDbRow>(
            r#"
            SELECT f.fw_id, f.name, f.state, f.doc
            FROM fireworks f JOIN workflow_nodes n ON n.fw_id = f.fw_id
            WHERE n.workflow_id = ?
            ORDER BY f.fw_id
            "#,
        )
        .bind(record.id)
        .fetch_all(&self.pool)
        .await?;
        let fws = self.hydrate(rows).await?;

        Ok(Some(Workflow::from_parts(
            fws,
            record.links,
            record.fw_states,
            record.name,
            record.metadata,
            record.created_on,
            record.updated_on,
            record.state,
        )))
    }

    async fn list_workflow_records(&self) -> Result<Vec<WorkflowRecord>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows w ORDER BY w.id",
            WORKFLOW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WorkflowRow::into_record).collect()
    }

    async fn count_workflows(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflows")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_workflow(&self, fw_ids: &[i64], launch_ids: &[i64]) -> Result<()> {
        let fws = id_list(fw_ids.iter().copied());
        let launches = id_list(launch_ids.iter().copied());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM workflows WHERE id IN (
                SELECT workflow_id FROM workflow_nodes
                WHERE fw_id IN (SELECT value FROM json_each(?))
            )
            "#,
        )
        .bind(&fws)
        .execute(&mut *tx)
        .await?;

        for sql in [
            "DELETE FROM workflow_nodes WHERE fw_id IN (SELECT value FROM json_each(?))",
            "DELETE FROM firework_launches WHERE fw_id IN (SELECT value FROM json_each(?))",
            "DELETE FROM fireworks WHERE fw_id IN (SELECT value FROM json_each(?))",
        ] {
            sqlx::query(sql).bind(&fws).execute(&mut *tx).await?;
        }
        for sql in [
            "DELETE FROM launches WHERE launch_id IN (SELECT value FROM json_each(?))",
            "DELETE FROM offline_runs WHERE launch_id IN (SELECT value FROM json_each(?))",
            "DELETE FROM action_blobs WHERE launch_id IN (SELECT value FROM json_each(?))",
        ] {
            sqlx::query(sql).bind(&launches).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn try_lock_workflow(&self, fw_id: i64) -> Result<LockAttempt> {
        let pool = &self.pool;
        let result = with_retry("try_lock_workflow", || async move {
            sqlx::query(
                r#"
                UPDATE workflows SET locked = 1
                WHERE id = (SELECT workflow_id FROM workflow_nodes WHERE fw_id = ?)
                  AND locked = 0
                "#,
            )
            .bind(fw_id)
            .execute(pool)
            .await
        })
        .await?;
        if result.rows_affected() == 1 {
            return Ok(LockAttempt::Acquired);
        }

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflow_nodes WHERE fw_id = ?")
            .bind(fw_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(if exists == 0 {
            LockAttempt::Missing
        } else {
            LockAttempt::Busy
        })
    }

    async fn force_lock_workflow(&self, fw_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET locked = 1
            WHERE id = (SELECT workflow_id FROM workflow_nodes WHERE fw_id = ?)
            "#,
        )
        .bind(fw_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock_workflow(&self, fw_id: i64) -> Result<()> {
        let pool = &self.pool;
        with_retry("unlock_workflow", || async move {
            sqlx::query(
                r#"
                UPDATE workflows SET locked = 0
                WHERE id = (SELECT workflow_id FROM workflow_nodes WHERE fw_id = ?)
                "#,
            )
            .bind(fw_id)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn get_firework(&self, fw_id: i64) -> Result<Option<Firework>> {
        let row = sqlx::query_as::<_, FireworkDbRow>(
            "SELECT fw_id, name, state, doc FROM fireworks WHERE fw_id = ?",
        )
        .bind(fw_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_firework_doc(&self, fw_id: i64) -> Result<Option<Value>> {
        let row = sqlx::query_as::<_, FireworkDbRow>(
            "SELECT fw_id, name, state, doc FROM fireworks WHERE fw_id = ?",
        )
        .bind(fw_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.hydrate_docs(vec![row]).await?.pop().map(|(_, doc)| doc)),
            None => Ok(None),
        }
    }

    async fn firework_heads(&self, fw_ids: &[i64]) -> Result<Vec<FireworkHead>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT fw_id, name, state FROM fireworks
            WHERE fw_id IN (SELECT value FROM json_each(?))
            ORDER BY fw_id
            "#,
        )
        .bind(id_list(fw_ids.iter().copied()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(fw_id, name, state)| {
                Ok(FireworkHead {
                    fw_id,
                    name,
                    state: state.parse()?,
                })
            })
            .collect()
    }

    async fn put_firework(&self, fw: &Firework) -> Result<()> {
        let write = FireworkWrite::new(fw)?;
        let pool = &self.pool;
        let write = &write;
        with_retry("put_firework", || async move {
            let mut tx = pool.begin().await?;
            write.write(&mut tx).await?;
            tx.commit().await
        })
        .await?;
        Ok(())
    }

    async fn claim_firework(&self, fw_id: i64, from: &[State], to: State) -> Result<bool> {
        let from = Value::from(from.iter().map(|s| s.as_str()).collect::<Vec<_>>()).to_string();
        let now = micros(Utc::now());
        let pool = &self.pool;
        let from = &from;
        let result = with_retry("claim_firework", || async move {
            sqlx::query(
                r#"
                UPDATE fireworks SET state = ?, updated_on = ?
                WHERE fw_id = ? AND state IN (SELECT value FROM json_each(?))
                "#,
            )
            .bind(to.as_str())
            .bind(now)
            .bind(fw_id)
            .bind(from)
            .execute(pool)
            .await
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_malformed_fizzled(&self, fw_id: i64, details: &str) -> Result<()> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, FireworkDbRow>(
            "SELECT fw_id, name, state, doc FROM fireworks WHERE fw_id = ?",
        )
        .bind(fw_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::FireworkNotFound { fw_id })?;
        let (name, raw) = (row.name.clone(), row.doc.clone());

        let mut fw = match self.hydrate(vec![row]).await {
            Ok(mut fws) => fws.pop().ok_or(CoreError::FireworkNotFound { fw_id })?,
            Err(_) => self.stand_in_firework(fw_id, name, raw).await?,
        };
        fw.state = State::Fizzled;
        fw.updated_on = now;
        fw.spec
            .insert("_exception_details".into(), Value::String(details.to_string()));
        let write = FireworkWrite::new(&fw)?;

        let fizzled = State::Fizzled.as_str();
        let state_path = format!("$.fw_states.\"{}\"", fw_id);
        let mut tx = self.pool.begin().await?;
        write.write(&mut tx).await?;
        sqlx::query(
            r#"
            UPDATE workflows SET
                state = ?,
                updated_on = ?,
                doc = json_set(doc, ?, ?)
            WHERE id = (SELECT workflow_id FROM workflow_nodes WHERE fw_id = ?)
            "#,
        )
        .bind(fizzled)
        .bind(micros(now))
        .bind(&state_path)
        .bind(fizzled)
        .bind(fw_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_fireworks(&self, states: Option<&[State]>, order: SortOrder) -> Result<Vec<FireworkRow>> {
        let order_by = order_by(order);
        let rows = match states {
            Some(states) => {
                let states =
                    Value::from(states.iter().map(|s| s.as_str()).collect::<Vec<_>>()).to_string();
                sqlx::query_as::<_, FireworkDbRow>(&format!(
                    r#"
                    SELECT fw_id, name, state, doc FROM fireworks
                    WHERE state IN (SELECT value FROM json_each(?))
                    ORDER BY {}
                    "#,
                    order_by
                ))
                .bind(states)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, FireworkDbRow>(&format!(
                    "SELECT fw_id, name, state, doc FROM fireworks ORDER BY {}",
                    order_by
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(FireworkRow::try_from).collect()
    }

    async fn find_launch_holders(&self, except_fw_id: i64, order: SortOrder) -> Result<Vec<FireworkRow>> {
        let rows = sqlx::query_as::<_, FireworkDbRow>(&format!(
            r#"
            SELECT fw_id, name, state, doc FROM fireworks f
            WHERE f.fw_id != ?
              AND EXISTS (SELECT 1 FROM firework_launches fl
                          WHERE fl.fw_id = f.fw_id AND fl.archived = 0)
            ORDER BY {}
            "#,
            order_by(order)
        ))
        .bind(except_fw_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FireworkRow::try_from).collect()
    }

    async fn fw_ids_holding_launch(&self, launch_id: i64, include_archived: bool) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT fw_id FROM firework_launches
            WHERE launch_id = ? AND (archived = 0 OR ?)
            ORDER BY fw_id
            "#,
        )
        .bind(launch_id)
        .bind(include_archived)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn get_launch(&self, launch_id: i64) -> Result<Option<Launch>> {
        let doc = sqlx::query_scalar::<_, String>("SELECT doc FROM launches WHERE launch_id = ?")
            .bind(launch_id)
            .fetch_optional(&self.pool)
            .await?;
        match doc {
            Some(doc) => Ok(Some(self.parse_launch(launch_id, &doc).await?)),
            None => Ok(None),
        }
    }

    async fn put_launch(&self, launch: &Launch, action_blob: Option<i64>) -> Result<()> {
        let mut doc = serde_json::to_value(launch)?;
        if let Some(blob_id) = action_blob {
            doc["action"] = json!({"gridfs_id": blob_id.to_string()});
        }
        let doc = doc.to_string();
        let pool = &self.pool;
        let doc = &doc;
        with_retry("put_launch", || async move {
            sqlx::query(
                r#"
                INSERT INTO launches (launch_id, fw_id, state, host, ip, fworker_name,
                                      time_start, time_end, heartbeat, reservation_id, doc)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(launch_id) DO UPDATE SET
                    fw_id = excluded.fw_id,
                    state = excluded.state,
                    host = excluded.host,
                    ip = excluded.ip,
                    fworker_name = excluded.fworker_name,
                    time_start = excluded.time_start,
                    time_end = excluded.time_end,
                    heartbeat = excluded.heartbeat,
                    reservation_id = excluded.reservation_id,
                    doc = excluded.doc
                "#,
            )
            .bind(launch.launch_id)
            .bind(launch.fw_id)
            .bind(launch.state().as_str())
            .bind(&launch.host)
            .bind(&launch.ip)
            .bind(&launch.fworker.name)
            .bind(launch.time_start().map(micros))
            .bind(launch.time_end().map(micros))
            .bind(launch.heartbeat().map(micros))
            .bind(launch.reservation_id())
            .bind(doc)
            .execute(pool)
            .await
        })
        .await?;

        // Only the blob the document points at is kept.
        sqlx::query("DELETE FROM action_blobs WHERE launch_id = ? AND blob_id IS NOT ?")
            .bind(launch.launch_id)
            .bind(action_blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_launches(
        &self,
        state: Option<State>,
        heartbeat_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Launch>> {
        let state = state.map(State::as_str);
        let cutoff = heartbeat_before.map(micros);
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT launch_id, doc FROM launches
            WHERE (? IS NULL OR state = ?)
              AND (? IS NULL OR heartbeat <= ?)
            ORDER BY launch_id
            "#,
        )
        .bind(state)
        .bind(state)
        .bind(cutoff)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut launches = Vec::with_capacity(rows.len());
        for (launch_id, doc) in rows {
            launches.push(self.parse_launch(launch_id, &doc).await?);
        }
        Ok(launches)
    }

    async fn launch_ids_by_reservation(&self, reservation_id: &str) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT launch_id FROM launches WHERE reservation_id = ? ORDER BY launch_id",
        )
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_action_blob(&self, launch_id: i64, data: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO action_blobs (launch_id, data, created_on)
            VALUES (?, ?, ?)
            RETURNING blob_id
            "#,
        )
        .bind(launch_id)
        .bind(data)
        .bind(micros(Utc::now()))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_offline_run(&self, run: &OfflineRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO offline_runs
                (launch_id, fw_id, name, created_on, updated_on, deprecated, completed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.launch_id)
        .bind(run.fw_id)
        .bind(&run.name)
        .bind(micros(run.created_on))
        .bind(micros(run.updated_on))
        .bind(run.deprecated)
        .bind(run.completed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_offline_run(&self, launch_id: i64) -> Result<Option<OfflineRun>> {
        let row = sqlx::query_as::<_, OfflineRow>(
            r#"
            SELECT launch_id, fw_id, name, created_on, updated_on, deprecated, completed
            FROM offline_runs WHERE launch_id = ?
            "#,
        )
        .bind(launch_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(OfflineRun::from))
    }

    async fn update_offline_run(
        &self,
        launch_id: i64,
        completed: Option<bool>,
        deprecated: Option<bool>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE offline_runs SET
                completed = COALESCE(?, completed),
                deprecated = COALESCE(?, deprecated),
                updated_on = ?
            WHERE launch_id = ?
            "#,
        )
        .bind(completed)
        .bind(deprecated)
        .bind(micros(Utc::now()))
        .bind(launch_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deprecate_offline_runs_for_fw(&self, fw_id: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE offline_runs SET deprecated = 1 WHERE fw_id = ?")
            .bind(fw_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_offline_runs(&self, include_completed: bool) -> Result<Vec<OfflineRun>> {
        let rows = sqlx::query_as::<_, OfflineRow>(
            r#"
            SELECT launch_id, fw_id, name, created_on, updated_on, deprecated, completed
            FROM offline_runs
            WHERE deprecated = 0 AND (? OR completed = 0)
            ORDER BY launch_id
            "#,
        )
        .bind(include_completed)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OfflineRun::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FWAction, FWorker};
    use serde_json::Map;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        MIGRATOR
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    async fn test_store() -> SqliteStore {
        let store = SqliteStore::new(test_pool().await);
        store.reset().await.expect("Failed to reset");
        store
    }

    fn fw(id: i64) -> Firework {
        Firework::new(vec![], Map::new()).with_id(id)
    }

    #[tokio::test]
    async fn test_allocation_requires_reset() {
        let store = SqliteStore::new(test_pool().await);
        let err = store.allocate_fw_ids(1).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_INITIALIZED");

        store.reset().await.expect("Failed to reset");
        assert_eq!(store.allocate_fw_ids(3).await.unwrap(), 1);
        assert_eq!(store.allocate_fw_ids(1).await.unwrap(), 4);
        assert_eq!(store.allocate_launch_id().await.unwrap(), 1);
        assert_eq!(store.allocate_launch_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_and_load_workflow() {
        let store = test_store().await;
        let mut wf = Workflow::chain(vec![fw(1), fw(2)], Some("pair".into())).unwrap();
        wf.refresh(1).unwrap();
        store.insert_workflows(&[wf]).await.expect("Failed to insert");

        let loaded = store.get_workflow(2).await.unwrap().expect("workflow");
        assert_eq!(loaded.name, "pair");
        assert_eq!(loaded.links().children(1), &[2]);
        assert_eq!(loaded.fw_states()[&1], State::Ready);
        assert_eq!(loaded.fw(1).unwrap().state, State::Ready);
        assert_eq!(store.count_workflows().await.unwrap(), 1);

        let record = store.get_workflow_record(1).await.unwrap().unwrap();
        assert_eq!(record.nodes(), vec![1, 2]);
        assert!(!record.locked);
    }

    #[tokio::test]
    async fn test_node_belongs_to_one_workflow() {
        let store = test_store().await;
        store
            .insert_workflows(&[Workflow::from_firework(fw(1))])
            .await
            .unwrap();
        let err = store
            .insert_workflows(&[Workflow::from_firework(fw(1))])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert_eq!(store.count_workflows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = test_store().await;
        let mut f = fw(1).with_name("fragile");
        f.state = State::Ready;
        store
            .insert_workflows(&[Workflow::from_firework(f)])
            .await
            .unwrap();

        assert!(store.claim_firework(1, &[State::Ready], State::Reserved).await.unwrap());
        assert!(!store.claim_firework(1, &[State::Ready], State::Reserved).await.unwrap());
        let loaded = store.get_firework(1).await.unwrap().unwrap();
        assert_eq!(loaded.state, State::Reserved);
    }

    #[tokio::test]
    async fn test_find_fireworks_priority_order() {
        let store = test_store().await;
        let wfs: Vec<Workflow> = [(1, 0), (2, 5), (3, 5)]
            .into_iter()
            .map(|(id, priority)| {
                let mut f = fw(id).with_spec("_priority", json!(priority));
                f.state = State::Ready;
                Workflow::from_firework(f)
            })
            .collect();
        store.insert_workflows(&wfs).await.unwrap();

        let rows = store
            .find_fireworks(Some(&[State::Ready]), SortOrder::Fifo)
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.fw_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(rows[0].doc["spec"]["_priority"], json!(5));
        assert!(rows.iter().all(|r| !r.malformed));
    }

    #[tokio::test]
    async fn test_launch_roundtrip_and_membership() {
        let store = test_store().await;
        let mut f = fw(1);
        let mut launch = Launch::new(7, 1, State::Running, "/tmp/l7", FWorker::new("w"), vec![]);
        launch.host = Some("node1".into());
        store.put_launch(&launch, None).await.unwrap();
        f.launches.push(launch.clone());
        store
            .insert_workflows(&[Workflow::from_firework(f)])
            .await
            .unwrap();

        let loaded = store.get_firework(1).await.unwrap().unwrap();
        assert_eq!(loaded.launch_ids(), vec![7]);
        assert_eq!(loaded.launches[0].host.as_deref(), Some("node1"));
        assert_eq!(store.fw_ids_holding_launch(7, false).await.unwrap(), vec![1]);

        let running = store.find_launches(Some(State::Running), None).await.unwrap();
        assert_eq!(running.len(), 1);
        let stale = store
            .find_launches(Some(State::Running), Some(Utc::now() - chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_action_blob_pointer_is_dereferenced() {
        let store = test_store().await;
        let mut launch = Launch::new(3, 1, State::Running, "", FWorker::new("w"), vec![]);
        launch.set_state(State::Completed);
        let action = FWAction::new().with_stored_data("big", json!("x".repeat(64)));
        launch.action = Some(action.clone());

        let blob = store
            .insert_action_blob(3, &serde_json::to_string(&action).unwrap())
            .await
            .unwrap();
        store.put_launch(&launch, Some(blob)).await.unwrap();

        let raw: String = sqlx::query_scalar("SELECT doc FROM launches WHERE launch_id = 3")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert!(raw.contains("gridfs_id"));
        let loaded = store.get_launch(3).await.unwrap().unwrap();
        assert_eq!(loaded.action, Some(action));
    }

    #[tokio::test]
    async fn test_resaved_launch_keeps_one_blob() {
        let store = test_store().await;
        let mut launch = Launch::new(4, 1, State::Running, "", FWorker::new("w"), vec![]);
        let blob_count = || async {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM action_blobs WHERE launch_id = 4")
                .fetch_one(store.pool())
                .await
                .unwrap()
        };

        for round in 0..2 {
            let action = FWAction::new().with_stored_data("round", json!(round));
            launch.action = Some(action.clone());
            let blob = store
                .insert_action_blob(4, &serde_json::to_string(&action).unwrap())
                .await
                .unwrap();
            store.put_launch(&launch, Some(blob)).await.unwrap();
            assert_eq!(blob_count().await, 1);
            let loaded = store.get_launch(4).await.unwrap().unwrap();
            assert_eq!(loaded.action, Some(action));
        }

        launch.action = Some(FWAction::new());
        store.put_launch(&launch, None).await.unwrap();
        assert_eq!(blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_launch_holders_skip_launchless_fireworks() {
        let store = test_store().await;
        let wfs: Vec<Workflow> = (1..=4).map(|id| Workflow::from_firework(fw(id))).collect();
        store.insert_workflows(&wfs).await.unwrap();
        for (fw_id, launch_id, archived) in [(1, 10, false), (2, 20, false), (3, 30, true)] {
            let launch = Launch::new(launch_id, fw_id, State::Running, "", FWorker::new("w"), vec![]);
            store.put_launch(&launch, None).await.unwrap();
            let mut f = store.get_firework(fw_id).await.unwrap().unwrap();
            if archived {
                f.archived_launches.push(launch);
            } else {
                f.launches.push(launch);
            }
            store.put_firework(&f).await.unwrap();
        }

        let ids = |rows: Vec<FireworkRow>| rows.iter().map(|r| r.fw_id).collect::<Vec<_>>();
        let rows = store.find_launch_holders(1, SortOrder::Fifo).await.unwrap();
        assert_eq!(ids(rows), vec![2]);
        let rows = store.find_launch_holders(4, SortOrder::Fifo).await.unwrap();
        assert_eq!(ids(rows), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lock_attempts() {
        let store = test_store().await;
        store
            .insert_workflows(&[Workflow::from_firework(fw(1))])
            .await
            .unwrap();

        assert_eq!(store.try_lock_workflow(1).await.unwrap(), LockAttempt::Acquired);
        assert_eq!(store.try_lock_workflow(1).await.unwrap(), LockAttempt::Busy);
        assert_eq!(store.try_lock_workflow(99).await.unwrap(), LockAttempt::Missing);
        store.unlock_workflow(1).await.unwrap();
        assert_eq!(store.try_lock_workflow(1).await.unwrap(), LockAttempt::Acquired);
        assert!(store.force_lock_workflow(1).await.unwrap());
        assert!(!store.force_lock_workflow(99).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_firework_is_fizzled() {
        let store = test_store().await;
        let mut f = fw(1);
        f.state = State::Ready;
        store
            .insert_workflows(&[Workflow::from_firework(f)])
            .await
            .unwrap();
        sqlx::query("UPDATE fireworks SET doc = 'not json' WHERE fw_id = 1")
            .execute(store.pool())
            .await
            .unwrap();

        let rows = store.find_fireworks(Some(&[State::Ready]), SortOrder::Fifo).await.unwrap();
        assert!(rows[0].malformed);
        assert_eq!(
            store.get_firework(1).await.unwrap_err().error_code(),
            "DESERIALIZATION_FAILURE"
        );

        store.mark_malformed_fizzled(1, "bad document").await.unwrap();
        let record = store.get_workflow_record(1).await.unwrap().unwrap();
        assert_eq!(record.state, State::Fizzled);
        assert_eq!(record.fw_states[&1], State::Fizzled);
        let rows = store.find_fireworks(Some(&[State::Fizzled]), SortOrder::Fifo).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].malformed);

        let repaired = store.get_firework(1).await.expect("Failed to load repaired firework").expect("Repaired firework is gone");
        assert_eq!(repaired.state, State::Fizzled);
        assert_eq!(repaired.name, "fragile");
        assert_eq!(repaired.spec["_malformed_doc"], json!("not json"));
        assert_eq!(repaired.spec["_exception_details"], json!("bad document"));
        let wf = store.get_workflow(1).await.unwrap().expect("Workflow is gone");
        assert_eq!(wf.fw(1).map(|f| f.state), Some(State::Fizzled));
    }

    #[tokio::test]
    async fn test_offline_runs() {
        let store = test_store().await;
        let now = Utc::now();
        for launch_id in [1, 2] {
            store
                .insert_offline_run(&OfflineRun {
                    launch_id,
                    fw_id: 10 + launch_id,
                    name: "offline".into(),
                    created_on: now,
                    updated_on: now,
                    deprecated: false,
                    completed: false,
                })
                .await
                .unwrap();
        }
        store.update_offline_run(1, Some(true), None).await.unwrap();
        assert_eq!(store.list_offline_runs(false).await.unwrap().len(), 1);
        assert_eq!(store.list_offline_runs(true).await.unwrap().len(), 2);

        assert_eq!(store.deprecate_offline_runs_for_fw(12).await.unwrap(), 1);
        assert_eq!(store.list_offline_runs(true).await.unwrap().len(), 1);
        assert!(store.get_offline_run(2).await.unwrap().unwrap().deprecated);
    }

    #[tokio::test]
    async fn test_delete_workflow() {
        let store = test_store().await;
        let mut f = fw(1);
        let launch = Launch::new(5, 1, State::Running, "", FWorker::new("w"), vec![]);
        store.put_launch(&launch, None).await.unwrap();
        f.launches.push(launch);
        store
            .insert_workflows(&[Workflow::from_firework(f), Workflow::from_firework(fw(2))])
            .await
            .unwrap();

        store.delete_workflow(&[1], &[5]).await.unwrap();
        assert!(store.get_firework(1).await.unwrap().is_none());
        assert!(store.get_launch(5).await.unwrap().is_none());
        assert!(store.get_workflow_record(1).await.unwrap().is_none());
        assert_eq!(store.count_workflows().await.unwrap(), 1);
    }
}
