// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker capability descriptors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{CoreError, Result};

/// Category value that only matches fireworks without `_category`.
pub const NO_CATEGORY: &str = "__none__";

/// Which `_category` values a worker accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Category {
    /// A single category; `""` accepts everything and `"__none__"` only uncategorized work.
    One(String),
    /// Any of these categories.
    Many(Vec<String>),
}

impl Default for Category {
    fn default() -> Self {
        Category::One(String::new())
    }
}

/// Describes a worker and filters the fireworks it may claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FWorker {
    /// Worker name; fireworks pinned with `spec._fworker` only run on the matching worker.
    pub name: String,
    /// Category filter.
    #[serde(default)]
    pub category: Category,
    /// Extra filter over the firework document.
    #[serde(default = "empty_object")]
    pub query: Value,
    /// Environment injected into task specs as `_fw_env`.
    #[serde(default)]
    pub env: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for FWorker {
    fn default() -> Self {
        Self {
            name: "Automatically generated Worker".to_string(),
            category: Category::default(),
            query: empty_object(),
            env: Map::new(),
        }
    }
}

impl FWorker {
    /// Create a worker with no category and no extra query.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Restrict the worker to a category rule.
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Add an extra filter over the firework document.
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    /// Parse a worker from a loosely typed document.
    pub fn from_value(value: Value) -> Result<Self> {
        let worker: FWorker = serde_json::from_value(value).map_err(|e| CoreError::InvalidWorker {
            reason: e.to_string(),
        })?;
        worker.validate()?;
        Ok(worker)
    }

    /// Check the query shape.
    pub fn validate(&self) -> Result<()> {
        if !self.query.is_object() {
            return Err(CoreError::InvalidWorker {
                reason: format!("query must be an object, got {}", self.query),
            });
        }
        if let Category::Many(list) = &self.category
            && list.iter().any(|c| c == NO_CATEGORY)
            && list.len() > 1
        {
            return Err(CoreError::InvalidWorker {
                reason: format!("'{}' cannot be combined with other categories", NO_CATEGORY),
            });
        }
        Ok(())
    }

    /// The full filter for this worker: its query, the `_fworker` pin and the category rule.
    pub fn query(&self) -> Result<Value> {
        self.validate()?;
        let mut clauses = Vec::new();
        if self
            .query
            .as_object()
            .is_some_and(|q| !q.is_empty())
        {
            clauses.push(self.query.clone());
        }

        clauses.push(json!({"$or": [
            {"spec._fworker": {"$exists": false}},
            {"spec._fworker": null},
            {"spec._fworker": self.name},
        ]}));

        match &self.category {
            Category::One(c) if c == NO_CATEGORY => {
                clauses.push(json!({"spec._category": {"$exists": false}}));
            }
            Category::One(c) if !c.is_empty() => {
                clauses.push(json!({"spec._category": c}));
            }
            Category::Many(list) if !list.is_empty() => {
                clauses.push(json!({"spec._category": {"$in": list}}));
            }
            _ => {}
        }

        Ok(json!({"$and": clauses}))
    }
}
