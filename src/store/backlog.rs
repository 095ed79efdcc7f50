//! Backlog item store
//!
//! Storage layout:
//!   - item doc:        `{prefix}:project:{project_id}:backlog:item:{item_id}`
//!   - all-items index: `{prefix}:project:{project_id}:backlog:index`
//!   - status index:    `{prefix}:project:{project_id}:backlog:status:{STATUS}`
//!
//! Invariant: every stored item is a member of the all-items index and of
//! exactly one status index, the one matching its current status.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::backend::{BackendError, BackendResult, KvBackend};
use crate::state_machine::BacklogStatus;

/// Unit of work tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogItem {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub description: String,
    pub status: BacklogStatus,
    #[serde(default)]
    pub evidence: Value,
}

/// Store for backlog items and their indexes.
#[derive(Clone)]
pub struct BacklogStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl BacklogStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    fn item_key(&self, project_id: &str, item_id: &str) -> String {
        format!("{}:project:{project_id}:backlog:item:{item_id}", self.prefix)
    }

    fn index_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:backlog:index", self.prefix)
    }

    fn status_key(&self, project_id: &str, status: BacklogStatus) -> String {
        format!("{}:project:{project_id}:backlog:status:{status}", self.prefix)
    }

    /// Upsert an item, maintaining the all-items and status indexes.
    ///
    /// On a status change the item is removed from the previous status index
    /// before being added to the new one.
    pub async fn put_item(&self, item: &BacklogItem) -> BackendResult<()> {
        let previous = self.get_item(&item.project_id, &item.id).await?;
        let previous_status = previous.map(|p| p.status);

        let encoded = serde_json::to_string(item)?;
        self.backend
            .set(&self.item_key(&item.project_id, &item.id), &encoded)
            .await?;
        self.backend
            .set_add(&self.index_key(&item.project_id), &item.id)
            .await?;

        if let Some(old_status) = previous_status {
            if old_status != item.status {
                self.backend
                    .set_remove(&self.status_key(&item.project_id, old_status), &item.id)
                    .await?;
            }
        }
        self.backend
            .set_add(&self.status_key(&item.project_id, item.status), &item.id)
            .await?;
        Ok(())
    }

    /// Get-modify-put status change. No-op when already at `new_status`.
    pub async fn set_status(
        &self,
        project_id: &str,
        item_id: &str,
        new_status: BacklogStatus,
    ) -> BackendResult<()> {
        let mut item = self
            .get_item(project_id, item_id)
            .await?
            .ok_or_else(|| BackendError::not_found(format!("backlog item {item_id}")))?;
        if item.status == new_status {
            return Ok(());
        }
        item.status = new_status;
        self.put_item(&item).await
    }

    pub async fn get_item(
        &self,
        project_id: &str,
        item_id: &str,
    ) -> BackendResult<Option<BacklogItem>> {
        match self.backend.get(&self.item_key(project_id, item_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All item ids for a project, id-sorted.
    pub async fn list_item_ids(&self, project_id: &str) -> BackendResult<Vec<String>> {
        let mut ids = self.backend.set_members(&self.index_key(project_id)).await?;
        ids.sort();
        Ok(ids)
    }

    /// Item ids in one status index, id-sorted for deterministic dispatch.
    pub async fn list_item_ids_by_status(
        &self,
        project_id: &str,
        status: BacklogStatus,
    ) -> BackendResult<Vec<String>> {
        let mut ids = self
            .backend
            .set_members(&self.status_key(project_id, status))
            .await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn items(&self, project_id: &str) -> BackendResult<Vec<BacklogItem>> {
        let mut items = Vec::new();
        for id in self.list_item_ids(project_id).await? {
            if let Some(item) = self.get_item(project_id, &id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    pub async fn items_by_status(
        &self,
        project_id: &str,
        status: BacklogStatus,
    ) -> BackendResult<Vec<BacklogItem>> {
        let mut items = Vec::new();
        for id in self.list_item_ids_by_status(project_id, status).await? {
            if let Some(item) = self.get_item(project_id, &id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }
}
