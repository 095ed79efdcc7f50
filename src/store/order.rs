//! Order intake store
//!
//! Backing storage for the order-intake agent: artifact metadata with TTL,
//! the evolving order draft, missing-field and anomaly lists, export
//! records, and a pending-validation set. Artifact and export payloads
//! themselves live on disk under the storage directory.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendResult, KvBackend};

/// Store for order drafts and related artifacts.
#[derive(Clone)]
pub struct OrderStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
    storage_dir: PathBuf,
}

impl OrderStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        prefix: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            storage_dir: storage_dir.into(),
        }
    }

    fn artifact_key(&self, artifact_id: &str) -> String {
        format!("{}:artifact:{artifact_id}", self.prefix)
    }

    fn draft_key(&self, order_id: &str) -> String {
        format!("{}:{order_id}:draft", self.prefix)
    }

    fn missing_key(&self, order_id: &str) -> String {
        format!("{}:{order_id}:missing", self.prefix)
    }

    fn anomaly_key(&self, order_id: &str) -> String {
        format!("{}:{order_id}:anomalies", self.prefix)
    }

    fn export_key(&self, order_id: &str) -> String {
        format!("{}:{order_id}:export", self.prefix)
    }

    pub async fn save_artifact_metadata(
        &self,
        artifact_id: &str,
        metadata: &Value,
        ttl: Duration,
    ) -> BackendResult<()> {
        self.backend
            .set_with_ttl(&self.artifact_key(artifact_id), &metadata.to_string(), ttl)
            .await
    }

    pub async fn get_artifact_metadata(&self, artifact_id: &str) -> BackendResult<Option<Value>> {
        self.get_json(&self.artifact_key(artifact_id)).await
    }

    pub async fn save_order_draft(&self, order_id: &str, draft: &Value) -> BackendResult<()> {
        self.backend
            .set(&self.draft_key(order_id), &draft.to_string())
            .await
    }

    pub async fn get_order_draft(&self, order_id: &str) -> BackendResult<Option<Value>> {
        self.get_json(&self.draft_key(order_id)).await
    }

    pub async fn save_missing_fields(
        &self,
        order_id: &str,
        missing: &[Value],
    ) -> BackendResult<()> {
        self.backend
            .set(&self.missing_key(order_id), &Value::from(missing.to_vec()).to_string())
            .await
    }

    pub async fn get_missing_fields(&self, order_id: &str) -> BackendResult<Vec<Value>> {
        self.get_json_list(&self.missing_key(order_id)).await
    }

    pub async fn save_anomalies(&self, order_id: &str, anomalies: &[Value]) -> BackendResult<()> {
        self.backend
            .set(
                &self.anomaly_key(order_id),
                &Value::from(anomalies.to_vec()).to_string(),
            )
            .await
    }

    pub async fn get_anomalies(&self, order_id: &str) -> BackendResult<Vec<Value>> {
        self.get_json_list(&self.anomaly_key(order_id)).await
    }

    pub async fn record_export(&self, order_id: &str, export_meta: &Value) -> BackendResult<()> {
        self.backend
            .set(&self.export_key(order_id), &export_meta.to_string())
            .await
    }

    pub async fn get_export(&self, order_id: &str) -> BackendResult<Option<Value>> {
        self.get_json(&self.export_key(order_id)).await
    }

    pub async fn add_pending_validation(
        &self,
        validation_set_key: &str,
        order_id: &str,
    ) -> BackendResult<()> {
        self.backend.set_add(validation_set_key, order_id).await
    }

    pub async fn remove_pending_validation(
        &self,
        validation_set_key: &str,
        order_id: &str,
    ) -> BackendResult<()> {
        self.backend.set_remove(validation_set_key, order_id).await
    }

    pub async fn list_pending_validation(
        &self,
        validation_set_key: &str,
    ) -> BackendResult<Vec<String>> {
        let mut ids = self.backend.set_members(validation_set_key).await?;
        ids.sort();
        Ok(ids)
    }

    /// On-disk location for an uploaded artifact.
    pub fn artifact_path(&self, order_id: &str, artifact_id: &str, filename: &str) -> PathBuf {
        self.storage_dir
            .join("artifacts")
            .join(order_id)
            .join(format!("{artifact_id}_{filename}"))
    }

    /// On-disk location for the order's CSV export.
    pub fn export_path(&self, order_id: &str) -> PathBuf {
        self.storage_dir.join("exports").join(format!("{order_id}.csv"))
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    async fn get_json(&self, key: &str) -> BackendResult<Option<Value>> {
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_json_list(&self, key: &str) -> BackendResult<Vec<Value>> {
        match self.backend.get(key).await? {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw)?;
                Ok(value.as_array().cloned().unwrap_or_default())
            }
            None => Ok(Vec::new()),
        }
    }
}
