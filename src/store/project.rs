//! Project store
//!
//! Tracks project lifecycle for the outer surfaces: the project document
//! and index, an append-only interaction history, customer messages with an
//! unread set, and a derived status recomputable from backlog counts.
//!
//! Storage layout:
//!   - project doc:    `{prefix}:project:{project_id}:info`
//!   - projects index: `{prefix}:projects:all`
//!   - interactions:   `{prefix}:project:{project_id}:interactions`
//!   - messages:       `{prefix}:project:{project_id}:messages`
//!   - unread:         `{prefix}:project:{project_id}:messages:unread`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::backlog::BacklogStore;
use crate::backend::{BackendResult, KvBackend};
use crate::event::now_iso;
use crate::state_machine::BacklogStatus;

/// Project lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Created,
    InProgress,
    AwaitingInput,
    Completed,
    Failed,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProjectStatus::Created => "CREATED",
            ProjectStatus::InProgress => "IN_PROGRESS",
            ProjectStatus::AwaitingInput => "AWAITING_INPUT",
            ProjectStatus::Completed => "COMPLETED",
            ProjectStatus::Failed => "FAILED",
        };
        f.write_str(text)
    }
}

/// Project metadata and tracking information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub requester: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub completion_percentage: u8,
    #[serde(default)]
    pub blocked_items: u32,
}

/// One exchange with the orchestrator, kept for context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Message from the orchestrator to the requesting human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMessage {
    pub id: String,
    pub project_id: String,
    pub message_type: String,
    pub content: String,
    pub status: String,
    pub timestamp: String,
    pub related_item_id: Option<String>,
    pub requires_response: bool,
    pub response: Option<String>,
}

/// Derived status summary computed from backlog indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatusSummary {
    pub project_id: String,
    pub state: ProjectStatus,
    pub completion_percentage: u8,
    pub total_items: u32,
    pub completed_items: u32,
    pub blocked_items: u32,
    pub in_progress_items: u32,
}

/// Store for project documents and their conversational context.
#[derive(Clone)]
pub struct ProjectStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl ProjectStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    fn project_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:info", self.prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:projects:all", self.prefix)
    }

    fn interactions_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:interactions", self.prefix)
    }

    fn messages_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:messages", self.prefix)
    }

    fn unread_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:messages:unread", self.prefix)
    }

    /// Create and persist a new project.
    pub async fn create_project(
        &self,
        project_id: Option<String>,
        name: &str,
        description: &str,
        requester: Value,
        metadata: Value,
    ) -> BackendResult<ProjectInfo> {
        let now = now_iso();
        let project = ProjectInfo {
            id: project_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: name.to_string(),
            description: description.to_string(),
            status: ProjectStatus::Created,
            created_at: now.clone(),
            updated_at: now,
            requester,
            metadata,
            completion_percentage: 0,
            blocked_items: 0,
        };
        self.save_project(&project).await?;
        Ok(project)
    }

    async fn save_project(&self, project: &ProjectInfo) -> BackendResult<()> {
        let mut fresh = project.clone();
        fresh.updated_at = now_iso();
        let encoded = serde_json::to_string(&fresh)?;
        self.backend.set(&self.project_key(&fresh.id), &encoded).await?;
        self.backend.set_add(&self.index_key(), &fresh.id).await?;
        Ok(())
    }

    pub async fn get_project(&self, project_id: &str) -> BackendResult<Option<ProjectInfo>> {
        match self.backend.get(&self.project_key(project_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn list_projects(&self) -> BackendResult<Vec<String>> {
        let mut ids = self.backend.set_members(&self.index_key()).await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        completion_percentage: Option<u8>,
        blocked_items: Option<u32>,
    ) -> BackendResult<Option<ProjectInfo>> {
        let Some(mut project) = self.get_project(project_id).await? else {
            return Ok(None);
        };
        project.status = status;
        if let Some(pct) = completion_percentage {
            project.completion_percentage = pct;
        }
        if let Some(blocked) = blocked_items {
            project.blocked_items = blocked;
        }
        self.save_project(&project).await?;
        Ok(Some(project))
    }

    /// Remove a project and every related key.
    pub async fn delete_project(&self, project_id: &str) -> BackendResult<bool> {
        if self.get_project(project_id).await?.is_none() {
            return Ok(false);
        }
        self.backend.delete(&self.project_key(project_id)).await?;
        self.backend.delete(&self.interactions_key(project_id)).await?;
        self.backend.delete(&self.messages_key(project_id)).await?;
        self.backend.delete(&self.unread_key(project_id)).await?;
        self.backend.set_remove(&self.index_key(), project_id).await?;
        Ok(true)
    }

    /// Append an interaction for context tracking.
    pub async fn add_interaction(
        &self,
        project_id: &str,
        interaction_type: &str,
        content: &str,
        metadata: Value,
    ) -> BackendResult<Interaction> {
        let interaction = Interaction {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            interaction_type: interaction_type.to_string(),
            content: content.to_string(),
            timestamp: now_iso(),
            metadata,
        };
        let encoded = serde_json::to_string(&interaction)?;
        self.backend
            .list_push(&self.interactions_key(project_id), &encoded)
            .await?;
        Ok(interaction)
    }

    pub async fn get_interactions(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> BackendResult<Vec<Interaction>> {
        let raw = self
            .backend
            .list_range(
                &self.interactions_key(project_id),
                offset as isize,
                (offset + limit) as isize - 1,
            )
            .await?;
        let mut interactions = Vec::with_capacity(raw.len());
        for entry in raw {
            interactions.push(serde_json::from_str(&entry)?);
        }
        Ok(interactions)
    }

    /// Send a message from the orchestrator to the customer.
    pub async fn send_message_to_customer(
        &self,
        project_id: &str,
        message_type: &str,
        content: &str,
        related_item_id: Option<String>,
        requires_response: bool,
    ) -> BackendResult<CustomerMessage> {
        let message = CustomerMessage {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            message_type: message_type.to_string(),
            content: content.to_string(),
            status: "UNREAD".to_string(),
            timestamp: now_iso(),
            related_item_id,
            requires_response,
            response: None,
        };
        let encoded = serde_json::to_string(&message)?;
        self.backend
            .list_push(&self.messages_key(project_id), &encoded)
            .await?;
        self.backend
            .set_add(&self.unread_key(project_id), &message.id)
            .await?;
        Ok(message)
    }

    pub async fn get_customer_messages(
        &self,
        project_id: &str,
        unread_only: bool,
    ) -> BackendResult<Vec<CustomerMessage>> {
        let raw = self
            .backend
            .list_range(&self.messages_key(project_id), 0, -1)
            .await?;
        let unread: std::collections::HashSet<String> = if unread_only {
            self.backend
                .set_members(&self.unread_key(project_id))
                .await?
                .into_iter()
                .collect()
        } else {
            Default::default()
        };

        let mut messages = Vec::new();
        for entry in raw {
            let message: CustomerMessage = serde_json::from_str(&entry)?;
            if unread_only && !unread.contains(&message.id) {
                continue;
            }
            messages.push(message);
        }
        Ok(messages)
    }

    pub async fn mark_message_read(
        &self,
        project_id: &str,
        message_id: &str,
    ) -> BackendResult<()> {
        self.backend
            .set_remove(&self.unread_key(project_id), message_id)
            .await
    }

    /// Record the customer's response to a message.
    pub async fn respond_to_message(
        &self,
        project_id: &str,
        message_id: &str,
        response: &str,
    ) -> BackendResult<Option<CustomerMessage>> {
        let messages = self.get_customer_messages(project_id, false).await?;
        for (index, mut message) in messages.into_iter().enumerate() {
            if message.id == message_id {
                message.status = "RESPONDED".to_string();
                message.response = Some(response.to_string());
                let encoded = serde_json::to_string(&message)?;
                self.backend
                    .list_set(&self.messages_key(project_id), index as isize, &encoded)
                    .await?;
                self.mark_message_read(project_id, message_id).await?;
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Derive project status from backlog counts and update the document.
    pub async fn calculate_project_status(
        &self,
        project_id: &str,
        backlog: &BacklogStore,
    ) -> BackendResult<ProjectStatusSummary> {
        let items = backlog.items(project_id).await?;
        let total = items.len() as u32;
        let mut completed = 0u32;
        let mut blocked = 0u32;
        let mut in_progress = 0u32;
        for item in &items {
            match item.status {
                BacklogStatus::Done => completed += 1,
                BacklogStatus::Blocked => blocked += 1,
                BacklogStatus::InProgress => in_progress += 1,
                _ => {}
            }
        }

        let completion_pct = if total > 0 {
            ((completed as f64 / total as f64) * 100.0) as u8
        } else {
            0
        };
        let state = if total == 0 {
            ProjectStatus::Created
        } else if completed == total {
            ProjectStatus::Completed
        } else if blocked > 0 {
            ProjectStatus::AwaitingInput
        } else {
            ProjectStatus::InProgress
        };

        self.update_project_status(project_id, state, Some(completion_pct), Some(blocked))
            .await?;

        Ok(ProjectStatusSummary {
            project_id: project_id.to_string(),
            state,
            completion_percentage: completion_pct,
            total_items: total,
            completed_items: completed,
            blocked_items: blocked,
            in_progress_items: in_progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::store::backlog::BacklogItem;
    use serde_json::json;

    fn stores() -> (ProjectStore, BacklogStore) {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        (
            ProjectStore::new(backend.clone(), "audit"),
            BacklogStore::new(backend, "audit"),
        )
    }

    async fn put_item(backlog: &BacklogStore, id: &str, status: BacklogStatus) {
        backlog
            .put_item(&BacklogItem {
                id: id.to_string(),
                project_id: "p1".to_string(),
                item_type: "TASK".to_string(),
                title: "Task".to_string(),
                description: String::new(),
                status,
                evidence: json!({}),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_and_list_projects() {
        let (projects, _) = stores();
        let project = projects
            .create_project(Some("p1".into()), "Audit", "full audit", json!({}), json!({}))
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Created);
        assert_eq!(projects.list_projects().await.unwrap(), vec!["p1"]);
    }

    #[tokio::test]
    async fn status_derivation_follows_backlog_counts() {
        let (projects, backlog) = stores();
        projects
            .create_project(Some("p1".into()), "Audit", "", json!({}), json!({}))
            .await
            .unwrap();

        put_item(&backlog, "b1", BacklogStatus::Done).await;
        put_item(&backlog, "b2", BacklogStatus::Blocked).await;
        put_item(&backlog, "b3", BacklogStatus::InProgress).await;

        let summary = projects
            .calculate_project_status("p1", &backlog)
            .await
            .unwrap();
        assert_eq!(summary.state, ProjectStatus::AwaitingInput);
        assert_eq!(summary.completion_percentage, 33);
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.blocked_items, 1);

        let project = projects.get_project("p1").await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::AwaitingInput);
        assert_eq!(project.blocked_items, 1);
    }

    #[tokio::test]
    async fn all_done_completes_the_project() {
        let (projects, backlog) = stores();
        projects
            .create_project(Some("p1".into()), "Audit", "", json!({}), json!({}))
            .await
            .unwrap();
        put_item(&backlog, "b1", BacklogStatus::Done).await;
        put_item(&backlog, "b2", BacklogStatus::Done).await;

        let summary = projects
            .calculate_project_status("p1", &backlog)
            .await
            .unwrap();
        assert_eq!(summary.state, ProjectStatus::Completed);
        assert_eq!(summary.completion_percentage, 100);
    }

    #[tokio::test]
    async fn customer_messages_track_unread_and_responses() {
        let (projects, _) = stores();
        projects
            .create_project(Some("p1".into()), "Audit", "", json!({}), json!({}))
            .await
            .unwrap();

        let message = projects
            .send_message_to_customer("p1", "clarification", "Which KPIs?", Some("b1".into()), true)
            .await
            .unwrap();
        assert_eq!(
            projects.get_customer_messages("p1", true).await.unwrap().len(),
            1
        );

        let responded = projects
            .respond_to_message("p1", &message.id, "incident volume")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(responded.status, "RESPONDED");
        assert!(projects
            .get_customer_messages("p1", true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn interactions_are_append_only_history() {
        let (projects, _) = stores();
        projects
            .create_project(Some("p1".into()), "Audit", "", json!({}), json!({}))
            .await
            .unwrap();
        projects
            .add_interaction("p1", "user_input", "please audit", json!({}))
            .await
            .unwrap();
        projects
            .add_interaction("p1", "system_response", "backlog created", json!({}))
            .await
            .unwrap();

        let history = projects.get_interactions("p1", 10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].interaction_type, "user_input");
    }

    #[tokio::test]
    async fn delete_project_removes_everything() {
        let (projects, _) = stores();
        projects
            .create_project(Some("p1".into()), "Audit", "", json!({}), json!({}))
            .await
            .unwrap();
        assert!(projects.delete_project("p1").await.unwrap());
        assert!(projects.get_project("p1").await.unwrap().is_none());
        assert!(projects.list_projects().await.unwrap().is_empty());
        assert!(!projects.delete_project("p1").await.unwrap());
    }
}
