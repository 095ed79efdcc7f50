//! Question store
//!
//! The question object schema is strict (`additionalProperties: false`), so
//! answers live under a separate key and the document itself never grows
//! extra fields.
//!
//! Storage layout:
//!   - question doc: `{prefix}:project:{project_id}:question:{question_id}`
//!   - index all:    `{prefix}:project:{project_id}:questions:index`
//!   - index open:   `{prefix}:project:{project_id}:questions:open`
//!   - answer:       `{prefix}:question:{question_id}:answer`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{BackendResult, KvBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerType {
    Text,
    Number,
    Json,
    Choice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    Open,
    Closed,
}

/// A clarification question linked to a backlog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub project_id: String,
    pub backlog_item_id: String,
    pub question_text: String,
    pub answer_type: AnswerType,
    pub status: QuestionStatus,
    pub correlation_id: Option<String>,
}

/// Store for questions, their open index, and answers.
#[derive(Clone)]
pub struct QuestionStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl QuestionStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    fn question_key(&self, project_id: &str, question_id: &str) -> String {
        format!("{}:project:{project_id}:question:{question_id}", self.prefix)
    }

    fn index_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:questions:index", self.prefix)
    }

    fn open_key(&self, project_id: &str) -> String {
        format!("{}:project:{project_id}:questions:open", self.prefix)
    }

    fn answer_key(&self, question_id: &str) -> String {
        format!("{}:question:{question_id}:answer", self.prefix)
    }

    /// Create a new OPEN question linked to a backlog item.
    pub async fn create_question(
        &self,
        project_id: &str,
        backlog_item_id: &str,
        question_text: &str,
        answer_type: AnswerType,
        correlation_id: Option<String>,
    ) -> BackendResult<Question> {
        let question = Question {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            backlog_item_id: backlog_item_id.to_string(),
            question_text: question_text.to_string(),
            answer_type,
            status: QuestionStatus::Open,
            correlation_id,
        };
        self.put_question(&question).await?;
        Ok(question)
    }

    pub async fn put_question(&self, question: &Question) -> BackendResult<()> {
        let encoded = serde_json::to_string(question)?;
        self.backend
            .set(
                &self.question_key(&question.project_id, &question.id),
                &encoded,
            )
            .await?;
        self.backend
            .set_add(&self.index_key(&question.project_id), &question.id)
            .await?;
        self.backend
            .set_add(&self.open_key(&question.project_id), &question.id)
            .await?;
        Ok(())
    }

    pub async fn get_question(
        &self,
        project_id: &str,
        question_id: &str,
    ) -> BackendResult<Option<Question>> {
        match self
            .backend
            .get(&self.question_key(project_id, question_id))
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn list_open(&self, project_id: &str) -> BackendResult<Vec<String>> {
        let mut ids = self.backend.set_members(&self.open_key(project_id)).await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn list_all(&self, project_id: &str) -> BackendResult<Vec<String>> {
        let mut ids = self.backend.set_members(&self.index_key(project_id)).await?;
        ids.sort();
        Ok(ids)
    }

    /// Record the answer and drop the question from the open index.
    ///
    /// Does not flip the question status; callers that want the full close
    /// also call [`QuestionStore::close_question`].
    pub async fn set_answer(
        &self,
        project_id: &str,
        question_id: &str,
        answer: &Value,
    ) -> BackendResult<()> {
        self.backend
            .set(&self.answer_key(question_id), &answer.to_string())
            .await?;
        self.backend
            .set_remove(&self.open_key(project_id), question_id)
            .await?;
        Ok(())
    }

    pub async fn get_answer(&self, question_id: &str) -> BackendResult<Option<Value>> {
        match self.backend.get(&self.answer_key(question_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Flip the question to CLOSED and remove it from the open index.
    pub async fn close_question(&self, project_id: &str, question_id: &str) -> BackendResult<()> {
        if let Some(mut question) = self.get_question(project_id, question_id).await? {
            if question.status != QuestionStatus::Closed {
                question.status = QuestionStatus::Closed;
                let encoded = serde_json::to_string(&question)?;
                self.backend
                    .set(&self.question_key(project_id, question_id), &encoded)
                    .await?;
            }
        }
        self.backend
            .set_remove(&self.open_key(project_id), question_id)
            .await?;
        Ok(())
    }
}
