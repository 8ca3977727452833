//! Session collaborator
//!
//! The loop only needs append, read-back and a single trailing retraction.
//! Storage is behind the [`Session`] trait; [`InMemorySession`] keeps
//! everything in process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::ai::types::{Message, ModelInfo, Role};

#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    /// Append a message. Failures must be surfaced to the caller.
    async fn add_message(&self, message: Message, model: &ModelInfo) -> Result<()>;

    /// Full history in the order it was appended
    async fn messages_for_llm(&self) -> Result<Vec<Message>>;

    async fn remove_last_message(&self) -> Result<()>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, working_dir: &std::path::Path) -> Result<Arc<dyn Session>>;
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message: Message,
    pub model: ModelInfo,
    pub created_at: DateTime<Utc>,
}

pub struct InMemorySession {
    id: String,
    title: Mutex<Option<String>>,
    messages: Mutex<Vec<StoredMessage>>,
    fail_appends: AtomicBool,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make every subsequent append fail (persistence error simulation)
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Title derived from the first user text message
    pub fn title(&self) -> Option<String> {
        self.title.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn stored(&self) -> Vec<StoredMessage> {
        self.messages.lock().clone()
    }
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_message(&self, message: Message, model: &ModelInfo) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            bail!("Failed to persist message to session {}", self.id);
        }

        if message.role == Role::User {
            let mut title = self.title.lock();
            if title.is_none() {
                if let Some(text) = message.text() {
                    *title = Some(generate_title(&text));
                }
            }
        }

        self.messages.lock().push(StoredMessage {
            message,
            model: model.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn messages_for_llm(&self) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .lock()
            .iter()
            .map(|m| m.message.clone())
            .collect())
    }

    async fn remove_last_message(&self) -> Result<()> {
        if self.messages.lock().pop().is_none() {
            bail!("Session {} has no messages to remove", self.id);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionFactory {
    created: Mutex<Vec<Arc<InMemorySession>>>,
}

impl InMemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions handed out so far, oldest first
    pub fn sessions(&self) -> Vec<Arc<InMemorySession>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for InMemorySessionFactory {
    async fn create(&self, working_dir: &std::path::Path) -> Result<Arc<dyn Session>> {
        let session = Arc::new(InMemorySession::new());
        tracing::info!(session_id = %session.id, cwd = %working_dir.display(), "Created session");
        self.created.lock().push(session.clone());
        Ok(session)
    }
}

/// Title from the first line of a prompt, cut at a word boundary
pub fn generate_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= 50 {
        return first_line.to_string();
    }

    let first_50: String = first_line.chars().take(50).collect();
    if let Some(last_space) = first_50.rfind(char::is_whitespace) {
        let char_idx = first_50[..last_space].chars().count();
        if char_idx > 20 {
            let prefix: String = first_line.chars().take(char_idx).collect();
            return format!("{}...", prefix.trim_end());
        }
    }

    let truncated: String = first_line.chars().take(47).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_read_and_retract() {
        let session = InMemorySession::new();
        let model = ModelInfo::default();
        session
            .add_message(Message::user_text("hello"), &model)
            .await
            .unwrap();
        session
            .add_message(Message::user_text("again"), &model)
            .await
            .unwrap();

        assert_eq!(session.messages_for_llm().await.unwrap().len(), 2);
        session.remove_last_message().await.unwrap();
        let messages = session.messages_for_llm().await.unwrap();
        assert_eq!(messages, vec![Message::user_text("hello")]);
        assert_eq!(session.title().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn failing_appends_are_reported() {
        let session = InMemorySession::new();
        session.set_fail_appends(true);
        let result = session
            .add_message(Message::user_text("x"), &ModelInfo::default())
            .await;
        assert!(result.is_err());
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn removing_from_empty_session_fails() {
        assert!(InMemorySession::new().remove_last_message().await.is_err());
    }

    #[tokio::test]
    async fn factory_tracks_sessions() {
        let factory = InMemorySessionFactory::new();
        let a = factory.create(std::path::Path::new(".")).await.unwrap();
        let b = factory.create(std::path::Path::new(".")).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(factory.sessions().len(), 2);
    }

    #[test]
    fn long_titles_are_cut_at_word_boundary() {
        let title = generate_title(
            "Refactor the permission gate so that approved patterns are applied on the next call",
        );
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= 53);
        assert!(!title.contains("  "));
        assert_eq!(generate_title("short\nsecond line"), "short");
    }
}
