//! In-memory stores for conversation history and tracked builds.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::build::BuildJob;
use crate::model::ChatMessage;

/// Maximum messages retained per conversation. Older turns are dropped
/// so long-running conversations keep a bounded prompt.
pub const HISTORY_CAP: usize = 10;

/// Per-conversation chat history, keyed by conversation id.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Arc<Mutex<Vec<ChatMessage>>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the history handle for a conversation, creating it on first
    /// use. Callers hold the returned lock for the whole generation turn so
    /// concurrent requests on one conversation run in sequence.
    pub async fn history(&self, key: &str) -> Arc<Mutex<Vec<ChatMessage>>> {
        let mut conversations = self.conversations.lock().await;
        conversations.entry(key.to_string()).or_default().clone()
    }
}

/// Appends a prompt and reply to a history, trimming the oldest turns
/// once the history exceeds [`HISTORY_CAP`].
pub fn push_exchange(history: &mut Vec<ChatMessage>, prompt: &str, reply: &str) {
    history.push(ChatMessage::user(prompt));
    history.push(ChatMessage::assistant(reply));
    if history.len() > HISTORY_CAP {
        let excess = history.len() - HISTORY_CAP;
        history.drain(..excess);
    }
}

/// Builds the service has triggered or heard about, keyed by build id.
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, BuildJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: BuildJob) {
        self.jobs.lock().await.insert(job.id.clone(), job);
    }

    pub async fn get(&self, id: &str) -> Option<BuildJob> {
        self.jobs.lock().await.get(id).cloned()
    }

    /// Merges a fresh status sample into the store. A signed artifact URL
    /// already resolved for the build survives samples that lack one.
    /// Returns true when the build was already tracked.
    pub async fn upsert(&self, mut job: BuildJob) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&job.id) {
            Some(existing) => {
                if job.artifact_url.is_none() {
                    job.artifact_url = existing.artifact_url.clone();
                }
                jobs.insert(job.id.clone(), job);
                true
            }
            None => {
                jobs.insert(job.id.clone(), job);
                false
            }
        }
    }

    pub async fn set_artifact_url(&self, id: &str, url: impl Into<String>) {
        if let Some(job) = self.jobs.lock().await.get_mut(id) {
            job.artifact_url = Some(url.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildStatus;

    fn job(id: &str, status: BuildStatus) -> BuildJob {
        BuildJob {
            id: id.to_string(),
            status,
            log_url: Some(format!("https://logs.example/{id}")),
            artifact_location: None,
            artifact_url: None,
        }
    }

    #[tokio::test]
    async fn test_history_handle_is_shared_per_conversation() {
        let store = ConversationStore::new();
        let first = store.history("alice").await;
        let again = store.history("alice").await;
        let other = store.history("bob").await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));

        first.lock().await.push(ChatMessage::user("hi"));
        assert_eq!(again.lock().await.len(), 1);
        assert!(other.lock().await.is_empty());
    }

    #[test]
    fn test_push_exchange_appends_in_order() {
        let mut history = Vec::new();
        push_exchange(&mut history, "make an app", "FILENAME: main.dart");

        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("make an app"));
        assert_eq!(history[1], ChatMessage::assistant("FILENAME: main.dart"));
    }

    #[test]
    fn test_push_exchange_caps_history_keeping_newest() {
        let mut history = Vec::new();
        for i in 0..8 {
            push_exchange(&mut history, &format!("prompt {i}"), &format!("reply {i}"));
        }

        assert_eq!(history.len(), HISTORY_CAP);
        // Oldest exchanges fall off the front.
        assert_eq!(history[0].content, "prompt 3");
        assert_eq!(history[HISTORY_CAP - 1].content, "reply 7");
    }

    #[tokio::test]
    async fn test_job_store_insert_and_get() {
        let store = JobStore::new();
        store.insert(job("b-1", BuildStatus::Working)).await;

        let found = store.get("b-1").await.unwrap();
        assert_eq!(found.status, BuildStatus::Working);
        assert!(store.get("b-2").await.is_none());
    }

    #[tokio::test]
    async fn test_upsert_reports_known_builds() {
        let store = JobStore::new();
        assert!(!store.upsert(job("b-1", BuildStatus::Queued)).await);
        assert!(store.upsert(job("b-1", BuildStatus::Working)).await);

        assert_eq!(store.get("b-1").await.unwrap().status, BuildStatus::Working);
    }

    #[tokio::test]
    async fn test_upsert_keeps_resolved_artifact_url() {
        let store = JobStore::new();
        store.insert(job("b-1", BuildStatus::Working)).await;
        store.set_artifact_url("b-1", "https://signed.example/app.apk").await;

        // A status sample without a download URL must not erase the one
        // already handed to a client.
        store.upsert(job("b-1", BuildStatus::Success)).await;
        let found = store.get("b-1").await.unwrap();
        assert_eq!(found.status, BuildStatus::Success);
        assert_eq!(found.artifact_url.as_deref(), Some("https://signed.example/app.apk"));
    }

    #[tokio::test]
    async fn test_set_artifact_url_ignores_unknown_build() {
        let store = JobStore::new();
        store.set_artifact_url("missing", "https://signed.example/app.apk").await;
        assert!(store.get("missing").await.is_none());
    }
}
