//! In-process mailbox used by tests and local runs without Google access.

use super::{
    Label, LabelModification, ListQuery, MailboxApi, MailboxError, MailboxFactory, MessagePage,
    MessageRef, MessageSummary,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
struct StoredMessage {
    id: String,
    label_ids: Vec<String>,
    subject: String,
}

#[derive(Default)]
struct MailboxState {
    labels: Vec<Label>,
    messages: Vec<StoredMessage>,
    drafts: HashSet<String>,
    failing: HashSet<String>,
    modify_calls: Vec<(String, LabelModification)>,
    queries: Vec<ListQuery>,
}

fn not_found() -> MailboxError {
    MailboxError::Api {
        status: 404,
        message: "Requested entity was not found.".to_string(),
    }
}

/// Mailbox kept in memory.
///
/// Starts with the standard system labels. Ids registered with
/// [`fail_on`](InMemoryMailbox::fail_on) make every call naming them fail
/// with a 500.
pub struct InMemoryMailbox {
    state: Mutex<MailboxState>,
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        let labels = ["INBOX", "SENT", "DRAFT", "TRASH", "SPAM", "UNREAD", "STARRED"]
            .iter()
            .map(|name| Label::system(name))
            .collect();

        Self {
            state: Mutex::new(MailboxState {
                labels,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_label(&self, label: Label) {
        self.state().labels.push(label);
    }

    pub fn add_message(&self, id: &str, label_ids: &[&str]) {
        self.add_message_with_subject(id, label_ids, &format!("Subject of {}", id));
    }

    pub fn add_message_with_subject(&self, id: &str, label_ids: &[&str], subject: &str) {
        self.state().messages.push(StoredMessage {
            id: id.to_string(),
            label_ids: label_ids.iter().map(|l| l.to_string()).collect(),
            subject: subject.to_string(),
        });
    }

    pub fn add_draft(&self, id: &str) {
        self.state().drafts.insert(id.to_string());
    }

    pub fn fail_on(&self, id: &str) {
        self.state().failing.insert(id.to_string());
    }

    /// Current labels of a message, `None` if unknown.
    pub fn labels_of(&self, id: &str) -> Option<Vec<String>> {
        self.state()
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.label_ids.clone())
    }

    pub fn has_draft(&self, id: &str) -> bool {
        self.state().drafts.contains(id)
    }

    pub fn has_label(&self, id: &str) -> bool {
        self.state().labels.iter().any(|l| l.id == id)
    }

    /// Every modify call made so far, in order.
    pub fn modify_calls(&self) -> Vec<(String, LabelModification)> {
        self.state().modify_calls.clone()
    }

    pub fn queries(&self) -> Vec<ListQuery> {
        self.state().queries.clone()
    }

    fn check_failing(state: &MailboxState, id: &str) -> Result<(), MailboxError> {
        if state.failing.contains(id) {
            return Err(MailboxError::Api {
                status: 500,
                message: format!("Backend error for {}", id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxApi for InMemoryMailbox {
    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError> {
        Ok(self.state().labels.clone())
    }

    async fn message_label_ids(&self, message_id: &str) -> Result<Vec<String>, MailboxError> {
        let state = self.state();
        Self::check_failing(&state, message_id)?;
        state
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.label_ids.clone())
            .ok_or_else(not_found)
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        change: &LabelModification,
    ) -> Result<(), MailboxError> {
        let mut state = self.state();
        Self::check_failing(&state, message_id)?;
        state
            .modify_calls
            .push((message_id.to_string(), change.clone()));

        if change.is_empty() {
            return Err(MailboxError::Api {
                status: 400,
                message: "No label add or removes specified".to_string(),
            });
        }

        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(not_found)?;

        message
            .label_ids
            .retain(|id| !change.remove_label_ids.contains(id));
        for id in &change.add_label_ids {
            if !message.label_ids.contains(id) {
                message.label_ids.push(id.clone());
            }
        }
        Ok(())
    }

    async fn list_messages(&self, query: &ListQuery) -> Result<MessagePage, MailboxError> {
        let mut state = self.state();
        state.queries.push(query.clone());

        let start = match &query.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| MailboxError::Api {
                    status: 400,
                    message: "Invalid pageToken".to_string(),
                })?,
            None => 0,
        };
        let end = start
            .saturating_add(query.max_results as usize)
            .min(state.messages.len());

        let messages = state
            .messages
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: Some(format!("thread-{}", m.id)),
            })
            .collect();

        Ok(MessagePage {
            messages,
            next_page_token: (end < state.messages.len()).then(|| end.to_string()),
        })
    }

    async fn message_summary(&self, message_id: &str) -> Result<MessageSummary, MailboxError> {
        let state = self.state();
        Self::check_failing(&state, message_id)?;
        let message = state
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(not_found)?;

        Ok(MessageSummary {
            id: message.id.clone(),
            thread_id: Some(format!("thread-{}", message.id)),
            subject: message.subject.clone(),
            from: "sender@example.com".to_string(),
            to: "me@example.com".to_string(),
            date: "Mon, 1 Jan 2024 00:00:00 +0000".to_string(),
            snippet: String::new(),
        })
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<(), MailboxError> {
        let mut state = self.state();
        Self::check_failing(&state, draft_id)?;
        if state.drafts.remove(draft_id) {
            Ok(())
        } else {
            Err(not_found())
        }
    }

    async fn delete_label(&self, label_id: &str) -> Result<(), MailboxError> {
        let mut state = self.state();
        Self::check_failing(&state, label_id)?;
        let before = state.labels.len();
        state.labels.retain(|l| l.id != label_id);
        if state.labels.len() == before {
            return Err(not_found());
        }
        for message in state.messages.iter_mut() {
            message.label_ids.retain(|id| id != label_id);
        }
        Ok(())
    }
}

/// Hands out the same [`InMemoryMailbox`] for every access value and
/// remembers which values it was asked to connect with.
pub struct InMemoryMailboxFactory {
    mailbox: Arc<InMemoryMailbox>,
    connections: Mutex<Vec<String>>,
}

impl InMemoryMailboxFactory {
    pub fn new(mailbox: Arc<InMemoryMailbox>) -> Self {
        Self {
            mailbox,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn mailbox(&self) -> Arc<InMemoryMailbox> {
        Arc::clone(&self.mailbox)
    }

    /// Access values passed to [`MailboxFactory::connect`], in order.
    pub fn connections(&self) -> Vec<String> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MailboxFactory for InMemoryMailboxFactory {
    fn connect(&self, access_value: &str) -> Arc<dyn MailboxApi> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(access_value.to_string());
        self.mailbox.clone()
    }
}
