//! Mailbox API seam.
//!
//! [`MailboxApi`] is the capability handle operations use to touch the
//! user's mailbox. A [`MailboxFactory`] supplied at startup builds a fresh
//! handle per request from that request's access value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod client;
mod fanout;
mod memory;

pub use client::{GmailClient, GmailFactory, DEFAULT_BASE_URL};
pub use fanout::fetch_summaries;
pub use memory::{InMemoryMailbox, InMemoryMailboxFactory};

/// Whether a label is built in or created by the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    #[default]
    System,
    User,
}

/// Entry of the label catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub label_type: LabelType,
}

impl Label {
    pub fn system(name: &str) -> Self {
        Self {
            id: name.to_string(),
            name: name.to_string(),
            label_type: LabelType::System,
        }
    }

    pub fn user(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            label_type: LabelType::User,
        }
    }
}

/// Label ids to add and remove in one modify call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelModification {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_label_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_label_ids: Vec<String>,
}

impl LabelModification {
    /// No labels to add or remove; the API rejects such a request.
    pub fn is_empty(&self) -> bool {
        self.add_label_ids.is_empty() && self.remove_label_ids.is_empty()
    }
}

/// Message id as returned by a list call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// One page of a message listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

/// Filters for a message listing.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ListQuery {
    #[serde(rename = "q", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(rename = "maxResults")]
    pub max_results: u32,
    #[serde(rename = "pageToken", skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// Header metadata attached to a listed message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub snippet: String,
}

/// Failure talking to the mailbox API.
#[derive(Debug, Clone, PartialEq)]
pub enum MailboxError {
    /// Non-success HTTP status with the upstream message
    Api { status: u16, message: String },
    /// The call exceeded its deadline
    Timeout,
    /// Connection-level failure
    Transport(String),
    /// Response body did not have the expected shape
    Decode(String),
}

impl MailboxError {
    /// Retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MailboxError::Timeout | MailboxError::Transport(_) => true,
            MailboxError::Api { status, .. } => *status == 429 || *status >= 500,
            MailboxError::Decode(_) => false,
        }
    }
}

impl std::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxError::Api { status, message } => {
                write!(f, "Mailbox API error ({}): {}", status, message)
            }
            MailboxError::Timeout => write!(f, "Mailbox API request timed out"),
            MailboxError::Transport(msg) => write!(f, "Mailbox API unreachable: {}", msg),
            MailboxError::Decode(msg) => write!(f, "Unexpected mailbox API response: {}", msg),
        }
    }
}

impl std::error::Error for MailboxError {}

/// Calls into the user's mailbox.
///
/// Only label reads/modifies, listing and deletes are needed by the tool
/// surface; sending and drafting live elsewhere.
#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Full label catalog (system and user labels).
    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError>;

    /// Current label ids of a message.
    async fn message_label_ids(&self, message_id: &str) -> Result<Vec<String>, MailboxError>;

    async fn modify_labels(
        &self,
        message_id: &str,
        change: &LabelModification,
    ) -> Result<(), MailboxError>;

    async fn list_messages(&self, query: &ListQuery) -> Result<MessagePage, MailboxError>;

    /// Subject/From/To/Date headers and snippet of a message.
    async fn message_summary(&self, message_id: &str) -> Result<MessageSummary, MailboxError>;

    async fn delete_draft(&self, draft_id: &str) -> Result<(), MailboxError>;

    async fn delete_label(&self, label_id: &str) -> Result<(), MailboxError>;
}

/// Builds a mailbox handle bound to one access value.
pub trait MailboxFactory: Send + Sync {
    fn connect(&self, access_value: &str) -> Arc<dyn MailboxApi>;
}
