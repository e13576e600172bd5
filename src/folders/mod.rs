//! Folder semantics on top of labels.
//!
//! Gmail messages carry any number of labels. A subset of them, the folder
//! labels, is treated as mutually exclusive: after a move a message carries
//! exactly one folder label, after an archive none. Labels outside that
//! subset (UNREAD, STARRED, IMPORTANT, categories) are never touched.

use crate::gmail::{Label, LabelModification, LabelType, MailboxApi, MailboxError};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};


/// System labels that behave as folders. Every user label does too.
pub const SYSTEM_FOLDER_LABELS: [&str; 6] =
    ["INBOX", "DRAFT", "TRASH", "SPAM", "CHAT", "[Imap]/Sent"];

/// Ids of every folder label in `catalog`.
pub fn folder_label_ids(catalog: &[Label]) -> HashSet<String> {
    catalog
        .iter()
        .filter(|label| match label.label_type {
            LabelType::User => true,
            LabelType::System => SYSTEM_FOLDER_LABELS.contains(&label.name.as_str()),
        })
        .map(|label| label.id.clone())
        .collect()
}

/// Label delta that leaves `target` as the only folder label.
///
/// `current` order is kept in the removal list. With no target every folder
/// label is removed and nothing is added.
pub fn plan_move(
    folder_ids: &HashSet<String>,
    current: &[String],
    target: Option<&str>,
) -> LabelModification {
    let mut seen = HashSet::new();
    let remove_label_ids = current
        .iter()
        .filter(|id| folder_ids.contains(*id) && Some(id.as_str()) != target)
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();

    LabelModification {
        add_label_ids: target.map(|t| vec![t.to_string()]).unwrap_or_default(),
        remove_label_ids,
    }
}

/// Whether named labels are added to or removed from messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelAction {
    Add,
    Remove,
}

/// Failure of a folder or label batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FolderError {
    /// Target label name is not in the catalog
    UnknownFolder(String),
    /// None of the requested label names exist
    NoMatchingLabels,
    /// Reading the label catalog failed; nothing was modified
    Catalog(MailboxError),
    /// A message failed; the batch stopped there
    Message {
        message_id: String,
        completed: usize,
        source: MailboxError,
    },
}

impl FolderError {
    /// The mailbox error behind this failure, if any.
    pub fn mailbox_error(&self) -> Option<&MailboxError> {
        match self {
            FolderError::Catalog(e) | FolderError::Message { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for FolderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FolderError::UnknownFolder(name) => write!(f, "Label '{}' not found.", name),
            FolderError::NoMatchingLabels => write!(
                f,
                "None of the provided label names matched existing labels."
            ),
            FolderError::Catalog(e) => write!(f, "Failed to load labels: {}", e),
            FolderError::Message {
                message_id,
                completed,
                source,
            } => write!(
                f,
                "Failed to modify email {}: {} ({} message(s) already updated)",
                message_id, source, completed
            ),
        }
    }
}

impl std::error::Error for FolderError {}

/// Applies folder moves and label changes to batches of messages.
///
/// Batches run sequentially and stop at the first failing message. Messages
/// before it stay modified; the error says how many.
pub struct FolderReconciler<'a> {
    mailbox: &'a dyn MailboxApi,
}

impl<'a> FolderReconciler<'a> {
    pub fn new(mailbox: &'a dyn MailboxApi) -> Self {
        Self { mailbox }
    }

    /// Moves every message into the folder named `target_name`.
    ///
    /// Returns the number of messages moved.
    pub async fn move_messages(
        &self,
        message_ids: &[String],
        target_name: &str,
    ) -> Result<usize, FolderError> {
        let catalog = self.catalog().await?;

        let target_id = catalog
            .iter()
            .find(|label| label.name == target_name)
            .map(|label| label.id.clone())
            .ok_or_else(|| FolderError::UnknownFolder(target_name.to_string()))?;

        let folder_ids = folder_label_ids(&catalog);
        self.apply_each(message_ids, &folder_ids, Some(&target_id))
            .await
    }

    /// Removes every folder label from each message.
    pub async fn archive_messages(&self, message_ids: &[String]) -> Result<usize, FolderError> {
        let catalog = self.catalog().await?;
        let folder_ids = folder_label_ids(&catalog);
        self.apply_each(message_ids, &folder_ids, None).await
    }

    /// Adds or removes labels by name.
    ///
    /// Unknown names are skipped as long as at least one name resolves.
    pub async fn manage_labels(
        &self,
        message_ids: &[String],
        label_names: &[String],
        action: LabelAction,
    ) -> Result<usize, FolderError> {
        let catalog = self.catalog().await?;
        let by_name: HashMap<&str, &str> = catalog
            .iter()
            .map(|label| (label.name.as_str(), label.id.as_str()))
            .collect();

        let label_ids: Vec<String> = label_names
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).map(|id| id.to_string()))
            .collect();

        if label_ids.is_empty() {
            return Err(FolderError::NoMatchingLabels);
        }

        let change = match action {
            LabelAction::Add => LabelModification {
                add_label_ids: label_ids,
                remove_label_ids: vec![],
            },
            LabelAction::Remove => LabelModification {
                add_label_ids: vec![],
                remove_label_ids: label_ids,
            },
        };

        for (completed, message_id) in message_ids.iter().enumerate() {
            self.mailbox
                .modify_labels(message_id, &change)
                .await
                .map_err(|source| batch_failure(message_id, completed, source))?;
            info!(message_id = %message_id, ?action, "Updated labels");
        }

        Ok(message_ids.len())
    }

    async fn catalog(&self) -> Result<Vec<Label>, FolderError> {
        self.mailbox.list_labels().await.map_err(|e| {
            warn!(error = %e, "Failed to load label catalog");
            FolderError::Catalog(e)
        })
    }

    async fn apply_each(
        &self,
        message_ids: &[String],
        folder_ids: &HashSet<String>,
        target_id: Option<&str>,
    ) -> Result<usize, FolderError> {
        for (completed, message_id) in message_ids.iter().enumerate() {
            self.apply_one(message_id, folder_ids, target_id)
                .await
                .map_err(|source| batch_failure(message_id, completed, source))?;
        }
        Ok(message_ids.len())
    }

    async fn apply_one(
        &self,
        message_id: &str,
        folder_ids: &HashSet<String>,
        target_id: Option<&str>,
    ) -> Result<(), MailboxError> {
        let current = self.mailbox.message_label_ids(message_id).await?;
        let change = plan_move(folder_ids, &current, target_id);
        if change.is_empty() {
            debug!(message_id, "Message already outside every folder");
            return Ok(());
        }
        self.mailbox.modify_labels(message_id, &change).await?;

        match target_id {
            Some(target) => info!(message_id, target, "Moved message"),
            None => info!(message_id, "Archived message"),
        }
        Ok(())
    }
}

fn batch_failure(message_id: &str, completed: usize, source: MailboxError) -> FolderError {
    warn!(message_id, completed, error = %source, "Batch stopped at failing message");
    FolderError::Message {
        message_id: message_id.to_string(),
        completed,
        source,
    }
}
