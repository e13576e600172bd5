//! Mailbox tool endpoints.
//!
//! Every handler first requires an authenticated [`RequestAuthContext`]
//! (installed by the session middleware), then works on that request's
//! mailbox handle.

use super::AppError;
use crate::confirmation::{Confirmation, ConfirmationGuard, ConfirmationRequired};
use crate::folders::{FolderReconciler, LabelAction};
use crate::gmail::{fetch_summaries, Label, ListQuery, MessageSummary};
use crate::session::RequestAuthContext;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Largest page a list request may ask for
const MAX_LIST_RESULTS: u32 = 500;

/// Shared state for tool endpoints
#[derive(Clone)]
pub struct ToolsAppState {
    pub confirmation: ConfirmationGuard,
    /// Metadata fetches in flight per list request
    pub metadata_concurrency: usize,
}

/// Create tool API router.
///
/// The session middleware must be layered on top of this router.
pub fn create_tools_router(state: ToolsAppState) -> Router {
    Router::new()
        .route("/tools/labels", get(list_labels))
        .route("/tools/emails/list", post(list_emails))
        .route("/tools/emails/move", post(move_emails))
        .route("/tools/emails/archive", post(archive_emails))
        .route("/tools/emails/labels", post(manage_labels))
        .route("/tools/drafts/delete", post(delete_draft))
        .route("/tools/labels/delete", post(delete_label))
        .with_state(Arc::new(state))
}

/// Plain success response
#[derive(Serialize, Debug)]
pub struct SuccessResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl SuccessResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
            count: None,
        }
    }

    fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

#[derive(Serialize)]
pub struct ListLabelsResponse {
    pub status: &'static str,
    pub labels: Vec<Label>,
}

/// Request body for POST /tools/emails/list
#[derive(Deserialize, Debug, Default)]
pub struct ListEmailsRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub page_token: Option<String>,
}

fn default_max_results() -> u32 {
    10
}

#[derive(Serialize)]
pub struct ListEmailsResponse {
    pub status: &'static str,
    pub emails: Vec<MessageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Request body for POST /tools/emails/move
#[derive(Deserialize, Debug)]
pub struct MoveEmailsRequest {
    pub message_ids: Vec<String>,
    /// Name of the destination folder label
    pub folder: String,
}

/// Request body for POST /tools/emails/archive
#[derive(Deserialize, Debug)]
pub struct ArchiveEmailsRequest {
    pub message_ids: Vec<String>,
}

/// Request body for POST /tools/emails/labels
#[derive(Deserialize, Debug)]
pub struct ManageLabelsRequest {
    pub message_ids: Vec<String>,
    pub labels: Vec<String>,
    pub action: LabelAction,
}

/// Request body for POST /tools/drafts/delete
#[derive(Deserialize, Debug)]
pub struct DeleteDraftRequest {
    pub draft_id: String,
    #[serde(default)]
    pub confirmation_token: Option<String>,
}

/// Request body for POST /tools/labels/delete
#[derive(Deserialize, Debug)]
pub struct DeleteLabelRequest {
    pub label_id: String,
    #[serde(default)]
    pub confirmation_token: Option<String>,
}

fn require_ids(message_ids: &[String]) -> Result<(), AppError> {
    if message_ids.is_empty() {
        return Err(AppError::BadRequest(
            "message_ids must contain at least one id".to_string(),
        ));
    }
    Ok(())
}

/// GET /tools/labels
async fn list_labels(
    Extension(auth): Extension<RequestAuthContext>,
) -> Result<Json<ListLabelsResponse>, AppError> {
    let (_, mailbox) = auth.require()?;
    let labels = mailbox.list_labels().await?;

    Ok(Json(ListLabelsResponse {
        status: "success",
        labels,
    }))
}

/// POST /tools/emails/list - List messages with header metadata
async fn list_emails(
    State(state): State<Arc<ToolsAppState>>,
    Extension(auth): Extension<RequestAuthContext>,
    payload: Result<Json<ListEmailsRequest>, JsonRejection>,
) -> Result<Json<ListEmailsResponse>, AppError> {
    let (_, mailbox) = auth.require()?;
    let Json(req) = payload?;

    if req.max_results == 0 || req.max_results > MAX_LIST_RESULTS {
        return Err(AppError::BadRequest(format!(
            "max_results must be between 1 and {}",
            MAX_LIST_RESULTS
        )));
    }

    let page = mailbox
        .list_messages(&ListQuery {
            query: req.query.filter(|q| !q.trim().is_empty()),
            max_results: req.max_results,
            page_token: req.page_token,
        })
        .await?;

    let emails = fetch_summaries(mailbox.as_ref(), &page.messages, state.metadata_concurrency).await;

    Ok(Json(ListEmailsResponse {
        status: "success",
        emails,
        next_page_token: page.next_page_token,
    }))
}

/// POST /tools/emails/move - Move messages into one folder
async fn move_emails(
    Extension(auth): Extension<RequestAuthContext>,
    payload: Result<Json<MoveEmailsRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let (identity, mailbox) = auth.require()?;
    let Json(req) = payload?;
    require_ids(&req.message_ids)?;

    let moved = FolderReconciler::new(mailbox.as_ref())
        .move_messages(&req.message_ids, &req.folder)
        .await?;

    info!(subject_id = %identity.subject_id, folder = %req.folder, moved, "Moved emails");

    Ok(Json(
        SuccessResponse::new(format!("Email(s) successfully moved to '{}'", req.folder))
            .with_count(moved),
    ))
}

/// POST /tools/emails/archive - Remove messages from every folder
async fn archive_emails(
    Extension(auth): Extension<RequestAuthContext>,
    payload: Result<Json<ArchiveEmailsRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let (identity, mailbox) = auth.require()?;
    let Json(req) = payload?;
    require_ids(&req.message_ids)?;

    let archived = FolderReconciler::new(mailbox.as_ref())
        .archive_messages(&req.message_ids)
        .await?;

    info!(subject_id = %identity.subject_id, archived, "Archived emails");

    Ok(Json(
        SuccessResponse::new("Email(s) successfully archived.").with_count(archived),
    ))
}

/// POST /tools/emails/labels - Add or remove labels by name
async fn manage_labels(
    Extension(auth): Extension<RequestAuthContext>,
    payload: Result<Json<ManageLabelsRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let (_, mailbox) = auth.require()?;
    let Json(req) = payload?;
    require_ids(&req.message_ids)?;

    let updated = FolderReconciler::new(mailbox.as_ref())
        .manage_labels(&req.message_ids, &req.labels, req.action)
        .await?;

    let verb = match req.action {
        LabelAction::Add => "added to",
        LabelAction::Remove => "removed from",
    };

    Ok(Json(
        SuccessResponse::new(format!("Labels {} email(s).", verb)).with_count(updated),
    ))
}

/// POST /tools/drafts/delete - Confirmation-guarded draft deletion
async fn delete_draft(
    State(state): State<Arc<ToolsAppState>>,
    Extension(auth): Extension<RequestAuthContext>,
    payload: Result<Json<DeleteDraftRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let (identity, mailbox) = auth.require()?;
    let Json(req) = payload?;

    let outcome = state
        .confirmation
        .request_or_execute(
            "draft",
            &req.draft_id,
            req.confirmation_token.as_deref(),
            Utc::now(),
            || mailbox.delete_draft(&req.draft_id),
        )
        .await?;

    match outcome {
        Confirmation::Required(required) => Ok(confirmation_response(required)),
        Confirmation::Executed(result) => {
            result?;
            info!(subject_id = %identity.subject_id, draft_id = %req.draft_id, "Deleted draft");
            Ok(Json(SuccessResponse::new("Draft deleted successfully.")).into_response())
        }
    }
}

/// POST /tools/labels/delete - Confirmation-guarded label deletion
async fn delete_label(
    State(state): State<Arc<ToolsAppState>>,
    Extension(auth): Extension<RequestAuthContext>,
    payload: Result<Json<DeleteLabelRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let (identity, mailbox) = auth.require()?;
    let Json(req) = payload?;

    let outcome = state
        .confirmation
        .request_or_execute(
            "label",
            &req.label_id,
            req.confirmation_token.as_deref(),
            Utc::now(),
            || mailbox.delete_label(&req.label_id),
        )
        .await?;

    match outcome {
        Confirmation::Required(required) => Ok(confirmation_response(required)),
        Confirmation::Executed(result) => {
            result?;
            info!(subject_id = %identity.subject_id, label_id = %req.label_id, "Deleted label");
            Ok(Json(SuccessResponse::new("Label deleted successfully.")).into_response())
        }
    }
}

fn confirmation_response(required: ConfirmationRequired) -> Response {
    Json(required).into_response()
}
