// Integration tests for the /tools endpoints

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use mailgate::api::{create_router, ToolsAppState};
use mailgate::confirmation::ConfirmationGuard;
use mailgate::credentials::{CredentialBackend, MemoryCredentialStore, OAuthCredential};
use mailgate::gmail::{InMemoryMailbox, InMemoryMailboxFactory, Label};
use mailgate::oauth::{RefreshedToken, TokenRefresher};
use mailgate::session::SessionGuard;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const APP_HOST: &str = "https://mail.example.com";

/// Refresher that always hands out "ya29.refreshed" for `sub-1`.
#[derive(Default)]
struct StaticRefresher {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(&self, _credential: &OAuthCredential) -> Result<RefreshedToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("invalid_grant"));
        }
        Ok(RefreshedToken {
            access_value: "ya29.refreshed".to_string(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            subject_id: "sub-1".to_string(),
        })
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryCredentialStore>,
    mailbox: Arc<InMemoryMailbox>,
    factory: Arc<InMemoryMailboxFactory>,
    refresher: Arc<StaticRefresher>,
}

fn create_test_app_with(refresher: StaticRefresher) -> TestApp {
    let store = Arc::new(MemoryCredentialStore::new());
    let mailbox = Arc::new(InMemoryMailbox::new());
    mailbox.add_label(Label::user("Label_1", "Receipts"));
    mailbox.add_label(Label::system("IMPORTANT"));
    let factory = Arc::new(InMemoryMailboxFactory::new(mailbox.clone()));
    let refresher = Arc::new(refresher);

    let guard = Arc::new(SessionGuard::new(
        store.clone(),
        refresher.clone(),
        factory.clone(),
        APP_HOST,
    ));
    let state = ToolsAppState {
        confirmation: ConfirmationGuard::default(),
        metadata_concurrency: 4,
    };

    TestApp {
        router: create_router(state, guard),
        store,
        mailbox,
        factory,
        refresher,
    }
}

fn create_test_app() -> TestApp {
    create_test_app_with(StaticRefresher::default())
}

fn credential(expiry: Option<chrono::DateTime<Utc>>) -> OAuthCredential {
    OAuthCredential {
        token: Some("ya29.live".to_string()),
        refresh_token: Some("1//refresh".to_string()),
        token_uri: None,
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        scopes: vec!["https://mail.google.com/".to_string()],
        expiry,
    }
}

fn authorize(app: &TestApp) -> String {
    app.store
        .insert("sub-1", &credential(Some(Utc::now() + Duration::hours(1))))
        .unwrap()
}

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    access_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = access_key {
        builder = builder.header("x-access-token", key);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// GET /health needs no credentials.
#[tokio::test]
async fn test_health() {
    let app = create_test_app();

    let (status, body) = call(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

/// Missing header reaches the handler, which reports the login URL.
#[tokio::test]
async fn test_missing_header_is_unauthenticated() {
    let app = create_test_app();

    let (status, body) = call(&app, "GET", "/tools/labels", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("https://mail.example.com/auth/login"));
    assert_eq!(app.refresher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_access_key() {
    let app = create_test_app();

    let (status, body) = call(&app, "GET", "/tools/labels", Some("nope"), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("authenticate again"));
}

#[tokio::test]
async fn test_list_labels() {
    let app = create_test_app();
    let key = authorize(&app);

    let (status, body) = call(&app, "GET", "/tools/labels", Some(&key), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let names: Vec<&str> = body["labels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"INBOX"));
    assert!(names.contains(&"Receipts"));
    assert_eq!(app.factory.connections(), vec!["ya29.live"]);
}

#[tokio::test]
async fn test_expired_credential_refreshed_before_handler() {
    let app = create_test_app();
    let key = app
        .store
        .insert("sub-1", &credential(Some(Utc::now() - Duration::minutes(5))))
        .unwrap();

    let (status, _) = call(&app, "GET", "/tools/labels", Some(&key), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.factory.connections(), vec!["ya29.refreshed"]);

    let stored = app.store.get(&key).unwrap().unwrap();
    let stored = OAuthCredential::parse(&stored.payload).unwrap();
    assert_eq!(stored.token.as_deref(), Some("ya29.refreshed"));
    assert_eq!(stored.refresh_token.as_deref(), Some("1//refresh"));
}

#[tokio::test]
async fn test_failed_refresh_is_unauthenticated() {
    let app = create_test_app_with(StaticRefresher {
        fail: true,
        ..Default::default()
    });
    let key = app
        .store
        .insert("sub-1", &credential(Some(Utc::now() - Duration::minutes(5))))
        .unwrap();

    let (status, _) = call(&app, "GET", "/tools/labels", Some(&key), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_emails_keeps_order_and_skips_failures() {
    let app = create_test_app();
    let key = authorize(&app);
    for id in ["m1", "m2", "m3"] {
        app.mailbox.add_message(id, &["INBOX"]);
    }
    app.mailbox.fail_on("m2");

    let (status, body) = call(
        &app,
        "POST",
        "/tools/emails/list",
        Some(&key),
        Some(json!({"query": "is:unread", "max_results": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["emails"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["m1", "m3"]);
    assert_eq!(body["emails"][0]["subject"], "Subject of m1");
    assert_eq!(app.mailbox.queries()[0].query.as_deref(), Some("is:unread"));
}

#[tokio::test]
async fn test_list_emails_rejects_bad_page_size() {
    let app = create_test_app();
    let key = authorize(&app);

    let (status, _) = call(
        &app,
        "POST",
        "/tools/emails/list",
        Some(&key),
        Some(json!({"max_results": 0})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_move_emails() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_message("m1", &["TRASH", "UNREAD"]);

    let (status, body) = call(
        &app,
        "POST",
        "/tools/emails/move",
        Some(&key),
        Some(json!({"message_ids": ["m1"], "folder": "INBOX"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["count"], 1);
    assert_eq!(
        app.mailbox.labels_of("m1").unwrap(),
        vec!["UNREAD".to_string(), "INBOX".to_string()]
    );
}

#[tokio::test]
async fn test_move_to_unknown_folder() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_message("m1", &["INBOX"]);

    let (status, body) = call(
        &app,
        "POST",
        "/tools/emails/move",
        Some(&key),
        Some(json!({"message_ids": ["m1"], "folder": "NoSuchLabel"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Label 'NoSuchLabel' not found.");
    assert!(app.mailbox.modify_calls().is_empty());
}

#[tokio::test]
async fn test_move_batch_abort_reports_progress() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_message("m1", &["INBOX"]);
    app.mailbox.add_message("m2", &["INBOX"]);
    app.mailbox.fail_on("m2");

    let (status, body) = call(
        &app,
        "POST",
        "/tools/emails/move",
        Some(&key),
        Some(json!({"message_ids": ["m1", "m2"], "folder": "Receipts"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["message_id"], "m2");
    assert_eq!(body["completed"], 1);
}

#[tokio::test]
async fn test_move_requires_ids() {
    let app = create_test_app();
    let key = authorize(&app);

    let (status, _) = call(
        &app,
        "POST",
        "/tools/emails/move",
        Some(&key),
        Some(json!({"message_ids": [], "folder": "INBOX"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_archive_emails() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_message("m1", &["INBOX", "IMPORTANT"]);

    let (status, _) = call(
        &app,
        "POST",
        "/tools/emails/archive",
        Some(&key),
        Some(json!({"message_ids": ["m1"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        app.mailbox.labels_of("m1").unwrap(),
        vec!["IMPORTANT".to_string()]
    );
}

#[tokio::test]
async fn test_manage_labels() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_message("m1", &["INBOX"]);

    let (status, _) = call(
        &app,
        "POST",
        "/tools/emails/labels",
        Some(&key),
        Some(json!({"message_ids": ["m1"], "labels": ["STARRED"], "action": "add"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app
        .mailbox
        .labels_of("m1")
        .unwrap()
        .contains(&"STARRED".to_string()));

    let (status, body) = call(
        &app,
        "POST",
        "/tools/emails/labels",
        Some(&key),
        Some(json!({"message_ids": ["m1"], "labels": ["Nope"], "action": "remove"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "None of the provided label names matched existing labels."
    );
}

#[tokio::test]
async fn test_delete_draft_requires_confirmation() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_draft("draft-123");

    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft_id": "draft-123"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "confirm_deletion");
    assert!(app.mailbox.has_draft("draft-123"));

    let token = body["confirmation_token"].as_str().unwrap().to_string();
    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft_id": "draft-123", "confirmation_token": token})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(!app.mailbox.has_draft("draft-123"));
}

#[tokio::test]
async fn test_delete_draft_token_for_other_resource() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_draft("draft-123");
    app.mailbox.add_draft("draft-456");

    let (_, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft_id": "draft-123"})),
    )
    .await;
    let token = body["confirmation_token"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft_id": "draft-456", "confirmation_token": token})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["token_params"]["resource_id"], "draft-123");
    assert!(app.mailbox.has_draft("draft-456"));
}

#[tokio::test]
async fn test_delete_unknown_draft_after_confirmation() {
    let app = create_test_app();
    let key = authorize(&app);

    let (_, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft_id": "ghost"})),
    )
    .await;
    let token = body["confirmation_token"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft_id": "ghost", "confirmation_token": token})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_delete_label_with_garbage_token() {
    let app = create_test_app();
    let key = authorize(&app);

    let (status, body) = call(
        &app,
        "POST",
        "/tools/labels/delete",
        Some(&key),
        Some(json!({"label_id": "Label_1", "confirmation_token": "made up token"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid confirmation token.");
    assert!(app.mailbox.has_label("Label_1"));
}

#[tokio::test]
async fn test_delete_label_flow() {
    let app = create_test_app();
    let key = authorize(&app);

    let (_, body) = call(
        &app,
        "POST",
        "/tools/labels/delete",
        Some(&key),
        Some(json!({"label_id": "Label_1"})),
    )
    .await;
    let token = body["confirmation_token"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        "POST",
        "/tools/labels/delete",
        Some(&key),
        Some(json!({"label_id": "Label_1", "confirmation_token": token})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!app.mailbox.has_label("Label_1"));
}

/// Confirmation is never issued to an unauthenticated caller.
#[tokio::test]
async fn test_delete_requires_auth_first() {
    let app = create_test_app();

    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        None,
        Some(json!({"draft_id": "draft-123"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("confirmation_token").is_none());
}

#[tokio::test]
async fn test_incomplete_body_uses_error_shape() {
    let app = create_test_app();
    let key = authorize(&app);

    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        Some(&key),
        Some(json!({"draft": 1})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().contains("draft_id"));
}

/// A bad body does not hide the login instructions.
#[tokio::test]
async fn test_incomplete_body_without_credentials_is_unauthenticated() {
    let app = create_test_app();

    let (status, body) = call(
        &app,
        "POST",
        "/tools/drafts/delete",
        None,
        Some(json!({"draft": 1})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("https://mail.example.com/auth/login"));
}

#[tokio::test]
async fn test_missing_body_is_bad_request() {
    let app = create_test_app();
    let key = authorize(&app);
    app.mailbox.add_message("m1", &["INBOX"]);

    let (status, body) = call(&app, "POST", "/tools/emails/archive", Some(&key), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(app.mailbox.modify_calls().is_empty());
}
