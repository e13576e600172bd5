use super::{
    Label, LabelModification, ListQuery, MailboxApi, MailboxError, MailboxFactory, MessagePage,
    MessageRef, MessageSummary,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Gmail REST base URL for the authorized user.
pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

const METADATA_HEADERS: [&str; 4] = ["Subject", "From", "To", "Date"];

#[derive(Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalMessage {
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Payload,
}

impl MetadataMessage {
    fn header(&self, name: &str) -> String {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for the Gmail REST API, bound to one access value.
pub struct GmailClient {
    access_value: String,
    http_client: Client,
    base_url: String,
    timeout: Duration,
}

impl GmailClient {
    /// Create a client against the public Gmail endpoint.
    pub fn new(access_value: String, timeout: Duration) -> Self {
        Self::with_base_url(Client::new(), access_value, DEFAULT_BASE_URL.to_string(), timeout)
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(
        http_client: Client,
        access_value: String,
        base_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            access_value,
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, MailboxError> {
        let response = request
            .bearer_auth(&self.access_value)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        check_response_status(response).await
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, MailboxError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| MailboxError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MailboxApi for GmailClient {
    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError> {
        let list: LabelList = self
            .fetch_json(self.http_client.get(self.url("/labels")))
            .await?;
        Ok(list.labels)
    }

    async fn message_label_ids(&self, message_id: &str) -> Result<Vec<String>, MailboxError> {
        let url = self.url(&format!("/messages/{}", urlencoding::encode(message_id)));
        let message: MinimalMessage = self
            .fetch_json(self.http_client.get(url).query(&[("format", "minimal")]))
            .await?;
        Ok(message.label_ids)
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        change: &LabelModification,
    ) -> Result<(), MailboxError> {
        let url = self.url(&format!(
            "/messages/{}/modify",
            urlencoding::encode(message_id)
        ));
        self.send(self.http_client.post(url).json(change)).await?;
        Ok(())
    }

    async fn list_messages(&self, query: &ListQuery) -> Result<MessagePage, MailboxError> {
        let list: MessageList = self
            .fetch_json(self.http_client.get(self.url("/messages")).query(query))
            .await?;
        Ok(MessagePage {
            messages: list.messages,
            next_page_token: list.next_page_token,
        })
    }

    async fn message_summary(&self, message_id: &str) -> Result<MessageSummary, MailboxError> {
        let url = self.url(&format!("/messages/{}", urlencoding::encode(message_id)));
        let mut params = vec![("format", "metadata")];
        params.extend(METADATA_HEADERS.iter().map(|h| ("metadataHeaders", *h)));

        let message: MetadataMessage = self
            .fetch_json(self.http_client.get(url).query(&params))
            .await?;

        Ok(MessageSummary {
            subject: message.header("Subject"),
            from: message.header("From"),
            to: message.header("To"),
            date: message.header("Date"),
            id: message.id,
            thread_id: message.thread_id,
            snippet: message.snippet,
        })
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<(), MailboxError> {
        let url = self.url(&format!("/drafts/{}", urlencoding::encode(draft_id)));
        self.send(self.http_client.delete(url)).await?;
        Ok(())
    }

    async fn delete_label(&self, label_id: &str) -> Result<(), MailboxError> {
        let url = self.url(&format!("/labels/{}", urlencoding::encode(label_id)));
        self.send(self.http_client.delete(url)).await?;
        Ok(())
    }
}

fn map_transport_error(e: reqwest::Error) -> MailboxError {
    if e.is_timeout() {
        MailboxError::Timeout
    } else {
        MailboxError::Transport(e.to_string())
    }
}

/// Maps non-2xx responses to [`MailboxError::Api`] with the upstream message.
async fn check_response_status(response: Response) -> Result<Response, MailboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });

    Err(MailboxError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Builds [`GmailClient`] handles that share one connection pool.
#[derive(Clone)]
pub struct GmailFactory {
    http_client: Client,
    base_url: String,
    timeout: Duration,
}

impl GmailFactory {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            base_url,
            timeout,
        }
    }
}

impl MailboxFactory for GmailFactory {
    fn connect(&self, access_value: &str) -> Arc<dyn MailboxApi> {
        Arc::new(GmailClient::with_base_url(
            self.http_client.clone(),
            access_value.to_string(),
            self.base_url.clone(),
            self.timeout,
        ))
    }
}
