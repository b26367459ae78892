use std::time::Duration;

use abi::{
    API_KEY_HEADER, ErrorResponse, NOTIFICATIONS_ROUTE, OPTIONS_ROUTE, SearchCriteria,
    SearchResult, TASKS_ROUTE, TaskRunRequest, ThumbnailNotification, ThumbnailOption,
    ThumbnailTask,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Remote task/option operations the editor depends on.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// `Ok(None)` when the server does not know `id`.
    async fn get_task(&self, id: &str) -> Result<Option<ThumbnailTask>, ApiError>;
    /// Upserts through the create verb and returns the stored record.
    async fn create_task(&self, task: &ThumbnailTask) -> Result<ThumbnailTask, ApiError>;
    async fn update_task(&self, task: &ThumbnailTask) -> Result<(), ApiError>;
    async fn delete_tasks(&self, ids: &[String]) -> Result<(), ApiError>;
    async fn search_tasks(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<SearchResult<ThumbnailTask>, ApiError>;
    async fn run_tasks(&self, request: &TaskRunRequest) -> Result<ThumbnailNotification, ApiError>;
    async fn get_notification(&self, id: &str) -> Result<ThumbnailNotification, ApiError>;
    async fn search_options(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<SearchResult<ThumbnailOption>, ApiError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiError {
    /// The server answered with a non-success status.
    Status { status: u16, message: String },
    /// No response was received.
    Transport(String),
    /// A response arrived but its body did not decode.
    Decode(String),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(_) | ApiError::Decode(_) => None,
        }
    }

    /// Text shown to the operator by the host shell.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { status, .. } => format!("Error {status}"),
            ApiError::Transport(message) | ApiError::Decode(message) => {
                format!("Error: {message}")
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Status { status, message } if message.is_empty() => {
                write!(f, "server responded with status {status}")
            }
            ApiError::Status { status, message } => {
                write!(f, "server responded with status {status}: {message}")
            }
            ApiError::Transport(message) => write!(f, "request failed: {message}"),
            ApiError::Decode(message) => write!(f, "failed to decode response: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// [`TaskApi`] over the thumbnail REST surface.
#[derive(Clone, Debug)]
pub struct HttpTaskApi {
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl HttpTaskApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            api_key: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .timeout(self.request_timeout);
        match self.api_key.as_deref() {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let response = send(self.request(Method::GET, &url)).await?;
        decode(response).await
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let response = send(self.request(Method::POST, &url).json(body)).await?;
        decode(response).await
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn get_task(&self, id: &str) -> Result<Option<ThumbnailTask>, ApiError> {
        self.get_json(&format!("{TASKS_ROUTE}/{}", encode_segment(id)))
            .await
    }

    async fn create_task(&self, task: &ThumbnailTask) -> Result<ThumbnailTask, ApiError> {
        self.post_json(TASKS_ROUTE, task).await
    }

    async fn update_task(&self, task: &ThumbnailTask) -> Result<(), ApiError> {
        let url = format!("{}{TASKS_ROUTE}", self.base_url);
        send(self.request(Method::PUT, &url).json(task)).await?;
        Ok(())
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<(), ApiError> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(ids.iter().map(|id| ("ids", id.as_str())))
            .finish();
        let url = format!("{}{TASKS_ROUTE}?{query}", self.base_url);
        send(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    async fn search_tasks(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<SearchResult<ThumbnailTask>, ApiError> {
        self.post_json(&format!("{TASKS_ROUTE}/search"), criteria)
            .await
    }

    async fn run_tasks(&self, request: &TaskRunRequest) -> Result<ThumbnailNotification, ApiError> {
        self.post_json(&format!("{TASKS_ROUTE}/run"), request).await
    }

    async fn get_notification(&self, id: &str) -> Result<ThumbnailNotification, ApiError> {
        self.get_json(&format!("{NOTIFICATIONS_ROUTE}/{}", encode_segment(id)))
            .await
    }

    async fn search_options(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<SearchResult<ThumbnailOption>, ApiError> {
        self.post_json(&format!("{OPTIONS_ROUTE}/search"), criteria)
            .await
    }
}

async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
    let response = builder
        .send()
        .await
        .map_err(|err| ApiError::Transport(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => String::new(),
    };
    debug!("api request rejected status={} message={message}", status.as_u16());
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, ApiError> {
    response
        .json::<R>()
        .await
        .map_err(|err| ApiError::Decode(err.to_string()))
}

/// Form encoding writes spaces as `+`, which a path segment keeps literally.
fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
