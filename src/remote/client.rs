//! Transport for the task-based conversion service.
//!
//! [`RemoteTaskClient`] is the seam: the adapter only ever talks to this
//! trait, so tests drive the whole delegation flow with an in-memory mock.
//! [`IlovepdfClient`] is the production implementation over the iLovePDF
//! REST API.

use super::RemoteTool;
use crate::config::RemoteConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by a [`RemoteTaskClient`]. The adapter folds all of them
/// into a single remote-processing failure.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// A started task on a specific processing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSession {
    pub token: String,
    pub server: String,
    pub task: String,
}

/// A file accepted by the processing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub server_filename: String,
    pub filename: String,
}

/// One call per protocol step. Every step is terminal on failure; the
/// adapter never retries.
#[async_trait]
pub trait RemoteTaskClient: Send + Sync {
    /// Exchange the project key for a bearer token.
    async fn authenticate(&self) -> Result<String, ClientError>;

    /// Start a task for `tool`; the reply names the server that owns it.
    async fn start(&self, token: &str, tool: RemoteTool) -> Result<TaskSession, ClientError>;

    /// Upload file bytes to the task.
    async fn upload(
        &self,
        session: &TaskSession,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<AttachedFile, ClientError>;

    /// Attach a remote resource by URL instead of uploading bytes.
    async fn attach_url(&self, session: &TaskSession, url: &str)
        -> Result<AttachedFile, ClientError>;

    /// Run the tool over the attached files.
    async fn process(
        &self,
        session: &TaskSession,
        tool: RemoteTool,
        files: &[AttachedFile],
        options: &Map<String, Value>,
    ) -> Result<(), ClientError>;

    /// Fetch the result bytes.
    async fn download(&self, session: &TaskSession) -> Result<Vec<u8>, ClientError>;
}

// ── iLovePDF ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Deserialize)]
struct StartResponse {
    server: String,
    task: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    server_filename: String,
}

/// `reqwest` client for the iLovePDF v1 API.
pub struct IlovepdfClient {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl IlovepdfClient {
    pub fn new(config: RemoteConfig, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edgequake-pdftools/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    /// Task calls go to the server named by `start`. A non-default base URL
    /// (a local stand-in) receives every call itself.
    fn server_url(&self, session: &TaskSession, path: &str) -> String {
        if self.config.base_url != crate::config::DEFAULT_REMOTE_BASE_URL {
            return format!("{}{}", self.config.base_url, path);
        }
        if session.server.starts_with("http://") || session.server.starts_with("https://") {
            format!("{}{}", session.server.trim_end_matches('/'), path)
        } else {
            format!("https://{}{}", session.server, path)
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            message: upstream_message(&body),
        })
    }

    async fn attach(
        &self,
        session: &TaskSession,
        form: Form,
        filename: &str,
    ) -> Result<AttachedFile, ClientError> {
        let response = self
            .http
            .post(self.server_url(session, "/v1/upload"))
            .bearer_auth(&session.token)
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = Self::check(response).await?.json().await?;
        Ok(AttachedFile {
            server_filename: body.server_filename,
            filename: filename.to_string(),
        })
    }
}

#[async_trait]
impl RemoteTaskClient for IlovepdfClient {
    async fn authenticate(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/v1/auth", self.config.base_url))
            .json(&json!({ "public_key": self.config.public_key }))
            .send()
            .await?;
        let body: AuthResponse = Self::check(response).await?.json().await?;
        Ok(body.token)
    }

    async fn start(&self, token: &str, tool: RemoteTool) -> Result<TaskSession, ClientError> {
        let response = self
            .http
            .get(format!("{}/v1/start/{}", self.config.base_url, tool.name()))
            .bearer_auth(token)
            .send()
            .await?;
        let body: StartResponse = Self::check(response).await?.json().await?;
        debug!(tool = tool.name(), server = %body.server, "Remote task started");
        Ok(TaskSession {
            token: token.to_string(),
            server: body.server,
            task: body.task,
        })
    }

    async fn upload(
        &self,
        session: &TaskSession,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<AttachedFile, ClientError> {
        let form = Form::new()
            .text("task", session.task.clone())
            .part("file", Part::bytes(bytes).file_name(filename.to_string()));
        self.attach(session, form, filename).await
    }

    async fn attach_url(
        &self,
        session: &TaskSession,
        url: &str,
    ) -> Result<AttachedFile, ClientError> {
        let form = Form::new()
            .text("task", session.task.clone())
            .text("cloud_file", url.to_string());
        self.attach(session, form, url).await
    }

    async fn process(
        &self,
        session: &TaskSession,
        tool: RemoteTool,
        files: &[AttachedFile],
        options: &Map<String, Value>,
    ) -> Result<(), ClientError> {
        let mut body = options.clone();
        body.insert("task".into(), Value::String(session.task.clone()));
        body.insert("tool".into(), Value::String(tool.name().to_string()));
        body.insert(
            "files".into(),
            Value::Array(
                files
                    .iter()
                    .map(|f| json!({ "server_filename": f.server_filename, "filename": f.filename }))
                    .collect(),
            ),
        );
        let response = self
            .http
            .post(self.server_url(session, "/v1/process"))
            .bearer_auth(&session.token)
            .json(&Value::Object(body))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn download(&self, session: &TaskSession) -> Result<Vec<u8>, ClientError> {
        let response = self
            .http
            .get(self.server_url(session, &format!("/v1/download/{}", session.task)))
            .bearer_auth(&session.token)
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ClientError::Decode("empty download".into()));
        }
        Ok(bytes.to_vec())
    }
}

/// Pull the human-readable message out of an error body. The service
/// answers either `{"error": {"message": …}}` or `{"message": …}`.
fn upstream_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let nested = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str);
        if let Some(msg) = nested.or_else(|| value.get("message").and_then(Value::as_str)) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nested_error_message() {
        let body = r#"{"error":{"type":"ProcessingError","message":"Quota exceeded","code":"666"}}"#;
        assert_eq!(upstream_message(body), "Quota exceeded");
    }

    #[test]
    fn extracts_flat_error_message() {
        assert_eq!(
            upstream_message(r#"{"name":"Unauthorized","message":"Invalid token"}"#),
            "Invalid token"
        );
    }

    #[test]
    fn falls_back_to_raw_body() {
        assert_eq!(upstream_message("  Bad Gateway "), "Bad Gateway");
        assert_eq!(upstream_message(""), "no response body");
    }

    #[test]
    fn api_error_display_keeps_message() {
        let e = ClientError::Api {
            status: 401,
            message: "Invalid token".into(),
        };
        assert_eq!(e.to_string(), "Invalid token (HTTP 401)");
    }

    fn session(server: &str) -> TaskSession {
        TaskSession {
            token: "t".into(),
            server: server.into(),
            task: "abc".into(),
        }
    }

    #[test]
    fn task_calls_target_assigned_server() {
        let client =
            IlovepdfClient::new(RemoteConfig::new("pk", "sk"), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.server_url(&session("api11.ilovepdf.com"), "/v1/process"),
            "https://api11.ilovepdf.com/v1/process"
        );
    }

    #[test]
    fn custom_base_url_receives_task_calls() {
        let config = RemoteConfig::new("pk", "sk").with_base_url("http://127.0.0.1:9000/");
        let client = IlovepdfClient::new(config, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.server_url(&session("api11.ilovepdf.com"), "/v1/download/abc"),
            "http://127.0.0.1:9000/v1/download/abc"
        );
    }
}
