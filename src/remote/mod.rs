//! Remote delegation: conversions run by a third-party task service.
//!
//! The [`RemoteAdapter`] drives one task per request through
//! `Created → Started → FileAttached → Processing → Downloaded` (or
//! `Failed`) and exposes the same bytes-in / bytes-out contract as the local
//! operations. Credentials are checked before anything is read or sent, and
//! every transport or service error is re-raised as
//! [`TransformError::RemoteProcessing`] with the upstream message kept.

pub mod client;

pub use client::{AttachedFile, ClientError, IlovepdfClient, RemoteTaskClient, TaskSession};

use crate::config::RemoteConfig;
use crate::error::TransformError;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tools offered by the conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteTool {
    OfficeToPdf,
    Repair,
    HtmlToPdf,
    PdfA,
}

impl RemoteTool {
    /// Tool identifier on the service.
    pub fn name(self) -> &'static str {
        match self {
            RemoteTool::OfficeToPdf => "officepdf",
            RemoteTool::Repair => "repair",
            RemoteTool::HtmlToPdf => "htmlpdf",
            RemoteTool::PdfA => "pdfa",
        }
    }
}

impl fmt::Display for RemoteTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the task operates on.
#[derive(Debug, Clone)]
pub enum RemoteSource {
    File { name: String, bytes: Vec<u8> },
    Url(String),
}

/// Lifecycle of one delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTaskState {
    Created,
    Started,
    FileAttached,
    Processing,
    Downloaded,
    Failed,
}

/// Tracks the state of a single task for logging.
#[derive(Debug)]
struct RemoteTask {
    tool: RemoteTool,
    state: RemoteTaskState,
}

impl RemoteTask {
    fn new(tool: RemoteTool) -> Self {
        Self {
            tool,
            state: RemoteTaskState::Created,
        }
    }

    fn advance(&mut self, next: RemoteTaskState) {
        debug!(tool = %self.tool, from = ?self.state, to = ?next, "Remote task transition");
        self.state = next;
    }
}

/// Runs delegated conversions through an injected [`RemoteTaskClient`].
#[derive(Clone)]
pub struct RemoteAdapter {
    client: Option<Arc<dyn RemoteTaskClient>>,
}

impl fmt::Debug for RemoteAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl RemoteAdapter {
    pub fn new(client: Arc<dyn RemoteTaskClient>) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// An adapter without credentials; every call fails with a
    /// configuration error.
    pub fn unconfigured() -> Self {
        Self { client: None }
    }

    /// Build the production client from `config`, or an unconfigured adapter
    /// when no usable credentials are present.
    pub fn from_config(
        config: Option<&RemoteConfig>,
        timeout: Duration,
    ) -> Result<Self, TransformError> {
        match config.filter(|c| c.is_complete()) {
            Some(config) => {
                let client = IlovepdfClient::new(config.clone(), timeout)
                    .map_err(|e| TransformError::Internal(format!("HTTP client: {e}")))?;
                Ok(Self::new(Arc::new(client)))
            }
            None => Ok(Self::unconfigured()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Fail fast when no credentials were supplied.
    pub fn ensure_configured(&self) -> Result<&Arc<dyn RemoteTaskClient>, TransformError> {
        self.client.as_ref().ok_or_else(|| TransformError::Configuration {
            hint: "API keys are not configured; set ILOVEPDF_PUBLIC_KEY and ILOVEPDF_SECRET_KEY"
                .to_string(),
        })
    }

    /// Run `tool` on `source` and return the converted bytes.
    pub async fn run(
        &self,
        tool: RemoteTool,
        source: RemoteSource,
        options: Map<String, Value>,
    ) -> Result<Vec<u8>, TransformError> {
        let client = self.ensure_configured()?;
        let mut task = RemoteTask::new(tool);

        match Self::drive(client.as_ref(), &mut task, source, &options).await {
            Ok(bytes) => {
                info!(tool = %tool, bytes = bytes.len(), "Remote conversion complete");
                Ok(bytes)
            }
            Err(e) => {
                let failed_in = task.state;
                task.advance(RemoteTaskState::Failed);
                warn!(tool = %tool, state = ?failed_in, error = %e, "Remote conversion failed");
                Err(TransformError::RemoteProcessing {
                    tool: tool.name().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn drive(
        client: &dyn RemoteTaskClient,
        task: &mut RemoteTask,
        source: RemoteSource,
        options: &Map<String, Value>,
    ) -> Result<Vec<u8>, ClientError> {
        let token = client.authenticate().await?;
        let session = client.start(&token, task.tool).await?;
        task.advance(RemoteTaskState::Started);

        let attached = match source {
            RemoteSource::File { name, bytes } => client.upload(&session, &name, bytes).await?,
            RemoteSource::Url(url) => client.attach_url(&session, &url).await?,
        };
        task.advance(RemoteTaskState::FileAttached);

        client
            .process(&session, task.tool, std::slice::from_ref(&attached), options)
            .await?;
        task.advance(RemoteTaskState::Processing);

        let bytes = client.download(&session).await?;
        task.advance(RemoteTaskState::Downloaded);
        Ok(bytes)
    }
}
