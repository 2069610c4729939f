//! Operation dispatcher: validate, execute and clean up one request.
//!
//! Each request moves through `Received → Validated → Executing →
//! {Completed | Failed}`. The request's [`RequestScope`] is owned by the
//! dispatch future, so every artifact (uploaded or derived) is purged on
//! every exit path: success, error, timeout, a failed write to the caller,
//! or the caller dropping the future mid-way.
//!
//! Local transforms run on the blocking pool under `local_timeout_secs`;
//! delegated conversions run on the runtime under `remote_timeout_secs`.

use crate::config::PipelineConfig;
use crate::envelope::{OperationOutput, OutputFile, ResultEnvelope, SplitManifest};
use crate::error::TransformError;
use crate::operation::{InputKind, MediaType, Operation, Params};
use crate::ops::{self, compress::CompressionReport, images::ImageSource, SplitPage};
use crate::progress::{DispatchObserver, DispatchState, NoopObserver, ObserverHandle};
use crate::remote::{RemoteAdapter, RemoteSource, RemoteTool};
use crate::store::{Artifact, DocumentStore, RequestScope};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message returned for features this deployment does not implement.
pub const NOT_AVAILABLE: &str = "This feature is not yet available on the server.";

// ── Request ──────────────────────────────────────────────────────────────

/// One uploaded input.
#[derive(Debug, Clone)]
pub enum Upload {
    /// Bytes received from a client with their declared MIME type.
    Bytes {
        name: String,
        mime: String,
        bytes: Vec<u8>,
    },
    /// A local file; the media type is taken from its extension.
    Path(PathBuf),
}

/// An operation selector, its raw parameters and its uploads.
#[derive(Debug, Clone, Default)]
pub struct OperationRequest {
    pub operation: String,
    pub params: Params,
    pub uploads: Vec<Upload>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn upload(
        mut self,
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.uploads.push(Upload::Bytes {
            name: name.into(),
            mime: mime.into(),
            bytes,
        });
        self
    }

    pub fn upload_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uploads.push(Upload::Path(path.into()));
        self
    }
}

/// Summary of a response streamed by [`Dispatcher::deliver`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub content_type: &'static str,
    /// Suggested filename: the document name, or the split archive name.
    pub file_name: String,
    pub bytes_written: u64,
    pub report: Option<CompressionReport>,
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Runs [`OperationRequest`]s. Cheap to clone; clones share the staging
/// root, the remote adapter and the observer.
#[derive(Clone)]
pub struct Dispatcher {
    store: DocumentStore,
    remote: RemoteAdapter,
    local_timeout: Duration,
    remote_timeout: Duration,
    observer: ObserverHandle,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("staging_root", &self.store.root())
            .field("remote", &self.remote)
            .field("local_timeout", &self.local_timeout)
            .field("remote_timeout", &self.remote_timeout)
            .finish()
    }
}

impl Dispatcher {
    /// Open the staging root and build the remote adapter from `config`.
    pub fn new(config: &PipelineConfig) -> Result<Self, TransformError> {
        let remote_timeout = Duration::from_secs(config.remote_timeout_secs);
        Ok(Self {
            store: DocumentStore::from_config(config)?,
            remote: RemoteAdapter::from_config(config.remote.as_ref(), remote_timeout)?,
            local_timeout: Duration::from_secs(config.local_timeout_secs),
            remote_timeout,
            observer: Arc::new(NoopObserver),
        })
    }

    /// Replace the remote adapter (tests inject a mock client here).
    pub fn with_remote(mut self, remote: RemoteAdapter) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Run `request` and return its output in memory.
    pub async fn dispatch(&self, request: OperationRequest) -> Result<OperationOutput, TransformError> {
        let mut scope = self.store.scope()?;
        let mut tracker = Tracker::new(scope.id(), &request.operation, self.observer.clone());

        let result = self.execute(&mut scope, request, &mut tracker).await;
        let output_bytes = result.as_ref().map(OperationOutput::total_bytes).unwrap_or(0);
        tracker.finish(&result, output_bytes);
        scope.close();
        result
    }

    /// Run `request` and fold the outcome into a [`ResultEnvelope`].
    pub async fn dispatch_envelope(&self, request: OperationRequest) -> ResultEnvelope {
        ResultEnvelope::from_result(self.dispatch(request).await)
    }

    /// Run `request` and stream the result into `writer`: the document
    /// bytes, or for a split a ZIP holding the manifest and every page.
    ///
    /// A failed write counts as a failed request; the staging area is
    /// purged either way.
    pub async fn deliver<W>(
        &self,
        request: OperationRequest,
        writer: &mut W,
    ) -> Result<Delivery, TransformError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut scope = self.store.scope()?;
        let mut tracker = Tracker::new(scope.id(), &request.operation, self.observer.clone());

        let result = match self.execute(&mut scope, request, &mut tracker).await {
            Ok(output) => stream_output(&mut scope, output, writer).await,
            Err(e) => Err(e),
        };
        let written = result.as_ref().map(|d| d.bytes_written as usize).unwrap_or(0);
        tracker.finish(&result, written);
        scope.close();
        result
    }

    async fn execute(
        &self,
        scope: &mut RequestScope,
        request: OperationRequest,
        tracker: &mut Tracker,
    ) -> Result<OperationOutput, TransformError> {
        tracker.advance(DispatchState::Received);

        for upload in request.uploads {
            match upload {
                Upload::Bytes { name, mime, bytes } => {
                    let media_type = MediaType::from_mime(&mime)?;
                    scope.stage(&bytes, &name, media_type).await?;
                }
                Upload::Path(path) => {
                    scope.stage_file(&path).await?;
                }
            }
        }

        let operation = Operation::parse(&request.operation, &request.params)?;
        tracker.operation = operation.name().to_string();
        if let Operation::Unsupported(feature) = &operation {
            return Err(TransformError::capability(feature.name(), NOT_AVAILABLE));
        }
        let staged: Vec<Artifact> = scope.artifacts().to_vec();
        check_inputs(&operation, &staged)?;
        if operation.is_remote() {
            self.remote.ensure_configured()?;
        }
        tracker.advance(DispatchState::Validated);

        let inputs = read_inputs(scope, &staged).await?;
        tracker.advance(DispatchState::Executing);

        if operation.is_remote() {
            self.run_remote(&operation, inputs).await
        } else {
            self.run_local(scope, operation, inputs).await
        }
    }

    async fn run_local(
        &self,
        scope: &mut RequestScope,
        operation: Operation,
        inputs: Vec<StagedInput>,
    ) -> Result<OperationOutput, TransformError> {
        let name = operation.name();
        let secs = self.local_timeout.as_secs();

        // Reserve the output name up front; the blocking task never sees the scope.
        let output_path = match &operation {
            Operation::Split => None,
            Operation::ImageCompress(_) => {
                let stem = inputs.first().map(|i| file_stem(&i.name)).unwrap_or_default();
                Some(scope.allocate_output(&format!("compressed-{stem}"), MediaType::Jpeg.extension()))
            }
            other => Some(scope.allocate_output(other.output_prefix(), "pdf")),
        };

        let job = tokio::task::spawn_blocking(move || run_transform(&operation, &inputs));
        let produced = tokio::time::timeout(self.local_timeout, job)
            .await
            .map_err(|_| TransformError::Timeout {
                operation: name.to_string(),
                secs,
            })?
            .map_err(|e| TransformError::Internal(format!("{name} task panicked: {e}")))??;

        match (produced, output_path) {
            (Produced::Pages(pages), _) => Ok(split_output(scope.id(), pages)),
            (Produced::Document { bytes, media_type, report }, Some(path)) => {
                Ok(OperationOutput::Document {
                    file: OutputFile {
                        name: path_file_name(&path),
                        media_type,
                        bytes,
                    },
                    report,
                })
            }
            (Produced::Document { .. }, None) => Err(TransformError::Internal(format!(
                "{name} produced a document without an output slot"
            ))),
        }
    }

    async fn run_remote(
        &self,
        operation: &Operation,
        inputs: Vec<StagedInput>,
    ) -> Result<OperationOutput, TransformError> {
        let mut options = Map::new();
        let (tool, source) = match operation {
            Operation::HtmlToPdf(p) => (RemoteTool::HtmlToPdf, RemoteSource::Url(p.url.clone())),
            Operation::PdfA(p) => {
                options.insert("conformance".into(), Value::String(p.conformance.clone()));
                (RemoteTool::PdfA, first_file(inputs)?)
            }
            Operation::Repair => (RemoteTool::Repair, first_file(inputs)?),
            Operation::OfficeToPdf => (RemoteTool::OfficeToPdf, first_file(inputs)?),
            other => {
                return Err(TransformError::Internal(format!(
                    "{} is not a remote operation",
                    other.name()
                )))
            }
        };

        let bytes = tokio::time::timeout(self.remote_timeout, self.remote.run(tool, source, options))
            .await
            .map_err(|_| TransformError::Timeout {
                operation: operation.name().to_string(),
                secs: self.remote_timeout.as_secs(),
            })??;

        Ok(OperationOutput::document(OutputFile::pdf(
            format!("{}.pdf", operation.output_prefix()),
            bytes,
        )))
    }
}

// ── Lifecycle tracking ───────────────────────────────────────────────────

struct Tracker {
    id: Uuid,
    operation: String,
    state: DispatchState,
    started: Instant,
    observer: ObserverHandle,
}

impl Tracker {
    fn new(id: Uuid, operation: &str, observer: ObserverHandle) -> Self {
        Self {
            id,
            operation: operation.trim().to_string(),
            state: DispatchState::Received,
            started: Instant::now(),
            observer,
        }
    }

    fn advance(&mut self, next: DispatchState) {
        debug!(request_id = %self.id, operation = %self.operation, from = %self.state, to = %next, "Dispatch transition");
        self.state = next;
        self.observer.on_state(self.id, &self.operation, next);
    }

    fn finish<T>(&mut self, result: &Result<T, TransformError>, output_bytes: usize) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match result {
            Ok(_) => {
                self.advance(DispatchState::Completed);
                info!(
                    request_id = %self.id,
                    operation = %self.operation,
                    output_bytes,
                    elapsed_ms,
                    "Request completed"
                );
                self.observer.on_complete(self.id, &self.operation, output_bytes);
            }
            Err(e) => {
                let failed_in = self.state;
                self.advance(DispatchState::Failed);
                if e.is_client_error() {
                    warn!(request_id = %self.id, operation = %self.operation, state = %failed_in, error = %e, "Request rejected");
                } else {
                    error!(request_id = %self.id, operation = %self.operation, state = %failed_in, error = %e, "Request failed");
                }
                self.observer.on_error(self.id, &self.operation, e);
            }
        }
    }
}

// ── Validation and execution ─────────────────────────────────────────────

struct StagedInput {
    name: String,
    media_type: MediaType,
    bytes: Vec<u8>,
}

enum Produced {
    Document {
        bytes: Vec<u8>,
        media_type: MediaType,
        report: Option<CompressionReport>,
    },
    Pages(Vec<SplitPage>),
}

impl Produced {
    fn pdf(bytes: Vec<u8>) -> Self {
        Produced::Document {
            bytes,
            media_type: MediaType::Pdf,
            report: None,
        }
    }
}

fn check_inputs(operation: &Operation, staged: &[Artifact]) -> Result<(), TransformError> {
    let rule = operation.input_rule();
    if staged.len() < rule.min {
        return Err(TransformError::validation(rule.missing_message));
    }
    if staged.len() > rule.max {
        return Err(TransformError::validation(if rule.max == 0 {
            format!("{} does not take file uploads", operation.name())
        } else {
            format!(
                "Too many files: {} accepts at most {}",
                operation.name(),
                rule.max
            )
        }));
    }

    for artifact in staged {
        let Some(media_type) = artifact.media_type else {
            continue;
        };
        let accepted = match rule.accepts {
            InputKind::Pdf => media_type.is_pdf(),
            InputKind::Image => media_type.is_image(),
            InputKind::Any | InputKind::None => true,
        };
        if !accepted {
            let expected = if rule.accepts == InputKind::Pdf {
                "a PDF"
            } else {
                "an image"
            };
            return Err(TransformError::validation(format!(
                "'{}' is not {expected} ({media_type})",
                artifact.name
            )));
        }
    }
    Ok(())
}

async fn read_inputs(
    scope: &RequestScope,
    staged: &[Artifact],
) -> Result<Vec<StagedInput>, TransformError> {
    let reads = staged.iter().map(|artifact| async move {
        let bytes = scope.read(artifact).await?;
        Ok::<_, TransformError>(StagedInput {
            name: artifact.name.clone(),
            media_type: artifact.media_type.unwrap_or(MediaType::Pdf),
            bytes,
        })
    });
    futures::future::try_join_all(reads).await
}

/// Dispatch a validated local operation to its transform.
fn run_transform(operation: &Operation, inputs: &[StagedInput]) -> Result<Produced, TransformError> {
    let first = || {
        inputs
            .first()
            .map(|i| i.bytes.as_slice())
            .ok_or_else(|| TransformError::validation("No file uploaded"))
    };

    let produced = match operation {
        Operation::Merge => {
            let docs: Vec<Vec<u8>> = inputs.iter().map(|i| i.bytes.clone()).collect();
            Produced::pdf(ops::merge(&docs)?)
        }
        Operation::Split => Produced::Pages(ops::split(first()?)?),
        Operation::Rotate(p) => Produced::pdf(ops::rotate(first()?, p)?),
        Operation::Compress(p) => {
            let (bytes, report) = ops::compress(first()?, p)?;
            Produced::Document {
                bytes,
                media_type: MediaType::Pdf,
                report: Some(report),
            }
        }
        Operation::Protect(p) => Produced::pdf(ops::protect(first()?, p)?),
        Operation::Unlock(p) => Produced::pdf(ops::unlock(first()?, p)?),
        Operation::Watermark(p) => Produced::pdf(ops::watermark(first()?, p)?),
        Operation::PageNumbers => Produced::pdf(ops::add_page_numbers(first()?)?),
        Operation::Organize(p) => Produced::pdf(ops::organize(first()?, p)?),
        Operation::ImageToPdf => {
            let sources: Vec<ImageSource<'_>> = inputs
                .iter()
                .map(|i| ImageSource {
                    name: &i.name,
                    media_type: i.media_type,
                    bytes: &i.bytes,
                })
                .collect();
            Produced::pdf(ops::images_to_pdf(&sources)?)
        }
        Operation::ImageCompress(p) => {
            let input = inputs
                .first()
                .ok_or_else(|| TransformError::validation("No file provided"))?;
            let bytes = ops::compress_image(&input.bytes, input.media_type, p)?;
            let report = CompressionReport::new(input.bytes.len() as u64, bytes.len() as u64);
            Produced::Document {
                bytes,
                media_type: MediaType::Jpeg,
                report: Some(report),
            }
        }
        other => {
            return Err(TransformError::Internal(format!(
                "{} has no local transform",
                other.name()
            )))
        }
    };
    Ok(produced)
}

fn first_file(inputs: Vec<StagedInput>) -> Result<RemoteSource, TransformError> {
    inputs
        .into_iter()
        .next()
        .map(|i| RemoteSource::File {
            name: i.name,
            bytes: i.bytes,
        })
        .ok_or_else(|| TransformError::validation("No file uploaded"))
}

fn split_output(request_id: Uuid, pages: Vec<SplitPage>) -> OperationOutput {
    let files: Vec<OutputFile> = pages
        .into_iter()
        .map(|p| OutputFile::pdf(p.name, p.bytes))
        .collect();
    OperationOutput::Split {
        manifest: SplitManifest {
            message: "PDF Split successfully".to_string(),
            files: files.iter().map(|f| f.name.clone()).collect(),
            base_path: format!("split-{request_id}"),
        },
        files,
    }
}

// ── Response streaming ───────────────────────────────────────────────────

async fn stream_output<W>(
    scope: &mut RequestScope,
    output: OperationOutput,
    writer: &mut W,
) -> Result<Delivery, TransformError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let (bytes, ext, content_type, file_name, report) = match output {
        OperationOutput::Document { file, report } => {
            let content_type = file.content_type();
            let ext = file.media_type.extension();
            (file.bytes, ext, content_type, file.name, report)
        }
        OperationOutput::Split { manifest, files } => {
            let archive = manifest.archive(&files)?;
            (archive, "zip", "application/zip", manifest.archive_name(), None)
        }
    };

    let path = scope.allocate_output("response", ext);
    let storage = |source| TransformError::Storage {
        path: path.clone(),
        source,
    };
    tokio::fs::write(&path, &bytes).await.map_err(storage)?;
    let mut staged = tokio::fs::File::open(&path).await.map_err(storage)?;
    let bytes_written = tokio::io::copy(&mut staged, writer).await.map_err(storage)?;
    writer.flush().await.map_err(storage)?;
    Ok(Delivery {
        content_type,
        file_name,
        bytes_written,
        report,
    })
}

fn path_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string())
}
