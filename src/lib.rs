//! # edgequake-pdftools
//!
//! Ephemeral PDF transformation pipeline: merge, split, rotate, compress,
//! protect/unlock, watermark, page numbers, page reordering, image-to-PDF
//! and image compression run locally; office-to-PDF, repair, URL-to-PDF and
//! PDF/A are delegated to a task-based conversion service.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request (operation name, params, uploads)
//!  │
//!  ├─ 1. Stage     uploads written to a per-request directory (MIME + size checks)
//!  ├─ 2. Validate  name + params parsed into a typed Operation, inputs checked
//!  ├─ 3. Execute   local transform on the blocking pool, or remote task
//!  ├─ 4. Respond   document / split archive / JSON error envelope
//!  └─ 5. Purge     every artifact of the request deleted, whatever happened
//! ```
//!
//! No document outlives its request: the staging directory is owned by the
//! dispatch future and removed on success, failure, timeout and cancellation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdftools::{Dispatcher, OperationRequest, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(&PipelineConfig::default())?;
//!     let request = OperationRequest::new("merge")
//!         .upload_path("a.pdf")
//!         .upload_path("b.pdf");
//!     let output = dispatcher.dispatch(request).await?;
//!     eprintln!("{} bytes", output.total_bytes());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdftools` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdftools = { version = "0.1", default-features = false }
//! ```
//!
//! ## Remote conversions
//!
//! Delegated operations need iLovePDF project keys, read by
//! [`RemoteConfig::from_env`] from `ILOVEPDF_PUBLIC_KEY` /
//! `ILOVEPDF_SECRET_KEY`. Without them those operations fail with a
//! configuration error before anything is sent.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod operation;
pub mod ops;
pub mod progress;
pub mod remote;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, RemoteConfig};
pub use dispatcher::{Delivery, Dispatcher, OperationRequest, Upload};
pub use envelope::{ErrorBody, OperationOutput, OutputFile, ResultEnvelope, SplitManifest};
pub use error::TransformError;
pub use operation::{CompressionLevel, MediaType, Operation, Params};
pub use ops::compress::CompressionReport;
pub use progress::{DispatchObserver, DispatchState, NoopObserver, ObserverHandle};
pub use remote::{RemoteAdapter, RemoteTaskClient, RemoteTool};
pub use store::{Artifact, DocumentStore, RequestScope};
