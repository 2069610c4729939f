//! Result envelope: the uniform shape handed back to the boundary layer.
//!
//! A dispatch ends in exactly one of three shapes:
//! - a single document (bytes, content type, suggested filename);
//! - a split manifest plus its page files, packed into one ZIP body;
//! - a JSON error `{ "message", "error" }` with a status class.
//!
//! Telemetry such as the [`CompressionReport`] rides alongside the document
//! and is never part of the returned bytes.

use crate::error::TransformError;
use crate::operation::MediaType;
use crate::ops::compress::CompressionReport;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entry holding the JSON manifest inside a split archive.
pub const MANIFEST_ENTRY: &str = "manifest.json";

const ARCHIVE: &str = "build split archive";

/// One produced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Suggested download filename.
    pub name: String,
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

impl OutputFile {
    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: MediaType::Pdf,
            bytes,
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.media_type.mime()
    }
}

/// Listing returned for a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub message: String,
    pub files: Vec<String>,
    /// Directory of the page files inside the split archive.
    #[serde(rename = "basePath")]
    pub base_path: String,
}

impl SplitManifest {
    /// Suggested filename of the split archive.
    pub fn archive_name(&self) -> String {
        format!("{}.zip", self.base_path)
    }

    /// Pack the manifest and its page files into a ZIP: `manifest.json` at
    /// the root, every page under `basePath/`.
    pub fn archive(&self, files: &[OutputFile]) -> Result<Vec<u8>, TransformError> {
        let manifest = serde_json::to_vec_pretty(self)
            .map_err(|e| TransformError::Internal(format!("manifest encoding: {e}")))?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(MANIFEST_ENTRY, options)
            .map_err(|e| TransformError::processing(ARCHIVE, e))?;
        zip.write_all(&manifest)
            .map_err(|e| TransformError::processing(ARCHIVE, e))?;
        for file in files {
            zip.start_file(format!("{}/{}", self.base_path, file.name), options)
                .map_err(|e| TransformError::processing(ARCHIVE, e))?;
            zip.write_all(&file.bytes)
                .map_err(|e| TransformError::processing(ARCHIVE, e))?;
        }
        let cursor = zip
            .finish()
            .map_err(|e| TransformError::processing(ARCHIVE, e))?;
        Ok(cursor.into_inner())
    }
}

/// Successful result of a dispatch.
#[derive(Debug, Clone)]
pub enum OperationOutput {
    Document {
        file: OutputFile,
        report: Option<CompressionReport>,
    },
    Split {
        manifest: SplitManifest,
        files: Vec<OutputFile>,
    },
}

impl OperationOutput {
    pub fn document(file: OutputFile) -> Self {
        OperationOutput::Document { file, report: None }
    }

    /// Total bytes across all produced files.
    pub fn total_bytes(&self) -> usize {
        match self {
            OperationOutput::Document { file, .. } => file.bytes.len(),
            OperationOutput::Split { files, .. } => files.iter().map(|f| f.bytes.len()).sum(),
        }
    }

    pub fn report(&self) -> Option<&CompressionReport> {
        match self {
            OperationOutput::Document { report, .. } => report.as_ref(),
            OperationOutput::Split { .. } => None,
        }
    }
}

/// JSON body of a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    /// Stable error kind, e.g. `validation` or `remote_processing`.
    pub error: String,
}

impl From<&TransformError> for ErrorBody {
    fn from(e: &TransformError) -> Self {
        Self {
            message: e.to_string(),
            error: e.kind().to_string(),
        }
    }
}

/// What the boundary layer sends back to the client.
#[derive(Debug, Clone)]
pub enum ResultEnvelope {
    Document {
        file: OutputFile,
        report: Option<CompressionReport>,
    },
    Split {
        manifest: SplitManifest,
        files: Vec<OutputFile>,
    },
    Error {
        status: u16,
        body: ErrorBody,
    },
}

impl ResultEnvelope {
    pub fn from_result(result: Result<OperationOutput, TransformError>) -> Self {
        match result {
            Ok(OperationOutput::Document { file, report }) => ResultEnvelope::Document { file, report },
            Ok(OperationOutput::Split { manifest, files }) => {
                ResultEnvelope::Split { manifest, files }
            }
            Err(e) => ResultEnvelope::Error {
                status: e.status(),
                body: ErrorBody::from(&e),
            },
        }
    }

    /// HTTP-status-equivalent of the envelope.
    pub fn status(&self) -> u16 {
        match self {
            ResultEnvelope::Error { status, .. } => *status,
            _ => 200,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ResultEnvelope::Error { .. })
    }

    /// `Content-Type` of the response body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResultEnvelope::Document { file, .. } => file.content_type(),
            ResultEnvelope::Split { .. } => "application/zip",
            ResultEnvelope::Error { .. } => "application/json",
        }
    }

    /// Response body: the document bytes, the split archive, or the JSON error.
    pub fn body(&self) -> Result<Vec<u8>, TransformError> {
        match self {
            ResultEnvelope::Document { file, .. } => Ok(file.bytes.clone()),
            ResultEnvelope::Split { manifest, files } => manifest.archive(files),
            ResultEnvelope::Error { body, .. } => serde_json::to_vec(body)
                .map_err(|e| TransformError::Internal(format!("error body encoding: {e}"))),
        }
    }

    /// `Content-Disposition` for file responses.
    pub fn content_disposition(&self) -> Option<String> {
        match self {
            ResultEnvelope::Document { file, .. } => {
                Some(format!("attachment; filename=\"{}\"", file.name))
            }
            ResultEnvelope::Split { manifest, .. } => {
                Some(format!("attachment; filename=\"{}\"", manifest.archive_name()))
            }
            ResultEnvelope::Error { .. } => None,
        }
    }
}
