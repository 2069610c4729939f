//! Error types for the edgequake-pdftools library.
//!
//! Every failure that can reach the boundary layer is a [`TransformError`].
//! Operations and the remote adapter catch their own library-level errors
//! (lopdf, image, reqwest, I/O) and re-raise them as one of the variants
//! below with an operation-qualified message, so the dispatcher never has to
//! inspect a foreign error type.
//!
//! Each variant maps onto an HTTP-status-equivalent class through
//! [`TransformError::status`]:
//!
//! | Variant | Status | Meaning |
//! |---------|--------|---------|
//! | `Validation` | 400 | bad or missing input, client-fixable |
//! | `Capability` | 501 | operation structurally unsupported |
//! | `Configuration` | 500 | server misconfiguration (credentials) |
//! | `RemoteProcessing` | 500 | upstream conversion service failed |
//! | `Storage` | 500 | staging-area I/O failure |
//! | `Processing` | 500 | document library failed on valid input |
//! | `Timeout` | 500 | time limit exceeded |
//! | `Internal` | 500 | bug or panicked worker |

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-pdftools library.
#[derive(Debug, Error)]
pub enum TransformError {
    // ── Client errors ─────────────────────────────────────────────────────
    /// Bad or missing input: wrong file count, malformed parameter,
    /// disallowed media type, oversize upload.
    #[error("{message}")]
    Validation { message: String },

    // ── Capability errors ─────────────────────────────────────────────────
    /// The operation is structurally unsupported by the current codec or
    /// deployment (OCR, PDF→Word, unreadable encryption handler, …).
    #[error("{feature} is not supported: {reason}")]
    Capability { feature: String, reason: String },

    // ── Server-side errors ────────────────────────────────────────────────
    /// Delegation credentials are absent. Raised before any artifact is
    /// read and before any network call is attempted.
    #[error("Remote conversion is not configured: {hint}")]
    Configuration { hint: String },

    /// The remote conversion service reported a failure.
    #[error("Remote processing failed ({tool}): {message}")]
    RemoteProcessing { tool: String, message: String },

    /// Disk I/O failed while staging or writing an artifact.
    #[error("Storage failure at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document library rejected the input or failed to serialise.
    #[error("Failed to {operation}: {detail}")]
    Processing { operation: String, detail: String },

    /// The operation exceeded its time limit.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransformError {
    /// Shorthand for a [`TransformError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`TransformError::Processing`].
    pub fn processing(operation: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Processing {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// Shorthand for a [`TransformError::Capability`].
    pub fn capability(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capability {
            feature: feature.into(),
            reason: reason.into(),
        }
    }

    /// HTTP-status-equivalent class surfaced to the boundary layer.
    pub fn status(&self) -> u16 {
        match self {
            TransformError::Validation { .. } => 400,
            TransformError::Capability { .. } => 501,
            _ => 500,
        }
    }

    /// Stable machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TransformError::Validation { .. } => "validation",
            TransformError::Capability { .. } => "capability",
            TransformError::Configuration { .. } => "configuration",
            TransformError::RemoteProcessing { .. } => "remote_processing",
            TransformError::Storage { .. } => "storage",
            TransformError::Processing { .. } => "processing",
            TransformError::Timeout { .. } => "timeout",
            TransformError::Internal(_) => "internal",
        }
    }

    /// True when the client can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        self.status() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_400() {
        let e = TransformError::validation("Please upload at least 2 PDF files");
        assert_eq!(e.status(), 400);
        assert!(e.is_client_error());
        assert_eq!(e.to_string(), "Please upload at least 2 PDF files");
    }

    #[test]
    fn capability_is_501() {
        let e = TransformError::capability("unlock", "unlock not supported by current codec");
        assert_eq!(e.status(), 501);
        assert_eq!(e.kind(), "capability");
        assert!(e.to_string().contains("unlock not supported"));
    }

    #[test]
    fn processing_message_is_operation_qualified() {
        let e = TransformError::processing("merge PDFs", "invalid xref");
        assert_eq!(e.to_string(), "Failed to merge PDFs: invalid xref");
        assert_eq!(e.status(), 500);
    }

    #[test]
    fn remote_display_keeps_upstream_message() {
        let e = TransformError::RemoteProcessing {
            tool: "officepdf".into(),
            message: "Quota exceeded".into(),
        };
        assert!(e.to_string().contains("officepdf"));
        assert!(e.to_string().contains("Quota exceeded"));
        assert!(!e.is_client_error());
    }

    #[test]
    fn timeout_display() {
        let e = TransformError::Timeout {
            operation: "compress".into(),
            secs: 60,
        };
        assert_eq!(e.to_string(), "compress timed out after 60s");
        assert_eq!(e.kind(), "timeout");
    }
}
