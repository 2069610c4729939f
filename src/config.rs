//! Configuration types for the transformation pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The remote conversion credentials live in a
//! separate [`RemoteConfig`] that is constructed once at startup and injected,
//! so tests can run the whole dispatcher without any environment set up.

use crate::error::TransformError;
use std::fmt;
use std::path::PathBuf;

/// Default per-file upload cap: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default base URL of the remote conversion API.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://api.ilovepdf.com";

/// Configuration for the dispatcher and its document store.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdftools::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .staging_dir("/tmp/pdftools")
///     .local_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.local_timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory for request staging areas. Default: `$TMPDIR/pdftools-staging`.
    ///
    /// Every request gets its own `req-<uuid>` sub-directory which is removed
    /// when the request completes.
    pub staging_dir: PathBuf,

    /// Maximum accepted size of a single uploaded file in bytes. Default: 100 MiB.
    pub max_upload_bytes: u64,

    /// Time limit for a local transform, in seconds. Default: 60.
    pub local_timeout_secs: u64,

    /// Time limit for a delegated (remote) conversion, in seconds. Default: 120.
    pub remote_timeout_secs: u64,

    /// Credentials for the remote conversion service. `None` disables delegation;
    /// delegated operations then fail with a configuration error.
    pub remote: Option<RemoteConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("pdftools-staging"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            local_timeout_secs: 60,
            remote_timeout_secs: 120,
            remote: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("staging_dir", &self.staging_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("local_timeout_secs", &self.local_timeout_secs)
            .field("remote_timeout_secs", &self.remote_timeout_secs)
            .field("remote", &self.remote)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn local_timeout_secs(mut self, secs: u64) -> Self {
        self.config.local_timeout_secs = secs.max(1);
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_secs = secs.max(1);
        self
    }

    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.config.remote = Some(remote);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, TransformError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(TransformError::validation(
                "Invalid configuration: max upload size must be > 0",
            ));
        }
        if c.staging_dir.as_os_str().is_empty() {
            return Err(TransformError::validation(
                "Invalid configuration: staging directory must not be empty",
            ));
        }
        Ok(self.config)
    }
}

/// Credentials and endpoint of the remote conversion service.
#[derive(Clone)]
pub struct RemoteConfig {
    pub public_key: String,
    pub secret_key: String,
    pub base_url: String,
}

impl RemoteConfig {
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Read credentials from `ILOVEPDF_PUBLIC_KEY` / `ILOVEPDF_SECRET_KEY`
    /// (and optionally `ILOVEPDF_BASE_URL`).
    ///
    /// Returns `None` when the public key is missing or empty.
    pub fn from_env() -> Option<Self> {
        let public_key = std::env::var("ILOVEPDF_PUBLIC_KEY").ok()?;
        if public_key.trim().is_empty() {
            return None;
        }
        let secret_key = std::env::var("ILOVEPDF_SECRET_KEY").unwrap_or_default();
        let mut cfg = Self::new(public_key, secret_key);
        if let Ok(url) = std::env::var("ILOVEPDF_BASE_URL") {
            if !url.is_empty() {
                cfg = cfg.with_base_url(url);
            }
        }
        Some(cfg)
    }

    /// True when the public key is present. The secret key is only needed
    /// for self-signed tokens, which this client does not use.
    pub fn is_complete(&self) -> bool {
        !self.public_key.trim().is_empty()
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("public_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(c.local_timeout_secs, 60);
        assert_eq!(c.remote_timeout_secs, 120);
        assert!(c.remote.is_none());
    }

    #[test]
    fn builder_clamps_timeouts() {
        let c = PipelineConfig::builder()
            .local_timeout_secs(0)
            .remote_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.local_timeout_secs, 1);
        assert_eq!(c.remote_timeout_secs, 1);
    }

    #[test]
    fn builder_rejects_zero_upload_cap() {
        let err = PipelineConfig::builder().max_upload_bytes(0).build().unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn remote_debug_redacts_keys() {
        let r = RemoteConfig::new("project_public_abc", "secret_xyz");
        let dbg = format!("{r:?}");
        assert!(!dbg.contains("project_public_abc"));
        assert!(!dbg.contains("secret_xyz"));
        assert!(dbg.contains("api.ilovepdf.com"));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let r = RemoteConfig::new("k", "s").with_base_url("http://localhost:8080/");
        assert_eq!(r.base_url, "http://localhost:8080");
    }

    #[test]
    fn empty_public_key_is_incomplete() {
        assert!(!RemoteConfig::new("  ", "s").is_complete());
        assert!(RemoteConfig::new("k", "").is_complete());
    }
}
