//! Ephemeral document store: per-request staging of uploads and outputs.
//!
//! Every request works inside its own `req-<uuid>` directory under the store
//! root. All uploaded and derived artifacts live there and are deleted when
//! the [`RequestScope`] is closed or dropped, so a panic, an early `?` return
//! or a cancelled future still leaves the root empty. Nothing staged here
//! outlives the request that created it.

use crate::config::PipelineConfig;
use crate::error::TransformError;
use crate::operation::MediaType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Uploaded,
    Derived,
}

/// A staged byte sequence, identified by its path for the request's lifetime.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    /// Name as supplied by the client (uploads) or generated (derived).
    pub name: String,
    pub media_type: Option<MediaType>,
    pub size: u64,
    pub origin: ArtifactOrigin,
}

/// Handle to the staging root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: Arc<PathBuf>,
    max_upload_bytes: u64,
}

impl DocumentStore {
    /// Open (creating if missing) a staging root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TransformError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| TransformError::Storage {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root: Arc::new(root),
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, TransformError> {
        Ok(Self::new(&config.staging_dir)?.with_max_upload_bytes(config.max_upload_bytes))
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Open a fresh request scope with its own directory.
    pub fn scope(&self) -> Result<RequestScope, TransformError> {
        let id = Uuid::new_v4();
        let dir = self.root.join(format!("req-{id}"));
        std::fs::create_dir_all(&dir).map_err(|source| TransformError::Storage {
            path: dir.clone(),
            source,
        })?;
        debug!(request_id = %id, dir = %dir.display(), "Opened request scope");
        Ok(RequestScope {
            id,
            dir,
            max_upload_bytes: self.max_upload_bytes,
            artifacts: Vec::new(),
            closed: false,
        })
    }
}

/// All artifacts of one request. Dropping the scope purges them.
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    dir: PathBuf,
    max_upload_bytes: u64,
    artifacts: Vec<Artifact>,
    closed: bool,
}

impl RequestScope {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Persist uploaded bytes under a sanitised, timestamp-prefixed name.
    pub async fn stage(
        &mut self,
        bytes: &[u8],
        suggested_name: &str,
        media_type: MediaType,
    ) -> Result<Artifact, TransformError> {
        self.check_size(bytes.len() as u64, suggested_name)?;

        let file_name = format!(
            "{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            self.artifacts.len(),
            sanitize_file_name(suggested_name)
        );
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| TransformError::Storage {
                path: path.clone(),
                source,
            })?;

        let artifact = Artifact {
            path,
            name: suggested_name.to_string(),
            media_type: Some(media_type),
            size: bytes.len() as u64,
            origin: ArtifactOrigin::Uploaded,
        };
        debug!(
            request_id = %self.id,
            name = %artifact.name,
            size = artifact.size,
            media_type = %media_type,
            "Staged upload"
        );
        self.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    /// Stage a file from the local filesystem. The media type is inferred
    /// from its extension.
    pub async fn stage_file(&mut self, path: &Path) -> Result<Artifact, TransformError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let media_type = MediaType::from_file_name(&name)?;

        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransformError::validation(format!("File not found: {}", path.display()))
            } else {
                TransformError::Storage {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        self.check_size(meta.len(), &name)?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| TransformError::Storage {
                path: path.to_path_buf(),
                source,
            })?;
        self.stage(&bytes, &name, media_type).await
    }

    /// Read an artifact's bytes back into memory.
    pub async fn read(&self, artifact: &Artifact) -> Result<Vec<u8>, TransformError> {
        tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| TransformError::Storage {
                path: artifact.path.clone(),
                source,
            })
    }

    /// Reserve a unique output path `{prefix}-{timestamp_ms}-{random8}.{ext}`.
    pub fn allocate_output(&mut self, prefix: &str, ext: &str) -> PathBuf {
        let rand = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}-{}.{}",
            prefix,
            chrono::Utc::now().timestamp_millis(),
            &rand[..8],
            ext
        );
        let path = self.dir.join(&name);
        self.artifacts.push(Artifact {
            path: path.clone(),
            media_type: MediaType::from_file_name(&name).ok(),
            name,
            size: 0,
            origin: ArtifactOrigin::Derived,
        });
        path
    }

    /// Best-effort deletion of the given paths. Never fails; returns how many
    /// files were actually removed.
    pub fn release(&mut self, handles: &[PathBuf]) -> usize {
        let mut removed = 0;
        for handle in handles {
            match std::fs::remove_file(handle) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %handle.display(), "Artifact already gone");
                }
                Err(e) => {
                    warn!(path = %handle.display(), error = %e, "Failed to remove artifact");
                }
            }
        }
        self.artifacts.retain(|a| !handles.contains(&a.path));
        removed
    }

    /// Release every artifact and remove the request directory.
    pub fn close(mut self) -> usize {
        self.purge()
    }

    fn purge(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;

        let handles: Vec<PathBuf> = self.artifacts.iter().map(|a| a.path.clone()).collect();
        let removed = self.release(&handles);
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove request directory");
            }
        }
        debug!(request_id = %self.id, removed, "Closed request scope");
        removed
    }

    fn check_size(&self, size: u64, name: &str) -> Result<(), TransformError> {
        if size > self.max_upload_bytes {
            return Err(TransformError::validation(format!(
                "File '{}' is too large: {} bytes exceeds the {} byte limit",
                name, size, self.max_upload_bytes
            )));
        }
        Ok(())
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.purge();
    }
}

/// Keep `[A-Za-z0-9._-]`, replace everything else, never return an empty or
/// dot-only name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
