//! Blob upload capability.
//!
//! The core treats cloud storage as an injected interface: stream one
//! local file to a named container/object, enumerate containers, and
//! answer a startup connectivity probe. Errors are split into transient
//! (retry with backoff) and permanent (fail the job now); the concrete
//! SDK backend is supplied by the host process.

use std::path::Path;

pub use crate::error::UploadError;

mod fs;
mod stub;

pub use fs::FsBlobStore;
pub use stub::{RecordedUpload, ScriptedUploader, UploadOutcome};

/// Startup connectivity diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Connected,
    Disconnected { reason: String },
}

/// Capability to move file contents into an object store.
pub trait BlobUploader: Send + Sync {
    /// Streams `local_path` to `container/object_name`, overwriting any
    /// prior object of the same name. Overwrite semantics make replays
    /// of the same source file idempotent. `content_type` is a hint for
    /// backends that transmit one; backends without a metadata surface
    /// may ignore it.
    fn upload(
        &self,
        local_path: &Path,
        container: &str,
        object_name: &str,
        content_type: Option<&str>,
    ) -> Result<(), UploadError>;

    /// Enumerates containers. Advisory, used by ops tooling.
    fn list_containers(&self) -> Result<Vec<String>, UploadError>;

    /// Connectivity check run once at startup for diagnostics.
    fn probe(&self) -> ProbeStatus;
}

/// Rejects names that cannot form a valid object path. Shared by
/// backends so a malformed name is always a permanent error.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<(), UploadError> {
    if name.is_empty() {
        return Err(UploadError::Permanent(format!("empty {kind} name")));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(UploadError::Permanent(format!(
            "malformed {kind} name '{name}'"
        )));
    }
    Ok(())
}
