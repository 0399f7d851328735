//! Filesystem-backed blob store.
//!
//! Containers are directories under a root; objects are files inside
//! them. Serves local deployments and the test suite; the wire-level
//! cloud backend is injected by the host and implements the same trait.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{validate_name, BlobUploader, ProbeStatus, UploadError};

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn classify_io(context: &str, e: io::Error) -> UploadError {
        match e.kind() {
            // A vanished source file or denied access will not heal on retry.
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                UploadError::Permanent(format!("{context}: {e}"))
            }
            _ => UploadError::Transient(format!("{context}: {e}")),
        }
    }
}

impl BlobUploader for FsBlobStore {
    fn upload(
        &self,
        local_path: &Path,
        container: &str,
        object_name: &str,
        content_type: Option<&str>,
    ) -> Result<(), UploadError> {
        validate_name("container", container)?;
        validate_name("object", object_name)?;

        let mut source = File::open(local_path).map_err(|e| {
            Self::classify_io(&format!("open source '{}'", local_path.display()), e)
        })?;

        let container_dir = self.root.join(container);
        std::fs::create_dir_all(&container_dir).map_err(|e| {
            Self::classify_io(&format!("create container '{container}'"), e)
        })?;

        // Create-or-truncate gives overwrite semantics for replays.
        let object_path = container_dir.join(object_name);
        let mut target = File::create(&object_path).map_err(|e| {
            Self::classify_io(&format!("create object '{}'", object_path.display()), e)
        })?;

        let bytes = io::copy(&mut source, &mut target)
            .map_err(|e| Self::classify_io("stream contents", e))?;

        // No metadata surface on a plain filesystem; the hint is only
        // logged here. Wire backends send it with the object.
        debug!(
            "Stored {} -> {}/{} ({} bytes, content-type {})",
            local_path.display(),
            container,
            object_name,
            bytes,
            content_type.unwrap_or("unspecified")
        );
        Ok(())
    }

    fn list_containers(&self) -> Result<Vec<String>, UploadError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| Self::classify_io("list containers", e))?;

        let mut containers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::classify_io("list containers", e))?;
            if entry.path().is_dir() {
                containers.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        containers.sort();
        Ok(containers)
    }

    fn probe(&self) -> ProbeStatus {
        match std::fs::create_dir_all(&self.root) {
            Ok(()) => ProbeStatus::Connected,
            Err(e) => ProbeStatus::Disconnected {
                reason: format!("blob root '{}' unusable: {e}", self.root.display()),
            },
        }
    }
}
