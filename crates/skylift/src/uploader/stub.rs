//! Scriptable uploader used by the test suites.
//!
//! Outcomes are consumed in order; once the script is exhausted every
//! further upload succeeds. Each call is recorded so tests can assert
//! on what was attempted.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{BlobUploader, ProbeStatus, UploadError};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Ok,
    Transient(String),
    Permanent(String),
}

/// A recorded upload attempt.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub local_path: PathBuf,
    pub container: String,
    pub object_name: String,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct ScriptedUploader {
    script: Mutex<VecDeque<UploadOutcome>>,
    recorded: Mutex<Vec<RecordedUpload>>,
}

impl ScriptedUploader {
    /// An uploader that always succeeds.
    pub fn always_ok() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = UploadOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Upload attempts seen so far, in order.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }
}

impl BlobUploader for ScriptedUploader {
    fn upload(
        &self,
        local_path: &Path,
        container: &str,
        object_name: &str,
        content_type: Option<&str>,
    ) -> Result<(), UploadError> {
        self.recorded.lock().unwrap().push(RecordedUpload {
            local_path: local_path.to_path_buf(),
            container: container.to_string(),
            object_name: object_name.to_string(),
            content_type: content_type.map(|c| c.to_string()),
        });

        match self.script.lock().unwrap().pop_front() {
            None | Some(UploadOutcome::Ok) => Ok(()),
            Some(UploadOutcome::Transient(msg)) => Err(UploadError::Transient(msg)),
            Some(UploadOutcome::Permanent(msg)) => Err(UploadError::Permanent(msg)),
        }
    }

    fn list_containers(&self) -> Result<Vec<String>, UploadError> {
        Ok(vec![])
    }

    fn probe(&self) -> ProbeStatus {
        ProbeStatus::Connected
    }
}
