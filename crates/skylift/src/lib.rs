pub mod clock;
pub mod config;
pub mod db;
pub mod disposition;
pub mod error;
pub mod processor;
pub mod services;
pub mod sources;
pub mod supervisor;
pub mod uploader;
pub mod watcher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ConfigService;
pub use error::{
    ConfigError, DispositionError, Result, SkyliftError, UploadError, WatcherError,
};
pub use processor::{TickStats, UploadProcessor};
pub use services::CoreServices;
pub use sources::{DataSourceService, NewDataSource};
pub use supervisor::Supervisor;
pub use uploader::{BlobUploader, FsBlobStore, ProbeStatus, ScriptedUploader, UploadOutcome};
pub use watcher::FolderWatcher;
