//! Test harness for isolated end-to-end execution.
//!
//! Provides a temp-directory environment (inbox, archive, blob root),
//! a file-backed database, a manual clock, and helpers for declaring
//! sources and driving supervisor ticks until a condition holds.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use skylift::clock::ManualClock;
use skylift::db::Database;
use skylift::services::CoreServices;
use skylift::sources::NewDataSource;
use skylift::supervisor::Supervisor;
use skylift::uploader::{BlobUploader, FsBlobStore};

/// Tick period used by harness-driven supervisors.
pub const TICK: Duration = Duration::from_secs(1);

/// Stability window short enough for tests, long enough to be real.
pub const QUIESCENCE: Duration = Duration::from_millis(50);

pub struct TestHarness {
    temp_dir: TempDir,
    /// Watched input folder.
    pub inbox: PathBuf,
    /// Archive destination for the default source.
    pub archive: PathBuf,
    /// Root of the filesystem blob store (when one is used).
    pub blob_root: PathBuf,
    /// Path of the file-backed database, for restart simulations.
    pub db_path: PathBuf,
    pub services: CoreServices,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Harness backed by the filesystem blob store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blob_root = temp_dir.path().join("blobs");
        let uploader = Arc::new(FsBlobStore::new(&blob_root));
        Self::build(temp_dir, blob_root, uploader)
    }

    /// Harness with an injected uploader (e.g. a scripted stub).
    pub fn with_uploader(uploader: Arc<dyn BlobUploader>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blob_root = temp_dir.path().join("blobs");
        Self::build(temp_dir, blob_root, uploader)
    }

    fn build(temp_dir: TempDir, blob_root: PathBuf, uploader: Arc<dyn BlobUploader>) -> Self {
        let inbox = temp_dir.path().join("inbox");
        let archive = temp_dir.path().join("archive");
        std::fs::create_dir_all(&inbox).expect("Failed to create inbox");

        let db_path = temp_dir.path().join("skylift.db");
        let db = Database::open(&db_path).expect("Failed to open test database");

        let clock = ManualClock::new(1_000_000);
        let services = CoreServices::new(db, uploader, clock.clone());
        services.config.seed_defaults().expect("Failed to seed defaults");

        Self {
            temp_dir,
            inbox,
            archive,
            blob_root,
            db_path,
            services,
            clock,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Declares an enabled source watching the harness inbox.
    pub fn declare_source(&self, name: &str, pattern: &str, with_archive: bool) {
        self.services
            .sources
            .create(NewDataSource {
                name: name.to_string(),
                folder_path: self.inbox.to_string_lossy().to_string(),
                archive_folder_path: with_archive
                    .then(|| self.archive.to_string_lossy().to_string()),
                file_pattern: Some(pattern.to_string()),
                is_enabled: true,
            })
            .expect("Failed to declare source");
    }

    /// Writes a file into the watched inbox.
    pub fn write_inbox(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.inbox.join(filename);
        std::fs::write(&path, content).expect("Failed to write inbox file");
        path
    }

    /// A supervisor over this harness's services, tuned for tests.
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.services.clone()).with_quiescence(QUIESCENCE)
    }

    /// Reads an object out of the filesystem blob store.
    pub fn read_blob(&self, container: &str, object: &str) -> Vec<u8> {
        std::fs::read(self.blob_root.join(container).join(object))
            .expect("Failed to read stored blob")
    }

    pub fn blob_exists(&self, container: &str, object: &str) -> bool {
        self.blob_root.join(container).join(object).exists()
    }

    /// Drops the service handles and reopens the same database file,
    /// simulating a process restart.
    pub fn reopen(&mut self, uploader: Arc<dyn BlobUploader>) {
        let db = Database::open(&self.db_path).expect("Failed to reopen database");
        self.services = CoreServices::new(db, uploader, self.clock.clone());
    }
}

/// Drives supervisor ticks until the condition holds or the timeout
/// elapses. Returns whether the condition was met.
pub fn tick_until<F: Fn() -> bool>(
    supervisor: &mut Supervisor,
    cond: F,
    timeout: Duration,
) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        supervisor.tick(TICK);
        if cond() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return cond();
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Waits without ticking.
pub fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}
