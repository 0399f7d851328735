//! Folder watcher — one per data source.
//!
//! Observes a directory through a polling notify backend (reliable on
//! Docker volumes and network mounts), filters filenames against the
//! source's glob pattern, waits for each file to settle, and enqueues a
//! pending upload job. A cold-start scan picks up files that arrived
//! while the service was down.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use glob::Pattern;
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{fallback, keys};
use crate::db::data_source_repo::DataSourceRow;
use crate::db::queue_repo::{self, NewUploadJob};
use crate::error::WatcherError;
use crate::services::CoreServices;

/// Callback for errors the watcher cannot recover from on its own.
pub type OnError = Arc<dyn Fn(&WatcherError) + Send + Sync>;

/// How long a file's size must hold still before it is considered
/// fully written and safe to enqueue.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_secs(1);

/// Rounds of the quiescence check before giving up on a still-growing
/// file. A later event will pick it up again.
const MAX_STABILITY_ROUNDS: u32 = 30;

pub struct FolderWatcher {
    source: DataSourceRow,
    services: CoreServices,
    quiescence: Duration,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    started: bool,
}

impl FolderWatcher {
    pub fn new(source: DataSourceRow, services: CoreServices) -> Self {
        Self {
            source,
            services,
            quiescence: DEFAULT_QUIESCENCE,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
            started: false,
        }
    }

    /// Shortens the file-stability window. Test use.
    pub fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source.name
    }

    /// Begins observation on a background thread. Calling twice on the
    /// same instance is an error. A missing folder or invalid pattern is
    /// reported through `on_error` and leaves the watcher idle.
    pub fn start(&mut self, on_error: OnError) -> Result<(), WatcherError> {
        if self.started {
            return Err(WatcherError::AlreadyStarted(self.source.name.clone()));
        }
        self.started = true;

        let folder = PathBuf::from(&self.source.folder_path);
        if !folder.is_dir() {
            let err = WatcherError::FolderMissing(folder);
            warn!("Watcher '{}' not started: {}", self.source.name, err);
            on_error(&err);
            return Ok(());
        }

        let pattern = match Pattern::new(&self.source.file_pattern) {
            Ok(p) => p,
            Err(e) => {
                let err = WatcherError::InvalidPattern {
                    pattern: self.source.file_pattern.clone(),
                    reason: e.to_string(),
                };
                warn!("Watcher '{}' not started: {}", self.source.name, err);
                on_error(&err);
                return Ok(());
            }
        };

        let worker = WatchWorker {
            source: self.source.clone(),
            services: self.services.clone(),
            folder,
            pattern,
            quiescence: self.quiescence,
            shutdown: Arc::clone(&self.shutdown),
            on_error,
            oversize_reported: HashSet::new(),
        };

        let name = format!("watch-{}", self.source.name);
        self.thread = Some(
            std::thread::Builder::new()
                .name(name)
                .spawn(move || worker.run())
                .map_err(|e| WatcherError::WatchError(e.to_string()))?,
        );

        info!(
            "Watching source '{}' at {} (pattern '{}')",
            self.source.name, self.source.folder_path, self.source.file_pattern
        );
        Ok(())
    }

    /// Ceases observation and releases the OS watch handles. Idempotent;
    /// blocks until the watch thread has exited.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Watch thread for '{}' panicked", self.source.name);
            }
        }
    }

    /// True while the watch thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WatchWorker {
    source: DataSourceRow,
    services: CoreServices,
    folder: PathBuf,
    pattern: Pattern,
    quiescence: Duration,
    shutdown: Arc<AtomicBool>,
    on_error: OnError,
    oversize_reported: HashSet<PathBuf>,
}

impl WatchWorker {
    fn run(mut self) {
        self.cold_scan();

        let poll_config = NotifyConfig::default()
            .with_poll_interval(self.quiescence.min(Duration::from_millis(500)));
        let debouncer_config = DebouncerConfig::default()
            .with_timeout(Duration::from_millis(250))
            .with_notify_config(poll_config);

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer = match new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx) {
            Ok(d) => d,
            Err(e) => {
                let err = WatcherError::WatchError(e.to_string());
                (self.on_error)(&err);
                return;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&self.folder, RecursiveMode::NonRecursive)
        {
            let err = WatcherError::WatchError(e.to_string());
            (self.on_error)(&err);
            return;
        }

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Watcher '{}' shutting down", self.source.name);
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if matches!(event.kind, DebouncedEventKind::Any) {
                            self.handle_candidate(&event.path);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("Watcher '{}' event error: {:?}", self.source.name, e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    let err = WatcherError::WatchError("event channel disconnected".to_string());
                    (self.on_error)(&err);
                    break;
                }
            }
        }
        // Dropping the debouncer here releases the watch handles.
    }

    /// One-shot pass over the folder for files that arrived while no
    /// watcher was running. Skips anything the queue already accounts
    /// for as queued, running, or delivered.
    fn cold_scan(&mut self) {
        let mut found = 0usize;
        for entry in WalkDir::new(&self.folder).min_depth(1).max_depth(1) {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let err = WatcherError::ScanFailed {
                        path: self.folder.clone(),
                        source: e,
                    };
                    warn!("Cold scan of source '{}': {}", self.source.name, err);
                    continue;
                }
            };
            let path = entry.path().to_path_buf();
            if !entry.file_type().is_file() || !self.matches(&path) {
                continue;
            }
            match queue_repo::path_settled_or_queued(&self.services.db, &path.to_string_lossy()) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("Cold scan queue lookup failed: {}", e);
                    continue;
                }
            }
            if self.try_enqueue(&path) {
                found += 1;
            }
        }

        if found > 0 {
            info!(
                "Cold scan enqueued {} pre-existing file(s) from '{}'",
                found, self.source.name
            );
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.pattern.matches(name))
            .unwrap_or(false)
    }

    fn in_archive_folder(&self, path: &Path) -> bool {
        self.source
            .archive_folder_path
            .as_ref()
            .map(|archive| path.starts_with(archive))
            .unwrap_or(false)
    }

    fn handle_candidate(&mut self, path: &Path) {
        if path.is_dir() || self.in_archive_folder(path) || !self.matches(path) {
            return;
        }
        // Only direct children; the watch is non-recursive but rename
        // events can surface deeper paths on some platforms.
        if path.parent() != Some(self.folder.as_path()) {
            return;
        }
        if !path.exists() {
            return;
        }

        // A pending or in-flight row already covers this path; a file
        // that reappears after disposition is a fresh job.
        match queue_repo::has_active_row_for_path(&self.services.db, &path.to_string_lossy()) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!("Queue lookup failed for {}: {}", path.display(), e);
                return;
            }
        }

        if !self.wait_for_quiescence(path) {
            return;
        }

        self.try_enqueue(path);
    }

    /// Waits until the file size holds still across the quiescence
    /// window. Platform event flags are not trusted; a stable size is
    /// the only readiness signal.
    fn wait_for_quiescence(&self, path: &Path) -> bool {
        let mut last_size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };

        for _ in 0..MAX_STABILITY_ROUNDS {
            if self.shutdown.load(Ordering::Relaxed) {
                return false;
            }
            std::thread::sleep(self.quiescence);

            let size = match std::fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(_) => return false,
            };
            if size == last_size {
                return true;
            }
            last_size = size;
        }

        debug!(
            "File {} still growing after {} rounds; deferring",
            path.display(),
            MAX_STABILITY_ROUNDS
        );
        false
    }

    /// Size-checks and enqueues one file. Returns true when a job row
    /// was created.
    fn try_enqueue(&mut self, path: &Path) -> bool {
        let size_bytes = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };

        let limit_mb = self
            .services
            .config
            .get_int(keys::MAX_FILE_SIZE_MB)
            .ok()
            .flatten()
            .unwrap_or(fallback::MAX_FILE_SIZE_MB);
        let limit_bytes = (limit_mb.max(0) as u64).saturating_mul(1024 * 1024);
        if size_bytes > limit_bytes {
            // One error event per observed file, not one per notify burst.
            if self.oversize_reported.insert(path.to_path_buf()) {
                let err = WatcherError::FileTooLarge {
                    path: path.to_path_buf(),
                    size_bytes,
                    limit_bytes,
                };
                warn!("Source '{}': {}", self.source.name, err);
                (self.on_error)(&err);
            }
            return false;
        }

        let container = self
            .services
            .config
            .get(keys::DEFAULT_CONTAINER)
            .ok()
            .flatten()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| fallback::DEFAULT_CONTAINER.to_string());

        let object_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return false,
        };

        let job = NewUploadJob {
            data_source_name: self.source.name.clone(),
            local_path: path.to_string_lossy().to_string(),
            target_container: container,
            target_object_name: object_name,
            size_bytes: size_bytes as i64,
            content_type: detect_content_type(path),
        };

        match queue_repo::enqueue(&self.services.db, &job, self.services.now_millis()) {
            Ok(id) => {
                info!(
                    "Enqueued upload job {} for {} ({} bytes, source '{}')",
                    id,
                    path.display(),
                    size_bytes,
                    self.source.name
                );
                true
            }
            Err(e) => {
                warn!("Failed to enqueue {}: {}", path.display(), e);
                false
            }
        }
    }
}

/// Content-type hint from the filename. `None` for unknown extensions;
/// wire backends fall back to their own default.
fn detect_content_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::queue_repo::JobState;
    use crate::db::Database;
    use crate::uploader::ScriptedUploader;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn services() -> CoreServices {
        let db = Database::open_in_memory().unwrap();
        CoreServices::new(
            db,
            Arc::new(ScriptedUploader::always_ok()),
            ManualClock::new(1_000_000),
        )
    }

    fn source_row(name: &str, folder: &Path, pattern: &str) -> DataSourceRow {
        DataSourceRow {
            name: name.to_string(),
            folder_path: folder.to_string_lossy().to_string(),
            archive_folder_path: None,
            file_pattern: pattern.to_string(),
            is_enabled: true,
            needs_refresh: false,
            created_at: 0,
        }
    }

    fn collecting_on_error() -> (OnError, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_error: OnError = Arc::new(move |e: &WatcherError| {
            sink.lock().unwrap().push(e.to_string());
        });
        (on_error, seen)
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        cond()
    }

    #[test]
    fn test_detect_content_type() {
        assert_eq!(
            detect_content_type(Path::new("/in/report.csv")).as_deref(),
            Some("text/csv")
        );
        assert_eq!(
            detect_content_type(Path::new("/in/photo.png")).as_deref(),
            Some("image/png")
        );
        assert_eq!(detect_content_type(Path::new("/in/blob.xyz123")), None);
    }

    #[test]
    fn test_start_twice_is_an_error() {
        let temp = TempDir::new().unwrap();
        let services = services();
        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "*"), services);

        let (on_error, _) = collecting_on_error();
        watcher.start(Arc::clone(&on_error)).unwrap();
        assert!(matches!(
            watcher.start(on_error),
            Err(WatcherError::AlreadyStarted(_))
        ));
        watcher.stop();
    }

    #[test]
    fn test_missing_folder_reports_and_stays_idle() {
        let services = services();
        let mut watcher = FolderWatcher::new(
            source_row("s1", Path::new("/definitely/not/here"), "*"),
            services,
        );

        let (on_error, seen) = collecting_on_error();
        watcher.start(on_error).unwrap();

        assert!(!watcher.is_running());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("does not exist"));
    }

    #[test]
    fn test_invalid_pattern_reports_and_stays_idle() {
        let temp = TempDir::new().unwrap();
        let services = services();
        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "[bad"), services);

        let (on_error, seen) = collecting_on_error();
        watcher.start(on_error).unwrap();

        assert!(!watcher.is_running());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cold_scan_enqueues_preexisting_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(temp.path().join("b.txt"), b"beta").unwrap();
        std::fs::write(temp.path().join("skip.bin"), b"nope").unwrap();

        let services = services();
        let db = services.db.clone();
        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "*.txt"), services)
            .with_quiescence(Duration::from_millis(50));

        let (on_error, _) = collecting_on_error();
        watcher.start(on_error).unwrap();

        assert!(wait_for(
            || queue_repo::count_by_state(&db, JobState::Pending).unwrap() == 2,
            Duration::from_secs(5)
        ));
        watcher.stop();

        let jobs = queue_repo::list_by_state(&db, JobState::Pending).unwrap();
        let mut names: Vec<String> = jobs.iter().map(|j| j.target_object_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert!(jobs.iter().all(|j| j.data_source_name == "s1"));
        assert!(jobs.iter().all(|j| j.target_container == "uploads"));
        assert!(jobs
            .iter()
            .all(|j| j.content_type.as_deref() == Some("text/plain")));
    }

    #[test]
    fn test_cold_scan_skips_already_tracked_paths() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        std::fs::write(&file, b"alpha").unwrap();

        let services = services();
        let db = services.db.clone();
        queue_repo::enqueue(
            &db,
            &NewUploadJob {
                data_source_name: "s1".to_string(),
                local_path: file.to_string_lossy().to_string(),
                target_container: "uploads".to_string(),
                target_object_name: "a.txt".to_string(),
                size_bytes: 5,
                content_type: Some("text/plain".to_string()),
            },
            500,
        )
        .unwrap();

        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "*.txt"), services)
            .with_quiescence(Duration::from_millis(50));
        let (on_error, _) = collecting_on_error();
        watcher.start(on_error).unwrap();
        std::thread::sleep(Duration::from_millis(400));
        watcher.stop();

        assert_eq!(queue_repo::count_by_state(&db, JobState::Pending).unwrap(), 1);
    }

    #[test]
    fn test_new_file_enqueued_after_quiescence() {
        let temp = TempDir::new().unwrap();
        let services = services();
        let db = services.db.clone();
        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "*.txt"), services)
            .with_quiescence(Duration::from_millis(100));

        let (on_error, _) = collecting_on_error();
        watcher.start(on_error).unwrap();

        // Give the watch a moment to establish, then drop a file.
        std::thread::sleep(Duration::from_millis(300));
        std::fs::write(temp.path().join("new.txt"), b"payload").unwrap();

        assert!(wait_for(
            || queue_repo::count_by_state(&db, JobState::Pending).unwrap() == 1,
            Duration::from_secs(10)
        ));
        watcher.stop();

        let job = &queue_repo::list_by_state(&db, JobState::Pending).unwrap()[0];
        assert_eq!(job.target_object_name, "new.txt");
        assert_eq!(job.size_bytes, 7);
    }

    #[test]
    fn test_oversized_file_not_enqueued_and_reported_once() {
        let temp = TempDir::new().unwrap();
        // 2 bytes over a 0 MB limit.
        std::fs::write(temp.path().join("big.txt"), b"xx").unwrap();

        let services = services();
        services
            .config
            .set(keys::MAX_FILE_SIZE_MB, "0", None, None)
            .unwrap();
        let db = services.db.clone();

        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "*.txt"), services)
            .with_quiescence(Duration::from_millis(50));
        let (on_error, seen) = collecting_on_error();
        watcher.start(on_error).unwrap();
        std::thread::sleep(Duration::from_millis(500));
        watcher.stop();

        assert_eq!(queue_repo::count_by_state(&db, JobState::Pending).unwrap(), 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("exceeds size limit"));
    }

    #[test]
    fn test_stop_is_idempotent_and_quick() {
        let temp = TempDir::new().unwrap();
        let services = services();
        let mut watcher = FolderWatcher::new(source_row("s1", temp.path(), "*"), services)
            .with_quiescence(Duration::from_millis(50));

        let (on_error, _) = collecting_on_error();
        watcher.start(on_error).unwrap();
        assert!(wait_for(|| watcher.is_running(), Duration::from_secs(2)));

        let begun = std::time::Instant::now();
        watcher.stop();
        watcher.stop();
        assert!(begun.elapsed() < Duration::from_secs(3));
        assert!(!watcher.is_running());
    }
}
