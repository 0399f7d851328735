//! Live configuration service.
//!
//! Typed get/set over the `configurations` table. Every tunable the core
//! consumes is read through here at request time, so operator edits take
//! effect by the next supervisor tick. Reads may be served from a short
//! TTL cache bounded below one tick.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::db::{config_repo, Database, DatabaseError};
use crate::error::ConfigError;

/// Recognized configuration keys. The core consumes this closed set;
/// unknown keys are stored and served but never interpreted.
pub mod keys {
    pub const PROCESSING_INTERVAL_SECONDS: &str = "App.ProcessingIntervalSeconds";
    pub const MAX_FILE_SIZE_MB: &str = "Upload.MaxFileSizeMB";
    pub const MAX_CONCURRENT_UPLOADS: &str = "Upload.MaxConcurrentUploads";
    pub const MAX_RETRIES: &str = "Upload.MaxRetries";
    pub const RETRY_DELAY_SECONDS: &str = "Upload.RetryDelaySeconds";
    pub const MAX_RETRY_DELAY_MINUTES: &str = "Upload.MaxRetryDelayMinutes";
    pub const ARCHIVE_ON_SUCCESS: &str = "Upload.ArchiveOnSuccess";
    pub const DELETE_ON_SUCCESS: &str = "Upload.DeleteOnSuccess";
    pub const STORAGE_CONNECTION_STRING: &str = "Azure.StorageConnectionString";
    pub const DEFAULT_CONTAINER: &str = "Azure.DefaultContainer";
}

/// Built-in defaults, seeded once at startup where the key is absent.
const DEFAULTS: &[(&str, &str, &str, &str)] = &[
    (
        keys::PROCESSING_INTERVAL_SECONDS,
        "10",
        "App",
        "Supervisor tick period in seconds",
    ),
    (
        keys::MAX_FILE_SIZE_MB,
        "100",
        "Upload",
        "Files larger than this are not enqueued",
    ),
    (
        keys::MAX_CONCURRENT_UPLOADS,
        "3",
        "Upload",
        "Upload worker count per tick",
    ),
    (
        keys::MAX_RETRIES,
        "5",
        "Upload",
        "Attempt cap before a job is marked failed",
    ),
    (
        keys::RETRY_DELAY_SECONDS,
        "30",
        "Upload",
        "Base of the exponential retry backoff",
    ),
    (
        keys::MAX_RETRY_DELAY_MINUTES,
        "60",
        "Upload",
        "Upper clamp on the retry backoff",
    ),
    (
        keys::ARCHIVE_ON_SUCCESS,
        "true",
        "Upload",
        "Move the local file to the source's archive folder after upload",
    ),
    (
        keys::DELETE_ON_SUCCESS,
        "false",
        "Upload",
        "Delete the local file after upload; takes precedence over archiving",
    ),
    (
        keys::STORAGE_CONNECTION_STRING,
        "",
        "Azure",
        "Connection string for the blob storage account",
    ),
    (
        keys::DEFAULT_CONTAINER,
        "uploads",
        "Azure",
        "Target container when a job does not specify one",
    ),
];

/// Compile-time fallbacks used when a stored value is missing or unparseable.
pub mod fallback {
    use std::time::Duration;

    pub const TICK_PERIOD: Duration = Duration::from_secs(10);
    pub const MAX_FILE_SIZE_MB: i64 = 100;
    pub const MAX_CONCURRENT_UPLOADS: i64 = 3;
    pub const MAX_RETRIES: i64 = 5;
    pub const RETRY_DELAY: Duration = Duration::from_secs(30);
    pub const MAX_RETRY_DELAY_MINUTES: i64 = 60;
    pub const DEFAULT_CONTAINER: &str = "uploads";
}

#[derive(Clone)]
struct CachedValue {
    value: Option<String>,
    fetched_at: i64,
}

/// One entry of an operator-supplied JSON seed file.
#[derive(Debug, Deserialize)]
pub struct SeedEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

/// Typed accessor layer over the `configurations` table.
#[derive(Clone)]
pub struct ConfigService {
    db: Database,
    clock: Arc<dyn Clock>,
    cache: Arc<Mutex<HashMap<String, CachedValue>>>,
    cache_ttl_millis: i64,
}

impl ConfigService {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self::with_cache_ttl(db, clock, Duration::from_secs(5))
    }

    /// The TTL must stay at or below one supervisor tick so operator edits
    /// are visible by the next tick.
    pub fn with_cache_ttl(db: Database, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            db,
            clock,
            cache: Arc::new(Mutex::new(HashMap::new())),
            cache_ttl_millis: ttl.as_millis() as i64,
        }
    }

    /// Raw string lookup.
    pub fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let now = self.clock.now_millis();

        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(key) {
                if now - entry.fetched_at < self.cache_ttl_millis {
                    return Ok(entry.value.clone());
                }
            }
        }

        let value = config_repo::find(&self.db, key)?.map(|row| row.value);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key.to_string(),
                CachedValue {
                    value: value.clone(),
                    fetched_at: now,
                },
            );
        }
        Ok(value)
    }

    /// Base-10 integer accessor. Absent on missing key or parse failure.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, DatabaseError> {
        Ok(self.get(key)?.and_then(|v| v.trim().parse::<i64>().ok()))
    }

    /// Boolean accessor; accepts case-insensitive `true`/`false`.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, DatabaseError> {
        Ok(self.get(key)?.and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }))
    }

    /// Duration accessor; the stored value is an integer number of seconds.
    pub fn get_secs(&self, key: &str) -> Result<Option<Duration>, DatabaseError> {
        Ok(self
            .get_int(key)?
            .filter(|secs| *secs >= 0)
            .map(|secs| Duration::from_secs(secs as u64)))
    }

    /// Full upsert on `key`. Invalidates the cached entry so a re-read
    /// within the TTL still observes the write.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        category: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = self.clock.now_millis();
        config_repo::upsert(
            &self.db,
            key,
            value,
            category.unwrap_or(""),
            description.unwrap_or(""),
            now,
        )?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key.to_string(),
                CachedValue {
                    value: Some(value.to_string()),
                    fetched_at: now,
                },
            );
        }
        Ok(())
    }

    pub fn exists(&self, key: &str) -> Result<bool, DatabaseError> {
        config_repo::exists(&self.db, key)
    }

    /// Seeds the built-in defaults table. Existing rows are never
    /// overwritten, so operator edits survive restarts.
    pub fn seed_defaults(&self) -> Result<(), DatabaseError> {
        let now = self.clock.now_millis();
        let mut seeded = 0usize;
        for (key, value, category, description) in DEFAULTS {
            if config_repo::insert_if_absent(&self.db, key, value, category, description, now)? {
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!("Seeded {} default configuration value(s)", seeded);
        }
        Ok(())
    }

    /// Seeds additional defaults from an operator-supplied JSON file.
    /// Same contract as `seed_defaults`: absent keys only.
    pub fn seed_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let entries: Vec<SeedEntry> = serde_json::from_str(&content)?;

        let now = self.clock.now_millis();
        let mut seeded = 0usize;
        for entry in &entries {
            if entry.key.is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("seed file {} contains an empty key", path.display()),
                });
            }
            let inserted = config_repo::insert_if_absent(
                &self.db,
                &entry.key,
                &entry.value,
                &entry.category,
                &entry.description,
                now,
            )
            .map_err(|e| ConfigError::Validation {
                message: format!("failed to seed '{}': {}", entry.key, e),
            })?;
            if inserted {
                seeded += 1;
            }
        }
        info!(
            "Seeded {}/{} configuration value(s) from {}",
            seeded,
            entries.len(),
            path.display()
        );
        Ok(seeded)
    }

    /// Warn once per call site when both disposition flags are enabled;
    /// delete wins in that combination.
    pub fn warn_if_conflicting_disposition(&self) {
        let delete = self
            .get_bool(keys::DELETE_ON_SUCCESS)
            .ok()
            .flatten()
            .unwrap_or(false);
        let archive = self
            .get_bool(keys::ARCHIVE_ON_SUCCESS)
            .ok()
            .flatten()
            .unwrap_or(false);
        if delete && archive {
            warn!(
                "Both {} and {} are true; files will be deleted, not archived",
                keys::DELETE_ON_SUCCESS,
                keys::ARCHIVE_ON_SUCCESS
            );
        }
    }
}
