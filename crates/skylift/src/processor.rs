//! Upload processor — drains the queue once per supervisor tick.
//!
//! Each invocation reclaims stale in-flight rows, claims a batch of
//! eligible pending jobs, uploads them on a bounded pool of ephemeral
//! worker threads, and commits each row's outcome independently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::config::{fallback, keys};
use crate::db::data_source_repo::DataSourceRow;
use crate::db::queue_repo::{self, UploadJobRow};
use crate::db::DatabaseError;
use crate::disposition;
use crate::error::UploadError;
use crate::services::CoreServices;

/// In-flight rows untouched for this many ticks are assumed orphaned by
/// a crash and returned to the pending pool.
const RECLAIM_TICKS: u32 = 10;

/// Tunables captured once at the start of a tick. A concurrent operator
/// edit affects the next tick, never in-flight work.
#[derive(Debug, Clone)]
struct TickSettings {
    max_concurrent: usize,
    max_retries: i64,
    retry_base: Duration,
    max_retry_delay: Duration,
    delete_on_success: bool,
    archive_on_success: bool,
}

/// Counters for one processor invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub reclaimed: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct UploadProcessor {
    services: CoreServices,
}

impl UploadProcessor {
    pub fn new(services: CoreServices) -> Self {
        Self { services }
    }

    fn settings(&self) -> Result<TickSettings, DatabaseError> {
        let config = &self.services.config;
        let max_concurrent = config
            .get_int(keys::MAX_CONCURRENT_UPLOADS)?
            .filter(|n| *n > 0)
            .unwrap_or(fallback::MAX_CONCURRENT_UPLOADS) as usize;
        let max_retries = config
            .get_int(keys::MAX_RETRIES)?
            .filter(|n| *n > 0)
            .unwrap_or(fallback::MAX_RETRIES);
        let retry_base = config
            .get_secs(keys::RETRY_DELAY_SECONDS)?
            .unwrap_or(fallback::RETRY_DELAY);
        let max_retry_delay = config
            .get_int(keys::MAX_RETRY_DELAY_MINUTES)?
            .filter(|n| *n >= 0)
            .map(|mins| Duration::from_secs(mins as u64 * 60))
            .unwrap_or(Duration::from_secs(
                fallback::MAX_RETRY_DELAY_MINUTES as u64 * 60,
            ));
        let delete_on_success = config.get_bool(keys::DELETE_ON_SUCCESS)?.unwrap_or(false);
        let archive_on_success = config.get_bool(keys::ARCHIVE_ON_SUCCESS)?.unwrap_or(false);

        if delete_on_success && archive_on_success {
            warn!("Delete-on-success and archive-on-success are both set; delete wins");
        }

        Ok(TickSettings {
            max_concurrent,
            max_retries,
            retry_base,
            max_retry_delay,
            delete_on_success,
            archive_on_success,
        })
    }

    /// One queue-draining pass. `tick_period` sizes the reclaim
    /// threshold; `shutdown` stops workers between jobs (claimed rows
    /// left behind are recovered by the reclaim path).
    pub fn run_tick(
        &self,
        tick_period: Duration,
        shutdown: &AtomicBool,
    ) -> Result<TickStats, DatabaseError> {
        let settings = self.settings()?;
        let now = self.services.now_millis();

        let reclaim_cutoff = now - (tick_period.as_millis() as i64) * RECLAIM_TICKS as i64;
        let reclaimed = queue_repo::reclaim_stale(&self.services.db, reclaim_cutoff, now)?;
        if reclaimed > 0 {
            info!("Reclaimed {} stale in-flight job(s)", reclaimed);
        }

        let batch = queue_repo::claim_batch(&self.services.db, settings.max_concurrent, now)?;
        let mut stats = TickStats {
            reclaimed,
            claimed: batch.len(),
            ..TickStats::default()
        };
        if batch.is_empty() {
            return Ok(stats);
        }

        debug!(
            "Processing {} job(s) with up to {} worker(s)",
            batch.len(),
            settings.max_concurrent
        );

        // Archive destinations come from the owning data source rows.
        let archive_dirs: HashMap<String, Option<String>> = self
            .services
            .sources
            .list_all()?
            .into_iter()
            .map(|row: DataSourceRow| (row.name, row.archive_folder_path))
            .collect();

        let worker_count = settings.max_concurrent.min(batch.len());
        let (job_tx, job_rx) = bounded::<UploadJobRow>(batch.len());
        let (result_tx, result_rx) = bounded::<JobOutcome>(batch.len());

        for job in batch {
            // Channel is sized to the batch; send cannot block here.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let settings = &settings;
                let archive_dirs = &archive_dirs;
                scope.spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if shutdown.load(Ordering::Relaxed) {
                            // Leave the row in-flight; reclaim recovers it.
                            break;
                        }
                        let outcome = self.process_one(&job, settings, archive_dirs);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for outcome in result_rx.iter() {
                match outcome {
                    JobOutcome::Succeeded => stats.succeeded += 1,
                    JobOutcome::Retried => stats.retried += 1,
                    JobOutcome::Failed => stats.failed += 1,
                    JobOutcome::WriteError => {}
                }
            }
        });

        Ok(stats)
    }

    fn process_one(
        &self,
        job: &UploadJobRow,
        settings: &TickSettings,
        archive_dirs: &HashMap<String, Option<String>>,
    ) -> JobOutcome {
        let attempts = job.attempts + 1;
        let local_path = Path::new(&job.local_path);

        let result = self.services.uploader.upload(
            local_path,
            &job.target_container,
            &job.target_object_name,
            job.content_type.as_deref(),
        );
        let now = self.services.now_millis();

        match result {
            Ok(()) => {
                if let Err(e) = queue_repo::mark_succeeded(&self.services.db, job.id, attempts, now)
                {
                    warn!("Failed to commit success for job {}: {}", job.id, e);
                    return JobOutcome::WriteError;
                }
                info!(
                    "Uploaded {} -> {}/{} (attempt {})",
                    job.local_path, job.target_container, job.target_object_name, attempts
                );
                self.apply_disposition(job, settings, archive_dirs);
                JobOutcome::Succeeded
            }
            Err(UploadError::Transient(msg)) => {
                if attempts >= settings.max_retries {
                    let error = format!("retries exhausted: {msg}");
                    if let Err(e) =
                        queue_repo::mark_failed(&self.services.db, job.id, attempts, &error, now)
                    {
                        warn!("Failed to commit failure for job {}: {}", job.id, e);
                        return JobOutcome::WriteError;
                    }
                    warn!(
                        "Job {} failed after {} attempt(s): {}",
                        job.id, attempts, msg
                    );
                    JobOutcome::Failed
                } else {
                    let delay = backoff_delay(settings.retry_base, settings.max_retry_delay, attempts);
                    let next_attempt_at = now + delay.as_millis() as i64;
                    if let Err(e) = queue_repo::schedule_retry(
                        &self.services.db,
                        job.id,
                        attempts,
                        &msg,
                        next_attempt_at,
                        now,
                    ) {
                        warn!("Failed to commit retry for job {}: {}", job.id, e);
                        return JobOutcome::WriteError;
                    }
                    debug!(
                        "Job {} attempt {} failed transiently, retrying in {:?}: {}",
                        job.id, attempts, delay, msg
                    );
                    JobOutcome::Retried
                }
            }
            Err(UploadError::Permanent(msg)) => {
                if let Err(e) =
                    queue_repo::mark_failed(&self.services.db, job.id, attempts, &msg, now)
                {
                    warn!("Failed to commit failure for job {}: {}", job.id, e);
                    return JobOutcome::WriteError;
                }
                warn!("Job {} failed permanently: {}", job.id, msg);
                JobOutcome::Failed
            }
        }
    }

    /// Applies the configured post-success side effect. Delete wins over
    /// archive; errors are logged and never revert the job.
    fn apply_disposition(
        &self,
        job: &UploadJobRow,
        settings: &TickSettings,
        archive_dirs: &HashMap<String, Option<String>>,
    ) {
        let local_path = Path::new(&job.local_path);

        if settings.delete_on_success {
            if let Err(e) = disposition::delete_file(local_path) {
                warn!("Disposition for job {}: {}", job.id, e);
            }
            return;
        }

        if settings.archive_on_success {
            let archive_dir = archive_dirs
                .get(&job.data_source_name)
                .and_then(|d| d.as_deref());
            match archive_dir {
                Some(dir) => {
                    if let Err(e) = disposition::archive_file(local_path, Path::new(dir)) {
                        warn!("Disposition for job {}: {}", job.id, e);
                    }
                }
                None => debug!(
                    "Job {} succeeded but source '{}' has no archive folder",
                    job.id, job.data_source_name
                ),
            }
        }
    }
}

enum JobOutcome {
    Succeeded,
    Retried,
    Failed,
    WriteError,
}

/// Exponential backoff with an upper clamp: `base * 2^(attempts-1)`.
fn backoff_delay(base: Duration, max: Duration, attempts: i64) -> Duration {
    let exponent = (attempts - 1).clamp(0, 31) as u32;
    let delay = base.saturating_mul(1u32 << exponent.min(30));
    delay.min(max)
}
