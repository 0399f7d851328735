//! Supervisor loop — sole owner of watcher lifecycles.
//!
//! On every tick the running watcher set is reconciled against the
//! `data_sources` table: refresh-flagged sources get a fresh watcher
//! instance, removed or disabled sources lose theirs, and new enabled
//! sources gain one. The tick then drives the upload processor, so a
//! single cadence governs both observation and queue draining.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{fallback, keys};
use crate::db::data_source_repo::DataSourceRow;
use crate::error::SkyliftError;
use crate::processor::UploadProcessor;
use crate::services::CoreServices;
use crate::uploader::ProbeStatus;
use crate::watcher::{FolderWatcher, OnError, DEFAULT_QUIESCENCE};

pub struct Supervisor {
    services: CoreServices,
    processor: UploadProcessor,
    /// Running (or dead-until-refresh) watchers, keyed by source name.
    /// Owned exclusively by the supervisor; one instance per start.
    watchers: HashMap<String, FolderWatcher>,
    shutdown: Arc<AtomicBool>,
    quiescence: Duration,
}

impl Supervisor {
    pub fn new(services: CoreServices) -> Self {
        let processor = UploadProcessor::new(services.clone());
        Self {
            services,
            processor,
            watchers: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            quiescence: DEFAULT_QUIESCENCE,
        }
    }

    /// Shortens the watchers' file-stability window. Test use.
    pub fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    /// Flag observed by the main loop; shared with signal handlers.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Seeds defaults, probes the uploader, starts the initial watcher
    /// set, then ticks until the shutdown flag is raised.
    pub fn run(&mut self) -> Result<(), SkyliftError> {
        self.services.config.seed_defaults()?;
        self.services.config.warn_if_conflicting_disposition();

        match self.services.uploader.probe() {
            ProbeStatus::Connected => info!("Blob store reachable"),
            ProbeStatus::Disconnected { reason } => {
                // Diagnostics only: jobs will retry once the store heals.
                warn!("Blob store unreachable at startup: {}", reason)
            }
        }

        for source in self.services.sources.list_all()? {
            if source.is_enabled {
                self.start_watcher(&source);
            }
        }
        info!("Supervisor started with {} watcher(s)", self.watchers.len());

        while !self.shutdown.load(Ordering::Relaxed) {
            let period = self.tick_period();
            self.tick(period);
            self.sleep_interruptible(period);
        }

        self.stop_all();
        info!("Supervisor stopped");
        Ok(())
    }

    fn tick_period(&self) -> Duration {
        self.services
            .config
            .get_secs(keys::PROCESSING_INTERVAL_SECONDS)
            .ok()
            .flatten()
            .filter(|d| !d.is_zero())
            .unwrap_or(fallback::TICK_PERIOD)
    }

    /// One reconciliation + queue-draining pass. Store failures end the
    /// tick early; the next tick retries.
    pub fn tick(&mut self, period: Duration) {
        let sources = match self.services.sources.list_all() {
            Ok(sources) => sources,
            Err(e) => {
                warn!("Tick skipped, could not list data sources: {}", e);
                return;
            }
        };

        let known: HashMap<&str, &DataSourceRow> =
            sources.iter().map(|s| (s.name.as_str(), s)).collect();

        // Drop watchers whose row disappeared or was disabled without a
        // refresh request; no watcher may outlive its declaration.
        let stale: Vec<String> = self
            .watchers
            .keys()
            .filter(|name| {
                known
                    .get(name.as_str())
                    .map(|s| !s.is_enabled)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        for name in stale {
            info!("Stopping watcher '{}' (source removed or disabled)", name);
            if let Some(mut watcher) = self.watchers.remove(&name) {
                watcher.stop();
            }
        }

        for source in &sources {
            if source.needs_refresh {
                self.refresh_watcher(source);
            } else if source.is_enabled && !self.watchers.contains_key(&source.name) {
                // A source declared since the last tick.
                self.start_watcher(source);
            }
        }

        match self.processor.run_tick(period, &self.shutdown) {
            Ok(stats) => {
                if stats.claimed > 0 || stats.reclaimed > 0 {
                    debug!(
                        "Tick: {} claimed, {} succeeded, {} retried, {} failed, {} reclaimed",
                        stats.claimed, stats.succeeded, stats.retried, stats.failed, stats.reclaimed
                    );
                }
            }
            Err(e) => warn!("Upload processing failed this tick: {}", e),
        }
    }

    /// Stop-then-recreate for a refresh-flagged source. The new watcher
    /// gets its own instance; the old one's resources are released
    /// before the flag is cleared.
    fn refresh_watcher(&mut self, source: &DataSourceRow) {
        if let Some(mut old) = self.watchers.remove(&source.name) {
            info!("Restarting watcher '{}' (refresh requested)", source.name);
            old.stop();
        }

        if source.is_enabled {
            self.start_watcher(source);
        } else {
            info!("Source '{}' disabled; watcher not restarted", source.name);
        }

        if let Err(e) = self.services.sources.clear_needs_refresh(&source.name) {
            // Left set, the flag causes one extra restart next tick.
            warn!(
                "Could not clear refresh flag for '{}': {}",
                source.name, e
            );
        }
    }

    fn start_watcher(&mut self, source: &DataSourceRow) {
        let mut watcher = FolderWatcher::new(source.clone(), self.services.clone())
            .with_quiescence(self.quiescence);

        let name = source.name.clone();
        let on_error: OnError = Arc::new(move |e| {
            error!("Watcher '{}': {}", name, e);
        });

        match watcher.start(on_error) {
            Ok(()) => {
                self.watchers.insert(source.name.clone(), watcher);
            }
            Err(e) => error!("Could not start watcher '{}': {}", source.name, e),
        }
    }

    /// Stops every watcher, collecting nothing fatal; shutdown proceeds
    /// even when individual watchers misbehave.
    fn stop_all(&mut self) {
        for (name, mut watcher) in self.watchers.drain() {
            debug!("Stopping watcher '{}'", name);
            watcher.stop();
        }
    }

    /// Sleeps in small increments so the tick timer and the shutdown
    /// flag race; shutdown stays prompt under long tick periods.
    fn sleep_interruptible(&self, period: Duration) {
        let deadline = std::time::Instant::now() + period;
        while std::time::Instant::now() < deadline {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Names of sources with a live watch thread. Test support.
    pub fn running_watchers(&self) -> Vec<String> {
        self.watchers
            .iter()
            .filter(|(_, w)| w.is_running())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
