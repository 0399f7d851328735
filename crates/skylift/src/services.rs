//! Shared service bundle.
//!
//! One immutable struct passed into constructors instead of ambient
//! globals. The clock rides along so time-dependent logic stays
//! deterministic under test.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ConfigService;
use crate::db::Database;
use crate::sources::DataSourceService;
use crate::uploader::BlobUploader;

#[derive(Clone)]
pub struct CoreServices {
    pub db: Database,
    pub config: ConfigService,
    pub sources: DataSourceService,
    pub uploader: Arc<dyn BlobUploader>,
    pub clock: Arc<dyn Clock>,
}

impl CoreServices {
    pub fn new(db: Database, uploader: Arc<dyn BlobUploader>, clock: Arc<dyn Clock>) -> Self {
        let config = ConfigService::new(db.clone(), clock.clone());
        let sources = DataSourceService::new(db.clone(), clock.clone());
        Self {
            db,
            config,
            sources,
            uploader,
            clock,
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}
