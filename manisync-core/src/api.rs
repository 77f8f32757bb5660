//! Read-side boundary handed to a request layer.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::SyncEngine;
use crate::error::Result;
use crate::manifest::{Manifest, ManifestInfo};

/// What a request layer calls to serve manifest reads.
///
/// `SyncError::Cancelled` means the caller's own deadline passed and should be
/// reported as a client-side abort, not a server failure.
#[derive(Clone)]
pub struct ManifestService {
    engine: SyncEngine,
    wait: Option<Duration>,
}

impl ManifestService {
    pub fn new(engine: SyncEngine) -> Self {
        Self { engine, wait: None }
    }

    /// Give up waiting for a cold-start build after `wait`.
    pub fn with_timeout(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    fn ensure(&self) -> Result<Arc<Manifest>> {
        let res = match self.wait {
            Some(wait) => self.engine.ensure_exists_within(wait),
            None => self.engine.ensure_exists(),
        };
        if let Err(e) = &res {
            if e.is_cancelled() {
                info!("manifest request cancelled by the caller");
            } else {
                warn!(error = %e, "manifest could not be retrieved");
            }
        }
        res
    }

    pub fn manifest(&self) -> Result<Arc<Manifest>> {
        self.ensure()
    }

    pub fn info(&self) -> Result<ManifestInfo> {
        let info = self.ensure()?.info();
        info!(generated_at = %info.generated_at, "retrieved manifest metadata");
        Ok(info)
    }
}
