//! Application context: every shared component, explicitly constructed and
//! dependency-injected.
//!
//! There is no module-level global state. `init` owns the whole startup
//! sequence (pool, fail-fast mapping checks, sheet cache preload, tracker
//! probe) and `shutdown` tears the background machinery down again.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::pool::ConnectionPool;
use crate::error::Result;
use crate::lifecycle::TicketService;
use crate::sheet::{SheetMirror, TsvSheetStore};
use crate::sync::SyncWorkers;
use crate::tracker::{RedmineClient, TrackerApi};

/// The concrete service type wired by the context.
pub type Service = TicketService<RedmineClient, TsvSheetStore>;

pub struct AppContext {
    #[allow(dead_code)]
    pool: Arc<ConnectionPool>,
    tracker: Arc<RedmineClient>,
    workers: Arc<SyncWorkers>,
    services: BTreeMap<String, Service>,
}

impl AppContext {
    /// Build and verify the full component graph.
    ///
    /// Mapping problems (database columns, sheet columns) abort startup;
    /// an unreachable tracker only warns, since tracker updates are
    /// best-effort by design.
    pub async fn init(config: Config) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::open(&config.database).await?);
        let tracker = Arc::new(RedmineClient::new(&config.tracker)?);
        let workers = Arc::new(SyncWorkers::start(&config.sync));

        let mut services = BTreeMap::new();
        for (name, family) in &config.families {
            let family = Arc::new(family.clone());
            let mapping = Arc::new(family.sheet.clone());
            let mirror = Arc::new(SheetMirror::new(
                TsvSheetStore::new(mapping.path.clone()),
                mapping,
            ));

            let service = Service::new(
                name.clone(),
                Arc::clone(&family),
                Arc::clone(&pool),
                Arc::clone(&mirror),
                Arc::clone(&tracker),
                Arc::clone(&workers),
                config.tracker.claim_assignee_id,
            );

            service.store().verify_schema().await?;
            mirror.startup_check().await?;
            if let Err(e) = mirror.snapshot().await {
                warn!(family = %name, error = %e, "sheet cache preload failed");
            }

            info!(family = %name, version = family.version, "family mapping verified");
            services.insert(name.clone(), service);
        }

        if tracker.probe().await {
            info!("tracker reachable");
        } else {
            warn!("tracker unreachable, updates will rely on retries and reconciliation");
        }

        Ok(Self {
            pool,
            tracker,
            workers,
            services,
        })
    }

    pub fn service(&self, family: &str) -> Option<&Service> {
        self.services.get(family)
    }

    pub fn families(&self) -> impl Iterator<Item = (&String, &Service)> {
        self.services.iter()
    }

    /// Stop background workers, letting in-flight jobs finish.
    pub async fn shutdown(self) {
        drop(self.services);
        drop(self.tracker);
        match Arc::into_inner(self.workers) {
            Some(workers) => workers.shutdown().await,
            None => warn!("sync workers still shared at shutdown, skipping drain"),
        }
    }
}
