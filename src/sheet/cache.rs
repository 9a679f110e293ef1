//! Time-boxed read cache for the parsed sheet.
//!
//! Read surfaces tolerate a stale snapshot within the TTL; the write path
//! never goes through here and invalidates after every successful rewrite,
//! so concurrent external edits cannot be clobbered by a cached table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::Result;
use crate::sheet::{SheetStore, Table};

struct CachedSheet {
    table: Arc<Table>,
    loaded_at: Instant,
}

pub struct SheetCache {
    ttl: Duration,
    slot: Mutex<Option<CachedSheet>>,
}

impl SheetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Cached table if fresh, otherwise a fresh load through `store`.
    ///
    /// Two racing refreshes both load; the later store wins. That is
    /// harmless for a read cache.
    pub async fn get_or_load<S: SheetStore>(&self, store: &S) -> Result<Arc<Table>> {
        if let Some(table) = self.fresh() {
            return Ok(table);
        }

        let table = Arc::new(store.load().await?);
        *self.slot.lock() = Some(CachedSheet {
            table: Arc::clone(&table),
            loaded_at: Instant::now(),
        });
        Ok(table)
    }

    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }

    /// Age of the cached snapshot, if one is live.
    pub fn age(&self) -> Option<Duration> {
        self.slot
            .lock()
            .as_ref()
            .map(|cached| cached.loaded_at.elapsed())
    }

    fn fresh(&self) -> Option<Arc<Table>> {
        let slot = self.slot.lock();
        slot.as_ref()
            .filter(|cached| cached.loaded_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.table))
    }
}
