//! Read-modify-write synchronization of one ticket's row in the shared
//! sheet.
//!
//! The mirror is best-effort: schema drift, a missing row, or a missing
//! column makes `sync` return `false` with a warning and must never abort
//! the ticket mutation that scheduled it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::SheetMapping;
use crate::error::{Error, Result};
use crate::sheet::cache::SheetCache;
use crate::sheet::table::Table;
use crate::sheet::SheetStore;

pub struct SheetMirror<S: SheetStore> {
    store: S,
    cache: SheetCache,
    mapping: Arc<SheetMapping>,
}

impl<S: SheetStore> SheetMirror<S> {
    pub fn new(store: S, mapping: Arc<SheetMapping>) -> Self {
        let cache = SheetCache::new(Duration::from_secs(mapping.cache_ttl_secs));
        Self {
            store,
            cache,
            mapping,
        }
    }

    /// Fail-fast structural check, run once at startup: the configured key,
    /// status, and owner columns must resolve against the live sheet.
    pub async fn startup_check(&self) -> Result<()> {
        let table = self.store.load().await.map_err(|e| {
            Error::Config(format!(
                "cannot read sheet {}: {}",
                self.mapping.path.display(),
                e
            ))
        })?;

        let mut missing = Vec::new();
        if table.column_containing(&self.mapping.key_synonyms).is_none() {
            missing.push(format!("key (synonyms {:?})", self.mapping.key_synonyms));
        }
        if table.column(&self.mapping.status_header).is_none() {
            missing.push(format!("status ('{}')", self.mapping.status_header));
        }
        if table.column(&self.mapping.owner_header).is_none() {
            missing.push(format!("owner ('{}')", self.mapping.owner_header));
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::SheetSchema(format!(
                "sheet {} is missing columns: {}",
                self.mapping.path.display(),
                missing.join(", ")
            )))
        }
    }

    /// Propagate status and/or owner to the ticket's row.
    ///
    /// Always re-reads the file (never the cache) so concurrent external
    /// edits are not clobbered, writes whichever target columns exist, and
    /// rewrites the file wholesale. Returns `false` without error when the
    /// key column or the row cannot be found.
    pub async fn sync(&self, key: &str, status: Option<&str>, responsible: Option<&str>) -> bool {
        let mut table = match self.store.load().await {
            Ok(table) => table,
            Err(e) => {
                error!(key, error = %e, "sheet read failed");
                return false;
            }
        };

        let Some(key_col) = table.column_containing(&self.mapping.key_synonyms) else {
            warn!(key, "key column not found in sheet");
            return false;
        };

        let matches = table.rows_matching(key_col, key);
        if matches.is_empty() {
            warn!(key, "ticket not found in sheet");
            return false;
        }

        let status_col = table.column(&self.mapping.status_header);
        let owner_col = table.column(&self.mapping.owner_header);

        for row in matches {
            if let (Some(value), Some(col)) = (status, status_col) {
                table.set_cell(row, col, value);
            }
            if let (Some(value), Some(col)) = (responsible, owner_col) {
                table.set_cell(row, col, value);
            }
        }

        if let Err(e) = self.store.save(&table).await {
            error!(key, error = %e, "sheet rewrite failed");
            return false;
        }

        self.cache.invalidate();
        true
    }

    /// Cached snapshot for read surfaces.
    pub async fn snapshot(&self) -> Result<Arc<Table>> {
        self.cache.get_or_load(&self.store).await
    }

    /// Age of the cached snapshot, if any.
    pub fn cache_age(&self) -> Option<Duration> {
        self.cache.age()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::TsvSheetStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn mapping(path: PathBuf) -> Arc<SheetMapping> {
        Arc::new(SheetMapping {
            path,
            key_synonyms: vec!["numsar".to_string(), "sar".to_string()],
            status_header: "status".to_string(),
            owner_header: "responsavel".to_string(),
            cache_ttl_secs: 60,
        })
    }

    async fn mirror_with(content: &str) -> (TempDir, SheetMirror<TsvSheetStore>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sheet.tsv");
        tokio::fs::write(&path, content).await.unwrap();
        let mirror = SheetMirror::new(TsvSheetStore::new(path.clone()), mapping(path));
        (dir, mirror)
    }

    #[tokio::test]
    async fn test_sync_rewrites_matching_row() {
        let (_dir, mirror) = mirror_with(
            "NumSar:\tStatus \tResponsavel:\nES-001\tPendente\t\nES-002\tPendente\t\n",
        )
        .await;

        assert!(mirror.sync("ES-002", Some("Em Andamento"), Some("alice")).await);

        let table = mirror.store.load().await.unwrap();
        assert_eq!(table.cell(1, 1), Some("Em Andamento"));
        assert_eq!(table.cell(1, 2), Some("alice"));
        // Untouched row keeps its values.
        assert_eq!(table.cell(0, 1), Some("Pendente"));
    }

    #[tokio::test]
    async fn test_sync_missing_row_is_nonfatal() {
        let (_dir, mirror) =
            mirror_with("NumSar\tStatus\tResponsavel\nES-001\tPendente\t\n").await;
        assert!(!mirror.sync("ES-404", Some("Concluído"), None).await);
    }

    #[tokio::test]
    async fn test_sync_missing_key_column_is_nonfatal() {
        let (_dir, mirror) = mirror_with("Other\tStatus\nx\tPendente\n").await;
        assert!(!mirror.sync("ES-001", Some("Concluído"), None).await);
    }

    #[tokio::test]
    async fn test_sync_without_status_column_still_writes_owner() {
        let (_dir, mirror) = mirror_with("NumSar\tResponsavel\nES-001\t\n").await;
        assert!(mirror.sync("ES-001", Some("Em Andamento"), Some("bob")).await);
        let table = mirror.store.load().await.unwrap();
        assert_eq!(table.cell(0, 1), Some("bob"));
    }

    #[tokio::test]
    async fn test_startup_check_flags_missing_columns() {
        let (_dir, mirror) = mirror_with("Other\tColumns\n").await;
        let err = mirror.startup_check().await.unwrap_err();
        assert!(err.to_string().contains("missing columns"));
    }

    #[tokio::test]
    async fn test_startup_check_accepts_authored_variance() {
        let (_dir, mirror) =
            mirror_with("Num SAR:  \t STATUS\tResponsavel :\nES-1\tPendente\t\n").await;
        mirror.startup_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_invalidates_cache() {
        let (_dir, mirror) =
            mirror_with("NumSar\tStatus\tResponsavel\nES-001\tPendente\t\n").await;
        mirror.snapshot().await.unwrap();
        assert!(mirror.cache_age().is_some());

        assert!(mirror.sync("ES-001", Some("Concluído"), None).await);
        assert!(mirror.cache_age().is_none());

        let snapshot = mirror.snapshot().await.unwrap();
        assert_eq!(snapshot.cell(0, 1), Some("Concluído"));
    }
}
