//! Spreadsheet mirror: best-effort propagation of ticket state to the
//! shared sheet.
//!
//! The on-disk format is out of scope; persistence goes through the
//! [`SheetStore`] seam. The bundled [`TsvSheetStore`] keeps the sheet as a
//! tab-separated text file, which is enough for the whole-file
//! read-modify-write discipline the mirror requires.

pub mod cache;
pub mod mirror;
pub mod table;

use std::path::PathBuf;

use crate::error::Result;
pub use cache::SheetCache;
pub use mirror::SheetMirror;
pub use table::{Table, normalize_header};

/// Opaque tabular persistence for the mirror.
///
/// `load` reads the whole sheet; `save` rewrites it wholesale. The mirror
/// never patches rows in place.
pub trait SheetStore: Send + Sync {
    fn load(&self) -> impl std::future::Future<Output = Result<Table>> + Send;

    fn save(&self, table: &Table) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Tab-separated file store.
///
/// Cell values are assumed tab- and newline-free, which holds for the
/// status/owner/key fields the mirror writes.
#[derive(Debug, Clone)]
pub struct TsvSheetStore {
    path: PathBuf,
}

impl TsvSheetStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SheetStore for TsvSheetStore {
    async fn load(&self) -> Result<Table> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let mut lines = raw.lines();

        let headers: Vec<String> = match lines.next() {
            Some(line) => line.split('\t').map(str::to_string).collect(),
            None => return Ok(Table::empty()),
        };

        let rows: Vec<Vec<String>> = lines
            .map(|line| line.split('\t').map(str::to_string).collect())
            .collect();

        Ok(Table::new(headers, rows))
    }

    async fn save(&self, table: &Table) -> Result<()> {
        let mut out = String::new();
        out.push_str(&table.headers().join("\t"));
        out.push('\n');
        for row in table.rows() {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        tokio::fs::write(&self.path, out).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tsv_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sheet.tsv");
        tokio::fs::write(&path, "Id\tStatus\n42\tPendente\n")
            .await
            .unwrap();

        let store = TsvSheetStore::new(path);
        let mut table = store.load().await.unwrap();
        assert_eq!(table.headers(), &["Id".to_string(), "Status".to_string()]);
        assert_eq!(table.cell(0, 1), Some("Pendente"));

        table.set_cell(0, 1, "Em Andamento");
        store.save(&table).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded.cell(0, 1), Some("Em Andamento"));
    }

    #[tokio::test]
    async fn test_load_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let store = TsvSheetStore::new(dir.path().join("absent.tsv"));
        assert!(store.load().await.is_err());
    }
}
