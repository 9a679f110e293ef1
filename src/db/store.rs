//! Parameterized CRUD against one family's ticket table.
//!
//! Every operation runs a single parameterized statement on a pooled
//! connection. Mutations report success as a boolean and log the underlying
//! error instead of propagating it; the lifecycle layer converts `false`
//! into its generic backend failure.

use std::sync::Arc;

use tracing::{error, warn};
use turso::Connection;

use crate::config::FamilyConfig;
use crate::db::pool::ConnectionPool;
use crate::error::{Error, Result};
use crate::types::TicketKey;

/// Resolved column -> value assignments for a partial update.
///
/// Columns are already mapped from API names; a `Value::Null` assignment
/// writes SQL NULL (meaningful for owner columns: it releases ownership).
#[derive(Debug, Default, Clone)]
pub struct FieldPatch {
    assignments: Vec<(String, turso::Value)>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: turso::Value) {
        self.assignments.push((column.to_string(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|(c, _)| c.as_str())
    }
}

/// Outcome of the statement-level compare-and-swap claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimCas {
    /// Ownership was taken by this call.
    Claimed,
    /// The same user already owns the ticket; nothing was written.
    AlreadyOwned,
    /// A different user owns the ticket.
    Conflict(String),
    /// The row disappeared under us.
    Missing,
    /// The statement itself failed.
    Failed,
}

pub struct RecordStore {
    pool: Arc<ConnectionPool>,
    family: Arc<FamilyConfig>,
}

impl RecordStore {
    pub fn new(pool: Arc<ConnectionPool>, family: Arc<FamilyConfig>) -> Self {
        Self { pool, family }
    }

    pub fn family(&self) -> &FamilyConfig {
        &self.family
    }

    /// Fail-fast schema check: selecting every mapped column errors out if
    /// the table drifted from the configured mapping.
    pub async fn verify_schema(&self) -> Result<()> {
        let columns: Vec<String> = self
            .family
            .mapped_columns()
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} LIMIT 1",
            columns.join(", "),
            quote_ident(&self.family.table)
        );

        let conn = self.pool.acquire().await?;
        let outcome = conn.query(&sql, ()).await;
        self.pool.release(conn).await;

        outcome.map(|_| ()).map_err(|e| {
            Error::Config(format!(
                "schema check failed for table '{}' (mapping version {}): {}",
                self.family.table, self.family.version, e
            ))
        })
    }

    pub async fn exists(&self, key: &TicketKey) -> bool {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(&self.family.table),
            quote_ident(&self.family.key_column)
        );
        match self.query_one(&sql, vec![key.to_value()]).await {
            Ok(row) => row.is_some(),
            Err(e) => {
                error!(key = %key, error = %e, "existence check failed");
                false
            }
        }
    }

    /// Read one column as text. `Ok(None)` means the row is gone; a present
    /// row with a NULL value reads as `Ok(Some(None))`.
    pub async fn read_field(
        &self,
        key: &TicketKey,
        column: &str,
    ) -> Result<Option<Option<String>>> {
        let sql = format!(
            "SELECT CAST({} AS TEXT) FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(column),
            quote_ident(&self.family.table),
            quote_ident(&self.family.key_column)
        );
        match self.query_one(&sql, vec![key.to_value()]).await? {
            Some(row) => Ok(Some(row.get::<Option<String>>(0)?)),
            None => Ok(None),
        }
    }

    /// Convenience wrapper over [`read_field`] that flattens missing rows and
    /// NULLs and logs instead of propagating.
    pub async fn get_field(&self, key: &TicketKey, column: &str) -> Option<String> {
        match self.read_field(key, column).await {
            Ok(value) => value.flatten(),
            Err(e) => {
                error!(key = %key, column, error = %e, "field read failed");
                None
            }
        }
    }

    /// Apply a partial update. One statement, boolean outcome.
    pub async fn set_fields(&self, key: &TicketKey, patch: &FieldPatch) -> bool {
        if patch.is_empty() {
            return true;
        }

        let set_clauses: Vec<String> = patch
            .assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", quote_ident(column), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(&self.family.table),
            set_clauses.join(", "),
            quote_ident(&self.family.key_column),
            patch.assignments.len() + 1
        );

        let mut params: Vec<turso::Value> =
            patch.assignments.iter().map(|(_, v)| v.clone()).collect();
        params.push(key.to_value());

        match self.execute(&sql, params).await {
            Ok(_) => true,
            Err(e) => {
                error!(key = %key, error = %e, "field update failed");
                false
            }
        }
    }

    /// Append one formatted entry to the notes log.
    ///
    /// The concatenation happens inside the statement, so concurrent appends
    /// cannot overwrite each other and prior entries are never rewritten.
    pub async fn append_note(&self, key: &TicketKey, entry: &str) -> bool {
        let notes = quote_ident(&self.family.notes_column);
        let sql = format!(
            "UPDATE {} SET {notes} = CASE WHEN {notes} IS NULL OR {notes} = '' \
             THEN ?1 ELSE {notes} || ?2 END WHERE {} = ?3",
            quote_ident(&self.family.table),
            quote_ident(&self.family.key_column),
        );
        let params = vec![
            turso::Value::Text(entry.to_string()),
            turso::Value::Text(format!("\n\n{}", entry)),
            key.to_value(),
        ];
        match self.execute(&sql, params).await {
            Ok(affected) => affected > 0,
            Err(e) => {
                error!(key = %key, error = %e, "note append failed");
                false
            }
        }
    }

    /// Read the raw notes log. `Ok(None)` means the row is gone.
    pub async fn read_notes(&self, key: &TicketKey) -> Result<Option<String>> {
        let notes_column = self.family.notes_column.clone();
        Ok(self
            .read_field(key, &notes_column)
            .await?
            .map(|value| value.unwrap_or_default()))
    }

    /// Delete the ticket row. The terminal transition: the store keeps only
    /// active tickets.
    pub async fn delete(&self, key: &TicketKey) -> bool {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&self.family.table),
            quote_ident(&self.family.key_column)
        );
        match self.execute(&sql, vec![key.to_value()]).await {
            Ok(_) => true,
            Err(e) => {
                error!(key = %key, error = %e, "delete failed");
                false
            }
        }
    }

    /// Statement-level compare-and-swap claim: ownership is taken only if the
    /// owner column is NULL or blank, judged by affected-row count. The
    /// read that classifies a zero-row outcome runs after the attempt, so a
    /// release racing in between is handled by retrying the swap once.
    pub async fn claim_owner(
        &self,
        key: &TicketKey,
        user: &str,
        in_progress_label: &str,
    ) -> ClaimCas {
        let owner = quote_ident(&self.family.owner_column);
        let sql = format!(
            "UPDATE {} SET {owner} = ?1, {} = ?2 \
             WHERE {} = ?3 AND ({owner} IS NULL OR {owner} = '')",
            quote_ident(&self.family.table),
            quote_ident(&self.family.status_column),
            quote_ident(&self.family.key_column),
        );

        for _ in 0..2 {
            let params = vec![
                turso::Value::Text(user.to_string()),
                turso::Value::Text(in_progress_label.to_string()),
                key.to_value(),
            ];
            match self.execute(&sql, params).await {
                Ok(affected) if affected > 0 => return ClaimCas::Claimed,
                Ok(_) => {}
                Err(e) => {
                    error!(key = %key, error = %e, "claim update failed");
                    return ClaimCas::Failed;
                }
            }

            let owner_column = self.family.owner_column.clone();
            match self.read_field(key, &owner_column).await {
                Ok(None) => return ClaimCas::Missing,
                Ok(Some(current)) => {
                    let current = current.unwrap_or_default();
                    let current = current.trim();
                    if current.is_empty() {
                        // Released between our swap and this read; try again.
                        continue;
                    }
                    if current == user.trim() {
                        return ClaimCas::AlreadyOwned;
                    }
                    return ClaimCas::Conflict(current.to_string());
                }
                Err(e) => {
                    error!(key = %key, error = %e, "owner read failed");
                    return ClaimCas::Failed;
                }
            }
        }

        warn!(key = %key, "claim swap kept losing to concurrent releases");
        ClaimCas::Failed
    }

    pub async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.family.table));
        match self.query_one(&sql, vec![]).await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    /// All active tickets with the family's mapped fields, newest first.
    pub async fn list(&self) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let mut selected: Vec<(String, String)> = vec![("key".to_string(), self.family.key_column.clone())];
        for (api_name, column) in &self.family.fields {
            selected.push((api_name.clone(), column.clone()));
        }

        let select_list: Vec<String> = selected
            .iter()
            .map(|(_, column)| format!("CAST({} AS TEXT)", quote_ident(column)))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} DESC",
            select_list.join(", "),
            quote_ident(&self.family.table),
            quote_ident(self.family.order_column())
        );

        let conn = self.pool.acquire().await?;
        let outcome = self.collect_rows(&conn, &sql, &selected).await;
        self.pool.release(conn).await;
        outcome
    }

    async fn collect_rows(
        &self,
        conn: &Connection,
        sql: &str,
        selected: &[(String, String)],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let mut rows = conn.query(sql, ()).await?;
        let mut tickets = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut record = serde_json::Map::new();
            for (i, (api_name, _)) in selected.iter().enumerate() {
                let value = row.get::<Option<String>>(i)?;
                record.insert(
                    api_name.clone(),
                    value.map_or(serde_json::Value::Null, serde_json::Value::String),
                );
            }
            tickets.push(record);
        }
        Ok(tickets)
    }

    async fn query_one(
        &self,
        sql: &str,
        params: Vec<turso::Value>,
    ) -> Result<Option<turso::Row>> {
        let conn = self.pool.acquire().await?;
        let outcome = async {
            let mut rows = conn.query(sql, params).await?;
            Ok::<_, Error>(rows.next().await?)
        }
        .await;
        self.pool.release(conn).await;
        outcome
    }

    async fn execute(&self, sql: &str, params: Vec<turso::Value>) -> Result<u64> {
        let conn = self.pool.acquire().await?;
        let outcome = conn.execute(sql, params).await;
        self.pool.release(conn).await;
        Ok(outcome? as u64)
    }
}

/// Quote an identifier from the mapping config for SQL interpolation.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Status"), "\"Status\"");
        assert_eq!(quote_ident("GRC-Chamados"), "\"GRC-Chamados\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_field_patch_accumulates() {
        let mut patch = FieldPatch::new();
        assert!(patch.is_empty());
        patch.set("Status", turso::Value::Text("Pendente".into()));
        patch.set("Responsavel", turso::Value::Null);
        assert_eq!(patch.columns().collect::<Vec<_>>(), vec!["Status", "Responsavel"]);
    }
}
