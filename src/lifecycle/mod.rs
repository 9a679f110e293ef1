//! The ticket state machine.
//!
//! Every operation follows the same shape: validate, check existence,
//! perform the synchronous database mutation (the source of truth), then
//! schedule best-effort propagation to the spreadsheet mirror and the issue
//! tracker on the background workers. Only the database step can fail the
//! caller; mirror and tracker failures are logged and reconciled later, or
//! not at all.

pub mod notes;

use std::sync::Arc;
use std::time::Duration;

use jiff::Zoned;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{FamilyConfig, IssueRef};
use crate::db::pool::{ConnectionPool, PoolStats};
use crate::db::store::{ClaimCas, FieldPatch, RecordStore};
use crate::error::{OpError, OpResult};
use crate::sheet::{SheetMirror, SheetStore};
use crate::sync::SyncWorkers;
use crate::tracker::{IssueUpdate, TrackerApi};
use crate::types::{CloseOutcome, NoteEntry, TicketKey, TicketStatus};

/// Bounded wait the generic-update background job gives its mirror and
/// tracker futures before logging them as timed out.
const UPDATE_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
    pub success: bool,
    pub message: String,
    pub responsavel_atual: String,
    pub already_claimed: bool,
    pub visual_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReceipt {
    pub success: bool,
    pub message: String,
    pub visual_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseReceipt {
    pub success: bool,
    pub message: String,
    pub outcome: CloseOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteReceipt {
    pub success: bool,
    pub message: String,
    pub note: NoteEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReceipt {
    pub success: bool,
    pub message: String,
    pub updated_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub records: Option<i64>,
    pub pool: PoolStats,
    pub sheet_cache_age_secs: Option<f64>,
    pub sync_backlog: usize,
    pub timestamp: String,
}

/// Lifecycle orchestrator for one ticket family.
pub struct TicketService<T, S>
where
    T: TrackerApi + 'static,
    S: SheetStore + 'static,
{
    family_name: String,
    family: Arc<FamilyConfig>,
    pool: Arc<ConnectionPool>,
    store: Arc<RecordStore>,
    mirror: Arc<SheetMirror<S>>,
    tracker: Arc<T>,
    workers: Arc<SyncWorkers>,
    claim_assignee: Option<u64>,
}

impl<T, S> TicketService<T, S>
where
    T: TrackerApi + 'static,
    S: SheetStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        family_name: impl Into<String>,
        family: Arc<FamilyConfig>,
        pool: Arc<ConnectionPool>,
        mirror: Arc<SheetMirror<S>>,
        tracker: Arc<T>,
        workers: Arc<SyncWorkers>,
        claim_assignee: Option<u64>,
    ) -> Self {
        let store = Arc::new(RecordStore::new(Arc::clone(&pool), Arc::clone(&family)));
        Self {
            family_name: family_name.into(),
            family,
            pool,
            store,
            mirror,
            tracker,
            workers,
            claim_assignee,
        }
    }

    pub fn family_name(&self) -> &str {
        &self.family_name
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Take ownership of a ticket.
    ///
    /// Ownership is decided by a single conditional update; the conflict
    /// check never races against another claim.
    pub async fn claim(&self, raw_key: &str, user: &str, visual_only: bool) -> OpResult<ClaimReceipt> {
        let user = user.trim();
        if user.is_empty() {
            return Err(OpError::Validation("owner must not be empty".to_string()));
        }
        let key = self.key(raw_key)?;
        self.ensure_exists(&key).await?;

        let in_progress = self.family.status_labels.label(TicketStatus::InProgress).to_string();
        match self.store.claim_owner(&key, user, &in_progress).await {
            ClaimCas::Claimed => {
                info!(family = %self.family_name, key = %key, user, "ticket claimed");
                if !visual_only {
                    self.schedule_mirror(&key, Some(in_progress), Some(user.to_string()));
                    self.schedule_tracker(
                        &key,
                        IssueUpdate {
                            status_id: Some(self.family.tracker_codes.code(TicketStatus::InProgress)),
                            notes: None,
                            assigned_to: self.claim_assignee.map(Some),
                        },
                    )
                    .await;
                }
                Ok(ClaimReceipt {
                    success: true,
                    message: format!("ticket {} claimed by {}", key, user),
                    responsavel_atual: user.to_string(),
                    already_claimed: false,
                    visual_only,
                })
            }
            ClaimCas::AlreadyOwned => Ok(ClaimReceipt {
                success: true,
                message: format!("ticket {} is already claimed by {}", key, user),
                responsavel_atual: user.to_string(),
                already_claimed: true,
                visual_only,
            }),
            ClaimCas::Conflict(owner) => Err(OpError::Conflict {
                message: format!("ticket {} is already claimed by {}", key, owner),
                current_owner: owner,
            }),
            ClaimCas::Missing => Err(self.not_found(&key)),
            ClaimCas::Failed => Err(OpError::backend()),
        }
    }

    /// Release ownership. Always allowed: there is no ownership check on
    /// release.
    pub async fn release(&self, raw_key: &str, visual_only: bool) -> OpResult<ReleaseReceipt> {
        let key = self.key(raw_key)?;
        self.ensure_exists(&key).await?;

        let pending = self.family.status_labels.label(TicketStatus::Pending).to_string();
        let mut patch = FieldPatch::new();
        patch.set(&self.family.owner_column, turso::Value::Null);
        if let Some(secondary) = &self.family.secondary_owner_column {
            patch.set(secondary, turso::Value::Null);
        }
        patch.set(&self.family.status_column, turso::Value::Text(pending.clone()));

        if !self.store.set_fields(&key, &patch).await {
            return Err(OpError::backend());
        }

        info!(family = %self.family_name, key = %key, "ticket released");
        if !visual_only {
            self.schedule_mirror(&key, Some(pending), Some(String::new()));
            self.schedule_tracker(
                &key,
                IssueUpdate {
                    status_id: Some(self.family.tracker_codes.code(TicketStatus::Pending)),
                    notes: None,
                    // Explicit null: clear the tracker assignment.
                    assigned_to: Some(None),
                },
            )
            .await;
        }

        Ok(ReleaseReceipt {
            success: true,
            message: format!("ticket {} released", key),
            visual_only,
        })
    }

    /// Terminal transition: delete the row, then mirror the outcome.
    /// There is no reopen.
    pub async fn close(&self, raw_key: &str, outcome: CloseOutcome) -> OpResult<CloseReceipt> {
        let key = self.key(raw_key)?;
        self.ensure_exists(&key).await?;

        // The issue link column dies with the row; resolve it first.
        let issue_id = self.issue_id(&key).await;

        if !self.store.delete(&key).await {
            return Err(OpError::backend());
        }

        info!(family = %self.family_name, key = %key, %outcome, "ticket closed");
        let label = self.family.status_labels.label(outcome.status()).to_string();
        self.schedule_mirror(&key, Some(label), None);
        if let Some(issue_id) = issue_id {
            self.schedule_tracker_resolved(
                &key,
                issue_id,
                IssueUpdate {
                    status_id: Some(self.family.tracker_codes.code(outcome.status())),
                    notes: None,
                    assigned_to: None,
                },
            );
        }

        Ok(CloseReceipt {
            success: true,
            message: format!("ticket {} closed as {}", key, outcome),
            outcome,
        })
    }

    /// Append a timestamped, user-attributed note and forward it to the
    /// tracker as a comment.
    pub async fn annotate(&self, raw_key: &str, user: &str, text: &str) -> OpResult<NoteReceipt> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OpError::Validation("note text must not be empty".to_string()));
        }
        let user = user.trim();
        let user = if user.is_empty() { "system" } else { user };

        let key = self.key(raw_key)?;
        self.ensure_exists(&key).await?;

        let now = Zoned::now();
        let entry = notes::format_entry(user, text, &now);
        if !self.store.append_note(&key, &entry).await {
            return Err(OpError::backend());
        }

        info!(family = %self.family_name, key = %key, user, "note appended");
        self.schedule_tracker(
            &key,
            IssueUpdate {
                status_id: None,
                notes: Some(format!("[{}] {}", user, text)),
                assigned_to: None,
            },
        )
        .await;

        Ok(NoteReceipt {
            success: true,
            message: "note added".to_string(),
            note: notes::entry_for(user, text, &now),
        })
    }

    /// Read the notes log as structured entries.
    pub async fn notes(&self, raw_key: &str) -> OpResult<Vec<NoteEntry>> {
        let key = self.key(raw_key)?;
        self.ensure_exists(&key).await?;

        match self.store.read_notes(&key).await {
            Ok(Some(raw)) => Ok(notes::parse_notes(&raw)),
            Ok(None) => Err(self.not_found(&key)),
            Err(e) => {
                warn!(family = %self.family_name, key = %key, error = %e, "notes read failed");
                Err(OpError::backend())
            }
        }
    }

    /// Apply an arbitrary subset of the family's mapped fields.
    ///
    /// Null values are the "unset" sentinel and are dropped, except on the
    /// owner columns where explicit null releases ownership. When the field
    /// set includes `status`, the dual propagation is scheduled; its mirror
    /// and tracker futures are joined with a bounded timeout and their
    /// outcomes surface in the log only.
    pub async fn generic_update(
        &self,
        raw_key: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> OpResult<UpdateReceipt> {
        let key = self.key(raw_key)?;
        self.ensure_exists(&key).await?;

        let mut patch = FieldPatch::new();
        let mut applied = Vec::new();
        let mut status_raw: Option<String> = None;
        let mut owner_raw: Option<String> = None;

        for (api_name, value) in fields {
            let Some(column) = self.family.fields.get(api_name) else {
                warn!(family = %self.family_name, field = %api_name, "unrecognized field ignored");
                continue;
            };
            let is_owner = *column == self.family.owner_column
                || self.family.secondary_owner_column.as_deref() == Some(column.as_str());

            let bound = match value {
                serde_json::Value::Null if is_owner => turso::Value::Null,
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => {
                    if api_name == "status" {
                        status_raw = Some(s.clone());
                    }
                    if *column == self.family.owner_column {
                        owner_raw = Some(s.clone());
                    }
                    turso::Value::Text(s.clone())
                }
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        turso::Value::Integer(i)
                    } else {
                        turso::Value::Real(n.as_f64().unwrap_or_default())
                    }
                }
                serde_json::Value::Bool(b) => turso::Value::Integer(i64::from(*b)),
                _ => {
                    warn!(family = %self.family_name, field = %api_name, "non-scalar field ignored");
                    continue;
                }
            };
            patch.set(column, bound);
            applied.push(api_name.clone());
        }

        if patch.is_empty() {
            return Err(OpError::Validation("no recognized fields to update".to_string()));
        }

        if !self.store.set_fields(&key, &patch).await {
            return Err(OpError::backend());
        }

        info!(family = %self.family_name, key = %key, fields = ?applied, "ticket updated");

        if let Some(status_raw) = status_raw {
            // Unrecognized statuses map to the pending tracker code.
            let status = self
                .family
                .status_labels
                .resolve(&status_raw)
                .unwrap_or(TicketStatus::Pending);
            let code = self.family.tracker_codes.code(status);
            let issue_id = self.issue_id(&key).await;
            self.schedule_update_batch(&key, status_raw, owner_raw, issue_id, code);
        }

        Ok(UpdateReceipt {
            success: true,
            message: format!("ticket {} updated", key),
            updated_fields: applied,
        })
    }

    /// All active tickets, mapped fields only, newest first.
    pub async fn list(&self) -> OpResult<Vec<serde_json::Map<String, serde_json::Value>>> {
        self.store.list().await.map_err(|e| {
            warn!(family = %self.family_name, error = %e, "list failed");
            OpError::backend()
        })
    }

    /// Aggregate health: database probe, pool stats, cache age, backlog.
    pub async fn health(&self) -> HealthReport {
        let records = match self.store.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(family = %self.family_name, error = %e, "health count failed");
                None
            }
        };

        HealthReport {
            status: if records.is_some() { "healthy" } else { "unhealthy" },
            records,
            pool: self.pool.stats(),
            sheet_cache_age_secs: self.mirror.cache_age().map(|age| age.as_secs_f64()),
            sync_backlog: self.workers.backlog_len(),
            timestamp: Zoned::now().strftime("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }

    fn key(&self, raw: &str) -> OpResult<TicketKey> {
        TicketKey::parse(raw, self.family.key_kind)
            .map_err(|_| OpError::Validation(format!("invalid ticket key '{}'", raw)))
    }

    async fn ensure_exists(&self, key: &TicketKey) -> OpResult<()> {
        if self.store.exists(key).await {
            Ok(())
        } else {
            Err(self.not_found(key))
        }
    }

    fn not_found(&self, key: &TicketKey) -> OpError {
        OpError::NotFound(format!("ticket {} not found", key))
    }

    /// Remote issue id for this ticket, per the family's link config.
    /// `None` means "no issue to update" and is never an error.
    async fn issue_id(&self, key: &TicketKey) -> Option<u64> {
        match &self.family.issue_ref {
            IssueRef::Key => match key {
                TicketKey::Integer(n) if *n >= 0 => Some(*n as u64),
                _ => {
                    warn!(family = %self.family_name, key = %key, "key cannot address the tracker");
                    None
                }
            },
            IssueRef::Column { column } => {
                let raw = self.store.get_field(key, column).await.unwrap_or_default();
                let raw = raw.trim();
                if raw.is_empty() {
                    info!(family = %self.family_name, key = %key, "no issue linked, tracker skipped");
                    return None;
                }
                match raw.parse::<u64>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!(family = %self.family_name, key = %key, raw, "issue link is not numeric");
                        None
                    }
                }
            }
        }
    }

    fn schedule_mirror(&self, key: &TicketKey, status: Option<String>, owner: Option<String>) {
        let mirror = Arc::clone(&self.mirror);
        let key = key.to_string();
        let label = format!("{}:{} sheet", self.family_name, key);
        self.workers.submit(label, move || {
            let mirror = Arc::clone(&mirror);
            let key = key.clone();
            let status = status.clone();
            let owner = owner.clone();
            async move { mirror.sync(&key, status.as_deref(), owner.as_deref()).await }
        });
    }

    async fn schedule_tracker(&self, key: &TicketKey, update: IssueUpdate) {
        let Some(issue_id) = self.issue_id(key).await else {
            return;
        };
        self.schedule_tracker_resolved(key, issue_id, update);
    }

    fn schedule_tracker_resolved(&self, key: &TicketKey, issue_id: u64, update: IssueUpdate) {
        let tracker = Arc::clone(&self.tracker);
        let label = format!("{}:{} tracker #{}", self.family_name, key, issue_id);
        self.workers.submit(label, move || {
            let tracker = Arc::clone(&tracker);
            let update = update.clone();
            async move { tracker.update_issue(issue_id, update).await }
        });
    }

    /// One composite job for the generic-update propagation: both futures
    /// run concurrently and are joined with a bounded timeout, outcomes go
    /// to the log only.
    fn schedule_update_batch(
        &self,
        key: &TicketKey,
        status_label: String,
        owner: Option<String>,
        issue_id: Option<u64>,
        status_code: u32,
    ) {
        let mirror = Arc::clone(&self.mirror);
        let tracker = Arc::clone(&self.tracker);
        let family = self.family_name.clone();
        let key = key.to_string();
        let label = format!("{}:{} update batch", family, key);

        self.workers.submit(label, move || {
            let mirror = Arc::clone(&mirror);
            let tracker = Arc::clone(&tracker);
            let family = family.clone();
            let key = key.clone();
            let status_label = status_label.clone();
            let owner = owner.clone();

            async move {
                let batch = futures::future::join(
                    mirror.sync(&key, Some(&status_label), owner.as_deref()),
                    async {
                        match issue_id {
                            Some(issue_id) => {
                                tracker
                                    .update_issue(
                                        issue_id,
                                        IssueUpdate {
                                            status_id: Some(status_code),
                                            notes: None,
                                            assigned_to: None,
                                        },
                                    )
                                    .await
                            }
                            None => true,
                        }
                    },
                );
                match tokio::time::timeout(UPDATE_JOIN_TIMEOUT, batch).await {
                    Ok((sheet_ok, tracker_ok)) => {
                        info!(family = %family, key = %key, sheet_ok, tracker_ok, "update batch finished");
                        sheet_ok && tracker_ok
                    }
                    Err(_) => {
                        warn!(family = %family, key = %key, "update batch timed out");
                        false
                    }
                }
            }
        });
    }
}
