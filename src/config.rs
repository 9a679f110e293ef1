//! Application configuration.
//!
//! Configuration is a single YAML document and includes:
//! - Database location and pool sizing
//! - Issue-tracker endpoint, credentials, and retry policy
//! - Background sync worker and reconciliation settings
//! - One explicit, versioned field mapping per ticket family
//!
//! Mappings are validated fail-fast at load time; nothing is inferred from
//! live schemas at request time.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::types::{KeyKind, TicketStatus};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    pub tracker: TrackerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Ticket families, keyed by family name (e.g. "chamados", "sar").
    pub families: BTreeMap<String, FamilyConfig>,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: Config = serde_yaml_ng::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation. Runs once at load; a bad mapping aborts startup
    /// instead of degrading into request-time guessing.
    pub fn validate(&self) -> Result<()> {
        if self.families.is_empty() {
            return Err(Error::Config("no ticket families configured".to_string()));
        }
        if self.database.pool_size == 0 {
            return Err(Error::Config("database.pool_size must be at least 1".to_string()));
        }
        if self.tracker.attempts == 0 {
            return Err(Error::Config("tracker.attempts must be at least 1".to_string()));
        }
        for (name, family) in &self.families {
            family
                .validate()
                .map_err(|e| Error::Config(format!("family '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (the ticket tables live in one database).
    pub path: PathBuf,

    /// Pool capacity established at startup (default: 10)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Bounded wait for a pooled connection before falling back to a fresh
    /// one, in seconds (default: 2)
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    10
}

fn default_acquire_timeout() -> u64 {
    2
}

/// Issue-tracker connection and retry policy.
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base endpoint, e.g. `http://tracker.example.net/redmine/`
    pub endpoint: Url,

    /// Static API key, sent as `X-Redmine-API-Key`.
    pub api_key: String,

    /// Per-attempt request timeout in seconds (default: 20)
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,

    /// Attempts per update (default: 3)
    #[serde(default = "default_tracker_attempts")]
    pub attempts: u32,

    /// Fixed delay between attempts in seconds (default: 2)
    #[serde(default = "default_tracker_retry_delay")]
    pub retry_delay_secs: u64,

    /// Tracker user assigned on claim, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_assignee_id: Option<u64>,
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .field("attempts", &self.attempts)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("claim_assignee_id", &self.claim_assignee_id)
            .finish()
    }
}

fn default_tracker_timeout() -> u64 {
    20
}

fn default_tracker_attempts() -> u32 {
    3
}

fn default_tracker_retry_delay() -> u64 {
    2
}

/// Background sync worker pool and reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Worker task count (default: 10)
    #[serde(default = "default_sync_workers")]
    pub workers: usize,

    /// Job queue depth; submissions beyond it are dropped with an error log
    /// (default: 256)
    #[serde(default = "default_sync_queue_depth")]
    pub queue_depth: usize,

    /// Reconciliation loop interval in seconds (default: 60)
    #[serde(default = "default_sync_retry_interval")]
    pub retry_interval_secs: u64,

    /// Attempts per backlog entry before it is dropped (default: 5)
    #[serde(default = "default_sync_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_sync_workers(),
            queue_depth: default_sync_queue_depth(),
            retry_interval_secs: default_sync_retry_interval(),
            max_attempts: default_sync_max_attempts(),
        }
    }
}

fn default_sync_workers() -> usize {
    10
}

fn default_sync_queue_depth() -> usize {
    256
}

fn default_sync_retry_interval() -> u64 {
    60
}

fn default_sync_max_attempts() -> u32 {
    5
}

/// Where a family's remote issue id comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum IssueRef {
    /// The ticket key is the remote issue id (numeric families).
    Key,
    /// A dedicated column links the ticket to its remote issue.
    Column { column: String },
}

/// Explicit, versioned mapping for one ticket family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// Mapping schema version; bump when the table or sheet layout changes.
    pub version: u32,

    /// Ticket table name.
    pub table: String,

    pub key_column: String,
    pub key_kind: KeyKind,

    /// Owner column; explicit null on this column means "release ownership".
    pub owner_column: String,

    /// Secondary owner column cleared together with the owner on release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_owner_column: Option<String>,

    pub status_column: String,
    pub notes_column: String,

    pub issue_ref: IssueRef,

    /// External API field name -> column name. The update vocabulary is this
    /// table, nothing else.
    pub fields: BTreeMap<String, String>,

    /// Column for newest-first listing (defaults to the key column).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    #[serde(default)]
    pub status_labels: StatusLabels,

    #[serde(default)]
    pub tracker_codes: TrackerCodes,

    pub sheet: SheetMapping,
}

impl FamilyConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.version == 0 {
            return Err("version must be at least 1".to_string());
        }
        for (label, value) in [
            ("table", &self.table),
            ("key_column", &self.key_column),
            ("owner_column", &self.owner_column),
            ("status_column", &self.status_column),
            ("notes_column", &self.notes_column),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", label));
            }
        }
        if let IssueRef::Column { column } = &self.issue_ref
            && column.trim().is_empty()
        {
            return Err("issue_ref.column must not be empty".to_string());
        }
        if self.fields.is_empty() {
            return Err("fields mapping must not be empty".to_string());
        }
        if !self.fields.contains_key("status") {
            return Err("fields mapping must include 'status'".to_string());
        }
        self.sheet.validate()
    }

    /// Every column the family touches, for the startup schema check.
    pub fn mapped_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.key_column.as_str(),
            self.owner_column.as_str(),
            self.status_column.as_str(),
            self.notes_column.as_str(),
        ];
        if let Some(secondary) = &self.secondary_owner_column {
            columns.push(secondary.as_str());
        }
        if let IssueRef::Column { column } = &self.issue_ref {
            columns.push(column.as_str());
        }
        columns.extend(self.fields.values().map(String::as_str));
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    pub fn order_column(&self) -> &str {
        self.order_by.as_deref().unwrap_or(&self.key_column)
    }
}

/// Display labels written to the database and spreadsheet per status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusLabels {
    #[serde(default = "default_label_pending")]
    pub pending: String,
    #[serde(default = "default_label_in_progress")]
    pub in_progress: String,
    #[serde(default = "default_label_completed")]
    pub completed: String,
    #[serde(default = "default_label_cancelled")]
    pub cancelled: String,
}

impl StatusLabels {
    pub fn label(&self, status: TicketStatus) -> &str {
        match status {
            TicketStatus::Pending => &self.pending,
            TicketStatus::InProgress => &self.in_progress,
            TicketStatus::Completed => &self.completed,
            TicketStatus::Cancelled => &self.cancelled,
        }
    }

    /// Resolve a raw status string: the family label first, then the
    /// canonical name. Unknown strings resolve to `None`.
    pub fn resolve(&self, raw: &str) -> Option<TicketStatus> {
        let raw = raw.trim();
        for status in [
            TicketStatus::Pending,
            TicketStatus::InProgress,
            TicketStatus::Completed,
            TicketStatus::Cancelled,
        ] {
            if raw.eq_ignore_ascii_case(self.label(status)) {
                return Some(status);
            }
        }
        raw.parse::<TicketStatus>().ok()
    }
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            pending: default_label_pending(),
            in_progress: default_label_in_progress(),
            completed: default_label_completed(),
            cancelled: default_label_cancelled(),
        }
    }
}

fn default_label_pending() -> String {
    "Pendente".to_string()
}

fn default_label_in_progress() -> String {
    "Em Andamento".to_string()
}

fn default_label_completed() -> String {
    "Concluído".to_string()
}

fn default_label_cancelled() -> String {
    "Cancelado".to_string()
}

/// Tracker status vocabulary. Unrecognized statuses fall back to the
/// pending code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerCodes {
    #[serde(default = "default_code_pending")]
    pub pending: u32,
    #[serde(default = "default_code_in_progress")]
    pub in_progress: u32,
    #[serde(default = "default_code_completed")]
    pub completed: u32,
    #[serde(default = "default_code_cancelled")]
    pub cancelled: u32,
}

impl TrackerCodes {
    pub fn code(&self, status: TicketStatus) -> u32 {
        match status {
            TicketStatus::Pending => self.pending,
            TicketStatus::InProgress => self.in_progress,
            TicketStatus::Completed => self.completed,
            TicketStatus::Cancelled => self.cancelled,
        }
    }
}

impl Default for TrackerCodes {
    fn default() -> Self {
        Self {
            pending: default_code_pending(),
            in_progress: default_code_in_progress(),
            completed: default_code_completed(),
            cancelled: default_code_cancelled(),
        }
    }
}

fn default_code_pending() -> u32 {
    1
}

fn default_code_in_progress() -> u32 {
    2
}

fn default_code_completed() -> u32 {
    3
}

fn default_code_cancelled() -> u32 {
    5
}

/// Spreadsheet mirror mapping for one family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetMapping {
    /// Spreadsheet file path.
    pub path: PathBuf,

    /// Substrings that identify the key column after header normalization;
    /// the first header containing any of them wins.
    pub key_synonyms: Vec<String>,

    /// Normalized header of the status column.
    pub status_header: String,

    /// Normalized header of the owner column.
    pub owner_header: String,

    /// Parsed-sheet cache TTL for read surfaces, in seconds (default: 60).
    /// The write path always re-reads fresh.
    #[serde(default = "default_sheet_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl SheetMapping {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.key_synonyms.is_empty() {
            return Err("sheet.key_synonyms must not be empty".to_string());
        }
        if self.key_synonyms.iter().any(|s| s.trim().is_empty()) {
            return Err("sheet.key_synonyms entries must not be blank".to_string());
        }
        if self.status_header.trim().is_empty() {
            return Err("sheet.status_header must not be empty".to_string());
        }
        if self.owner_header.trim().is_empty() {
            return Err("sheet.owner_header must not be empty".to_string());
        }
        Ok(())
    }
}

fn default_sheet_cache_ttl() -> u64 {
    60
}
