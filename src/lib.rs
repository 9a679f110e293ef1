pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod sheet;
pub mod sync;
pub mod tracker;
pub mod types;

pub use config::{Config, FamilyConfig, IssueRef, SheetMapping};
pub use context::{AppContext, Service};
pub use db::{ConnectionPool, FieldPatch, PoolStats, RecordStore};
pub use error::{Error, OpError, OpResult, Result};
pub use lifecycle::{
    ClaimReceipt, CloseReceipt, HealthReport, NoteReceipt, ReleaseReceipt, TicketService,
    UpdateReceipt,
};
pub use sheet::{SheetMirror, SheetStore, Table, TsvSheetStore};
pub use sync::SyncWorkers;
pub use tracker::{IssueUpdate, RedmineClient, TrackerApi};
pub use types::{CloseOutcome, KeyKind, NoteEntry, TicketKey, TicketStatus};
