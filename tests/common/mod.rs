#![allow(dead_code)]

//! Shared harness for lifecycle integration tests: a temp database, a temp
//! sheet file, and a stub tracker wired into a real `TicketService`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use triad::config::{DatabaseConfig, FamilyConfig, IssueRef, SheetMapping, StatusLabels, SyncConfig, TrackerCodes};
use triad::db::pool::ConnectionPool;
use triad::lifecycle::TicketService;
use triad::sheet::{SheetMirror, TsvSheetStore};
use triad::sync::SyncWorkers;
use triad::tracker::{IssueUpdate, TrackerApi};
use triad::types::KeyKind;

/// Records calls instead of talking to a tracker; failure is switchable at
/// runtime to exercise the best-effort path.
pub struct StubTracker {
    failing: AtomicBool,
    calls: Mutex<Vec<(u64, IssueUpdate)>>,
}

impl StubTracker {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(u64, IssueUpdate)> {
        self.calls.lock().clone()
    }
}

impl TrackerApi for StubTracker {
    async fn update_issue(&self, issue_id: u64, update: IssueUpdate) -> bool {
        self.calls.lock().push((issue_id, update));
        !self.failing.load(Ordering::SeqCst)
    }

    async fn probe(&self) -> bool {
        true
    }
}

pub struct Harness {
    pub service: TicketService<StubTracker, TsvSheetStore>,
    pub tracker: Arc<StubTracker>,
    pub pool: Arc<ConnectionPool>,
    pub sheet_path: PathBuf,
    _dir: TempDir,
}

pub fn chamados_family(sheet_path: PathBuf) -> FamilyConfig {
    let mut fields = BTreeMap::new();
    fields.insert("status".to_string(), "Status".to_string());
    fields.insert("responsavel".to_string(), "Responsavel".to_string());
    fields.insert("cidade".to_string(), "Cidade".to_string());
    fields.insert("detalhesProblema".to_string(), "Detalhes_problema".to_string());

    FamilyConfig {
        version: 1,
        table: "GRC-Chamados".to_string(),
        key_column: "ID".to_string(),
        key_kind: KeyKind::Integer,
        owner_column: "Responsavel".to_string(),
        secondary_owner_column: None,
        status_column: "Status".to_string(),
        notes_column: "Observacoes".to_string(),
        issue_ref: IssueRef::Key,
        fields,
        order_by: Some("ID".to_string()),
        status_labels: StatusLabels::default(),
        tracker_codes: TrackerCodes::default(),
        sheet: SheetMapping {
            path: sheet_path,
            key_synonyms: vec!["id".to_string()],
            status_header: "status".to_string(),
            owner_header: "responsavel".to_string(),
            cache_ttl_secs: 60,
        },
    }
}

/// Build a service over a fresh database and sheet, seeded with ticket 42.
pub async fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");

    let sheet_path = dir.path().join("chamados.tsv");
    tokio::fs::write(&sheet_path, "Id:\tStatus\tResponsavel\n42\tPendente\t\n")
        .await
        .expect("seed sheet");

    let db_config = DatabaseConfig {
        path: dir.path().join("triad.db"),
        pool_size: 4,
        acquire_timeout_secs: 1,
    };
    let pool = Arc::new(ConnectionPool::open(&db_config).await.expect("pool"));

    let conn = pool.acquire().await.expect("conn");
    conn.execute(
        "CREATE TABLE \"GRC-Chamados\" (\
            \"ID\" INTEGER PRIMARY KEY, \
            \"Status\" TEXT, \
            \"Responsavel\" TEXT, \
            \"Observacoes\" TEXT, \
            \"Cidade\" TEXT, \
            \"Detalhes_problema\" TEXT)",
        (),
    )
    .await
    .expect("create table");
    conn.execute(
        "INSERT INTO \"GRC-Chamados\" (\"ID\", \"Status\", \"Cidade\") VALUES (42, 'Pendente', 'Vitória')",
        (),
    )
    .await
    .expect("seed ticket");
    pool.release(conn).await;

    let family = Arc::new(chamados_family(sheet_path.clone()));
    let mapping = Arc::new(family.sheet.clone());
    let mirror = Arc::new(SheetMirror::new(
        TsvSheetStore::new(sheet_path.clone()),
        mapping,
    ));
    let tracker = Arc::new(StubTracker::new());
    let workers = Arc::new(SyncWorkers::start(&SyncConfig {
        workers: 2,
        queue_depth: 32,
        retry_interval_secs: 1,
        max_attempts: 3,
    }));

    let service = TicketService::new(
        "chamados",
        family,
        Arc::clone(&pool),
        mirror,
        Arc::clone(&tracker),
        workers,
        Some(1),
    );

    Harness {
        service,
        tracker,
        pool,
        sheet_path,
        _dir: dir,
    }
}

impl Harness {
    pub async fn sheet_contents(&self) -> String {
        tokio::fs::read_to_string(&self.sheet_path)
            .await
            .expect("read sheet")
    }
}

pub fn sar_family(sheet_path: PathBuf) -> FamilyConfig {
    let mut fields = BTreeMap::new();
    fields.insert("status".to_string(), "Status".to_string());
    fields.insert("responsavelHub".to_string(), "ResponsavelHub".to_string());
    fields.insert("responsavelDTC".to_string(), "ResponsavelDTC".to_string());
    fields.insert("cidade".to_string(), "Cidade".to_string());

    FamilyConfig {
        version: 1,
        table: "ExecucaoSar".to_string(),
        key_column: "NumSar".to_string(),
        key_kind: KeyKind::Text,
        owner_column: "ResponsavelHub".to_string(),
        secondary_owner_column: Some("ResponsavelDTC".to_string()),
        status_column: "Status".to_string(),
        notes_column: "Observacoes".to_string(),
        issue_ref: IssueRef::Column {
            column: "ID_redmine".to_string(),
        },
        fields,
        order_by: Some("NumSar".to_string()),
        status_labels: StatusLabels::default(),
        tracker_codes: TrackerCodes::default(),
        sheet: SheetMapping {
            path: sheet_path,
            key_synonyms: vec!["numsar".to_string(), "numero".to_string(), "sar".to_string()],
            status_header: "status".to_string(),
            owner_header: "responsavel".to_string(),
            cache_ttl_secs: 60,
        },
    }
}

/// SAR-family service: text keys, a secondary owner column, and the tracker
/// issue linked through `ID_redmine`. Seeds ES-001 (linked to issue 777)
/// and ES-002 (no link).
pub async fn sar_harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");

    let sheet_path = dir.path().join("execucao.tsv");
    tokio::fs::write(
        &sheet_path,
        "Num SAR:\tStatus\tResponsavel\nES-001\tPendente\t\nES-002\tPendente\t\n",
    )
    .await
    .expect("seed sheet");

    let db_config = DatabaseConfig {
        path: dir.path().join("triad.db"),
        pool_size: 4,
        acquire_timeout_secs: 1,
    };
    let pool = Arc::new(ConnectionPool::open(&db_config).await.expect("pool"));

    let conn = pool.acquire().await.expect("conn");
    conn.execute(
        "CREATE TABLE \"ExecucaoSar\" (\
            \"NumSar\" TEXT PRIMARY KEY, \
            \"Status\" TEXT, \
            \"ResponsavelHub\" TEXT, \
            \"ResponsavelDTC\" TEXT, \
            \"Observacoes\" TEXT, \
            \"ID_redmine\" INTEGER, \
            \"Cidade\" TEXT)",
        (),
    )
    .await
    .expect("create table");
    conn.execute(
        "INSERT INTO \"ExecucaoSar\" (\"NumSar\", \"Status\", \"ID_redmine\") \
         VALUES ('ES-001', 'Pendente', 777), ('ES-002', 'Pendente', NULL)",
        (),
    )
    .await
    .expect("seed tickets");
    pool.release(conn).await;

    let family = Arc::new(sar_family(sheet_path.clone()));
    let mapping = Arc::new(family.sheet.clone());
    let mirror = Arc::new(SheetMirror::new(
        TsvSheetStore::new(sheet_path.clone()),
        mapping,
    ));
    let tracker = Arc::new(StubTracker::new());
    let workers = Arc::new(SyncWorkers::start(&SyncConfig {
        workers: 2,
        queue_depth: 32,
        retry_interval_secs: 1,
        max_attempts: 3,
    }));

    let service = TicketService::new(
        "sar",
        family,
        Arc::clone(&pool),
        mirror,
        Arc::clone(&tracker),
        workers,
        Some(1),
    );

    Harness {
        service,
        tracker,
        pool,
        sheet_path,
        _dir: dir,
    }
}

/// Poll `check` until it passes or two seconds elapse.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}
