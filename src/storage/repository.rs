//! Repository Pattern for the Guide Store
//!
//! This module provides the trait-based store the sync loops work against,
//! decoupling them from the storage engine:
//! - SQLite for production
//! - An in-memory mock for tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Sync Loops                           │
//! │        (transmitter, field monitor, pull monitor)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GuideRepository                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!       ┌─────────────────┐         ┌─────────────────┐
//!       │     SQLite      │         │      Mock       │
//!       │  Implementation │         │ Implementation  │
//!       └─────────────────┘         └─────────────────┘
//! ```
//!
//! Writes are optimistic: [`GuideRepository::save`] only succeeds when the
//! stored `version` still matches the one that was read, and returns
//! [`Error::Conflict`] otherwise.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{Guide, GuideDetails, NewGuide, Situation, TransmissionStatus, WatchStatus};

// ============================================================================
// Core Types
// ============================================================================

/// Guide counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub awaiting: usize,
    pub processing: usize,
    pub transmitted: usize,
    pub error: usize,
    pub not_watched: usize,
    pub watching: usize,
    pub finalized: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.awaiting + self.processing + self.transmitted + self.error
    }

    fn add(&mut self, tx: TransmissionStatus, watch: WatchStatus, n: usize) {
        match tx {
            TransmissionStatus::Awaiting => self.awaiting += n,
            TransmissionStatus::Processing => self.processing += n,
            TransmissionStatus::Transmitted => self.transmitted += n,
            TransmissionStatus::Error => self.error += n,
        }
        match watch {
            WatchStatus::NotWatched => self.not_watched += n,
            WatchStatus::Watching => self.watching += n,
            WatchStatus::Finalized => self.finalized += n,
        }
    }
}

/// Reject writes that would break the status/message pairing
fn check_invariants(guide: &Guide) -> Result<()> {
    match guide.transmission_status {
        TransmissionStatus::Error
            if guide
                .error_message
                .as_deref()
                .map_or(true, |m| m.trim().is_empty()) =>
        {
            Err(Error::other(format!(
                "guide {}: error status requires a message",
                guide.guide_number
            )))
        }
        TransmissionStatus::Transmitted if guide.error_message.is_some() => Err(Error::other(
            format!(
                "guide {}: transmitted guide cannot carry an error message",
                guide.guide_number
            ),
        )),
        _ => Ok(()),
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Store for guides
///
/// Each call is its own transaction. Query results are ordered by insertion
/// (discovery order).
pub trait GuideRepository: Send + Sync {
    /// Create a guide in `Awaiting` / `NotWatched`
    fn insert_guide(&self, guide: &NewGuide) -> Result<Guide>;

    /// Get guide by external number
    fn get_by_number(&self, guide_number: &str) -> Result<Option<Guide>>;

    /// All guides with the given transmission status
    fn find_by_transmission_status(&self, status: TransmissionStatus) -> Result<Vec<Guide>>;

    /// All guides under observation
    fn find_watching(&self) -> Result<Vec<Guide>>;

    /// Transmitted guides processed at or after `since`
    fn find_transmitted_since(&self, since: DateTime<Utc>) -> Result<Vec<Guide>>;

    /// `Processing` guides whose processing started before `before`
    fn find_stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<Guide>>;

    /// Persist every mutable field of `guide`
    ///
    /// Fails with [`Error::Conflict`] when the stored version moved since
    /// `guide` was read. Returns the guide with its new version.
    fn save(&self, guide: &Guide) -> Result<Guide>;

    /// Guide counts per status
    fn status_counts(&self) -> Result<StatusCounts>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

const GUIDE_COLUMNS: &str = "id, version, numero_guia, tp_status, status_monitoramento, \
    situacao_guia, senha_autorizacao, qtde_diarias_autorizadas, tipo_acomodacao_autorizada, \
    cnes_autorizado, data_autorizacao, observacao_guia, justificativa_operadora, data_alta, \
    tipo_alta, motivo_encerramento, tentativas, mensagem_erro, data_processamento, \
    data_criacao, data_atualizacao, data_ultima_consulta, detalhes";

/// Fixed-width timestamps keep text comparison in SQL chronological
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fmt_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn code_error(idx: usize, code: &str) -> rusqlite::Error {
    conversion_error(
        idx,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown status code '{code}'"),
        ),
    )
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| conversion_error(idx, e))
        })
        .transpose()
}

fn required_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    ts_at(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        String::from("timestamp"),
        Type::Null,
    ))
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn row_to_guide(row: &Row<'_>) -> rusqlite::Result<Guide> {
    let tp: String = row.get(3)?;
    let watch: String = row.get(4)?;
    let situation: String = row.get(5)?;
    let details: String = row.get(22)?;

    Ok(Guide {
        id: row.get(0)?,
        version: row.get(1)?,
        guide_number: row.get(2)?,
        transmission_status: TransmissionStatus::from_code(&tp).ok_or_else(|| code_error(3, &tp))?,
        watch_status: WatchStatus::from_code(&watch).ok_or_else(|| code_error(4, &watch))?,
        situation: Situation::parse(&situation).ok_or_else(|| code_error(5, &situation))?,
        authorization_password: row.get(6)?,
        authorized_days: row.get(7)?,
        authorized_accommodation: row.get(8)?,
        authorized_cnes: row.get(9)?,
        authorization_date: date_at(row, 10)?,
        notes: row.get(11)?,
        payer_justification: row.get(12)?,
        discharge_date: date_at(row, 13)?,
        discharge_type: row.get(14)?,
        closure_reason: row.get(15)?,
        attempts: row.get(16)?,
        error_message: row.get(17)?,
        processed_at: ts_at(row, 18)?,
        created_at: required_ts_at(row, 19)?,
        updated_at: required_ts_at(row, 20)?,
        last_checked_at: ts_at(row, 21)?,
        details: serde_json::from_str::<GuideDetails>(&details)
            .map_err(|e| conversion_error(22, e))?,
    })
}

/// SQLite implementation of GuideRepository
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteGuideRepository {
    conn: Mutex<Connection>,
}

impl SqliteGuideRepository {
    /// Create a new SQLite repository
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite guide store initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::poisoned("sqlite connection"))
    }

    /// Create database schema
    fn create_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS guias (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version INTEGER NOT NULL DEFAULT 0,
                    numero_guia TEXT NOT NULL UNIQUE,
                    tp_status TEXT NOT NULL DEFAULT 'A',
                    status_monitoramento TEXT NOT NULL DEFAULT 'N',
                    situacao_guia TEXT NOT NULL DEFAULT 'P',
                    senha_autorizacao TEXT,
                    qtde_diarias_autorizadas INTEGER,
                    tipo_acomodacao_autorizada TEXT,
                    cnes_autorizado TEXT,
                    data_autorizacao TEXT,
                    observacao_guia TEXT,
                    justificativa_operadora TEXT,
                    data_alta TEXT,
                    tipo_alta TEXT,
                    motivo_encerramento TEXT,
                    tentativas INTEGER NOT NULL DEFAULT 0,
                    mensagem_erro TEXT,
                    data_processamento TEXT,
                    data_criacao TEXT NOT NULL,
                    data_atualizacao TEXT NOT NULL,
                    data_ultima_consulta TEXT,
                    detalhes TEXT NOT NULL DEFAULT '{}',
                    CHECK (tp_status <> 'E' OR mensagem_erro IS NOT NULL),
                    CHECK (tp_status <> 'T' OR mensagem_erro IS NULL)
                );

                CREATE INDEX IF NOT EXISTS idx_guias_tp_status
                    ON guias(tp_status);

                CREATE INDEX IF NOT EXISTS idx_guias_monitoramento
                    ON guias(status_monitoramento);

                CREATE INDEX IF NOT EXISTS idx_guias_processamento
                    ON guias(data_processamento);
                "#,
        )?;

        Ok(())
    }

    fn query_guides(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Guide>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let guides = stmt
            .query_map(params, row_to_guide)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(guides)
    }
}

impl GuideRepository for SqliteGuideRepository {
    fn insert_guide(&self, guide: &NewGuide) -> Result<Guide> {
        let now = fmt_ts(&Utc::now());
        let details = serde_json::to_string(&guide.details)?;

        {
            let conn = self.lock()?;
            conn.execute(
                r#"
                    INSERT INTO guias (
                        numero_guia, situacao_guia, senha_autorizacao, qtde_diarias_autorizadas,
                        tipo_acomodacao_autorizada, data_autorizacao, observacao_guia,
                        data_criacao, data_atualizacao, detalhes
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
                    "#,
                params![
                    guide.guide_number,
                    guide.situation.code(),
                    guide.authorization_password,
                    guide.authorized_days,
                    guide.authorized_accommodation,
                    guide.authorization_date.as_ref().map(fmt_date),
                    guide.notes,
                    now,
                    details,
                ],
            )?;
        }

        self.get_by_number(&guide.guide_number)?
            .ok_or_else(|| Error::not_found(&guide.guide_number))
    }

    fn get_by_number(&self, guide_number: &str) -> Result<Option<Guide>> {
        let conn = self.lock()?;
        let guide = conn
            .query_row(
                &format!("SELECT {GUIDE_COLUMNS} FROM guias WHERE numero_guia = ?1"),
                params![guide_number],
                row_to_guide,
            )
            .optional()?;
        Ok(guide)
    }

    fn find_by_transmission_status(&self, status: TransmissionStatus) -> Result<Vec<Guide>> {
        self.query_guides(
            &format!("SELECT {GUIDE_COLUMNS} FROM guias WHERE tp_status = ?1 ORDER BY id"),
            params![status.code()],
        )
    }

    fn find_watching(&self) -> Result<Vec<Guide>> {
        self.query_guides(
            &format!(
                "SELECT {GUIDE_COLUMNS} FROM guias WHERE status_monitoramento = ?1 ORDER BY id"
            ),
            params![WatchStatus::Watching.code()],
        )
    }

    fn find_transmitted_since(&self, since: DateTime<Utc>) -> Result<Vec<Guide>> {
        self.query_guides(
            &format!(
                "SELECT {GUIDE_COLUMNS} FROM guias \
                 WHERE tp_status = ?1 AND data_processamento IS NOT NULL \
                 AND data_processamento >= ?2 ORDER BY id"
            ),
            params![TransmissionStatus::Transmitted.code(), fmt_ts(&since)],
        )
    }

    fn find_stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<Guide>> {
        self.query_guides(
            &format!(
                "SELECT {GUIDE_COLUMNS} FROM guias \
                 WHERE tp_status = ?1 \
                 AND (data_processamento IS NULL OR data_processamento < ?2) ORDER BY id"
            ),
            params![TransmissionStatus::Processing.code(), fmt_ts(&before)],
        )
    }

    fn save(&self, guide: &Guide) -> Result<Guide> {
        check_invariants(guide)?;
        let details = serde_json::to_string(&guide.details)?;

        let changed = {
            let conn = self.lock()?;
            conn.execute(
                r#"
                    UPDATE guias SET
                        version = version + 1,
                        tp_status = ?3,
                        status_monitoramento = ?4,
                        situacao_guia = ?5,
                        senha_autorizacao = ?6,
                        qtde_diarias_autorizadas = ?7,
                        tipo_acomodacao_autorizada = ?8,
                        cnes_autorizado = ?9,
                        data_autorizacao = ?10,
                        observacao_guia = ?11,
                        justificativa_operadora = ?12,
                        data_alta = ?13,
                        tipo_alta = ?14,
                        motivo_encerramento = ?15,
                        tentativas = ?16,
                        mensagem_erro = ?17,
                        data_processamento = ?18,
                        data_atualizacao = ?19,
                        data_ultima_consulta = ?20,
                        detalhes = ?21
                    WHERE id = ?1 AND version = ?2
                    "#,
                params![
                    guide.id,
                    guide.version,
                    guide.transmission_status.code(),
                    guide.watch_status.code(),
                    guide.situation.code(),
                    guide.authorization_password,
                    guide.authorized_days,
                    guide.authorized_accommodation,
                    guide.authorized_cnes,
                    guide.authorization_date.as_ref().map(fmt_date),
                    guide.notes,
                    guide.payer_justification,
                    guide.discharge_date.as_ref().map(fmt_date),
                    guide.discharge_type,
                    guide.closure_reason,
                    guide.attempts,
                    guide.error_message,
                    guide.processed_at.as_ref().map(fmt_ts),
                    fmt_ts(&guide.updated_at),
                    guide.last_checked_at.as_ref().map(fmt_ts),
                    details,
                ],
            )?
        };

        if changed == 0 {
            return Err(Error::conflict(&guide.guide_number));
        }

        let mut saved = guide.clone();
        saved.version += 1;
        Ok(saved)
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tp_status, status_monitoramento, COUNT(*) FROM guias \
             GROUP BY tp_status, status_monitoramento",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (tp, watch, n) in rows {
            let (Some(tp), Some(watch)) =
                (TransmissionStatus::from_code(&tp), WatchStatus::from_code(&watch))
            else {
                tracing::warn!(tp_status = %tp, status_monitoramento = %watch, "Unknown status codes in store");
                continue;
            };
            counts.add(tp, watch, n as usize);
        }
        Ok(counts)
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory mock implementation of GuideRepository
///
/// Useful for testing without database dependencies.
pub struct MockGuideRepository {
    guides: RwLock<HashMap<i64, Guide>>,
    next_id: Mutex<i64>,
}

impl MockGuideRepository {
    /// Create a new mock repository
    pub fn new() -> Self {
        Self {
            guides: RwLock::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Get the number of guides
    pub fn len(&self) -> usize {
        self.guides.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&Guide) -> bool) -> Result<Vec<Guide>> {
        let guides = self.guides.read().map_err(|_| Error::poisoned("mock store"))?;
        let mut found: Vec<Guide> = guides.values().filter(|g| keep(g)).cloned().collect();
        found.sort_by_key(|g| g.id);
        Ok(found)
    }
}

impl Default for MockGuideRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl GuideRepository for MockGuideRepository {
    fn insert_guide(&self, new: &NewGuide) -> Result<Guide> {
        let mut guides = self.guides.write().map_err(|_| Error::poisoned("mock store"))?;
        if guides.values().any(|g| g.guide_number == new.guide_number) {
            return Err(Error::other(format!(
                "guide {} already exists",
                new.guide_number
            )));
        }

        let mut next_id = self.next_id.lock().map_err(|_| Error::poisoned("mock id"))?;
        let id = *next_id;
        *next_id += 1;

        let now = Utc::now();
        let guide = Guide {
            id,
            version: 0,
            guide_number: new.guide_number.clone(),
            transmission_status: TransmissionStatus::Awaiting,
            watch_status: WatchStatus::NotWatched,
            situation: new.situation,
            authorization_password: new.authorization_password.clone(),
            authorized_days: new.authorized_days,
            authorized_accommodation: new.authorized_accommodation.clone(),
            authorized_cnes: None,
            authorization_date: new.authorization_date,
            notes: new.notes.clone(),
            payer_justification: None,
            discharge_date: None,
            discharge_type: None,
            closure_reason: None,
            attempts: 0,
            error_message: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
            last_checked_at: None,
            details: new.details.clone(),
        };

        guides.insert(id, guide.clone());
        Ok(guide)
    }

    fn get_by_number(&self, guide_number: &str) -> Result<Option<Guide>> {
        let guides = self.guides.read().map_err(|_| Error::poisoned("mock store"))?;
        Ok(guides
            .values()
            .find(|g| g.guide_number == guide_number)
            .cloned())
    }

    fn find_by_transmission_status(&self, status: TransmissionStatus) -> Result<Vec<Guide>> {
        self.filtered(|g| g.transmission_status == status)
    }

    fn find_watching(&self) -> Result<Vec<Guide>> {
        self.filtered(|g| g.watch_status == WatchStatus::Watching)
    }

    fn find_transmitted_since(&self, since: DateTime<Utc>) -> Result<Vec<Guide>> {
        self.filtered(|g| {
            g.transmission_status == TransmissionStatus::Transmitted
                && g.processed_at.is_some_and(|p| p >= since)
        })
    }

    fn find_stale_processing(&self, before: DateTime<Utc>) -> Result<Vec<Guide>> {
        self.filtered(|g| {
            g.transmission_status == TransmissionStatus::Processing
                && g.processed_at.map_or(true, |p| p < before)
        })
    }

    fn save(&self, guide: &Guide) -> Result<Guide> {
        check_invariants(guide)?;

        let mut guides = self.guides.write().map_err(|_| Error::poisoned("mock store"))?;
        match guides.get(&guide.id) {
            Some(stored) if stored.version == guide.version => {}
            _ => return Err(Error::conflict(&guide.guide_number)),
        }

        let mut saved = guide.clone();
        saved.version += 1;
        guides.insert(saved.id, saved.clone());
        Ok(saved)
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let guides = self.guides.read().map_err(|_| Error::poisoned("mock store"))?;
        let mut counts = StatusCounts::default();
        for g in guides.values() {
            counts.add(g.transmission_status, g.watch_status, 1);
        }
        Ok(counts)
    }
}

// ============================================================================
// Shared Repository Types
// ============================================================================

/// Thread-safe shared repository wrapper
pub type SharedGuideRepository = Arc<dyn GuideRepository>;

/// Create a shared SQLite repository
pub fn create_sqlite_repository(path: impl AsRef<Path>) -> Result<SharedGuideRepository> {
    let repo = SqliteGuideRepository::new(path)?;
    Ok(Arc::new(repo))
}

/// Create a shared mock repository
pub fn create_mock_repository() -> SharedGuideRepository {
    Arc::new(MockGuideRepository::new())
}

// ============================================================================
// Tests
// ============================================================================
