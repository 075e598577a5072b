// ==========================================
// 投喂线作业编排 - 会话仓储 SQLite 实现
// ==========================================
// 表: feeding_session / feeding_operation / feeding_event
// 说明:
// - 会话、作业按主键 UPSERT
// - 日志条目只追加：INSERT OR IGNORE (scope_id, seq)
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::configuration::MachineConfiguration;
use crate::domain::events::{FeedingEvent, LogEntry};
use crate::domain::operation::FeedingOperation;
use crate::domain::session::FeedingSession;
use crate::domain::types::{EventKind, OperationStatus, SessionStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::session_repo::SessionStore;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// 行映射（数据库原始值）
// ==========================================

struct SessionRow {
    session_id: String,
    line_id: String,
    session_date: NaiveDate,
    status: String,
    current_operation_id: Option<String>,
    total_dispensed_kg: f64,
    slot_totals_json: String,
    last_reading_seq: Option<i64>,
    opened_at: NaiveDateTime,
    closed_at: Option<NaiveDateTime>,
}

struct OperationRow {
    operation_id: String,
    session_id: String,
    line_id: String,
    cage_id: String,
    slot_number: i64,
    status: String,
    dispensed_kg: f64,
    last_cumulative_kg: f64,
    configuration_json: String,
    started_at: NaiveDateTime,
    ended_at: Option<NaiveDateTime>,
    error_code: Option<String>,
}

struct EventRow {
    scope_id: String,
    seq: i64,
    session_id: String,
    operation_id: Option<String>,
    line_id: String,
    at: NaiveDateTime,
    kind: String,
    detail: String,
    payload_json: Option<String>,
}

impl EventRow {
    fn into_entry(self) -> RepositoryResult<LogEntry> {
        let kind = EventKind::from_str(&self.kind)
            .ok_or_else(|| RepositoryError::field("kind", format!("未知事件类型: {}", self.kind)))?;
        let payload = match self.payload_json {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(LogEntry {
            seq: self.seq as u32,
            at: self.at,
            kind,
            detail: self.detail,
            payload,
        })
    }
}

const SESSION_COLUMNS: &str = "session_id, line_id, session_date, status, current_operation_id, \
     total_dispensed_kg, slot_totals_json, last_reading_seq, opened_at, closed_at";

const EVENT_COLUMNS: &str =
    "scope_id, seq, session_id, operation_id, line_id, at, kind, detail, payload_json";

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        line_id: row.get(1)?,
        session_date: row.get(2)?,
        status: row.get(3)?,
        current_operation_id: row.get(4)?,
        total_dispensed_kg: row.get(5)?,
        slot_totals_json: row.get(6)?,
        last_reading_seq: row.get(7)?,
        opened_at: row.get(8)?,
        closed_at: row.get(9)?,
    })
}

fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        scope_id: row.get(0)?,
        seq: row.get(1)?,
        session_id: row.get(2)?,
        operation_id: row.get(3)?,
        line_id: row.get(4)?,
        at: row.get(5)?,
        kind: row.get(6)?,
        detail: row.get(7)?,
        payload_json: row.get(8)?,
    })
}

// ==========================================
// SqliteSessionRepository
// ==========================================
pub struct SqliteSessionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let repo = Self { conn };
        {
            let conn = repo.get_conn()?;
            init_schema(&conn)?;
        }
        Ok(repo)
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 写入 =====

    fn save_session_tx(tx: &Transaction<'_>, session: &FeedingSession) -> RepositoryResult<()> {
        let slot_totals_json = serde_json::to_string(&session.slot_totals)?;
        tx.execute(
            r#"
            INSERT INTO feeding_session (
                session_id, line_id, session_date, status, current_operation_id,
                total_dispensed_kg, slot_totals_json, last_reading_seq, opened_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                current_operation_id = excluded.current_operation_id,
                total_dispensed_kg = excluded.total_dispensed_kg,
                slot_totals_json = excluded.slot_totals_json,
                last_reading_seq = excluded.last_reading_seq,
                closed_at = excluded.closed_at
            "#,
            params![
                session.session_id,
                session.line_id,
                session.session_date,
                session.status.to_db_str(),
                session.current_operation_id,
                session.total_dispensed_kg,
                slot_totals_json,
                session.last_reading_seq.map(|s| s as i64),
                session.opened_at,
                session.closed_at,
            ],
        )?;

        for op in &session.operations {
            Self::save_operation_tx(tx, op)?;
        }

        for entry in &session.log {
            Self::append_entry_tx(tx, session, None, entry)?;
        }
        for op in &session.operations {
            for entry in &op.log {
                Self::append_entry_tx(tx, session, Some(&op.operation_id), entry)?;
            }
        }
        Ok(())
    }

    fn save_operation_tx(tx: &Transaction<'_>, op: &FeedingOperation) -> RepositoryResult<()> {
        let configuration_json = serde_json::to_string(&op.configuration)?;
        tx.execute(
            r#"
            INSERT INTO feeding_operation (
                operation_id, session_id, line_id, cage_id, slot_number, status,
                dispensed_kg, last_cumulative_kg, configuration_json,
                started_at, ended_at, error_code
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(operation_id) DO UPDATE SET
                status = excluded.status,
                dispensed_kg = excluded.dispensed_kg,
                last_cumulative_kg = excluded.last_cumulative_kg,
                configuration_json = excluded.configuration_json,
                ended_at = excluded.ended_at,
                error_code = excluded.error_code
            "#,
            params![
                op.operation_id,
                op.session_id,
                op.line_id,
                op.cage_id,
                op.slot_number as i64,
                op.status.to_db_str(),
                op.dispensed_kg,
                op.last_cumulative_kg,
                configuration_json,
                op.started_at,
                op.ended_at,
                op.error_code,
            ],
        )?;
        Ok(())
    }

    fn append_entry_tx(
        tx: &Transaction<'_>,
        session: &FeedingSession,
        operation_id: Option<&str>,
        entry: &LogEntry,
    ) -> RepositoryResult<()> {
        let payload_json = match &entry.payload {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        tx.execute(
            r#"
            INSERT OR IGNORE INTO feeding_event (
                scope_id, seq, session_id, operation_id, line_id, at, kind, detail, payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                operation_id.unwrap_or(&session.session_id),
                entry.seq as i64,
                session.session_id,
                operation_id,
                session.line_id,
                entry.at,
                entry.kind.as_str(),
                entry.detail,
                payload_json,
            ],
        )?;
        Ok(())
    }

    // ===== 读取 =====

    fn load_by_row(conn: &Connection, row: SessionRow) -> RepositoryResult<FeedingSession> {
        let mut stmt = conn.prepare(
            r#"
            SELECT operation_id, session_id, line_id, cage_id, slot_number, status,
                   dispensed_kg, last_cumulative_kg, configuration_json,
                   started_at, ended_at, error_code
            FROM feeding_operation
            WHERE session_id = ?1
            ORDER BY started_at, rowid
            "#,
        )?;
        let op_rows = stmt
            .query_map(params![row.session_id], |r| {
                Ok(OperationRow {
                    operation_id: r.get(0)?,
                    session_id: r.get(1)?,
                    line_id: r.get(2)?,
                    cage_id: r.get(3)?,
                    slot_number: r.get(4)?,
                    status: r.get(5)?,
                    dispensed_kg: r.get(6)?,
                    last_cumulative_kg: r.get(7)?,
                    configuration_json: r.get(8)?,
                    started_at: r.get(9)?,
                    ended_at: r.get(10)?,
                    error_code: r.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM feeding_event WHERE session_id = ?1 ORDER BY scope_id, seq",
            EVENT_COLUMNS
        ))?;
        let event_rows = stmt
            .query_map(params![row.session_id], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut session_log = Vec::new();
        let mut op_logs: HashMap<String, Vec<LogEntry>> = HashMap::new();
        for event in event_rows {
            if event.scope_id == row.session_id {
                session_log.push(event.into_entry()?);
            } else {
                let scope = event.scope_id.clone();
                op_logs.entry(scope).or_default().push(event.into_entry()?);
            }
        }

        let mut operations = Vec::with_capacity(op_rows.len());
        for op in op_rows {
            let status = OperationStatus::from_str(&op.status).ok_or_else(|| {
                RepositoryError::field("status", format!("未知作业状态: {}", op.status))
            })?;
            let configuration: MachineConfiguration =
                serde_json::from_str(&op.configuration_json)?;
            let log = op_logs.remove(&op.operation_id).unwrap_or_default();
            operations.push(FeedingOperation {
                operation_id: op.operation_id,
                session_id: op.session_id,
                line_id: op.line_id,
                cage_id: op.cage_id,
                slot_number: op.slot_number as u32,
                status,
                dispensed_kg: op.dispensed_kg,
                last_cumulative_kg: op.last_cumulative_kg,
                configuration,
                started_at: op.started_at,
                ended_at: op.ended_at,
                error_code: op.error_code,
                log,
            });
        }

        let slot_totals: BTreeMap<u32, f64> = serde_json::from_str(&row.slot_totals_json)?;
        Ok(FeedingSession {
            session_id: row.session_id,
            line_id: row.line_id,
            session_date: row.session_date,
            status: SessionStatus::from_str(&row.status),
            operations,
            current_operation_id: row.current_operation_id,
            total_dispensed_kg: row.total_dispensed_kg,
            slot_totals,
            last_reading_seq: row.last_reading_seq.map(|s| s as u64),
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            log: session_log,
        })
    }

    fn load_where(
        &self,
        predicate: &str,
        key: &str,
    ) -> RepositoryResult<Option<FeedingSession>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM feeding_session WHERE {} ORDER BY opened_at DESC LIMIT 1",
                    SESSION_COLUMNS, predicate
                ),
                params![key],
                map_session_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(Self::load_by_row(&conn, row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionRepository {
    async fn load_active_session(&self, line_id: &str) -> RepositoryResult<Option<FeedingSession>> {
        self.load_where("line_id = ?1 AND status = 'ACTIVE'", line_id)
    }

    async fn load_session_for_date(
        &self,
        line_id: &str,
        session_date: NaiveDate,
    ) -> RepositoryResult<Option<FeedingSession>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM feeding_session WHERE line_id = ?1 AND session_date = ?2 \
                     ORDER BY opened_at DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                params![line_id, session_date],
                map_session_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(Self::load_by_row(&conn, row)?)),
            None => Ok(None),
        }
    }

    async fn load_session(&self, session_id: &str) -> RepositoryResult<Option<FeedingSession>> {
        self.load_where("session_id = ?1", session_id)
    }

    async fn save_sessions(&self, sessions: &[&FeedingSession]) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        for session in sessions {
            Self::save_session_tx(&tx, session)?;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    async fn list_active_lines(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT line_id FROM feeding_session WHERE status = 'ACTIVE' ORDER BY line_id",
        )?;
        let lines = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    async fn find_operation_status(
        &self,
        operation_id: &str,
    ) -> RepositoryResult<Option<OperationStatus>> {
        let conn = self.get_conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM feeding_operation WHERE operation_id = ?1",
                params![operation_id],
                |row| row.get(0),
            )
            .optional()?;

        match status {
            Some(s) => OperationStatus::from_str(&s)
                .map(Some)
                .ok_or_else(|| RepositoryError::field("status", format!("未知作业状态: {}", s))),
            None => Ok(None),
        }
    }

    async fn list_line_events(
        &self,
        line_id: &str,
        session_date: NaiveDate,
    ) -> RepositoryResult<Vec<FeedingEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT e.scope_id, e.seq, e.session_id, e.operation_id, e.line_id,
                   e.at, e.kind, e.detail, e.payload_json
            FROM feeding_event e
            JOIN feeding_session s ON s.session_id = e.session_id
            WHERE e.line_id = ?1 AND s.session_date = ?2
            ORDER BY e.at, e.rowid
            "#,
        )?;
        let rows = stmt
            .query_map(params![line_id, session_date], map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let line_id = row.line_id.clone();
            let session_id = row.session_id.clone();
            let operation_id = row.operation_id.clone();
            let entry = row.into_entry()?;
            events.push(FeedingEvent::from_entry(
                &line_id,
                &session_id,
                operation_id.as_deref(),
                &entry,
            ));
        }
        Ok(events)
    }
}
