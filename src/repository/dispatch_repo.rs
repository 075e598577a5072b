// ==========================================
// 投喂线作业编排 - 配置下发日志仓储
// ==========================================
// 职责: 开始投喂时“先落库再下发”的预写日志
// 流程:
// - 下发前写入 PENDING
// - 下发成功且会话已保存 → CONFIRMED
// - 下发失败 → FAILED
// - 启动时仍为 PENDING：按作业是否已落库判定 CONFIRMED / ABANDONED
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::configuration::MachineConfiguration;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// DispatchStatus - 下发状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Pending,   // 已记录，尚未确认
    Confirmed, // 硬件已接受且会话已保存
    Failed,    // 硬件拒绝或超时
    Abandoned, // 进程中断后回收
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl DispatchStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(DispatchStatus::Pending),
            "CONFIRMED" => Some(DispatchStatus::Confirmed),
            "FAILED" => Some(DispatchStatus::Failed),
            "ABANDONED" => Some(DispatchStatus::Abandoned),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "PENDING",
            DispatchStatus::Confirmed => "CONFIRMED",
            DispatchStatus::Failed => "FAILED",
            DispatchStatus::Abandoned => "ABANDONED",
        }
    }
}

/// 下发记录实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEntity {
    pub dispatch_id: String,
    pub line_id: String,
    pub session_id: String,
    pub operation_id: String,
    pub cage_id: String,
    pub slot_number: u32,
    pub configuration: MachineConfiguration,
    pub status: DispatchStatus,
    pub created_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
    pub note: Option<String>,
}

impl DispatchEntity {
    /// 创建 PENDING 记录（自动生成 UUID）
    pub fn pending(
        line_id: &str,
        session_id: &str,
        operation_id: &str,
        cage_id: &str,
        configuration: &MachineConfiguration,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            dispatch_id: Uuid::new_v4().to_string(),
            line_id: line_id.to_string(),
            session_id: session_id.to_string(),
            operation_id: operation_id.to_string(),
            cage_id: cage_id.to_string(),
            slot_number: configuration.target_slot(),
            configuration: configuration.clone(),
            status: DispatchStatus::Pending,
            created_at,
            resolved_at: None,
            note: None,
        }
    }
}

// ==========================================
// DispatchJournal Trait
// ==========================================
#[async_trait]
pub trait DispatchJournal: Send + Sync {
    async fn record_pending(&self, entity: &DispatchEntity) -> RepositoryResult<()>;

    /// 将 PENDING 记录置为终态
    async fn resolve(
        &self,
        dispatch_id: &str,
        status: DispatchStatus,
        note: Option<&str>,
        at: NaiveDateTime,
    ) -> RepositoryResult<()>;

    async fn list_pending(&self) -> RepositoryResult<Vec<DispatchEntity>>;

    async fn find(&self, dispatch_id: &str) -> RepositoryResult<Option<DispatchEntity>>;
}

// ==========================================
// SqliteDispatchRepository
// ==========================================
pub struct SqliteDispatchRepository {
    conn: Arc<Mutex<Connection>>,
}

struct DispatchRow {
    dispatch_id: String,
    line_id: String,
    session_id: String,
    operation_id: String,
    cage_id: String,
    slot_number: i64,
    configuration_json: String,
    status: String,
    created_at: NaiveDateTime,
    resolved_at: Option<NaiveDateTime>,
    note: Option<String>,
}

impl DispatchRow {
    fn into_entity(self) -> RepositoryResult<DispatchEntity> {
        let status = DispatchStatus::from_str(&self.status).ok_or_else(|| {
            RepositoryError::field("status", format!("未知下发状态: {}", self.status))
        })?;
        Ok(DispatchEntity {
            dispatch_id: self.dispatch_id,
            line_id: self.line_id,
            session_id: self.session_id,
            operation_id: self.operation_id,
            cage_id: self.cage_id,
            slot_number: self.slot_number as u32,
            configuration: serde_json::from_str(&self.configuration_json)?,
            status,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            note: self.note,
        })
    }
}

const DISPATCH_SELECT: &str = r#"
    SELECT dispatch_id, line_id, session_id, operation_id, cage_id, slot_number,
           configuration_json, status, created_at, resolved_at, note
    FROM feeding_dispatch
"#;

fn map_dispatch_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DispatchRow> {
    Ok(DispatchRow {
        dispatch_id: row.get(0)?,
        line_id: row.get(1)?,
        session_id: row.get(2)?,
        operation_id: row.get(3)?,
        cage_id: row.get(4)?,
        slot_number: row.get(5)?,
        configuration_json: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
        note: row.get(10)?,
    })
}

impl SqliteDispatchRepository {
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
}

#[async_trait]
impl DispatchJournal for SqliteDispatchRepository {
    async fn record_pending(&self, entity: &DispatchEntity) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let configuration_json = serde_json::to_string(&entity.configuration)?;
        conn.execute(
            r#"
            INSERT INTO feeding_dispatch (
                dispatch_id, line_id, session_id, operation_id, cage_id, slot_number,
                configuration_json, status, created_at, resolved_at, note
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entity.dispatch_id,
                entity.line_id,
                entity.session_id,
                entity.operation_id,
                entity.cage_id,
                entity.slot_number as i64,
                configuration_json,
                entity.status.to_db_str(),
                entity.created_at,
                entity.resolved_at,
                entity.note,
            ],
        )?;
        Ok(())
    }

    async fn resolve(
        &self,
        dispatch_id: &str,
        status: DispatchStatus,
        note: Option<&str>,
        at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE feeding_dispatch
            SET status = ?2, note = ?3, resolved_at = ?4
            WHERE dispatch_id = ?1 AND status = 'PENDING'
            "#,
            params![dispatch_id, status.to_db_str(), note, at],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "PendingDispatch".to_string(),
                id: dispatch_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_pending(&self) -> RepositoryResult<Vec<DispatchEntity>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status = 'PENDING' ORDER BY created_at",
            DISPATCH_SELECT
        ))?;
        let rows = stmt
            .query_map([], map_dispatch_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(DispatchRow::into_entity).collect()
    }

    async fn find(&self, dispatch_id: &str) -> RepositoryResult<Option<DispatchEntity>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE dispatch_id = ?1", DISPATCH_SELECT))?;
        let mut rows = stmt
            .query_map(params![dispatch_id], map_dispatch_row)?
            .collect::<Result<Vec<_>, _>>()?;
        match rows.pop() {
            Some(row) => Ok(Some(row.into_entity()?)),
            None => Ok(None),
        }
    }
}
