// ==========================================
// 投喂线作业编排 - 设备主数据仓储
// ==========================================
// 表: cage_slot（网箱 → 分配器槽位）、doser_calibration（下料器标定）
// 说明: 标定数据只读取最新值；更新走 UPSERT
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::calibration::DoserCalibration;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// EquipmentStore Trait
// ==========================================
#[async_trait]
pub trait EquipmentStore: Send + Sync {
    /// 网箱对应的分配器槽位（未分配返回 None）
    async fn resolve_slot(&self, line_id: &str, cage_id: &str) -> RepositoryResult<Option<u32>>;

    /// 产线下料器的当前标定
    async fn load_calibration(&self, line_id: &str) -> RepositoryResult<Option<DoserCalibration>>;
}

pub struct EquipmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EquipmentRepository {
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

    /// 分配或更新网箱槽位（槽位从 1 开始）
    pub fn upsert_cage_slot(
        &self,
        line_id: &str,
        cage_id: &str,
        slot_number: u32,
    ) -> RepositoryResult<()> {
        if slot_number == 0 {
            return Err(RepositoryError::field("slot_number", "槽位编号从 1 开始"));
        }
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO cage_slot (line_id, cage_id, slot_number, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(line_id, cage_id) DO UPDATE SET
                slot_number = excluded.slot_number,
                updated_at = excluded.updated_at
            "#,
            params![line_id, cage_id, slot_number as i64],
        )?;
        Ok(())
    }

    /// 写入或替换下料器标定
    pub fn upsert_calibration(
        &self,
        line_id: &str,
        calibration: &DoserCalibration,
    ) -> RepositoryResult<()> {
        let calibration_json = serde_json::to_string(calibration)?;
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO doser_calibration (line_id, calibration_json, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(line_id) DO UPDATE SET
                calibration_json = excluded.calibration_json,
                updated_at = excluded.updated_at
            "#,
            params![line_id, calibration_json],
        )?;
        Ok(())
    }

    /// 产线全部槽位分配（按槽位排序）
    pub fn list_cage_slots(&self, line_id: &str) -> RepositoryResult<Vec<(String, u32)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT cage_id, slot_number FROM cage_slot WHERE line_id = ?1 ORDER BY slot_number",
        )?;
        let rows = stmt
            .query_map(params![line_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl EquipmentStore for EquipmentRepository {
    async fn resolve_slot(&self, line_id: &str, cage_id: &str) -> RepositoryResult<Option<u32>> {
        let conn = self.get_conn()?;
        let slot: Option<i64> = conn
            .query_row(
                "SELECT slot_number FROM cage_slot WHERE line_id = ?1 AND cage_id = ?2",
                params![line_id, cage_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(slot.map(|s| s as u32))
    }

    async fn load_calibration(&self, line_id: &str) -> RepositoryResult<Option<DoserCalibration>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT calibration_json FROM doser_calibration WHERE line_id = ?1",
                params![line_id],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calibration::ContinuousCalibration;

    fn repo() -> EquipmentRepository {
        let conn = Connection::open_in_memory().unwrap();
        EquipmentRepository::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_slot_upsert_and_resolve() {
        let repo = repo();
        assert_eq!(repo.resolve_slot("L1", "C1").await.unwrap(), None);

        repo.upsert_cage_slot("L1", "C1", 3).unwrap();
        repo.upsert_cage_slot("L1", "C1", 4).unwrap();
        assert_eq!(repo.resolve_slot("L1", "C1").await.unwrap(), Some(4));
        assert!(repo.upsert_cage_slot("L1", "C2", 0).is_err());
    }

    #[tokio::test]
    async fn test_calibration_roundtrip() {
        let repo = repo();
        let cal = DoserCalibration::Continuous(ContinuousCalibration {
            rated_flow_kg_min: 20.0,
            max_motor_speed_rpm: 1500.0,
        });
        repo.upsert_calibration("L1", &cal).unwrap();
        assert_eq!(repo.load_calibration("L1").await.unwrap(), Some(cal));
    }
}
