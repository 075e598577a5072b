// ==========================================
// 投喂线作业编排 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: 非法值记录告警并回退默认值，不阻塞投喂
// ==========================================

use crate::config::feeding_config_trait::{ConfigResult, FeedingConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
            init_schema(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 读取并解析数值配置；缺失或非法时回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy + PartialOrd + Default + std::fmt::Display,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };

        match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    default = %default,
                    "配置值非法，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

// ==========================================
// FeedingConfigReader Trait 实现
// ==========================================
#[async_trait]
impl FeedingConfigReader for ConfigManager {
    async fn get_poll_interval_ms(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::POLL_INTERVAL_MS, 1_000)
    }

    async fn get_hardware_timeout_ms(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::HARDWARE_TIMEOUT_MS, 3_000)
    }

    async fn get_hardware_retry_attempts(&self) -> ConfigResult<u32> {
        self.get_parsed_or_default(config_keys::HARDWARE_RETRY_ATTEMPTS, 3)
    }

    async fn get_poll_failure_alert_threshold(&self) -> ConfigResult<u32> {
        self.get_parsed_or_default(config_keys::POLL_FAILURE_ALERT_THRESHOLD, 5)
    }

    async fn get_overshoot_tolerance_kg(&self) -> ConfigResult<f64> {
        // 0 为合法值（任何超量都记异常）
        let Some(raw) = self.get_global_config_value(config_keys::OVERSHOOT_TOLERANCE_KG)? else {
            return Ok(0.0);
        };
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
            _ => {
                tracing::warn!(
                    config_key = config_keys::OVERSHOOT_TOLERANCE_KG,
                    raw_value = %raw,
                    default = 0.0,
                    "配置值非法，使用默认值"
                );
                Ok(0.0)
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 硬件同步
    pub const POLL_INTERVAL_MS: &str = "feeding/poll_interval_ms";
    pub const POLL_FAILURE_ALERT_THRESHOLD: &str = "feeding/poll_failure_alert_threshold";

    // 硬件写入
    pub const HARDWARE_TIMEOUT_MS: &str = "feeding/hardware_timeout_ms";
    pub const HARDWARE_RETRY_ATTEMPTS: &str = "feeding/hardware_retry_attempts";

    // 异常判定
    pub const OVERSHOOT_TOLERANCE_KG: &str = "feeding/overshoot_tolerance_kg";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::feeding_config_trait::FeedingSettings;
    use std::time::Duration;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let settings = FeedingSettings::load(&manager()).await.unwrap();
        assert_eq!(settings, FeedingSettings::default());
    }

    #[tokio::test]
    async fn test_override_and_invalid_fallback() {
        let cm = manager();
        cm.set_global_config_value(config_keys::POLL_INTERVAL_MS, "250").unwrap();
        cm.set_global_config_value(config_keys::OVERSHOOT_TOLERANCE_KG, "abc").unwrap();
        cm.set_global_config_value(config_keys::HARDWARE_RETRY_ATTEMPTS, "0").unwrap();

        let settings = FeedingSettings::load(&cm).await.unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.overshoot_tolerance_kg, 0.0);
        assert_eq!(settings.hardware_retry_attempts, 3);
    }

    #[tokio::test]
    async fn test_overshoot_tolerance_accepts_zero_and_positive() {
        let cm = manager();
        cm.set_global_config_value(config_keys::OVERSHOOT_TOLERANCE_KG, "0").unwrap();
        assert_eq!(cm.get_overshoot_tolerance_kg().await.unwrap(), 0.0);

        cm.set_global_config_value(config_keys::OVERSHOOT_TOLERANCE_KG, "0.2").unwrap();
        assert_eq!(cm.get_overshoot_tolerance_kg().await.unwrap(), 0.2);

        cm.set_global_config_value(config_keys::OVERSHOOT_TOLERANCE_KG, "-1").unwrap();
        assert_eq!(cm.get_overshoot_tolerance_kg().await.unwrap(), 0.0);
    }

    #[test]
    fn test_snapshot_contains_values() {
        let cm = manager();
        cm.set_global_config_value(config_keys::HARDWARE_TIMEOUT_MS, "1500").unwrap();
        let snapshot = cm.get_config_snapshot().unwrap();
        assert!(snapshot.contains("feeding/hardware_timeout_ms"));
        assert!(snapshot.contains("1500"));
    }
}
