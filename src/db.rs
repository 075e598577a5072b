// ==========================================
// 投喂线作业编排 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建表：会话、作业、事件日志、下发日志、设备主数据、配置
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）
///
/// 约束:
/// - 每条产线最多一个 ACTIVE 会话（部分唯一索引）
/// - 事件日志按 (scope_id, seq) 去重，只追加
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
          version INTEGER PRIMARY KEY,
          applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
          scope_id TEXT NOT NULL DEFAULT 'global',
          key TEXT NOT NULL,
          value TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS feeding_session (
          session_id TEXT PRIMARY KEY,
          line_id TEXT NOT NULL,
          session_date TEXT NOT NULL,
          status TEXT NOT NULL,
          current_operation_id TEXT,
          total_dispensed_kg REAL NOT NULL DEFAULT 0,
          slot_totals_json TEXT NOT NULL DEFAULT '{}',
          last_reading_seq INTEGER,
          opened_at TEXT NOT NULL,
          closed_at TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS uq_feeding_session_active_line
          ON feeding_session(line_id) WHERE status = 'ACTIVE';
        CREATE INDEX IF NOT EXISTS idx_feeding_session_line_date
          ON feeding_session(line_id, session_date DESC);

        CREATE TABLE IF NOT EXISTS feeding_operation (
          operation_id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          line_id TEXT NOT NULL,
          cage_id TEXT NOT NULL,
          slot_number INTEGER NOT NULL,
          status TEXT NOT NULL,
          dispensed_kg REAL NOT NULL DEFAULT 0,
          last_cumulative_kg REAL NOT NULL DEFAULT 0,
          configuration_json TEXT NOT NULL,
          started_at TEXT NOT NULL,
          ended_at TEXT,
          error_code TEXT,
          FOREIGN KEY (session_id) REFERENCES feeding_session(session_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_feeding_operation_session
          ON feeding_operation(session_id, started_at);

        CREATE TABLE IF NOT EXISTS feeding_event (
          scope_id TEXT NOT NULL,
          seq INTEGER NOT NULL,
          session_id TEXT NOT NULL,
          operation_id TEXT,
          line_id TEXT NOT NULL,
          at TEXT NOT NULL,
          kind TEXT NOT NULL,
          detail TEXT NOT NULL,
          payload_json TEXT,
          PRIMARY KEY (scope_id, seq),
          FOREIGN KEY (session_id) REFERENCES feeding_session(session_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_feeding_event_line_at
          ON feeding_event(line_id, at);

        CREATE TABLE IF NOT EXISTS feeding_dispatch (
          dispatch_id TEXT PRIMARY KEY,
          line_id TEXT NOT NULL,
          session_id TEXT NOT NULL,
          operation_id TEXT NOT NULL,
          cage_id TEXT NOT NULL,
          slot_number INTEGER NOT NULL,
          configuration_json TEXT NOT NULL,
          status TEXT NOT NULL,
          created_at TEXT NOT NULL,
          resolved_at TEXT,
          note TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_feeding_dispatch_status
          ON feeding_dispatch(status, created_at);

        CREATE TABLE IF NOT EXISTS cage_slot (
          line_id TEXT NOT NULL,
          cage_id TEXT NOT NULL,
          slot_number INTEGER NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          PRIMARY KEY (line_id, cage_id)
        );

        CREATE TABLE IF NOT EXISTS doser_calibration (
          line_id TEXT PRIMARY KEY,
          calibration_json TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
