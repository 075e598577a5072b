// ==========================================
// 投喂线作业编排 - 会话仓储 Trait
// ==========================================
// 职责: 定义会话聚合的持久化接口（不包含业务逻辑）
// 红线: 整个聚合（会话 + 作业 + 日志）在同一事务内保存
// ==========================================

use crate::domain::events::FeedingEvent;
use crate::domain::session::FeedingSession;
use crate::domain::types::OperationStatus;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use chrono::NaiveDate;

// ==========================================
// SessionStore Trait
// ==========================================
// 实现者: SqliteSessionRepository（使用 rusqlite）
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取产线当前 ACTIVE 会话（不论日期）
    async fn load_active_session(&self, line_id: &str) -> RepositoryResult<Option<FeedingSession>>;

    /// 读取产线某日的会话（同日多次开启时取最近一个）
    async fn load_session_for_date(
        &self,
        line_id: &str,
        session_date: NaiveDate,
    ) -> RepositoryResult<Option<FeedingSession>>;

    /// 按 ID 读取会话
    async fn load_session(&self, session_id: &str) -> RepositoryResult<Option<FeedingSession>>;

    /// 在同一事务内保存多个会话（跨日时旧会话关闭 + 新会话开启）
    ///
    /// 顺序敏感：先保存被关闭的会话，再保存新会话
    async fn save_sessions(&self, sessions: &[&FeedingSession]) -> RepositoryResult<()>;

    /// 保存单个会话
    async fn save_session(&self, session: &FeedingSession) -> RepositoryResult<()> {
        self.save_sessions(&[session]).await
    }

    /// 有 ACTIVE 会话的产线列表（同步协调器轮询范围）
    async fn list_active_lines(&self) -> RepositoryResult<Vec<String>>;

    /// 查询作业状态（启动恢复时判断下发是否已落库）
    async fn find_operation_status(
        &self,
        operation_id: &str,
    ) -> RepositoryResult<Option<OperationStatus>>;

    /// 查询产线某日的全部事件（按时间顺序）
    async fn list_line_events(
        &self,
        line_id: &str,
        session_date: NaiveDate,
    ) -> RepositoryResult<Vec<FeedingEvent>>;
}
