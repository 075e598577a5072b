// ==========================================
// 投喂线作业编排 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod dispatch_repo;
pub mod equipment_repo;
pub mod error;
pub mod session_repo;
pub mod session_repo_impl;

// 重导出核心仓储
pub use dispatch_repo::{DispatchEntity, DispatchJournal, DispatchStatus, SqliteDispatchRepository};
pub use equipment_repo::{EquipmentRepository, EquipmentStore};
pub use error::{RepositoryError, RepositoryResult};
pub use session_repo::SessionStore;
pub use session_repo_impl::SqliteSessionRepository;
