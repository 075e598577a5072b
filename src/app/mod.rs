// ==========================================
// 投喂线作业编排 - 应用层
// ==========================================
// 职责: 组装各层组件，供服务入口使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
