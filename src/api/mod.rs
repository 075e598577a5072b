// ==========================================
// 投喂线作业编排 - API 层
// ==========================================
// 职责: 操作员指令与看板查询接口
// ==========================================

pub mod dto;
pub mod error;
pub mod feeding_api;

// 重导出核心类型
pub use dto::{
    CommandResponse, OperationSummary, ParameterUpdate, RecoveryReport, StartFeedingRequest,
    StartFeedingResponse,
};
pub use error::{ApiError, ApiResult};
pub use feeding_api::FeedingApi;
