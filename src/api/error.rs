// ==========================================
// 投喂线作业编排 - API层错误类型
// ==========================================
// 职责: 区分“请求不合法”（领域拒绝）与“硬件无响应”（硬件错误）
// ==========================================

use crate::domain::error::DomainError;
use crate::hardware::port::HardwareError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 领域拒绝（未产生任何副作用）
    // ==========================================
    #[error("指令被拒绝: {0}")]
    Rejected(#[from] DomainError),

    #[error("网箱未分配槽位: line={line_id}, cage={cage_id}")]
    SlotNotAssigned { line_id: String, cage_id: String },

    #[error("产线缺少下料器标定: {line_id}")]
    CalibrationMissing { line_id: String },

    #[error("无效输入: {0}")]
    InvalidInput(String),

    // ==========================================
    // 硬件错误（作业保持最后已知状态）
    // ==========================================
    #[error("硬件错误: {0}")]
    Hardware(#[from] HardwareError),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("配置错误: {0}")]
    Config(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 是否为调用方可纠正的拒绝（区别于硬件/基础设施故障）
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::Rejected(_)
                | ApiError::SlotNotAssigned { .. }
                | ApiError::CalibrationMissing { .. }
                | ApiError::InvalidInput(_)
        )
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg)
            | RepositoryError::UniqueConstraintViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg)
            | RepositoryError::SerializationError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::DatabaseError(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "FeedingSession".to_string(),
            id: "S001".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("FeedingSession"));
                assert!(msg.contains("S001"));
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn test_rejection_vs_hardware() {
        let rejected: ApiError = DomainError::NoActiveOperation {
            line_id: "L1".to_string(),
        }
        .into();
        assert!(rejected.is_rejection());

        let hardware: ApiError = HardwareError::Timeout {
            line_id: "L1".to_string(),
            timeout_ms: 3000,
        }
        .into();
        assert!(!hardware.is_rejection());
    }
}
