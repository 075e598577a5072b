// ==========================================
// 投喂线作业编排 - 领域错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 领域错误均在任何硬件 I/O 之前产生，属于“请求本身不合法”
// ==========================================

use thiserror::Error;

/// 领域层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    // ===== 状态机错误 =====
    #[error("无效的状态转换: {action} 不允许在 {from} 状态执行")]
    InvalidTransition { from: String, action: String },

    #[error("产线 {line_id} 已有进行中的投喂作业: operation_id={operation_id}")]
    OperationAlreadyActive {
        line_id: String,
        operation_id: String,
    },

    #[error("产线 {line_id} 当前没有进行中的投喂作业")]
    NoActiveOperation { line_id: String },

    #[error("会话已关闭: session_id={session_id}")]
    SessionClosed { session_id: String },

    // ===== 参数错误 =====
    #[error("参数超出范围 (field={field}, value={value}): {message}")]
    InvalidParameterRange {
        field: String,
        value: f64,
        message: String,
    },

    #[error("下料速率超出设备能力: requested={requested_kg_min}kg/min, max={max_kg_min}kg/min")]
    RateExceedsCapacity {
        requested_kg_min: f64,
        max_kg_min: f64,
    },
}

impl DomainError {
    pub(crate) fn invalid_transition(from: impl ToString, action: &str) -> Self {
        DomainError::InvalidTransition {
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    pub(crate) fn out_of_range(field: &str, value: f64, message: impl Into<String>) -> Self {
        DomainError::InvalidParameterRange {
            field: field.to_string(),
            value,
            message: message.into(),
        }
    }
}

/// Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
