// ==========================================
// 投喂线作业编排 - API 请求/响应对象
// ==========================================

use crate::domain::configuration::MachineConfiguration;
use crate::domain::events::FeedingEvent;
use crate::domain::session::FeedingSession;
use crate::domain::types::{FeedingMode, OperationStatus};
use crate::engine::strategy::FeedingIntent;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 开始投喂请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFeedingRequest {
    pub line_id: String,
    pub cage_id: String,
    pub mode: FeedingMode,
    pub blower_speed_pct: f64,
    pub dosing_rate_kg_min: f64,
    pub target_weight_kg: Option<f64>,
    #[serde(default)]
    pub batch_weight_kg: Option<f64>,
}

impl StartFeedingRequest {
    pub fn intent(&self) -> FeedingIntent {
        FeedingIntent {
            mode: self.mode,
            blower_speed_pct: self.blower_speed_pct,
            dosing_rate_kg_min: self.dosing_rate_kg_min,
            target_weight_kg: self.target_weight_kg,
            batch_weight_kg: self.batch_weight_kg,
        }
    }
}

/// 参数热更新（只携带需要变更的字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub blower_speed_pct: Option<f64>,
    pub dosing_rate_kg_min: Option<f64>,
}

impl ParameterUpdate {
    pub fn is_empty(&self) -> bool {
        self.blower_speed_pct.is_none() && self.dosing_rate_kg_min.is_none()
    }
}

/// 开始投喂响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFeedingResponse {
    pub session_id: String,
    pub operation_id: String,
    pub slot_number: u32,
    pub configuration: MachineConfiguration,
    /// 包括跨日关闭旧会话、开启新会话在内的全部事件
    pub events: Vec<FeedingEvent>,
}

/// 暂停/恢复/停止/热更新响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub line_id: String,
    pub operation_id: Option<String>,
    pub status: Option<OperationStatus>,
    pub events: Vec<FeedingEvent>,
}

// ==========================================
// OperationSummary - 看板：当前作业摘要
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub line_id: String,
    pub session_id: String,
    pub operation_id: String,
    pub cage_id: String,
    pub slot_number: u32,
    pub status: OperationStatus,
    pub target_weight_kg: Option<f64>,
    pub dispensed_kg: f64,
    pub remaining_kg: Option<f64>,
    pub progress_pct: Option<f64>,
    pub configuration: MachineConfiguration,
    pub started_at: NaiveDateTime,
    pub session_total_kg: f64,
}

impl OperationSummary {
    /// 由会话当前作业生成摘要（无当前作业返回 None）
    pub fn from_session(session: &FeedingSession) -> Option<Self> {
        let op = session.current_operation()?;
        let target = op.target_weight_kg();
        let dispensed = op.dispensed_kg();

        Some(Self {
            line_id: session.line_id().to_string(),
            session_id: session.session_id().to_string(),
            operation_id: op.operation_id().to_string(),
            cage_id: op.cage_id().to_string(),
            slot_number: op.slot_number(),
            status: op.status(),
            target_weight_kg: target,
            dispensed_kg: dispensed,
            remaining_kg: target.map(|t| (t - dispensed).max(0.0)),
            progress_pct: target.filter(|t| *t > 0.0).map(|t| dispensed / t * 100.0),
            configuration: op.configuration().clone(),
            started_at: op.started_at(),
            session_total_kg: session.total_dispensed_kg(),
        })
    }
}

/// 启动恢复结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// 作业已落库，补记 CONFIRMED 的下发记录
    pub confirmed: Vec<String>,
    /// 作业未落库，已发送 STOP 并记为 ABANDONED 的下发记录
    pub abandoned: Vec<String>,
}
