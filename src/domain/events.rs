// ==========================================
// 投喂线作业编排 - 领域事件与异常记录
// ==========================================
// 红线: 所有状态变更必须产生事件（审计追踪）
// 说明: 领域对象只返回事件，不负责写入任何地方
// ==========================================

use crate::domain::types::EventKind;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

// ==========================================
// LogEntry - 会话/作业内部事件日志条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u32,                       // 日志内序号（从 1 开始）
    pub at: NaiveDateTime,              // 发生时间
    pub kind: EventKind,                // 事件类型
    pub detail: String,                 // 自由文本描述
    pub payload: Option<JsonValue>,     // 结构化负载（如参数差异）
}

// ==========================================
// FeedingEvent - 对外返回的领域事件
// ==========================================
// 在 LogEntry 基础上补齐归属（产线/会话/作业）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingEvent {
    pub line_id: String,
    pub session_id: String,
    pub operation_id: Option<String>,
    pub seq: u32,
    pub at: NaiveDateTime,
    pub kind: EventKind,
    pub detail: String,
    pub payload: Option<JsonValue>,
}

impl FeedingEvent {
    pub(crate) fn from_entry(
        line_id: &str,
        session_id: &str,
        operation_id: Option<&str>,
        entry: &LogEntry,
    ) -> Self {
        Self {
            line_id: line_id.to_string(),
            session_id: session_id.to_string(),
            operation_id: operation_id.map(str::to_string),
            seq: entry.seq,
            at: entry.at,
            kind: entry.kind,
            detail: entry.detail.clone(),
            payload: entry.payload.clone(),
        }
    }
}

// ==========================================
// Anomaly - 非致命的数据不一致
// ==========================================
// 只记录与告警，不作为命令失败返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    CounterDecreased,   // 累计下料量回退（如硬件计数清零）
    StaleSequence,      // 读数序号重复或乱序
    TargetOvershoot,    // 下料量超过目标
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::CounterDecreased => "COUNTER_DECREASED",
            AnomalyKind::StaleSequence => "STALE_SEQUENCE",
            AnomalyKind::TargetOvershoot => "TARGET_OVERSHOOT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub line_id: String,
    pub operation_id: Option<String>,
    pub expected: String,
    pub observed: String,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: line={}, operation={}, expected={}, observed={}",
            self.kind.as_str(),
            self.line_id,
            self.operation_id.as_deref().unwrap_or("-"),
            self.expected,
            self.observed
        )
    }
}
