// ==========================================
// 投喂线作业编排 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 会话状态 (Session Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active, // 当日进行中
    Closed, // 已关闭（只读）
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl SessionStatus {
    /// 从字符串解析状态（未知值视为 CLOSED，避免误写入）
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "ACTIVE" => SessionStatus::Active,
            _ => SessionStatus::Closed,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Closed => "CLOSED",
        }
    }
}

// ==========================================
// 作业状态 (Operation Status)
// ==========================================
// 终态: STOPPED / COMPLETED / FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Running,   // 下料中
    Paused,    // 暂停（硬件保留进度）
    Stopped,   // 人工停止（硬件清零）
    Completed, // 硬件上报完成
    Failed,    // 硬件故障
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Stopped | OperationStatus::Completed | OperationStatus::Failed
        )
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Some(OperationStatus::Running),
            "PAUSED" => Some(OperationStatus::Paused),
            "STOPPED" => Some(OperationStatus::Stopped),
            "COMPLETED" => Some(OperationStatus::Completed),
            "FAILED" => Some(OperationStatus::Failed),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            OperationStatus::Running => "RUNNING",
            OperationStatus::Paused => "PAUSED",
            OperationStatus::Stopped => "STOPPED",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
        }
    }
}

// ==========================================
// 投喂模式 (Feeding Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedingMode {
    Manual,    // 人工截止（可无目标量）
    Automatic, // 按目标量自动结束
    Cyclic,    // 按批次循环投喂
}

impl fmt::Display for FeedingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FeedingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedingMode::Manual => "MANUAL",
            FeedingMode::Automatic => "AUTOMATIC",
            FeedingMode::Cyclic => "CYCLIC",
        }
    }
}

impl std::str::FromStr for FeedingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MANUAL" => Ok(FeedingMode::Manual),
            "AUTOMATIC" | "AUTO" => Ok(FeedingMode::Automatic),
            "CYCLIC" => Ok(FeedingMode::Cyclic),
            other => Err(format!("未知投喂模式: {}", other)),
        }
    }
}

// ==========================================
// 事件类型 (Event Kind)
// ==========================================
// 会话级与作业级事件共用一套类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionOpened,
    SessionClosed,
    Started,
    Paused,
    Resumed,
    ParamChange,
    Stopped,
    Completed,
    Failed,
    Anomaly,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionOpened => "SESSION_OPENED",
            EventKind::SessionClosed => "SESSION_CLOSED",
            EventKind::Started => "STARTED",
            EventKind::Paused => "PAUSED",
            EventKind::Resumed => "RESUMED",
            EventKind::ParamChange => "PARAM_CHANGE",
            EventKind::Stopped => "STOPPED",
            EventKind::Completed => "COMPLETED",
            EventKind::Failed => "FAILED",
            EventKind::Anomaly => "ANOMALY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SESSION_OPENED" => Some(EventKind::SessionOpened),
            "SESSION_CLOSED" => Some(EventKind::SessionClosed),
            "STARTED" => Some(EventKind::Started),
            "PAUSED" => Some(EventKind::Paused),
            "RESUMED" => Some(EventKind::Resumed),
            "PARAM_CHANGE" => Some(EventKind::ParamChange),
            "STOPPED" => Some(EventKind::Stopped),
            "COMPLETED" => Some(EventKind::Completed),
            "FAILED" => Some(EventKind::Failed),
            "ANOMALY" => Some(EventKind::Anomaly),
            _ => None,
        }
    }
}
