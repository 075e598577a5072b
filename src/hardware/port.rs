// ==========================================
// 投喂线作业编排 - 硬件端口
// ==========================================
// 职责: 定义与 PLC（或模拟器）交互的窄接口
// 说明: 核心只定义指令与读数；字节级协议属于硬件适配器
// ==========================================

use crate::domain::configuration::MachineConfiguration;
use crate::domain::reading::MachineStatusReading;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ==========================================
// HardwareCommand - 控制指令
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareCommand {
    Pause,  // 暂停：硬件保留进度
    Resume, // 恢复：继续上次进度
    Stop,   // 停止：硬件清零
}

impl fmt::Display for HardwareCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareCommand::Pause => write!(f, "PAUSE"),
            HardwareCommand::Resume => write!(f, "RESUME"),
            HardwareCommand::Stop => write!(f, "STOP"),
        }
    }
}

// ==========================================
// HardwareError - 硬件通信错误
// ==========================================
// 与领域拒绝严格区分：调用方据此区分“请求不合法”与“硬件无响应”
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    #[error("硬件通信超时: line={line_id}, timeout={timeout_ms}ms")]
    Timeout { line_id: String, timeout_ms: u64 },

    #[error("硬件通信失败: line={line_id}: {message}")]
    Communication { line_id: String, message: String },

    #[error("硬件拒绝指令: line={line_id}, code={code}")]
    Rejected { line_id: String, code: String },
}

impl HardwareError {
    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HardwareError::Timeout { .. } | HardwareError::Communication { .. }
        )
    }
}

// ==========================================
// HardwarePort Trait
// ==========================================
// 实现者: SimulatedPlc、RetryingHardwarePort、现场 PLC 适配器
#[async_trait]
pub trait HardwarePort: Send + Sync {
    /// 下发完整设备配置（开始投喂 / 参数热更新）
    async fn send_configuration(
        &self,
        line_id: &str,
        configuration: &MachineConfiguration,
    ) -> Result<(), HardwareError>;

    /// 下发控制指令
    async fn send_command(&self, line_id: &str, command: HardwareCommand)
        -> Result<(), HardwareError>;

    /// 读取设备状态
    async fn read_status(&self, line_id: &str) -> Result<MachineStatusReading, HardwareError>;
}

// 共享端口（如模拟器同时被装饰器与时间推进任务持有）
#[async_trait]
impl<T: HardwarePort + ?Sized> HardwarePort for Arc<T> {
    async fn send_configuration(
        &self,
        line_id: &str,
        configuration: &MachineConfiguration,
    ) -> Result<(), HardwareError> {
        (**self).send_configuration(line_id, configuration).await
    }

    async fn send_command(&self, line_id: &str, command: HardwareCommand)
        -> Result<(), HardwareError> {
        (**self).send_command(line_id, command).await
    }

    async fn read_status(&self, line_id: &str) -> Result<MachineStatusReading, HardwareError> {
        (**self).read_status(line_id).await
    }
}

/// 为一次硬件调用加上时间上限
///
/// 超时统一转换为 `HardwareError::Timeout`
pub async fn with_deadline<T, F>(
    line_id: &str,
    timeout: Duration,
    call: F,
) -> Result<T, HardwareError>
where
    F: Future<Output = Result<T, HardwareError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::Timeout {
            line_id: line_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
