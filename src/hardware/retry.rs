// ==========================================
// 投喂线作业编排 - 硬件写入重试装饰器
// ==========================================
// 职责: 瞬时写入失败在端口内部有限次重试后才向上抛出
// 说明: 状态读取不重试，由同步协调器在下一轮轮询自然重试
// ==========================================

use crate::domain::configuration::MachineConfiguration;
use crate::domain::reading::MachineStatusReading;
use crate::hardware::port::{HardwareCommand, HardwareError, HardwarePort};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

pub struct RetryingHardwarePort<P: HardwarePort> {
    inner: P,
    max_attempts: u32,
    backoff: Duration,
}

impl<P: HardwarePort> RetryingHardwarePort<P> {
    /// # 参数
    /// - max_attempts: 总尝试次数（至少 1 次）
    /// - backoff: 每次重试前的等待时间（线性递增）
    pub fn new(inner: P, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: HardwarePort> HardwarePort for RetryingHardwarePort<P> {
    async fn send_configuration(
        &self,
        line_id: &str,
        configuration: &MachineConfiguration,
    ) -> Result<(), HardwareError> {
        let mut attempt = 1;
        loop {
            match self.inner.send_configuration(line_id, configuration).await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(line_id = %line_id, attempt, error = %e, "配置下发失败，准备重试");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send_command(
        &self,
        line_id: &str,
        command: HardwareCommand,
    ) -> Result<(), HardwareError> {
        let mut attempt = 1;
        loop {
            match self.inner.send_command(line_id, command).await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(line_id = %line_id, %command, attempt, error = %e, "指令下发失败，准备重试");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn read_status(&self, line_id: &str) -> Result<MachineStatusReading, HardwareError> {
        self.inner.read_status(line_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulator::SimulatedPlc;

    #[tokio::test]
    async fn test_retries_transient_command_failures() {
        let plc = SimulatedPlc::new();
        plc.fail_next_writes("L1", 2);
        let port = RetryingHardwarePort::new(plc, 3, Duration::from_millis(1));

        assert!(port.send_command("L1", HardwareCommand::Stop).await.is_ok());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let plc = SimulatedPlc::new();
        plc.fail_next_writes("L1", 5);
        let port = RetryingHardwarePort::new(plc, 3, Duration::from_millis(1));

        let err = port
            .send_command("L1", HardwareCommand::Stop)
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Communication { .. }));
        assert_eq!(port.inner().pending_write_failures("L1"), 2);
    }
}
