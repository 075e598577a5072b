// ==========================================
// 投喂线作业编排 - PLC 模拟器
// ==========================================
// 职责: 在无现场设备时模拟投喂线控制器，用于演示与集成测试
// 行为:
// - 收到配置：计数清零并开始运行
// - 完成信号被读取前，拒绝同槽位的新配置（防止重复下料）
// - PAUSE 保持计数；RESUME 继续；STOP 清零回到空闲
// - tick(elapsed) 按配置速率推进计数，达到目标量自动完成
// - 支持故障注入与写入失败注入
// ==========================================

use crate::domain::configuration::MachineConfiguration;
use crate::domain::reading::MachineStatusReading;
use crate::hardware::port::{HardwareCommand, HardwareError, HardwarePort};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

// ==========================================
// SimRunState - 模拟设备运行状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimRunState {
    Idle,
    Running,
    Paused,
    Completed,
    Faulted,
}

#[derive(Debug, Clone)]
struct SimLine {
    configuration: Option<MachineConfiguration>,
    state: SimRunState,
    dispensed_kg: f64,
    sequence: u64,
    error_code: Option<String>,
    pending_write_failures: u32,
    completion_reported: bool,
}

impl Default for SimLine {
    fn default() -> Self {
        Self {
            configuration: None,
            state: SimRunState::Idle,
            dispensed_kg: 0.0,
            sequence: 0,
            error_code: None,
            pending_write_failures: 0,
            completion_reported: false,
        }
    }
}

impl SimLine {
    fn take_write_failure(&mut self, line_id: &str) -> Result<(), HardwareError> {
        if self.pending_write_failures > 0 {
            self.pending_write_failures -= 1;
            return Err(HardwareError::Communication {
                line_id: line_id.to_string(),
                message: "模拟写入失败".to_string(),
            });
        }
        Ok(())
    }

    fn advance(&mut self, elapsed: Duration) {
        if self.state != SimRunState::Running {
            return;
        }
        let Some(cfg) = &self.configuration else {
            return;
        };

        self.dispensed_kg += cfg.dosing_rate_kg_min() * elapsed.as_secs_f64() / 60.0;
        if let Some(target) = cfg.target_weight_kg() {
            if self.dispensed_kg >= target {
                self.dispensed_kg = target;
                self.state = SimRunState::Completed;
            }
        }
    }
}

// ==========================================
// SimulatedPlc
// ==========================================
// 产线在首次访问时自动登记
pub struct SimulatedPlc {
    lines: Mutex<HashMap<String, SimLine>>,
    write_delay: Mutex<Option<Duration>>,
}

impl Default for SimulatedPlc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(HashMap::new()),
            write_delay: Mutex::new(None),
        }
    }

    fn lines(&self) -> MutexGuard<'_, HashMap<String, SimLine>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_line<T>(&self, line_id: &str, f: impl FnOnce(&mut SimLine) -> T) -> T {
        let mut lines = self.lines();
        let line = lines.entry(line_id.to_string()).or_default();
        f(line)
    }

    async fn simulate_write_latency(&self) {
        let delay = *self
            .write_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// 推进所有运行中产线的下料计数
    pub fn tick(&self, elapsed: Duration) {
        for line in self.lines().values_mut() {
            line.advance(elapsed);
        }
    }

    /// 推进单条产线
    pub fn tick_line(&self, line_id: &str, elapsed: Duration) {
        self.with_line(line_id, |line| line.advance(elapsed));
    }

    /// 注入设备故障（后续读数携带故障码，写入被拒绝）
    pub fn inject_fault(&self, line_id: &str, code: &str) {
        self.with_line(line_id, |line| {
            line.state = SimRunState::Faulted;
            line.error_code = Some(code.to_string());
        });
    }

    /// 清除故障，设备回到空闲
    pub fn clear_fault(&self, line_id: &str) {
        self.with_line(line_id, |line| {
            line.state = SimRunState::Idle;
            line.error_code = None;
        });
    }

    /// 令接下来 n 次写入返回通信失败
    pub fn fail_next_writes(&self, line_id: &str, count: u32) {
        self.with_line(line_id, |line| line.pending_write_failures = count);
    }

    pub fn pending_write_failures(&self, line_id: &str) -> u32 {
        self.with_line(line_id, |line| line.pending_write_failures)
    }

    /// 设置写入延迟（模拟慢速现场总线）
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self
            .write_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// 直接改写下料计数（模拟控制器计数复位等异常）
    pub fn force_counter(&self, line_id: &str, cumulative_kg: f64) {
        self.with_line(line_id, |line| line.dispensed_kg = cumulative_kg);
    }

    pub fn state(&self, line_id: &str) -> SimRunState {
        self.with_line(line_id, |line| line.state)
    }

    pub fn dispensed_kg(&self, line_id: &str) -> f64 {
        self.with_line(line_id, |line| line.dispensed_kg)
    }

    /// 最近一次成功下发的配置
    pub fn configuration(&self, line_id: &str) -> Option<MachineConfiguration> {
        self.with_line(line_id, |line| line.configuration.clone())
    }
}

#[async_trait]
impl HardwarePort for SimulatedPlc {
    async fn send_configuration(
        &self,
        line_id: &str,
        configuration: &MachineConfiguration,
    ) -> Result<(), HardwareError> {
        self.simulate_write_latency().await;

        self.with_line(line_id, |line| {
            line.take_write_failure(line_id)?;
            if line.state == SimRunState::Faulted {
                return Err(HardwareError::Rejected {
                    line_id: line_id.to_string(),
                    code: line.error_code.clone().unwrap_or_default(),
                });
            }

            let same_slot = line
                .configuration
                .as_ref()
                .map(|c| c.target_slot() == configuration.target_slot())
                .unwrap_or(false);

            // 完成信号尚未被读取：本轮下料已结束，不得重新开始
            if line.state == SimRunState::Completed && !line.completion_reported && same_slot {
                return Err(HardwareError::Rejected {
                    line_id: line_id.to_string(),
                    code: "COMPLETED".to_string(),
                });
            }

            // 同槽位同作业热更新：保留计数
            let keep_counter = matches!(line.state, SimRunState::Running | SimRunState::Paused)
                && same_slot;
            if !keep_counter {
                line.dispensed_kg = 0.0;
                line.state = SimRunState::Running;
                line.completion_reported = false;
            }
            line.configuration = Some(configuration.clone());
            debug!(line_id = %line_id, slot = configuration.target_slot(), keep_counter, "模拟器收到配置");
            Ok(())
        })
    }

    async fn send_command(
        &self,
        line_id: &str,
        command: HardwareCommand,
    ) -> Result<(), HardwareError> {
        self.simulate_write_latency().await;

        self.with_line(line_id, |line| {
            line.take_write_failure(line_id)?;
            match command {
                HardwareCommand::Pause => {
                    if line.state == SimRunState::Running {
                        line.state = SimRunState::Paused;
                    }
                }
                HardwareCommand::Resume => {
                    if line.state == SimRunState::Paused {
                        line.state = SimRunState::Running;
                    }
                }
                HardwareCommand::Stop => {
                    if line.state != SimRunState::Faulted {
                        line.state = SimRunState::Idle;
                    }
                    line.dispensed_kg = 0.0;
                    line.configuration = None;
                }
            }
            debug!(line_id = %line_id, %command, state = ?line.state, "模拟器收到指令");
            Ok(())
        })
    }

    async fn read_status(&self, line_id: &str) -> Result<MachineStatusReading, HardwareError> {
        Ok(self.with_line(line_id, |line| {
            line.sequence += 1;
            if line.state == SimRunState::Completed {
                line.completion_reported = true;
            }
            MachineStatusReading {
                sequence: line.sequence,
                cumulative_weight_kg: line.dispensed_kg,
                running: line.state == SimRunState::Running,
                paused: line.state == SimRunState::Paused,
                completed: line.state == SimRunState::Completed,
                error: line.state == SimRunState::Faulted,
                error_code: line.error_code.clone(),
            }
        }))
    }
}
