// ==========================================
// 投喂线作业编排 - 硬件状态读数
// ==========================================
// 由硬件端口周期性读取，经 FeedingSession 应用到当前作业
// ==========================================

use serde::{Deserialize, Serialize};

/// 设备状态读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatusReading {
    pub sequence: u64,              // 读数序号（单产线单调递增）
    pub cumulative_weight_kg: f64,  // 本次投喂累计下料量
    pub running: bool,
    pub paused: bool,
    pub completed: bool,            // 硬件侧判定完成
    pub error: bool,                // 硬件故障标志
    pub error_code: Option<String>, // 故障码
}

impl MachineStatusReading {
    /// 正常运行中的读数
    pub fn running(sequence: u64, cumulative_weight_kg: f64) -> Self {
        Self {
            sequence,
            cumulative_weight_kg,
            running: true,
            paused: false,
            completed: false,
            error: false,
            error_code: None,
        }
    }

    pub fn with_completed(mut self) -> Self {
        self.running = false;
        self.completed = true;
        self
    }

    pub fn with_paused(mut self) -> Self {
        self.running = false;
        self.paused = true;
        self
    }

    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.running = false;
        self.error = true;
        self.error_code = Some(code.into());
        self
    }
}
