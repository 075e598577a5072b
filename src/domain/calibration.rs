// ==========================================
// 投喂线作业编排 - 下料器标定数据
// ==========================================
// 职责: 下料器静态标定（外部设备配置管理维护，核心只读）
// 单位: 时间=秒, 速率=kg/min, 单脉冲下料量=g
// ==========================================

use serde::{Deserialize, Serialize};

/// 脉冲式下料器标定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseCalibration {
    pub pulse_on_time_s: f64,       // 单次脉冲开启时长
    pub base_pulse_off_time_s: f64, // 基准关闭时长
    pub operating_speed_pct: f64,   // 运行转速百分比
    pub grams_per_pulse: f64,       // 单脉冲下料克数
    pub min_pulse_off_time_s: f64,  // 最小允许关闭时长（物理极限）
}

/// 连续式下料器标定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousCalibration {
    pub rated_flow_kg_min: f64,   // 最高转速下的额定流量
    pub max_motor_speed_rpm: f64, // 电机最高转速
}

// ==========================================
// DoserCalibration - 按下料器类型区分的标定
// ==========================================
// 投喂状态机从不检查下料器类型，类型相关计算全部集中在 DosingTranslator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoserCalibration {
    Pulse(PulseCalibration),
    Continuous(ContinuousCalibration),
}

impl DoserCalibration {
    pub fn kind(&self) -> &'static str {
        match self {
            DoserCalibration::Pulse(_) => "PULSE",
            DoserCalibration::Continuous(_) => "CONTINUOUS",
        }
    }
}

// ==========================================
// PhysicalParams - 执行机构物理参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhysicalParams {
    Pulse {
        pulse_on_time_s: f64,
        pulse_off_time_s: f64,
        pulses_per_minute: f64,
        operating_speed_pct: f64,
    },
    Continuous {
        motor_speed_pct: f64,
        motor_speed_rpm: f64,
    },
}

impl PhysicalParams {
    /// 下发给设备的下料器转速百分比
    ///
    /// 脉冲式按标定的运行转速；连续式即换算出的电机转速百分比
    pub fn doser_speed_pct(&self) -> f64 {
        match self {
            PhysicalParams::Pulse {
                operating_speed_pct,
                ..
            } => *operating_speed_pct,
            PhysicalParams::Continuous {
                motor_speed_pct, ..
            } => *motor_speed_pct,
        }
    }
}
