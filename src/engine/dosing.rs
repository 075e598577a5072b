// ==========================================
// 投喂线作业编排 - 下料速率换算引擎
// ==========================================
// 职责: 逻辑下料速率 (kg/min) → 执行机构物理参数
// 红线: 纯函数；不修改标定；同一输入必得同一输出
//       （初次下发、热更新、测试回放走同一条计算路径）
// ==========================================

use crate::domain::calibration::{
    ContinuousCalibration, DoserCalibration, PhysicalParams, PulseCalibration,
};
use crate::domain::error::{DomainError, DomainResult};

/// 浮点比较容差：恰好达到物理极限时视为可行
const LIMIT_EPSILON: f64 = 1e-9;

// ==========================================
// DosingTranslator - 下料换算器（无状态）
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DosingTranslator;

impl DosingTranslator {
    pub fn new() -> Self {
        Self
    }

    /// 设备最大可达下料速率 (kg/min)
    ///
    /// - PULSE: 60 / (开启时长 + 最小关闭时长) * 单脉冲克数 / 1000
    /// - CONTINUOUS: 最高转速下的额定流量
    pub fn capacity(&self, calibration: &DoserCalibration) -> f64 {
        match calibration {
            DoserCalibration::Pulse(cal) => {
                let min_cycle_s = cal.pulse_on_time_s + cal.min_pulse_off_time_s;
                if min_cycle_s <= 0.0 {
                    return 0.0;
                }
                60.0 / min_cycle_s * cal.grams_per_pulse / 1000.0
            }
            DoserCalibration::Continuous(cal) => cal.rated_flow_kg_min,
        }
    }

    /// 将逻辑下料速率换算为物理参数
    ///
    /// # 错误
    /// - InvalidParameterRange: 速率非正数或非有限值，或标定数据不可用
    /// - RateExceedsCapacity: 超出物理极限（脉冲关闭时长过短 / 电机转速超过 100%）
    pub fn translate(
        &self,
        calibration: &DoserCalibration,
        target_rate_kg_min: f64,
    ) -> DomainResult<PhysicalParams> {
        if !target_rate_kg_min.is_finite() || target_rate_kg_min <= 0.0 {
            return Err(DomainError::out_of_range(
                "dosing_rate_kg_min",
                target_rate_kg_min,
                "下料速率必须为正数",
            ));
        }

        match calibration {
            DoserCalibration::Pulse(cal) => self.translate_pulse(calibration, cal, target_rate_kg_min),
            DoserCalibration::Continuous(cal) => {
                self.translate_continuous(calibration, cal, target_rate_kg_min)
            }
        }
    }

    fn translate_pulse(
        &self,
        calibration: &DoserCalibration,
        cal: &PulseCalibration,
        rate_kg_min: f64,
    ) -> DomainResult<PhysicalParams> {
        if cal.grams_per_pulse <= 0.0 {
            return Err(DomainError::out_of_range(
                "grams_per_pulse",
                cal.grams_per_pulse,
                "标定单脉冲克数必须为正数",
            ));
        }

        let pulses_per_minute = rate_kg_min * 1000.0 / cal.grams_per_pulse;
        let cycle_time_s = 60.0 / pulses_per_minute;
        let pulse_off_time_s = cycle_time_s - cal.pulse_on_time_s;

        if pulse_off_time_s + LIMIT_EPSILON < cal.min_pulse_off_time_s {
            return Err(DomainError::RateExceedsCapacity {
                requested_kg_min: rate_kg_min,
                max_kg_min: self.capacity(calibration),
            });
        }

        Ok(PhysicalParams::Pulse {
            pulse_on_time_s: cal.pulse_on_time_s,
            pulse_off_time_s: pulse_off_time_s.max(cal.min_pulse_off_time_s),
            pulses_per_minute,
            operating_speed_pct: cal.operating_speed_pct,
        })
    }

    fn translate_continuous(
        &self,
        calibration: &DoserCalibration,
        cal: &ContinuousCalibration,
        rate_kg_min: f64,
    ) -> DomainResult<PhysicalParams> {
        if cal.rated_flow_kg_min <= 0.0 {
            return Err(DomainError::out_of_range(
                "rated_flow_kg_min",
                cal.rated_flow_kg_min,
                "标定额定流量必须为正数",
            ));
        }

        let motor_speed_pct = rate_kg_min / cal.rated_flow_kg_min * 100.0;
        if motor_speed_pct > 100.0 + LIMIT_EPSILON {
            return Err(DomainError::RateExceedsCapacity {
                requested_kg_min: rate_kg_min,
                max_kg_min: self.capacity(calibration),
            });
        }

        let motor_speed_pct = motor_speed_pct.min(100.0);
        Ok(PhysicalParams::Continuous {
            motor_speed_pct,
            motor_speed_rpm: cal.max_motor_speed_rpm * motor_speed_pct / 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_cal() -> DoserCalibration {
        // 最小周期 0.5+0.5=1s → 60 脉冲/分钟 → 60*200g = 12 kg/min
        DoserCalibration::Pulse(PulseCalibration {
            pulse_on_time_s: 0.5,
            base_pulse_off_time_s: 1.5,
            operating_speed_pct: 80.0,
            grams_per_pulse: 200.0,
            min_pulse_off_time_s: 0.5,
        })
    }

    fn continuous_cal() -> DoserCalibration {
        DoserCalibration::Continuous(ContinuousCalibration {
            rated_flow_kg_min: 20.0,
            max_motor_speed_rpm: 1500.0,
        })
    }

    #[test]
    fn test_pulse_capacity() {
        let translator = DosingTranslator::new();
        assert!((translator.capacity(&pulse_cal()) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_pulse_translate_within_limit() {
        let translator = DosingTranslator::new();
        let params = translator.translate(&pulse_cal(), 6.0).unwrap();

        match params {
            PhysicalParams::Pulse {
                pulse_on_time_s,
                pulse_off_time_s,
                pulses_per_minute,
                operating_speed_pct,
            } => {
                assert!((pulses_per_minute - 30.0).abs() < 1e-9);
                assert!((pulse_on_time_s - 0.5).abs() < 1e-9);
                assert!((pulse_off_time_s - 1.5).abs() < 1e-9);
                assert!(pulse_off_time_s >= 0.5);
                assert_eq!(operating_speed_pct, 80.0);
            }
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn test_pulse_exactly_at_capacity_is_allowed() {
        let translator = DosingTranslator::new();
        let params = translator.translate(&pulse_cal(), 12.0).unwrap();
        if let PhysicalParams::Pulse {
            pulse_off_time_s, ..
        } = params
        {
            assert!(pulse_off_time_s >= 0.5);
        }
    }

    #[test]
    fn test_pulse_exceeds_min_off_time() {
        let translator = DosingTranslator::new();
        let err = translator.translate(&pulse_cal(), 12.5).unwrap_err();
        match err {
            DomainError::RateExceedsCapacity {
                requested_kg_min,
                max_kg_min,
            } => {
                assert_eq!(requested_kg_min, 12.5);
                assert!((max_kg_min - 12.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_continuous_translate_and_limit() {
        let translator = DosingTranslator::new();
        let params = translator.translate(&continuous_cal(), 10.0).unwrap();
        assert_eq!(
            params,
            PhysicalParams::Continuous {
                motor_speed_pct: 50.0,
                motor_speed_rpm: 750.0,
            }
        );

        let full = translator.translate(&continuous_cal(), 20.0).unwrap();
        assert_eq!(full.doser_speed_pct(), 100.0);

        assert!(matches!(
            translator.translate(&continuous_cal(), 20.1),
            Err(DomainError::RateExceedsCapacity { .. })
        ));
        assert_eq!(translator.capacity(&continuous_cal()), 20.0);
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        let translator = DosingTranslator::new();
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                translator.translate(&continuous_cal(), rate),
                Err(DomainError::InvalidParameterRange { .. })
            ));
        }
    }

    #[test]
    fn test_translate_is_deterministic_and_pure() {
        let translator = DosingTranslator::new();
        let cal = pulse_cal();
        let snapshot = cal.clone();
        let a = translator.translate(&cal, 7.5).unwrap();
        let b = translator.translate(&cal, 7.5).unwrap();
        assert_eq!(a, b);
        assert_eq!(cal, snapshot);
    }
}
