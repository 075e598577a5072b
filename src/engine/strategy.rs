// ==========================================
// 投喂线作业编排 - 投喂策略
// ==========================================
// 用途：
// - 把操作员意图（模式/风机转速/下料速率/目标量）翻译成完整的设备配置；
// - 策略实例不可变：改参数 = 复制其余字段生成新策略，保证每份下发配置可由快照复现。
// 红线: 不做硬件 I/O，不做持久化

use crate::domain::calibration::DoserCalibration;
use crate::domain::configuration::MachineConfiguration;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::FeedingMode;
use crate::engine::dosing::DosingTranslator;
use serde::{Deserialize, Serialize};

/// 操作员投喂意图（逻辑参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingIntent {
    pub mode: FeedingMode,
    pub blower_speed_pct: f64,
    pub dosing_rate_kg_min: f64,
    #[serde(default)]
    pub target_weight_kg: Option<f64>,
    #[serde(default)]
    pub batch_weight_kg: Option<f64>,
}

// ==========================================
// FeedingStrategy - 投喂策略（不可变）
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct FeedingStrategy {
    intent: FeedingIntent,
    translator: DosingTranslator,
}

impl FeedingStrategy {
    pub fn new(intent: FeedingIntent) -> Self {
        Self {
            intent,
            translator: DosingTranslator::new(),
        }
    }

    /// 由当前配置快照还原策略（用于热更新：只替换变化的字段）
    pub fn from_configuration(configuration: &MachineConfiguration) -> Self {
        Self::new(FeedingIntent {
            mode: configuration.mode(),
            blower_speed_pct: configuration.blower_speed_pct(),
            dosing_rate_kg_min: configuration.dosing_rate_kg_min(),
            target_weight_kg: configuration.target_weight_kg(),
            batch_weight_kg: configuration.batch_weight_kg(),
        })
    }

    pub fn intent(&self) -> &FeedingIntent {
        &self.intent
    }

    pub fn with_blower_speed(&self, blower_speed_pct: f64) -> Self {
        let mut intent = self.intent.clone();
        intent.blower_speed_pct = blower_speed_pct;
        Self::new(intent)
    }

    pub fn with_dosing_rate(&self, dosing_rate_kg_min: f64) -> Self {
        let mut intent = self.intent.clone();
        intent.dosing_rate_kg_min = dosing_rate_kg_min;
        Self::new(intent)
    }

    pub fn with_target_weight(&self, target_weight_kg: Option<f64>) -> Self {
        let mut intent = self.intent.clone();
        intent.target_weight_kg = target_weight_kg;
        Self::new(intent)
    }

    /// 校验逻辑参数范围（不涉及设备能力）
    pub fn validate(&self) -> DomainResult<()> {
        let intent = &self.intent;

        if !(0.0..=100.0).contains(&intent.blower_speed_pct) {
            return Err(DomainError::out_of_range(
                "blower_speed_pct",
                intent.blower_speed_pct,
                "风机转速百分比必须在 0~100 之间",
            ));
        }

        if let Some(target) = intent.target_weight_kg {
            if !target.is_finite() || target < 0.0 {
                return Err(DomainError::out_of_range(
                    "target_weight_kg",
                    target,
                    "目标投喂量不能为负数",
                ));
            }
        }

        if let Some(batch) = intent.batch_weight_kg {
            if !batch.is_finite() || batch < 0.0 {
                return Err(DomainError::out_of_range(
                    "batch_weight_kg",
                    batch,
                    "批次投喂量不能为负数",
                ));
            }
            if let Some(target) = intent.target_weight_kg {
                if batch > target {
                    return Err(DomainError::out_of_range(
                        "batch_weight_kg",
                        batch,
                        format!("批次投喂量不能大于目标量 {}kg", target),
                    ));
                }
            }
        }

        match intent.mode {
            FeedingMode::Automatic if intent.target_weight_kg.is_none() => {
                Err(DomainError::out_of_range(
                    "target_weight_kg",
                    0.0,
                    "自动模式必须指定目标投喂量",
                ))
            }
            FeedingMode::Cyclic if intent.batch_weight_kg.map_or(true, |b| b <= 0.0) => {
                Err(DomainError::out_of_range(
                    "batch_weight_kg",
                    intent.batch_weight_kg.unwrap_or(0.0),
                    "循环模式必须指定正的批次投喂量",
                ))
            }
            _ => Ok(()),
        }
    }

    /// 生成完整设备配置
    ///
    /// # 参数
    /// - slot_number: 已解析的物理槽位（正整数）
    /// - calibration: 当前下料器标定
    pub fn build(
        &self,
        slot_number: u32,
        calibration: &DoserCalibration,
    ) -> DomainResult<MachineConfiguration> {
        if slot_number == 0 {
            return Err(DomainError::out_of_range(
                "slot_number",
                0.0,
                "槽位号必须为正整数",
            ));
        }
        self.validate()?;

        let doser = self
            .translator
            .translate(calibration, self.intent.dosing_rate_kg_min)?;

        let doser_speed_pct = doser.doser_speed_pct();
        if !(0.0..=100.0).contains(&doser_speed_pct) {
            return Err(DomainError::out_of_range(
                "doser_speed_pct",
                doser_speed_pct,
                "下料器转速百分比必须在 0~100 之间",
            ));
        }

        Ok(MachineConfiguration::new(
            slot_number,
            self.intent.mode,
            self.intent.blower_speed_pct,
            self.intent.dosing_rate_kg_min,
            self.intent.target_weight_kg,
            self.intent.batch_weight_kg,
            doser,
        ))
    }
}
