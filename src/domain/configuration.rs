// ==========================================
// 投喂线作业编排 - 设备配置快照（值对象）
// ==========================================
// 红线: 创建后不可变；参数热更新 = 生成新值并替换引用
// 用途: 每一次下发给硬件的配置都可以从快照独立复现（审计）
// ==========================================

use crate::domain::calibration::PhysicalParams;
use crate::domain::types::FeedingMode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// MachineConfiguration - 设备配置
// ==========================================
// 只能由 FeedingStrategy 生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfiguration {
    target_slot: u32,
    mode: FeedingMode,
    blower_speed_pct: f64,
    doser_speed_pct: f64,
    dosing_rate_kg_min: f64,
    target_weight_kg: Option<f64>,
    batch_weight_kg: Option<f64>,
    doser: PhysicalParams,
}

impl MachineConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        target_slot: u32,
        mode: FeedingMode,
        blower_speed_pct: f64,
        dosing_rate_kg_min: f64,
        target_weight_kg: Option<f64>,
        batch_weight_kg: Option<f64>,
        doser: PhysicalParams,
    ) -> Self {
        Self {
            target_slot,
            mode,
            blower_speed_pct,
            doser_speed_pct: doser.doser_speed_pct(),
            dosing_rate_kg_min,
            target_weight_kg,
            batch_weight_kg,
            doser,
        }
    }

    pub fn target_slot(&self) -> u32 {
        self.target_slot
    }

    pub fn mode(&self) -> FeedingMode {
        self.mode
    }

    pub fn blower_speed_pct(&self) -> f64 {
        self.blower_speed_pct
    }

    pub fn doser_speed_pct(&self) -> f64 {
        self.doser_speed_pct
    }

    pub fn dosing_rate_kg_min(&self) -> f64 {
        self.dosing_rate_kg_min
    }

    pub fn target_weight_kg(&self) -> Option<f64> {
        self.target_weight_kg
    }

    pub fn batch_weight_kg(&self) -> Option<f64> {
        self.batch_weight_kg
    }

    pub fn doser(&self) -> &PhysicalParams {
        &self.doser
    }

    /// 计算两份快照之间的字段级差异
    ///
    /// 以序列化后的字段为单位比较；`doser` 作为整体比较
    pub fn diff(&self, newer: &MachineConfiguration) -> Vec<ConfigChange> {
        let old = serde_json::to_value(self).unwrap_or_default();
        let new = serde_json::to_value(newer).unwrap_or_default();

        let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
            return Vec::new();
        };

        old_map
            .iter()
            .filter_map(|(field, old_value)| {
                let new_value = new_map.get(field).cloned().unwrap_or(JsonValue::Null);
                if *old_value == new_value {
                    None
                } else {
                    Some(ConfigChange {
                        field: field.clone(),
                        old: old_value.clone(),
                        new: new_value,
                    })
                }
            })
            .collect()
    }
}

// ==========================================
// ConfigChange - 单字段变更记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub field: String,
    pub old: JsonValue,
    pub new: JsonValue,
}
