// ==========================================
// 投喂线作业编排 - 投喂作业（单次投喂）
// ==========================================
// 状态机:
//   RUNNING ⇄ PAUSED
//   RUNNING / PAUSED → STOPPED | COMPLETED | FAILED（终态）
// 红线: 配置快照只能整体替换；下料量只增不减
// ==========================================

use crate::domain::configuration::MachineConfiguration;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::events::{Anomaly, AnomalyKind, LogEntry};
use crate::domain::reading::MachineStatusReading;
use crate::domain::types::{EventKind, OperationStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ==========================================
// FeedingOperation - 投喂作业实体
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingOperation {
    pub(crate) operation_id: String,
    pub(crate) session_id: String,
    pub(crate) line_id: String,
    pub(crate) cage_id: String,
    pub(crate) slot_number: u32,
    pub(crate) status: OperationStatus,
    pub(crate) dispensed_kg: f64,
    pub(crate) last_cumulative_kg: f64,
    pub(crate) configuration: MachineConfiguration,
    pub(crate) started_at: NaiveDateTime,
    pub(crate) ended_at: Option<NaiveDateTime>,
    pub(crate) error_code: Option<String>,
    pub(crate) log: Vec<LogEntry>,
}

/// 一次硬件读数对作业产生的影响
#[derive(Debug, Clone, Default)]
pub struct ReadingEffect {
    pub delta_kg: f64,
    pub entries: Vec<LogEntry>,
    pub anomalies: Vec<Anomaly>,
}

impl FeedingOperation {
    /// 创建作业（只在开始投喂时构造，初始即 RUNNING）
    pub(crate) fn start(
        operation_id: String,
        session_id: &str,
        line_id: &str,
        cage_id: &str,
        slot_number: u32,
        configuration: MachineConfiguration,
        at: NaiveDateTime,
    ) -> Self {
        let mut operation = Self {
            operation_id,
            session_id: session_id.to_string(),
            line_id: line_id.to_string(),
            cage_id: cage_id.to_string(),
            slot_number,
            status: OperationStatus::Running,
            dispensed_kg: 0.0,
            last_cumulative_kg: 0.0,
            configuration,
            started_at: at,
            ended_at: None,
            error_code: None,
            log: Vec::new(),
        };

        let payload = serde_json::to_value(&operation.configuration).ok();
        operation.append(
            at,
            EventKind::Started,
            format!("开始投喂: cage={}, slot={}", cage_id, slot_number),
            payload,
        );
        operation
    }

    // ===== 只读访问 =====

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn line_id(&self) -> &str {
        &self.line_id
    }

    pub fn cage_id(&self) -> &str {
        &self.cage_id
    }

    pub fn slot_number(&self) -> u32 {
        self.slot_number
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn target_weight_kg(&self) -> Option<f64> {
        self.configuration.target_weight_kg()
    }

    pub fn dispensed_kg(&self) -> f64 {
        self.dispensed_kg
    }

    pub fn configuration(&self) -> &MachineConfiguration {
        &self.configuration
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<NaiveDateTime> {
        self.ended_at
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    // ==========================================
    // 状态转换
    // ==========================================

    /// 暂停（仅 RUNNING）
    pub fn pause(&mut self, at: NaiveDateTime) -> DomainResult<LogEntry> {
        if self.status != OperationStatus::Running {
            return Err(DomainError::invalid_transition(self.status, "PAUSE"));
        }
        self.status = OperationStatus::Paused;
        Ok(self.append(at, EventKind::Paused, "暂停投喂".to_string(), None))
    }

    /// 恢复（仅 PAUSED）
    ///
    /// 不重新下发配置，进度由硬件侧保留
    pub fn resume(&mut self, at: NaiveDateTime) -> DomainResult<LogEntry> {
        if self.status != OperationStatus::Paused {
            return Err(DomainError::invalid_transition(self.status, "RESUME"));
        }
        self.status = OperationStatus::Running;
        Ok(self.append(at, EventKind::Resumed, "恢复投喂".to_string(), None))
    }

    /// 参数热更新（仅 RUNNING）
    pub fn update_parameters(
        &mut self,
        new_configuration: MachineConfiguration,
        at: NaiveDateTime,
    ) -> DomainResult<LogEntry> {
        if self.status != OperationStatus::Running {
            return Err(DomainError::invalid_transition(self.status, "UPDATE_PARAMETERS"));
        }

        let changes = self.configuration.diff(&new_configuration);
        let detail = if changes.is_empty() {
            "参数热更新: 无字段变化".to_string()
        } else {
            let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
            format!("参数热更新: {}", fields.join(", "))
        };

        self.configuration = new_configuration;
        Ok(self.append(
            at,
            EventKind::ParamChange,
            detail,
            Some(json!({ "changes": changes })),
        ))
    }

    /// 停止（RUNNING / PAUSED → STOPPED）
    pub fn stop(&mut self, at: NaiveDateTime) -> DomainResult<LogEntry> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(self.status, "STOP"));
        }
        self.status = OperationStatus::Stopped;
        self.ended_at = Some(at);
        Ok(self.append(
            at,
            EventKind::Stopped,
            format!("人工停止: dispensed={:.3}kg", self.dispensed_kg),
            None,
        ))
    }

    /// 应用硬件读数（RUNNING / PAUSED）
    ///
    /// 下料量按累计值的非负增量累加；累计值回退时增量记 0 并记录异常
    pub fn apply_hardware_reading(
        &mut self,
        reading: &MachineStatusReading,
        at: NaiveDateTime,
        overshoot_tolerance_kg: f64,
    ) -> DomainResult<ReadingEffect> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(self.status, "APPLY_READING"));
        }

        let mut effect = ReadingEffect::default();
        let observed = reading.cumulative_weight_kg;

        if observed < self.last_cumulative_kg || !observed.is_finite() {
            let anomaly = self.anomaly(
                AnomalyKind::CounterDecreased,
                format!(">= {:.3}", self.last_cumulative_kg),
                format!("{:.3}", observed),
            );
            effect.entries.push(self.append(
                at,
                EventKind::Anomaly,
                anomaly.to_string(),
                None,
            ));
            effect.anomalies.push(anomaly);
            if observed.is_finite() && observed >= 0.0 {
                // 以新计数为基准继续累计
                self.last_cumulative_kg = observed;
            }
        } else {
            effect.delta_kg = observed - self.last_cumulative_kg;
            self.last_cumulative_kg = observed;
        }

        if effect.delta_kg > 0.0 {
            let before = self.dispensed_kg;
            self.dispensed_kg += effect.delta_kg;

            if let Some(target) = self.target_weight_kg() {
                let limit = target + overshoot_tolerance_kg;
                if before <= limit && self.dispensed_kg > limit {
                    let anomaly = self.anomaly(
                        AnomalyKind::TargetOvershoot,
                        format!("<= {:.3}", target),
                        format!("{:.3}", self.dispensed_kg),
                    );
                    effect.entries.push(self.append(
                        at,
                        EventKind::Anomaly,
                        anomaly.to_string(),
                        None,
                    ));
                    effect.anomalies.push(anomaly);
                }
            }
        }

        if reading.error {
            self.status = OperationStatus::Failed;
            self.ended_at = Some(at);
            self.error_code = reading.error_code.clone();
            effect.entries.push(self.append(
                at,
                EventKind::Failed,
                format!(
                    "硬件故障: code={}",
                    reading.error_code.as_deref().unwrap_or("UNKNOWN")
                ),
                Some(json!({ "error_code": reading.error_code })),
            ));
        } else if reading.completed {
            self.status = OperationStatus::Completed;
            self.ended_at = Some(at);
            effect.entries.push(self.append(
                at,
                EventKind::Completed,
                format!("硬件上报完成: dispensed={:.3}kg", self.dispensed_kg),
                None,
            ));
        }

        Ok(effect)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn append(
        &mut self,
        at: NaiveDateTime,
        kind: EventKind,
        detail: String,
        payload: Option<serde_json::Value>,
    ) -> LogEntry {
        let entry = LogEntry {
            seq: self.log.len() as u32 + 1,
            at,
            kind,
            detail,
            payload,
        };
        self.log.push(entry.clone());
        entry
    }

    fn anomaly(&self, kind: AnomalyKind, expected: String, observed: String) -> Anomaly {
        Anomaly {
            kind,
            line_id: self.line_id.clone(),
            operation_id: Some(self.operation_id.clone()),
            expected,
            observed,
        }
    }
}
