// ==========================================
// 投喂线作业编排 - 投喂会话（聚合根）
// ==========================================
// 职责: 单条投喂线一个工作日内的全部作业
// 红线:
// - 每条产线每个日历日只有一个 ACTIVE 会话；跨日先关闭旧会话
// - 任一时刻最多一个非终态作业（当前作业）
// - 累计下料量只增不减；会话关闭后不可再变更
// - 不做 I/O：所有变更只返回事件，由调用方持久化/下发
// ==========================================

use crate::domain::calibration::DoserCalibration;
use crate::domain::configuration::MachineConfiguration;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::events::{Anomaly, AnomalyKind, FeedingEvent, LogEntry};
use crate::domain::operation::FeedingOperation;
use crate::domain::reading::MachineStatusReading;
use crate::domain::types::{EventKind, OperationStatus, SessionStatus};
use crate::engine::strategy::FeedingStrategy;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ==========================================
// FeedingSession - 投喂会话
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingSession {
    pub(crate) session_id: String,
    pub(crate) line_id: String,
    pub(crate) session_date: NaiveDate,
    pub(crate) status: SessionStatus,
    pub(crate) operations: Vec<FeedingOperation>, // 插入顺序 = 时间顺序
    pub(crate) current_operation_id: Option<String>,
    pub(crate) total_dispensed_kg: f64,
    pub(crate) slot_totals: BTreeMap<u32, f64>,
    pub(crate) last_reading_seq: Option<u64>,
    pub(crate) opened_at: NaiveDateTime,
    pub(crate) closed_at: Option<NaiveDateTime>,
    pub(crate) log: Vec<LogEntry>,
}

/// 跨日判定结果
#[derive(Debug, Clone)]
pub struct DayResolution {
    /// 当日可用的 ACTIVE 会话
    pub session: FeedingSession,
    /// 因跨日被关闭的旧会话（需要一并持久化）
    pub closed: Option<FeedingSession>,
    pub events: Vec<FeedingEvent>,
}

/// 开始作业的结果
#[derive(Debug, Clone)]
pub struct StartedOperation {
    pub operation_id: String,
    /// 需转发给硬件端口的配置
    pub configuration: MachineConfiguration,
    pub events: Vec<FeedingEvent>,
}

/// 硬件同步结果
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub applied_delta_kg: f64,
    pub events: Vec<FeedingEvent>,
    pub anomalies: Vec<Anomaly>,
    /// 本次读数使当前作业进入的终态
    pub finished: Option<OperationStatus>,
    /// 读数是否因序号重复/乱序被丢弃
    pub dropped: bool,
}

impl FeedingSession {
    /// 开启新会话
    pub fn open(line_id: &str, session_date: NaiveDate, at: NaiveDateTime) -> Self {
        let mut session = Self {
            session_id: Uuid::new_v4().to_string(),
            line_id: line_id.to_string(),
            session_date,
            status: SessionStatus::Active,
            operations: Vec::new(),
            current_operation_id: None,
            total_dispensed_kg: 0.0,
            slot_totals: BTreeMap::new(),
            last_reading_seq: None,
            opened_at: at,
            closed_at: None,
            log: Vec::new(),
        };
        session.append(
            at,
            EventKind::SessionOpened,
            format!("开启投喂会话: line={}, date={}", line_id, session_date),
        );
        session
    }

    /// 跨日判定
    ///
    /// 旧日期（或已关闭）的会话被关闭并为 `today` 开启新会话；同日 ACTIVE 会话直接复用。
    /// 旧会话仍有非终态作业时拒绝（需先停止该作业）。
    pub fn resolve_for_day(
        existing: Option<FeedingSession>,
        line_id: &str,
        today: NaiveDate,
        at: NaiveDateTime,
    ) -> DomainResult<DayResolution> {
        let Some(mut previous) = existing else {
            let session = Self::open(line_id, today, at);
            let events = session.events_from(0);
            return Ok(DayResolution {
                session,
                closed: None,
                events,
            });
        };

        if previous.status == SessionStatus::Active && previous.session_date >= today {
            return Ok(DayResolution {
                session: previous,
                closed: None,
                events: Vec::new(),
            });
        }

        let mut events = Vec::new();
        let closed = if previous.status == SessionStatus::Active {
            events.extend(previous.close(at)?);
            Some(previous)
        } else {
            None
        };

        let session = Self::open(line_id, today, at);
        events.extend(session.events_from(0));
        Ok(DayResolution {
            session,
            closed,
            events,
        })
    }

    /// 关闭会话（跨日或管理员操作）
    pub fn close(&mut self, at: NaiveDateTime) -> DomainResult<Vec<FeedingEvent>> {
        self.ensure_active()?;
        if let Some(current) = self.current_operation() {
            return Err(DomainError::OperationAlreadyActive {
                line_id: self.line_id.clone(),
                operation_id: current.operation_id().to_string(),
            });
        }

        self.status = SessionStatus::Closed;
        self.closed_at = Some(at);
        let entry = self.append(
            at,
            EventKind::SessionClosed,
            format!(
                "关闭投喂会话: operations={}, total={:.3}kg",
                self.operations.len(),
                self.total_dispensed_kg
            ),
        );
        Ok(vec![self.session_event(&entry)])
    }

    // ===== 只读访问 =====

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn line_id(&self) -> &str {
        &self.line_id
    }

    pub fn session_date(&self) -> NaiveDate {
        self.session_date
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn operations(&self) -> &[FeedingOperation] {
        &self.operations
    }

    pub fn total_dispensed_kg(&self) -> f64 {
        self.total_dispensed_kg
    }

    pub fn slot_totals(&self) -> &BTreeMap<u32, f64> {
        &self.slot_totals
    }

    pub fn slot_total_kg(&self, slot_number: u32) -> f64 {
        self.slot_totals.get(&slot_number).copied().unwrap_or(0.0)
    }

    pub fn last_reading_seq(&self) -> Option<u64> {
        self.last_reading_seq
    }

    pub fn opened_at(&self) -> NaiveDateTime {
        self.opened_at
    }

    pub fn closed_at(&self) -> Option<NaiveDateTime> {
        self.closed_at
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// 当前作业（非终态）
    pub fn current_operation(&self) -> Option<&FeedingOperation> {
        let id = self.current_operation_id.as_deref()?;
        self.operations
            .iter()
            .find(|op| op.operation_id() == id && !op.is_terminal())
    }

    pub fn operation(&self, operation_id: &str) -> Option<&FeedingOperation> {
        self.operations
            .iter()
            .find(|op| op.operation_id() == operation_id)
    }

    // ==========================================
    // 操作员命令
    // ==========================================

    /// 开始投喂作业
    ///
    /// 构建配置 → 创建 RUNNING 作业 → 记入历史并设为当前作业。
    /// 返回配置供调用方下发硬件；会话本身不做 I/O。
    pub fn start_operation(
        &mut self,
        cage_id: &str,
        slot_number: u32,
        strategy: &FeedingStrategy,
        calibration: &DoserCalibration,
        at: NaiveDateTime,
    ) -> DomainResult<StartedOperation> {
        self.ensure_active()?;
        if let Some(current) = self.current_operation() {
            return Err(DomainError::OperationAlreadyActive {
                line_id: self.line_id.clone(),
                operation_id: current.operation_id().to_string(),
            });
        }

        let configuration = strategy.build(slot_number, calibration)?;
        let operation_id = Uuid::new_v4().to_string();
        let operation = FeedingOperation::start(
            operation_id.clone(),
            &self.session_id,
            &self.line_id,
            cage_id,
            slot_number,
            configuration.clone(),
            at,
        );

        let events: Vec<FeedingEvent> = operation
            .log()
            .iter()
            .map(|entry| self.operation_event(&operation_id, entry))
            .collect();

        self.operations.push(operation);
        self.current_operation_id = Some(operation_id.clone());

        Ok(StartedOperation {
            operation_id,
            configuration,
            events,
        })
    }

    pub fn pause_current(&mut self, at: NaiveDateTime) -> DomainResult<Vec<FeedingEvent>> {
        let (operation_id, entry) = self.with_current(|op| op.pause(at))?;
        Ok(vec![self.operation_event(&operation_id, &entry)])
    }

    pub fn resume_current(&mut self, at: NaiveDateTime) -> DomainResult<Vec<FeedingEvent>> {
        let (operation_id, entry) = self.with_current(|op| op.resume(at))?;
        Ok(vec![self.operation_event(&operation_id, &entry)])
    }

    /// 停止当前作业，并清空当前作业引用
    pub fn stop_current(&mut self, at: NaiveDateTime) -> DomainResult<Vec<FeedingEvent>> {
        let (operation_id, entry) = self.with_current(|op| op.stop(at))?;
        self.current_operation_id = None;
        Ok(vec![self.operation_event(&operation_id, &entry)])
    }

    /// 参数热更新（替换当前作业的配置快照）
    pub fn update_current_parameters(
        &mut self,
        new_configuration: MachineConfiguration,
        at: NaiveDateTime,
    ) -> DomainResult<Vec<FeedingEvent>> {
        let (operation_id, entry) = self.with_current(|op| {
            if new_configuration.target_slot() != op.slot_number() {
                return Err(DomainError::out_of_range(
                    "target_slot",
                    new_configuration.target_slot() as f64,
                    format!("热更新不能改变槽位（当前槽位 {}）", op.slot_number()),
                ));
            }
            op.update_parameters(new_configuration, at)
        })?;
        Ok(vec![self.operation_event(&operation_id, &entry)])
    }

    // ==========================================
    // 硬件同步
    // ==========================================

    /// 应用硬件读数
    ///
    /// 读数序号必须严格递增，否则丢弃并记为异常；增量计入会话总量与槽位累计；
    /// 作业进入终态时清空当前作业。
    pub fn sync_from_hardware(
        &mut self,
        reading: &MachineStatusReading,
        at: NaiveDateTime,
        overshoot_tolerance_kg: f64,
    ) -> DomainResult<SyncOutcome> {
        self.ensure_active()?;

        if let Some(last) = self.last_reading_seq {
            if reading.sequence <= last {
                return Ok(SyncOutcome {
                    anomalies: vec![Anomaly {
                        kind: AnomalyKind::StaleSequence,
                        line_id: self.line_id.clone(),
                        operation_id: self.current_operation_id.clone(),
                        expected: format!("> {}", last),
                        observed: reading.sequence.to_string(),
                    }],
                    dropped: true,
                    ..SyncOutcome::default()
                });
            }
        }
        self.last_reading_seq = Some(reading.sequence);

        let Some(current_id) = self.current_operation().map(|op| op.operation_id().to_string())
        else {
            return Ok(SyncOutcome::default());
        };

        let Some(op) = self
            .operations
            .iter_mut()
            .find(|op| op.operation_id() == current_id)
        else {
            return Ok(SyncOutcome::default());
        };

        let effect = op.apply_hardware_reading(reading, at, overshoot_tolerance_kg)?;
        let slot_number = op.slot_number();
        let status = op.status();

        if effect.delta_kg > 0.0 {
            self.total_dispensed_kg += effect.delta_kg;
            *self.slot_totals.entry(slot_number).or_insert(0.0) += effect.delta_kg;
        }

        let finished = if status.is_terminal() {
            self.current_operation_id = None;
            Some(status)
        } else {
            None
        };

        let events: Vec<FeedingEvent> = effect
            .entries
            .iter()
            .map(|entry| self.operation_event(&current_id, entry))
            .collect();

        Ok(SyncOutcome {
            applied_delta_kg: effect.delta_kg,
            events,
            anomalies: effect.anomalies,
            finished,
            dropped: false,
        })
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn ensure_active(&self) -> DomainResult<()> {
        if self.status == SessionStatus::Closed {
            return Err(DomainError::SessionClosed {
                session_id: self.session_id.clone(),
            });
        }
        Ok(())
    }

    /// 对当前作业执行一次状态转换
    fn with_current<F>(&mut self, transition: F) -> DomainResult<(String, LogEntry)>
    where
        F: FnOnce(&mut FeedingOperation) -> DomainResult<LogEntry>,
    {
        self.ensure_active()?;
        let current_id = self
            .current_operation()
            .map(|op| op.operation_id().to_string())
            .ok_or_else(|| DomainError::NoActiveOperation {
                line_id: self.line_id.clone(),
            })?;

        let op = self
            .operations
            .iter_mut()
            .find(|op| op.operation_id() == current_id)
            .ok_or_else(|| DomainError::NoActiveOperation {
                line_id: self.line_id.clone(),
            })?;

        let entry = transition(op)?;
        Ok((current_id, entry))
    }

    fn append(&mut self, at: NaiveDateTime, kind: EventKind, detail: String) -> LogEntry {
        let entry = LogEntry {
            seq: self.log.len() as u32 + 1,
            at,
            kind,
            detail,
            payload: None,
        };
        self.log.push(entry.clone());
        entry
    }

    fn events_from(&self, index: usize) -> Vec<FeedingEvent> {
        self.log[index..]
            .iter()
            .map(|entry| self.session_event(entry))
            .collect()
    }

    fn session_event(&self, entry: &LogEntry) -> FeedingEvent {
        FeedingEvent::from_entry(&self.line_id, &self.session_id, None, entry)
    }

    fn operation_event(&self, operation_id: &str, entry: &LogEntry) -> FeedingEvent {
        FeedingEvent::from_entry(&self.line_id, &self.session_id, Some(operation_id), entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calibration::ContinuousCalibration;
    use crate::domain::types::FeedingMode;
    use crate::engine::strategy::FeedingIntent;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, 0).unwrap()
    }

    fn cal() -> DoserCalibration {
        DoserCalibration::Continuous(ContinuousCalibration {
            rated_flow_kg_min: 20.0,
            max_motor_speed_rpm: 1500.0,
        })
    }

    fn strategy(rate: f64, target: Option<f64>) -> FeedingStrategy {
        FeedingStrategy::new(FeedingIntent {
            mode: FeedingMode::Manual,
            blower_speed_pct: 50.0,
            dosing_rate_kg_min: rate,
            target_weight_kg: target,
            batch_weight_kg: None,
        })
    }

    fn started_session() -> FeedingSession {
        let mut session = FeedingSession::open("L1", day(1), ts(1, 7, 0));
        session
            .start_operation("C1", 3, &strategy(10.0, Some(50.0)), &cal(), ts(1, 8, 0))
            .unwrap();
        session
    }

    #[test]
    fn test_double_start_rejected_and_session_unchanged() {
        let mut session = started_session();
        let before = session.clone();

        let err = session
            .start_operation("C2", 4, &strategy(10.0, None), &cal(), ts(1, 8, 1))
            .unwrap_err();

        assert!(matches!(err, DomainError::OperationAlreadyActive { .. }));
        assert_eq!(session, before);
    }

    #[test]
    fn test_invalid_strategy_leaves_session_unchanged() {
        let mut session = FeedingSession::open("L1", day(1), ts(1, 7, 0));
        let before = session.clone();
        let err = session
            .start_operation("C1", 3, &strategy(30.0, None), &cal(), ts(1, 8, 0))
            .unwrap_err();
        assert!(matches!(err, DomainError::RateExceedsCapacity { .. }));
        assert_eq!(session, before);
    }

    #[test]
    fn test_commands_without_operation() {
        let mut session = FeedingSession::open("L1", day(1), ts(1, 7, 0));
        assert!(matches!(
            session.pause_current(ts(1, 8, 0)),
            Err(DomainError::NoActiveOperation { .. })
        ));
        assert!(matches!(
            session.stop_current(ts(1, 8, 0)),
            Err(DomainError::NoActiveOperation { .. })
        ));
        assert!(matches!(
            session.update_current_parameters(
                strategy(5.0, None).build(3, &cal()).unwrap(),
                ts(1, 8, 0)
            ),
            Err(DomainError::NoActiveOperation { .. })
        ));
    }

    #[test]
    fn test_stop_from_paused_clears_current() {
        let mut session = started_session();
        session.pause_current(ts(1, 8, 10)).unwrap();
        let events = session.stop_current(ts(1, 8, 20)).unwrap();

        assert_eq!(events[0].kind, EventKind::Stopped);
        assert!(session.current_operation().is_none());
        let op = &session.operations()[0];
        assert_eq!(op.status(), OperationStatus::Stopped);
        assert_eq!(op.ended_at(), Some(ts(1, 8, 20)));

        // 停止后可以开始下一次作业
        session
            .start_operation("C2", 4, &strategy(8.0, None), &cal(), ts(1, 9, 0))
            .unwrap();
        assert_eq!(session.operations().len(), 2);
    }

    #[test]
    fn test_full_day_scenario() {
        let mut session = started_session();
        let op = session.current_operation().unwrap();
        assert_eq!(op.slot_number(), 3);
        assert_eq!(op.target_weight_kg(), Some(50.0));

        let new_config = FeedingStrategy::from_configuration(op.configuration())
            .with_dosing_rate(15.0)
            .build(3, &cal())
            .unwrap();
        let events = session
            .update_current_parameters(new_config, ts(1, 8, 5))
            .unwrap();
        assert_eq!(events[0].kind, EventKind::ParamChange);

        let outcome = session
            .sync_from_hardware(
                &MachineStatusReading::running(1, 50.0).with_completed(),
                ts(1, 8, 10),
                0.5,
            )
            .unwrap();

        assert_eq!(outcome.finished, Some(OperationStatus::Completed));
        assert!(session.current_operation().is_none());
        assert!((session.total_dispensed_kg() - 50.0).abs() < 1e-9);
        assert!((session.slot_total_kg(3) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_and_decreasing_readings_keep_totals_monotonic() {
        let mut session = started_session();
        session
            .sync_from_hardware(&MachineStatusReading::running(5, 12.0), ts(1, 8, 1), 0.5)
            .unwrap();

        let stale = session
            .sync_from_hardware(&MachineStatusReading::running(4, 30.0), ts(1, 8, 2), 0.5)
            .unwrap();
        assert!(stale.dropped);
        assert_eq!(stale.anomalies[0].kind, AnomalyKind::StaleSequence);

        let duplicate = session
            .sync_from_hardware(&MachineStatusReading::running(5, 30.0), ts(1, 8, 2), 0.5)
            .unwrap();
        assert!(duplicate.dropped);

        let lower = session
            .sync_from_hardware(&MachineStatusReading::running(6, 3.0), ts(1, 8, 3), 0.5)
            .unwrap();
        assert_eq!(lower.applied_delta_kg, 0.0);
        assert_eq!(lower.anomalies[0].kind, AnomalyKind::CounterDecreased);
        assert!((session.total_dispensed_kg() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_hardware_error_fails_operation() {
        let mut session = started_session();
        let outcome = session
            .sync_from_hardware(
                &MachineStatusReading::running(1, 2.0).with_error("BLOWER_TRIP"),
                ts(1, 8, 1),
                0.5,
            )
            .unwrap();
        assert_eq!(outcome.finished, Some(OperationStatus::Failed));
        assert!(session.current_operation().is_none());
        assert_eq!(session.operations()[0].error_code(), Some("BLOWER_TRIP"));
    }

    #[test]
    fn test_resolve_for_day_rollover() {
        let mut previous = started_session();
        previous.stop_current(ts(1, 9, 0)).unwrap();

        let resolution =
            FeedingSession::resolve_for_day(Some(previous.clone()), "L1", day(2), ts(2, 6, 0))
                .unwrap();

        let closed = resolution.closed.unwrap();
        assert_eq!(closed.status(), SessionStatus::Closed);
        assert_eq!(closed.session_id(), previous.session_id());
        assert_eq!(resolution.session.status(), SessionStatus::Active);
        assert_eq!(resolution.session.session_date(), day(2));
        assert_ne!(resolution.session.session_id(), previous.session_id());

        let kinds: Vec<EventKind> = resolution.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::SessionClosed, EventKind::SessionOpened]);
    }

    #[test]
    fn test_resolve_for_same_day_reuses() {
        let session = started_session();
        let resolution =
            FeedingSession::resolve_for_day(Some(session.clone()), "L1", day(1), ts(1, 10, 0))
                .unwrap();
        assert!(resolution.closed.is_none());
        assert_eq!(resolution.session, session);
    }

    #[test]
    fn test_resolve_rejects_rollover_with_active_operation() {
        let session = started_session();
        assert!(matches!(
            FeedingSession::resolve_for_day(Some(session), "L1", day(2), ts(2, 6, 0)),
            Err(DomainError::OperationAlreadyActive { .. })
        ));
    }

    #[test]
    fn test_closed_session_is_immutable() {
        let mut session = FeedingSession::open("L1", day(1), ts(1, 7, 0));
        session.close(ts(1, 20, 0)).unwrap();

        assert!(matches!(
            session.start_operation("C1", 3, &strategy(5.0, None), &cal(), ts(1, 21, 0)),
            Err(DomainError::SessionClosed { .. })
        ));
        assert!(session
            .sync_from_hardware(&MachineStatusReading::running(1, 1.0), ts(1, 21, 0), 0.5)
            .is_err());
        assert!(session.close(ts(1, 22, 0)).is_err());
    }
}
