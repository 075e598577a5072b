// ==========================================
// 投喂线作业编排 - 投喂指令 API
// ==========================================
// 职责: 操作员指令入口（开始/暂停/恢复/停止/热更新/关闭会话）
// 锁模型（按产线）:
// - 指令锁: 覆盖整条指令（包括硬件往返），同产线指令串行
// - 状态锁: 仅覆盖 加载 → 变更 → 保存，与同步协调器共享
// - 开始投喂例外: 状态锁跨越硬件下发，保证新作业落库前无读数写入
// 红线: 硬件失败时会话保持最后已知状态，不做乐观推进
// ==========================================

use crate::api::dto::{
    CommandResponse, OperationSummary, ParameterUpdate, RecoveryReport, StartFeedingRequest,
    StartFeedingResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::config::FeedingSettings;
use crate::domain::calibration::DoserCalibration;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::events::FeedingEvent;
use crate::domain::session::{DayResolution, FeedingSession};
use crate::engine::clock::Clock;
use crate::engine::dosing::DosingTranslator;
use crate::engine::events::OptionalEventPublisher;
use crate::engine::line_guard::LineGuards;
use crate::engine::strategy::FeedingStrategy;
use crate::hardware::port::{with_deadline, HardwareCommand, HardwarePort};
use crate::repository::dispatch_repo::{DispatchEntity, DispatchJournal, DispatchStatus};
use crate::repository::equipment_repo::EquipmentStore;
use crate::repository::session_repo::SessionStore;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// ==========================================
// FeedingApi
// ==========================================
pub struct FeedingApi {
    sessions: Arc<dyn SessionStore>,
    dispatches: Arc<dyn DispatchJournal>,
    equipment: Arc<dyn EquipmentStore>,
    hardware: Arc<dyn HardwarePort>,
    guards: Arc<LineGuards>,
    clock: Arc<dyn Clock>,
    publisher: Arc<OptionalEventPublisher>,
    settings: FeedingSettings,
    translator: DosingTranslator,
}

impl FeedingApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        dispatches: Arc<dyn DispatchJournal>,
        equipment: Arc<dyn EquipmentStore>,
        hardware: Arc<dyn HardwarePort>,
        guards: Arc<LineGuards>,
        clock: Arc<dyn Clock>,
        publisher: Arc<OptionalEventPublisher>,
        settings: FeedingSettings,
    ) -> Self {
        Self {
            sessions,
            dispatches,
            equipment,
            hardware,
            guards,
            clock,
            publisher,
            settings,
            translator: DosingTranslator::new(),
        }
    }

    // ==========================================
    // 开始投喂
    // ==========================================

    /// 在指定网箱开始投喂
    ///
    /// # 流程
    /// 1. 解析槽位与标定（缺失直接拒绝）
    /// 2. 跨日判定：旧日期会话关闭，开启当日会话
    /// 3. 构建配置并创建 RUNNING 作业（仅在内存副本中）
    /// 4. 记录 PENDING 下发 → 下发配置
    /// 5. 下发成功后，旧会话与新会话在同一事务内保存
    ///
    /// # 错误
    /// - Rejected: 已有作业进行中 / 参数越界 / 超出设备能力
    /// - SlotNotAssigned / CalibrationMissing
    /// - Hardware: 下发失败或超时（会话保持不变）
    #[instrument(skip(self, request), fields(line_id = %request.line_id, cage_id = %request.cage_id))]
    pub async fn start_feeding(
        &self,
        request: StartFeedingRequest,
    ) -> ApiResult<StartFeedingResponse> {
        let line_id = request.line_id.trim();
        let cage_id = request.cage_id.trim();
        if line_id.is_empty() || cage_id.is_empty() {
            return Err(ApiError::InvalidInput("产线与网箱不能为空".to_string()));
        }

        let _command = self.guards.command(line_id).await;
        let _state = self.guards.state(line_id).await;

        let slot_number = self
            .equipment
            .resolve_slot(line_id, cage_id)
            .await?
            .ok_or_else(|| ApiError::SlotNotAssigned {
                line_id: line_id.to_string(),
                cage_id: cage_id.to_string(),
            })?;
        let calibration = self.require_calibration(line_id).await?;

        let now = self.clock.now();
        let existing = self.sessions.load_active_session(line_id).await?;
        let DayResolution {
            mut session,
            closed,
            mut events,
        } = FeedingSession::resolve_for_day(existing, line_id, now.date(), now)?;

        let strategy = FeedingStrategy::new(request.intent());
        let started = session.start_operation(cage_id, slot_number, &strategy, &calibration, now)?;
        events.extend(started.events.iter().cloned());

        let dispatch = DispatchEntity::pending(
            line_id,
            session.session_id(),
            &started.operation_id,
            cage_id,
            &started.configuration,
            now,
        );
        self.dispatches.record_pending(&dispatch).await?;

        let window = self.guards.begin_command(line_id);
        if let Err(e) = with_deadline(
            line_id,
            self.settings.hardware_timeout,
            self.hardware.send_configuration(line_id, &started.configuration),
        )
        .await
        {
            warn!(
                operation_id = %started.operation_id,
                slot_number,
                error = %e,
                "配置下发失败，作业未创建"
            );
            self.resolve_dispatch(&dispatch, DispatchStatus::Failed, Some(&e.to_string()))
                .await;
            return Err(e.into());
        }

        let mut to_save: Vec<&FeedingSession> = Vec::with_capacity(2);
        if let Some(previous) = closed.as_ref() {
            to_save.push(previous);
        }
        to_save.push(&session);

        if let Err(e) = self.sessions.save_sessions(&to_save).await {
            error!(
                operation_id = %started.operation_id,
                error = %e,
                "作业保存失败，撤回已下发配置"
            );
            self.abandon_dispatch(&dispatch, &e.to_string()).await;
            return Err(e.into());
        }

        self.resolve_dispatch(&dispatch, DispatchStatus::Confirmed, None)
            .await;
        drop(window);
        drop(_state);

        info!(
            session_id = %session.session_id(),
            operation_id = %started.operation_id,
            slot_number,
            mode = started.configuration.mode().as_str(),
            rate_kg_min = started.configuration.dosing_rate_kg_min(),
            "投喂作业已开始"
        );
        self.publisher.publish_all(&events);

        Ok(StartFeedingResponse {
            session_id: session.session_id().to_string(),
            operation_id: started.operation_id,
            slot_number,
            configuration: started.configuration,
            events,
        })
    }

    // ==========================================
    // 暂停 / 恢复 / 停止
    // ==========================================

    #[instrument(skip(self))]
    pub async fn pause_feeding(&self, line_id: &str) -> ApiResult<CommandResponse> {
        self.run_command(line_id, HardwareCommand::Pause, FeedingSession::pause_current)
            .await
    }

    #[instrument(skip(self))]
    pub async fn resume_feeding(&self, line_id: &str) -> ApiResult<CommandResponse> {
        self.run_command(line_id, HardwareCommand::Resume, FeedingSession::resume_current)
            .await
    }

    #[instrument(skip(self))]
    pub async fn stop_feeding(&self, line_id: &str) -> ApiResult<CommandResponse> {
        self.run_command(line_id, HardwareCommand::Stop, FeedingSession::stop_current)
            .await
    }

    /// 通用指令流程: 预检 → 下发 → 重新加载并应用 → 保存
    ///
    /// 预检在会话副本上执行，非法迁移在接触硬件前被拒绝。
    async fn run_command<F>(
        &self,
        line_id: &str,
        command: HardwareCommand,
        transition: F,
    ) -> ApiResult<CommandResponse>
    where
        F: Fn(&mut FeedingSession, NaiveDateTime) -> DomainResult<Vec<FeedingEvent>>,
    {
        let _command = self.guards.command(line_id).await;

        // 窗口在释放状态锁前打开：预检之后的读数一律作废
        let window = {
            let _state = self.guards.state(line_id).await;
            let mut preview = self.require_active_session(line_id).await?;
            transition(&mut preview, self.clock.now())?;
            self.guards.begin_command(line_id)
        };

        with_deadline(
            line_id,
            self.settings.hardware_timeout,
            self.hardware.send_command(line_id, command),
        )
        .await
        .map_err(|e| {
            warn!(command = %command, error = %e, "硬件指令失败，作业保持原状态");
            e
        })?;

        let (operation_id, status, events) = {
            let _state = self.guards.state(line_id).await;
            let mut session = self.require_active_session(line_id).await?;
            let operation_id = session
                .current_operation()
                .map(|op| op.operation_id().to_string());
            let events = transition(&mut session, self.clock.now())?;
            self.sessions.save_session(&session).await?;
            let status = operation_id
                .as_deref()
                .and_then(|id| session.operation(id))
                .map(|op| op.status());
            (operation_id, status, events)
        };
        drop(window);

        info!(
            command = %command,
            operation_id = operation_id.as_deref().unwrap_or("-"),
            "指令已执行"
        );
        self.publisher.publish_all(&events);

        Ok(CommandResponse {
            line_id: line_id.to_string(),
            operation_id,
            status,
            events,
        })
    }

    // ==========================================
    // 参数热更新
    // ==========================================

    /// 运行中调整风机转速/下料速率（槽位不变，重新校验设备能力）
    #[instrument(skip(self, update))]
    pub async fn update_parameters(
        &self,
        line_id: &str,
        update: ParameterUpdate,
    ) -> ApiResult<CommandResponse> {
        if update.is_empty() {
            return Err(ApiError::InvalidInput("未指定任何需要更新的参数".to_string()));
        }

        let _command = self.guards.command(line_id).await;
        let calibration = self.require_calibration(line_id).await?;

        let (configuration, window) = {
            let _state = self.guards.state(line_id).await;
            let mut preview = self.require_active_session(line_id).await?;
            let current = preview
                .current_operation()
                .ok_or_else(|| DomainError::NoActiveOperation {
                    line_id: line_id.to_string(),
                })?;

            let mut strategy = FeedingStrategy::from_configuration(current.configuration());
            if let Some(blower) = update.blower_speed_pct {
                strategy = strategy.with_blower_speed(blower);
            }
            if let Some(rate) = update.dosing_rate_kg_min {
                strategy = strategy.with_dosing_rate(rate);
            }
            let configuration = strategy.build(current.slot_number(), &calibration)?;
            preview.update_current_parameters(configuration.clone(), self.clock.now())?;
            (configuration, self.guards.begin_command(line_id))
        };

        with_deadline(
            line_id,
            self.settings.hardware_timeout,
            self.hardware.send_configuration(line_id, &configuration),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "热更新下发失败，保持原配置");
            e
        })?;

        let (operation_id, status, events) = {
            let _state = self.guards.state(line_id).await;
            let mut session = self.require_active_session(line_id).await?;
            let events =
                session.update_current_parameters(configuration.clone(), self.clock.now())?;
            self.sessions.save_session(&session).await?;
            let current = session.current_operation();
            (
                current.map(|op| op.operation_id().to_string()),
                current.map(|op| op.status()),
                events,
            )
        };
        drop(window);

        info!(
            blower_speed_pct = configuration.blower_speed_pct(),
            rate_kg_min = configuration.dosing_rate_kg_min(),
            "参数已热更新"
        );
        self.publisher.publish_all(&events);

        Ok(CommandResponse {
            line_id: line_id.to_string(),
            operation_id,
            status,
            events,
        })
    }

    // ==========================================
    // 会话管理
    // ==========================================

    /// 手动关闭产线当日会话（当前作业必须已结束）
    #[instrument(skip(self))]
    pub async fn close_session(&self, line_id: &str) -> ApiResult<Vec<FeedingEvent>> {
        let _command = self.guards.command(line_id).await;
        let _state = self.guards.state(line_id).await;

        let mut session = self
            .sessions
            .load_active_session(line_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("产线{}没有进行中的会话", line_id)))?;

        let events = session.close(self.clock.now())?;
        self.sessions.save_session(&session).await?;
        drop(_state);

        info!(
            session_id = %session.session_id(),
            total_kg = session.total_dispensed_kg(),
            "会话已关闭"
        );
        self.publisher.publish_all(&events);
        Ok(events)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 看板: 产线当前作业摘要（无作业返回 None）
    pub async fn dashboard(&self, line_id: &str) -> ApiResult<Option<OperationSummary>> {
        let session = self.sessions.load_active_session(line_id).await?;
        Ok(session.as_ref().and_then(OperationSummary::from_session))
    }

    /// 产线当前 ACTIVE 会话
    pub async fn active_session(&self, line_id: &str) -> ApiResult<Option<FeedingSession>> {
        Ok(self.sessions.load_active_session(line_id).await?)
    }

    /// 产线某日的会话
    pub async fn session_for_date(
        &self,
        line_id: &str,
        session_date: NaiveDate,
    ) -> ApiResult<Option<FeedingSession>> {
        Ok(self
            .sessions
            .load_session_for_date(line_id, session_date)
            .await?)
    }

    /// 产线某日的事件历史
    pub async fn session_events(
        &self,
        line_id: &str,
        session_date: NaiveDate,
    ) -> ApiResult<Vec<FeedingEvent>> {
        Ok(self.sessions.list_line_events(line_id, session_date).await?)
    }

    /// 产线下料器最大可达速率 (kg/min)
    pub async fn line_capacity(&self, line_id: &str) -> ApiResult<f64> {
        let calibration = self.require_calibration(line_id).await?;
        Ok(self.translator.capacity(&calibration))
    }

    // ==========================================
    // 启动恢复
    // ==========================================

    /// 处理上次运行遗留的 PENDING 下发记录
    ///
    /// - 作业已落库: 补记 CONFIRMED
    /// - 作业未落库: 向设备发送 STOP 并记为 ABANDONED
    #[instrument(skip(self))]
    pub async fn recover_pending_dispatches(&self) -> ApiResult<RecoveryReport> {
        let pending = self.dispatches.list_pending().await?;
        let mut report = RecoveryReport::default();

        for dispatch in pending {
            let _command = self.guards.command(&dispatch.line_id).await;
            let status = self
                .sessions
                .find_operation_status(&dispatch.operation_id)
                .await?;

            match status {
                Some(status) => {
                    info!(
                        dispatch_id = %dispatch.dispatch_id,
                        operation_id = %dispatch.operation_id,
                        status = %status,
                        "下发记录已落库，补记确认"
                    );
                    self.resolve_dispatch(&dispatch, DispatchStatus::Confirmed, None)
                        .await;
                    report.confirmed.push(dispatch.dispatch_id);
                }
                None => {
                    warn!(
                        dispatch_id = %dispatch.dispatch_id,
                        line_id = %dispatch.line_id,
                        slot_number = dispatch.slot_number,
                        "发现未落库的下发记录，撤回设备配置"
                    );
                    self.abandon_dispatch(&dispatch, "启动恢复: 作业未落库")
                        .await;
                    report.abandoned.push(dispatch.dispatch_id);
                }
            }
        }

        if !report.confirmed.is_empty() || !report.abandoned.is_empty() {
            info!(
                confirmed = report.confirmed.len(),
                abandoned = report.abandoned.len(),
                "下发记录恢复完成"
            );
        }
        Ok(report)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    async fn require_calibration(&self, line_id: &str) -> ApiResult<DoserCalibration> {
        self.equipment
            .load_calibration(line_id)
            .await?
            .ok_or_else(|| ApiError::CalibrationMissing {
                line_id: line_id.to_string(),
            })
    }

    async fn require_active_session(&self, line_id: &str) -> ApiResult<FeedingSession> {
        self.sessions
            .load_active_session(line_id)
            .await?
            .ok_or_else(|| {
                ApiError::Rejected(DomainError::NoActiveOperation {
                    line_id: line_id.to_string(),
                })
            })
    }

    /// 置下发记录终态（失败只记录日志）
    async fn resolve_dispatch(
        &self,
        dispatch: &DispatchEntity,
        status: DispatchStatus,
        note: Option<&str>,
    ) {
        if let Err(e) = self
            .dispatches
            .resolve(&dispatch.dispatch_id, status, note, self.clock.now())
            .await
        {
            warn!(
                dispatch_id = %dispatch.dispatch_id,
                status = status.to_db_str(),
                error = %e,
                "下发记录状态更新失败"
            );
        }
    }

    /// 尽力发送 STOP 并将下发记录置为 ABANDONED
    async fn abandon_dispatch(&self, dispatch: &DispatchEntity, reason: &str) {
        if let Err(e) = with_deadline(
            &dispatch.line_id,
            self.settings.hardware_timeout,
            self.hardware
                .send_command(&dispatch.line_id, HardwareCommand::Stop),
        )
        .await
        {
            error!(
                dispatch_id = %dispatch.dispatch_id,
                line_id = %dispatch.line_id,
                error = %e,
                "撤回配置失败，设备可能仍在运行"
            );
        }
        self.resolve_dispatch(dispatch, DispatchStatus::Abandoned, Some(reason))
            .await;
    }
}

