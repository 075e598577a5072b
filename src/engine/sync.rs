// ==========================================
// 投喂线作业编排 - 硬件同步协调器
// ==========================================
// 职责: 周期性读取各产线设备状态，应用到当前会话
// 流程（单产线）:
// 1. 记录指令代数；有指令进行中则跳过本轮
// 2. 锁外读取硬件状态（带超时）
// 3. 取会话状态锁 → 代数比对 → 加载 → 应用读数 → 保存
// 4. 释放锁后发布事件；异常以 warn 级别记录完整上下文
// 红线: 单产线失败不影响其他产线；持锁期间不做硬件 I/O
// ==========================================

use crate::config::FeedingSettings;
use crate::domain::error::DomainError;
use crate::domain::types::OperationStatus;
use crate::engine::clock::Clock;
use crate::engine::events::OptionalEventPublisher;
use crate::engine::line_guard::LineGuards;
use crate::hardware::port::{with_deadline, HardwareError, HardwarePort};
use crate::repository::error::RepositoryError;
use crate::repository::session_repo::SessionStore;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

// ==========================================
// SyncError - 同步错误
// ==========================================
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// 单产线一轮同步的结果
#[derive(Debug, Clone, PartialEq)]
pub enum LineSyncResult {
    /// 读数已应用并保存
    Applied {
        delta_kg: f64,
        finished: Option<OperationStatus>,
        anomalies: usize,
    },
    /// 序号重复或乱序，读数丢弃
    Dropped,
    /// 读数与操作员指令窗口重叠，丢弃等待下一轮
    Superseded,
    /// 产线没有 ACTIVE 会话
    NoActiveSession,
}

// ==========================================
// HardwareSyncCoordinator
// ==========================================
pub struct HardwareSyncCoordinator {
    sessions: Arc<dyn SessionStore>,
    hardware: Arc<dyn HardwarePort>,
    guards: Arc<LineGuards>,
    clock: Arc<dyn Clock>,
    publisher: Arc<OptionalEventPublisher>,
    settings: FeedingSettings,
    consecutive_failures: Mutex<HashMap<String, u32>>,
}

impl HardwareSyncCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        hardware: Arc<dyn HardwarePort>,
        guards: Arc<LineGuards>,
        clock: Arc<dyn Clock>,
        publisher: Arc<OptionalEventPublisher>,
        settings: FeedingSettings,
    ) -> Self {
        Self {
            sessions,
            hardware,
            guards,
            clock,
            publisher,
            settings,
            consecutive_failures: Mutex::new(HashMap::new()),
        }
    }

    /// 同步单条产线
    pub async fn sync_line(&self, line_id: &str) -> Result<LineSyncResult, SyncError> {
        let generation = self.guards.generation(line_id);
        if generation % 2 == 1 {
            debug!(line_id = %line_id, "指令进行中，跳过本轮同步");
            return Ok(LineSyncResult::Superseded);
        }

        let reading = match with_deadline(
            line_id,
            self.settings.hardware_timeout,
            self.hardware.read_status(line_id),
        )
        .await
        {
            Ok(reading) => {
                self.reset_failures(line_id);
                reading
            }
            Err(e) => {
                self.record_failure(line_id, &e);
                return Err(e.into());
            }
        };

        let _state = self.guards.state(line_id).await;
        if self.guards.generation(line_id) != generation {
            debug!(
                line_id = %line_id,
                sequence = reading.sequence,
                "读数期间有指令下发，丢弃读数"
            );
            return Ok(LineSyncResult::Superseded);
        }

        let Some(mut session) = self.sessions.load_active_session(line_id).await? else {
            return Ok(LineSyncResult::NoActiveSession);
        };

        let outcome = session.sync_from_hardware(
            &reading,
            self.clock.now(),
            self.settings.overshoot_tolerance_kg,
        )?;

        for anomaly in &outcome.anomalies {
            warn!(
                line_id = %anomaly.line_id,
                operation_id = anomaly.operation_id.as_deref().unwrap_or("-"),
                kind = anomaly.kind.as_str(),
                expected = %anomaly.expected,
                observed = %anomaly.observed,
                "硬件读数异常"
            );
        }

        if outcome.dropped {
            return Ok(LineSyncResult::Dropped);
        }

        self.sessions.save_session(&session).await?;
        drop(_state);

        match outcome.finished {
            Some(OperationStatus::Failed) => error!(
                line_id = %line_id,
                error_code = reading.error_code.as_deref().unwrap_or("-"),
                "硬件故障，作业失败"
            ),
            Some(status) => info!(
                line_id = %line_id,
                status = %status,
                total_kg = session.total_dispensed_kg(),
                "作业结束"
            ),
            None => {}
        }

        self.publisher.publish_all(&outcome.events);

        Ok(LineSyncResult::Applied {
            delta_kg: outcome.applied_delta_kg,
            finished: outcome.finished,
            anomalies: outcome.anomalies.len(),
        })
    }

    /// 对所有有 ACTIVE 会话的产线并发同步一轮
    pub async fn poll_once(&self) -> Result<Vec<(String, Result<LineSyncResult, SyncError>)>, SyncError> {
        let lines = self.sessions.list_active_lines().await?;
        let results = join_all(lines.iter().map(|line| self.sync_line(line))).await;

        let mut report = Vec::with_capacity(lines.len());
        for (line, result) in lines.into_iter().zip(results) {
            if let Err(e) = &result {
                if !matches!(e, SyncError::Hardware(_)) {
                    error!(line_id = %line, error = %e, "产线同步失败");
                }
            }
            report.push((line, result));
        }
        Ok(report)
    }

    /// 后台轮询循环，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "硬件同步协调器启动"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "同步轮询失败");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("硬件同步协调器已停止");
    }

    /// 产线当前连续轮询失败次数
    pub fn consecutive_failures(&self, line_id: &str) -> u32 {
        self.consecutive_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(line_id)
            .copied()
            .unwrap_or(0)
    }

    fn reset_failures(&self, line_id: &str) {
        let mut failures = self
            .consecutive_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(count) = failures.remove(line_id) {
            info!(line_id = %line_id, failures = count, "硬件通信恢复");
        }
    }

    fn record_failure(&self, line_id: &str, err: &HardwareError) {
        let count = {
            let mut failures = self
                .consecutive_failures
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            let count = failures.entry(line_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.settings.poll_failure_alert_threshold {
            error!(line_id = %line_id, failures = count, error = %err, "硬件状态连续读取失败");
        } else {
            warn!(line_id = %line_id, failures = count, error = %err, "硬件状态读取失败");
        }
    }
}
