// ==========================================
// 投喂线作业编排引擎 - 服务主入口
// ==========================================
// 流程: 日志 → AppState → 下发记录恢复 → 同步协调器 + 模拟 PLC → 等待 Ctrl-C
// ==========================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use aqua_feeding::app::{get_default_db_path, AppState};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

/// 模拟 PLC 推进下料计数的周期
const SIMULATOR_TICK: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    aqua_feeding::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", aqua_feeding::APP_NAME);
    tracing::info!("系统版本: {}", aqua_feeding::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let app_state = Arc::new(
        AppState::new(db_path)
            .await
            .map_err(anyhow::Error::msg)
            .context("无法初始化AppState")?,
    );

    let report = app_state
        .feeding_api
        .recover_pending_dispatches()
        .await
        .context("下发记录恢复失败")?;
    tracing::info!(
        confirmed = report.confirmed.len(),
        abandoned = report.abandoned.len(),
        "启动恢复完成"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 硬件同步协调器
    let coordinator = tokio::spawn(
        app_state
            .sync_coordinator
            .clone()
            .run(shutdown_rx.clone()),
    );

    // 模拟 PLC 时间推进
    let simulator = {
        let state = app_state.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SIMULATOR_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        state.simulator().tick(now - last);
                        last = now;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    // 事件输出
    let events = {
        let mut receiver = app_state.event_publisher.subscribe();
        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Ok(event) => tracing::info!(
                            line_id = %event.line_id,
                            kind = event.kind.as_str(),
                            operation_id = event.operation_id.as_deref().unwrap_or("-"),
                            "{}",
                            event.detail
                        ),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "事件订阅滞后，部分事件未输出");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    tracing::info!("服务已启动，按 Ctrl-C 退出");
    tokio::signal::ctrl_c()
        .await
        .context("无法监听退出信号")?;

    tracing::info!("收到退出信号，正在停止...");
    shutdown_tx.send(true).ok();
    for (name, handle) in [("coordinator", coordinator), ("simulator", simulator), ("events", events)] {
        if let Err(e) = handle.await {
            tracing::error!(task = name, error = %e, "后台任务异常退出");
        }
    }

    tracing::info!("服务已停止");
    Ok(())
}
