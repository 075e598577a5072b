// ==========================================
// 硬件同步协调器测试
// ==========================================
// 职责: 验证读数应用、异常记录、指令窗口与多产线并发
// ==========================================


#[cfg(test)]
mod sync_coordinator_test {
    use aqua_feeding::domain::{MachineConfiguration, MachineStatusReading};
    use aqua_feeding::engine::{LineSyncResult, SyncError};
    use aqua_feeding::api::ParameterUpdate;
    use aqua_feeding::hardware::{
        HardwareCommand, HardwareError, HardwarePort, SimRunState, SimulatedPlc,
    };
    use aqua_feeding::{EventKind, OperationStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    use crate::test_helpers::*;

    // ==========================================
    // 读数可注入失败的端口
    // ==========================================
    struct FlakyReadPort {
        plc: Arc<SimulatedPlc>,
        fail_reads: AtomicBool,
    }

    #[async_trait]
    impl HardwarePort for FlakyReadPort {
        async fn send_configuration(
            &self,
            line_id: &str,
            configuration: &MachineConfiguration,
        ) -> Result<(), HardwareError> {
            self.plc.send_configuration(line_id, configuration).await
        }

        async fn send_command(
            &self,
            line_id: &str,
            command: HardwareCommand,
        ) -> Result<(), HardwareError> {
            self.plc.send_command(line_id, command).await
        }

        async fn read_status(
            &self,
            line_id: &str,
        ) -> Result<MachineStatusReading, HardwareError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(HardwareError::Communication {
                    line_id: line_id.to_string(),
                    message: "bus offline".to_string(),
                });
            }
            self.plc.read_status(line_id).await
        }
    }

    // ==========================================
    // 基本同步
    // ==========================================

    #[tokio::test]
    async fn test_line_without_session_is_skipped() {
        let env = TestEnv::new();
        let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert_eq!(result, LineSyncResult::NoActiveSession);

        let report = env.coordinator.poll_once().await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_paused_operation_accumulates_nothing() {
        let env = TestEnv::new();
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 12.0))
            .await
            .unwrap();
        env.run_minutes(CONTINUOUS_LINE, 1);
        env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();

        env.api.pause_feeding(CONTINUOUS_LINE).await.unwrap();
        env.run_minutes(CONTINUOUS_LINE, 5);
        let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert!(matches!(
            result,
            LineSyncResult::Applied { delta_kg, finished: None, .. } if delta_kg == 0.0
        ));

        let summary = env.api.dashboard(CONTINUOUS_LINE).await.unwrap().unwrap();
        assert_eq!(summary.status, OperationStatus::Paused);
        assert!((summary.dispensed_kg - 12.0).abs() < 1e-9);
    }

    // ==========================================
    // 异常
    // ==========================================

    #[tokio::test]
    async fn test_counter_decrease_logged_as_anomaly() {
        let env = TestEnv::new();
        let started = env
            .api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.run_minutes(CONTINUOUS_LINE, 2);
        env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();

        // 控制器计数被复位
        env.plc.force_counter(CONTINUOUS_LINE, 5.0);
        let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert!(matches!(
            result,
            LineSyncResult::Applied { anomalies: 1, finished: None, .. }
        ));

        // 已计入的量不回退，之后从新计数继续累计
        env.run_minutes(CONTINUOUS_LINE, 1);
        env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();

        let session = env
            .api
            .active_session(CONTINUOUS_LINE)
            .await
            .unwrap()
            .unwrap();
        assert!((session.total_dispensed_kg() - 30.0).abs() < 1e-9);

        let op = session.operation(&started.operation_id).unwrap();
        assert_eq!(op.status(), OperationStatus::Running);
        assert!(op.log().iter().any(|e| e.kind == EventKind::Anomaly));
    }

    #[tokio::test]
    async fn test_target_overshoot_logged_once() {
        let env = TestEnv::new();
        env.api
            .start_feeding(automatic_request(CONTINUOUS_LINE, 1, 10.0, 20.0))
            .await
            .unwrap();
        env.run_minutes(CONTINUOUS_LINE, 1);
        env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();

        // 设备计数越过目标 + 容差，但尚未上报完成
        env.plc.force_counter(CONTINUOUS_LINE, 21.0);
        let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert!(matches!(result, LineSyncResult::Applied { anomalies: 1, .. }));

        env.plc.force_counter(CONTINUOUS_LINE, 22.0);
        let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert!(matches!(result, LineSyncResult::Applied { anomalies: 0, .. }));

        // 超量如实记录，不截断
        let summary = env.api.dashboard(CONTINUOUS_LINE).await.unwrap().unwrap();
        assert!((summary.dispensed_kg - 22.0).abs() < 1e-9);
        assert_eq!(summary.remaining_kg, Some(0.0));
    }

    #[tokio::test]
    async fn test_hardware_fault_fails_operation() {
        let env = TestEnv::new();
        let started = env
            .api
            .start_feeding(manual_request(PULSE_LINE, 4, 10.0))
            .await
            .unwrap();
        env.run_minutes(PULSE_LINE, 1);
        env.plc.inject_fault(PULSE_LINE, "E042");

        let result = env.coordinator.sync_line(PULSE_LINE).await.unwrap();
        assert!(matches!(
            result,
            LineSyncResult::Applied {
                finished: Some(OperationStatus::Failed),
                ..
            }
        ));

        let session = env.api.active_session(PULSE_LINE).await.unwrap().unwrap();
        assert!(session.current_operation().is_none());
        let op = session.operation(&started.operation_id).unwrap();
        assert_eq!(op.status(), OperationStatus::Failed);
        assert_eq!(op.error_code(), Some("E042"));
        assert!((session.total_dispensed_kg() - 10.0).abs() < 1e-9);

        // 故障作业不再接受指令
        assert!(env.api.pause_feeding(PULSE_LINE).await.unwrap_err().is_rejection());
    }

    // ==========================================
    // 指令窗口
    // ==========================================

    #[tokio::test]
    async fn test_reading_during_command_window_is_superseded() {
        let env = TestEnv::new();
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.run_minutes(CONTINUOUS_LINE, 1);

        {
            let _window = env.guards.begin_command(CONTINUOUS_LINE);
            let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
            assert_eq!(result, LineSyncResult::Superseded);
        }

        let result = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert!(matches!(result, LineSyncResult::Applied { .. }));
    }

    #[tokio::test]
    async fn test_stop_racing_with_sync_never_resurrects_operation() {
        let env = Arc::new(TestEnv::new());
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.plc.set_write_delay(Some(Duration::from_millis(30)));

        for _ in 0..5 {
            env.run_minutes(CONTINUOUS_LINE, 1);
            let _ = env.coordinator.sync_line(CONTINUOUS_LINE).await;
        }

        let stopper = {
            let env = env.clone();
            tokio::spawn(async move { env.api.stop_feeding(CONTINUOUS_LINE).await })
        };
        for _ in 0..5 {
            let _ = env.coordinator.sync_line(CONTINUOUS_LINE).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stopper.await.unwrap().unwrap();
        env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();

        let session = env
            .api
            .active_session(CONTINUOUS_LINE)
            .await
            .unwrap()
            .unwrap();
        assert!(session.current_operation().is_none());
        assert_eq!(session.operations()[0].status(), OperationStatus::Stopped);
        assert!((session.total_dispensed_kg() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_command_window_opens_before_state_lock_is_released() {
        let env = TestEnv::new();
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.plc.set_write_delay(Some(Duration::from_millis(50)));

        let held = env.guards.state(CONTINUOUS_LINE).await;
        let env_ref = &env;
        let (paused, observed) = tokio::join!(
            env.api.pause_feeding(CONTINUOUS_LINE),
            async move {
                // 暂停指令已在状态锁上排队
                tokio::time::sleep(Duration::from_millis(10)).await;
                let observer = env_ref.guards.state(CONTINUOUS_LINE);
                tokio::pin!(observer);
                assert!(futures::poll!(&mut observer).is_pending());

                // 预检释放状态锁后，同步方看到的必须是进行中的指令
                drop(held);
                let _state = observer.await;
                env_ref.guards.command_in_flight(CONTINUOUS_LINE)
            }
        );

        assert!(observed);
        assert_eq!(paused.unwrap().status, Some(OperationStatus::Paused));
        assert!(!env.guards.command_in_flight(CONTINUOUS_LINE));
    }

    // ==========================================
    // 指令排队
    // ==========================================

    #[tokio::test]
    async fn test_stop_waits_behind_in_flight_start() {
        let env = Arc::new(TestEnv::new());
        env.plc.set_write_delay(Some(Duration::from_millis(80)));

        let starter = {
            let env = env.clone();
            tokio::spawn(async move {
                env.api
                    .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
                    .await
            })
        };
        // 开始指令已持有指令锁，配置仍在下发中
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(env.guards.command_in_flight(CONTINUOUS_LINE));

        let stopped = env.api.stop_feeding(CONTINUOUS_LINE).await;
        let started = starter.await.unwrap().unwrap();
        let stopped = stopped.unwrap();

        assert_eq!(
            stopped.operation_id.as_deref(),
            Some(started.operation_id.as_str())
        );
        assert_eq!(stopped.status, Some(OperationStatus::Stopped));

        let session = env
            .api
            .active_session(CONTINUOUS_LINE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.operations().len(), 1);
        assert!(session.current_operation().is_none());
        assert_eq!(session.operations()[0].status(), OperationStatus::Stopped);
        assert_eq!(env.plc.state(CONTINUOUS_LINE), SimRunState::Idle);
    }

    #[tokio::test]
    async fn test_pause_waits_behind_in_flight_hot_update() {
        let env = Arc::new(TestEnv::new());
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.plc.set_write_delay(Some(Duration::from_millis(80)));

        let updater = {
            let env = env.clone();
            tokio::spawn(async move {
                env.api
                    .update_parameters(
                        CONTINUOUS_LINE,
                        ParameterUpdate {
                            blower_speed_pct: None,
                            dosing_rate_kg_min: Some(15.0),
                        },
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(env.guards.command_in_flight(CONTINUOUS_LINE));

        let paused = env.api.pause_feeding(CONTINUOUS_LINE).await;
        let updated = updater.await.unwrap().unwrap();
        let paused = paused.unwrap();

        assert_eq!(updated.status, Some(OperationStatus::Running));
        assert_eq!(paused.status, Some(OperationStatus::Paused));

        // 暂停作用在已更新的配置上
        let session = env
            .api
            .active_session(CONTINUOUS_LINE)
            .await
            .unwrap()
            .unwrap();
        let op = session.current_operation().unwrap();
        assert_eq!(op.status(), OperationStatus::Paused);
        assert!((op.configuration().dosing_rate_kg_min() - 15.0).abs() < 1e-9);
        let kinds: Vec<EventKind> = op.log().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Started, EventKind::ParamChange, EventKind::Paused]
        );

        assert_eq!(env.plc.state(CONTINUOUS_LINE), SimRunState::Paused);
        let sent = env.plc.configuration(CONTINUOUS_LINE).unwrap();
        assert!((sent.dosing_rate_kg_min() - 15.0).abs() < 1e-9);
    }

    // ==========================================
    // 多产线
    // ==========================================

    #[tokio::test]
    async fn test_poll_once_covers_all_active_lines() {
        let env = TestEnv::new();
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.api
            .start_feeding(manual_request(PULSE_LINE, 1, 6.0))
            .await
            .unwrap();
        env.run_minutes(CONTINUOUS_LINE, 1);
        env.run_minutes(PULSE_LINE, 1);

        let mut report = env.coordinator.poll_once().await.unwrap();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(report.len(), 2);

        let deltas: Vec<f64> = report
            .iter()
            .map(|(_, result)| match result {
                Ok(LineSyncResult::Applied { delta_kg, .. }) => *delta_kg,
                other => panic!("Expected Applied, got {:?}", other),
            })
            .collect();
        assert!((deltas[0] - 10.0).abs() < 1e-9);
        assert!((deltas[1] - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_read_failures_are_counted_per_line() {
        let plc = Arc::new(SimulatedPlc::new());
        let port = Arc::new(FlakyReadPort {
            plc: plc.clone(),
            fail_reads: AtomicBool::new(false),
        });
        let env = TestEnv::with_hardware(plc, port.clone());
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();

        port.fail_reads.store(true, Ordering::SeqCst);
        for expected in 1..=3 {
            let err = env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap_err();
            assert!(matches!(err, SyncError::Hardware(_)));
            assert_eq!(env.coordinator.consecutive_failures(CONTINUOUS_LINE), expected);
        }
        assert_eq!(env.coordinator.consecutive_failures(PULSE_LINE), 0);

        // 读取失败不改变作业状态
        let summary = env.api.dashboard(CONTINUOUS_LINE).await.unwrap().unwrap();
        assert_eq!(summary.status, OperationStatus::Running);

        port.fail_reads.store(false, Ordering::SeqCst);
        env.coordinator.sync_line(CONTINUOUS_LINE).await.unwrap();
        assert_eq!(env.coordinator.consecutive_failures(CONTINUOUS_LINE), 0);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let env = TestEnv::new();
        let coordinator = Arc::new(aqua_feeding::engine::HardwareSyncCoordinator::new(
            env.sessions.clone(),
            env.plc.clone(),
            env.guards.clone(),
            env.clock.clone(),
            Arc::new(aqua_feeding::engine::OptionalEventPublisher::none()),
            test_settings(),
        ));
        env.api
            .start_feeding(manual_request(CONTINUOUS_LINE, 1, 10.0))
            .await
            .unwrap();
        env.run_minutes(CONTINUOUS_LINE, 1);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(coordinator.run(rx));
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let summary = env.api.dashboard(CONTINUOUS_LINE).await.unwrap().unwrap();
        assert!((summary.dispensed_kg - 10.0).abs() < 1e-9);
    }
}
