// ==========================================
// Repository 集成测试
// ==========================================
// 职责: 验证会话聚合与下发记录的持久化
// ==========================================


#[cfg(test)]
mod repository_integration_test {
    use aqua_feeding::domain::{FeedingSession, MachineStatusReading};
    use aqua_feeding::engine::{FeedingIntent, FeedingStrategy};
    use aqua_feeding::repository::{
        DispatchEntity, DispatchJournal, DispatchStatus, RepositoryError,
        SqliteDispatchRepository, SqliteSessionRepository, SessionStore,
    };
    use aqua_feeding::{EventKind, FeedingMode, OperationStatus, SessionStatus};

    use crate::test_helpers::*;

    fn manual_strategy(rate: f64) -> FeedingStrategy {
        FeedingStrategy::new(FeedingIntent {
            mode: FeedingMode::Manual,
            blower_speed_pct: 55.0,
            dosing_rate_kg_min: rate,
            target_weight_kg: None,
            batch_weight_kg: None,
        })
    }

    #[tokio::test]
    async fn test_session_roundtrip_preserves_aggregate() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let repo = SqliteSessionRepository::new(&db_path).unwrap();

        let d1 = day(2026, 3, 1);
        let mut session = FeedingSession::open("L1", d1, at(d1, 8, 0));
        let started = session
            .start_operation(
                "L1-C02",
                2,
                &manual_strategy(10.0),
                &continuous_calibration(),
                at(d1, 8, 0),
            )
            .unwrap();
        session
            .sync_from_hardware(&MachineStatusReading::running(1, 7.5), at(d1, 8, 1), 0.5)
            .unwrap();
        repo.save_session(&session).await.unwrap();

        let loaded = repo
            .load_session(session.session_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.session_id(), session.session_id());
        assert_eq!(loaded.session_date(), d1);
        assert_eq!(loaded.status(), SessionStatus::Active);
        assert_eq!(loaded.last_reading_seq(), Some(1));
        assert!((loaded.total_dispensed_kg() - 7.5).abs() < 1e-9);
        assert!((loaded.slot_total_kg(2) - 7.5).abs() < 1e-9);
        assert_eq!(loaded.log().len(), session.log().len());

        let op = loaded.current_operation().unwrap();
        assert_eq!(op.operation_id(), started.operation_id);
        assert_eq!(op.cage_id(), "L1-C02");
        assert_eq!(op.status(), OperationStatus::Running);
        assert_eq!(op.configuration(), &started.configuration);
        assert_eq!(op.log().len(), 1);
        assert_eq!(op.log()[0].kind, EventKind::Started);

        // 序号持久化后，重复读数仍被丢弃
        let mut reloaded = loaded;
        let outcome = reloaded
            .sync_from_hardware(&MachineStatusReading::running(1, 9.0), at(d1, 8, 2), 0.5)
            .unwrap();
        assert!(outcome.dropped);
    }

    #[tokio::test]
    async fn test_repeated_save_appends_events_once() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let repo = SqliteSessionRepository::new(&db_path).unwrap();

        let d1 = day(2026, 3, 1);
        let mut session = FeedingSession::open("L1", d1, at(d1, 8, 0));
        session
            .start_operation(
                "L1-C01",
                1,
                &manual_strategy(10.0),
                &continuous_calibration(),
                at(d1, 8, 0),
            )
            .unwrap();
        repo.save_session(&session).await.unwrap();
        repo.save_session(&session).await.unwrap();

        session.pause_current(at(d1, 8, 5)).unwrap();
        repo.save_session(&session).await.unwrap();

        let events = repo.list_line_events("L1", d1).await.unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::SessionOpened, EventKind::Started, EventKind::Paused]
        );
        assert!(events[0].operation_id.is_none());
        assert!(events[1].operation_id.is_some());
    }

    #[tokio::test]
    async fn test_only_one_active_session_per_line() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let repo = SqliteSessionRepository::new(&db_path).unwrap();

        let d1 = day(2026, 3, 1);
        let first = FeedingSession::open("L1", d1, at(d1, 8, 0));
        repo.save_session(&first).await.unwrap();

        let second = FeedingSession::open("L1", d1, at(d1, 9, 0));
        let err = repo.save_session(&second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

        // 其他产线不受影响
        let other = FeedingSession::open("L2", d1, at(d1, 9, 0));
        repo.save_session(&other).await.unwrap();

        let mut lines = repo.list_active_lines().await.unwrap();
        lines.sort();
        assert_eq!(lines, vec!["L1".to_string(), "L2".to_string()]);
    }

    #[tokio::test]
    async fn test_rollover_saved_in_one_transaction() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let repo = SqliteSessionRepository::new(&db_path).unwrap();

        let d1 = day(2026, 3, 1);
        let d2 = day(2026, 3, 2);
        let first = FeedingSession::open("L1", d1, at(d1, 8, 0));
        repo.save_session(&first).await.unwrap();

        let existing = repo.load_active_session("L1").await.unwrap();
        let resolution = FeedingSession::resolve_for_day(existing, "L1", d2, at(d2, 6, 0)).unwrap();
        let closed = resolution.closed.unwrap();
        repo.save_sessions(&[&closed, &resolution.session])
            .await
            .unwrap();

        let active = repo.load_active_session("L1").await.unwrap().unwrap();
        assert_eq!(active.session_date(), d2);
        let previous = repo.load_session_for_date("L1", d1).await.unwrap().unwrap();
        assert_eq!(previous.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_find_operation_status() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let repo = SqliteSessionRepository::new(&db_path).unwrap();

        let d1 = day(2026, 3, 1);
        let mut session = FeedingSession::open("L1", d1, at(d1, 8, 0));
        let started = session
            .start_operation(
                "L1-C01",
                1,
                &manual_strategy(10.0),
                &continuous_calibration(),
                at(d1, 8, 0),
            )
            .unwrap();
        session.stop_current(at(d1, 8, 30)).unwrap();
        repo.save_session(&session).await.unwrap();

        assert_eq!(
            repo.find_operation_status(&started.operation_id).await.unwrap(),
            Some(OperationStatus::Stopped)
        );
        assert_eq!(repo.find_operation_status("missing").await.unwrap(), None);
    }

    // ==========================================
    // 下发记录
    // ==========================================

    #[tokio::test]
    async fn test_dispatch_journal_lifecycle() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let repo = SqliteDispatchRepository::new(&db_path).unwrap();

        let d1 = day(2026, 3, 1);
        let configuration = manual_strategy(10.0)
            .build(3, &continuous_calibration())
            .unwrap();
        let entity = DispatchEntity::pending("L1", "S1", "OP1", "L1-C03", &configuration, at(d1, 8, 0));
        repo.record_pending(&entity).await.unwrap();

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending, vec![entity.clone()]);
        assert_eq!(pending[0].slot_number, 3);

        repo.resolve(
            &entity.dispatch_id,
            DispatchStatus::Failed,
            Some("timeout"),
            at(d1, 8, 1),
        )
        .await
        .unwrap();

        let resolved = repo.find(&entity.dispatch_id).await.unwrap().unwrap();
        assert_eq!(resolved.status, DispatchStatus::Failed);
        assert_eq!(resolved.resolved_at, Some(at(d1, 8, 1)));
        assert_eq!(resolved.note.as_deref(), Some("timeout"));
        assert!(repo.list_pending().await.unwrap().is_empty());

        // 终态记录不能再次改写
        let err = repo
            .resolve(&entity.dispatch_id, DispatchStatus::Confirmed, None, at(d1, 8, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
