use super::*;
use crate::clock::ManualClock;
use chrono::{DateTime, NaiveDate, Timelike};

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

// 2026-11-02T00:00:00Z, a Monday.
const DAY: Ms = 1_793_577_600_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablebook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Fixture {
    engine: Engine,
    clock: Arc<ManualClock>,
    admin: Requester,
    table: Ulid,
}

/// Engine with one table; the clock sits at midnight the day before `DAY`.
async fn setup(name: &str, config: ReservationConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(DAY - 24 * H));
    let engine = Engine::with_clock(
        test_wal_path(name),
        Arc::new(NotifyHub::new()),
        config,
        clock.clone(),
    )
    .unwrap();
    let admin = Requester::admin(Ulid::new());
    let table = Ulid::new();
    engine.create_table(&admin, table, "Table 1".into()).await.unwrap();
    Fixture {
        engine,
        clock,
        admin,
        table,
    }
}

fn bounded(table: Ulid, start: Ms, end: Ms) -> ReservationRequest {
    ReservationRequest {
        resource_id: table,
        window: RequestedWindow::Bounded {
            start: to_local(start, 0),
            end: to_local(end, 0),
        },
        num_members: 2,
        num_guests: 0,
        reason: None,
    }
}

fn all_day(table: Ulid, date: NaiveDate, reason: Option<&str>) -> ReservationRequest {
    ReservationRequest {
        resource_id: table,
        window: RequestedWindow::AllDay { date, days: 1 },
        num_members: 8,
        num_guests: 0,
        reason: reason.map(str::to_string),
    }
}

fn unlimited() -> ReservationConfig {
    ReservationConfig {
        max_reservations_per_user_per_day: 0,
        ..ReservationConfig::default()
    }
}

// ── Booking scenarios ────────────────────────────────────

#[tokio::test]
async fn consecutive_rejected_when_disallowed() {
    let f = setup(
        "consecutive_off.wal",
        ReservationConfig {
            allow_consecutive_reservations: false,
            ..unlimited()
        },
    )
    .await;
    let alice = Requester::member(Ulid::new());
    let first = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap();

    let bob = Requester::member(Ulid::new());
    let err = f
        .engine
        .create_reservation(&bob, bounded(f.table, DAY + 11 * H, DAY + 13 * H))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ConsecutiveNotAllowed(first.reservation.id));
}

#[tokio::test]
async fn consecutive_accepted_when_allowed() {
    let f = setup("consecutive_on.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap();
    let outcome = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 11 * H, DAY + 13 * H))
        .await
        .unwrap();
    assert_eq!(outcome.status, BookingStatus::Confirmed);
    assert_eq!(outcome.message(), "confirmed");
}

#[tokio::test]
async fn gap_exactly_minimum_accepted() {
    let f = setup(
        "gap_exact.wal",
        ReservationConfig {
            min_time_between_reservations_minutes: 30,
            ..unlimited()
        },
    )
    .await;
    let alice = Requester::member(Ulid::new());
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap();
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 11 * H + 30 * M, DAY + 13 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn gap_below_minimum_rejected() {
    let f = setup(
        "gap_short.wal",
        ReservationConfig {
            min_time_between_reservations_minutes: 30,
            ..unlimited()
        },
    )
    .await;
    let alice = Requester::member(Ulid::new());
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap();
    let err = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 11 * H + 20 * M, DAY + 13 * H))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientGap {
            actual_minutes: 20,
            required_minutes: 30
        }
    );
}

#[tokio::test]
async fn daily_quota_counts_across_tables() {
    let f = setup(
        "quota.wal",
        ReservationConfig {
            max_reservations_per_user_per_day: 1,
            ..ReservationConfig::default()
        },
    )
    .await;
    let second_table = Ulid::new();
    f.engine
        .create_table(&f.admin, second_table, "Table 2".into())
        .await
        .unwrap();

    let alice = Requester::member(Ulid::new());
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap();
    let err = f
        .engine
        .create_reservation(&alice, bounded(second_table, DAY + 15 * H, DAY + 16 * H))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DailyQuotaExceeded { limit: 1 });

    // Next day and other users are unaffected.
    f.engine
        .create_reservation(&alice, bounded(second_table, DAY + 33 * H, DAY + 34 * H))
        .await
        .unwrap();
    let bob = Requester::member(Ulid::new());
    f.engine
        .create_reservation(&bob, bounded(second_table, DAY + 15 * H, DAY + 16 * H))
        .await
        .unwrap();

    let day = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
    assert_eq!(f.engine.count_user_reservations_on_day(alice.id, day).await, 1);
    assert_eq!(f.engine.count_user_reservations_on_day(alice.id, day).await, 1);
}

#[tokio::test]
async fn all_day_rejection_cancels_and_notifies() {
    let f = setup("all_day_reject.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let mut inbox = f.engine.notify.subscribe(alice.id);
    let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();

    let outcome = f
        .engine
        .create_reservation(&alice, all_day(f.table, date, Some("club tournament")))
        .await
        .unwrap();
    assert_eq!(outcome.status, BookingStatus::PendingApproval);
    assert!(!outcome.reservation.approved());
    assert_eq!(outcome.reservation.span, Span::new(DAY + 32 * H, DAY + 46 * H));

    let pending = f.engine.list_pending_approvals().await;
    assert_eq!(pending.len(), 1);

    let id = outcome.reservation.id;
    let rejected = f
        .engine
        .reject_reservation(&f.admin, id, "conflict with event")
        .await
        .unwrap();
    assert_eq!(rejected.status, ReservationStatus::Cancelled);
    assert_eq!(rejected.rejection_reason(), Some("conflict with event"));
    assert!(!rejected.approved());

    let note = inbox.recv().await.unwrap();
    assert_eq!(note.user_id, alice.id);
    assert_eq!(note.related_entity_id, id);
    assert_eq!(note.title, "Reservation rejected");
    assert!(note.body.contains("conflict with event"));

    // The slot is free again.
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 33 * H, DAY + 35 * H))
        .await
        .unwrap();
    assert!(f.engine.list_pending_approvals().await.is_empty());
}

// ── Approval state machine ───────────────────────────────

#[tokio::test]
async fn all_day_needs_reason() {
    let f = setup("all_day_reason.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
    for reason in [None, Some("   ")] {
        let err = f
            .engine
            .create_reservation(&alice, all_day(f.table, date, reason))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::MissingReason);
    }
    assert_eq!(f.engine.get_table(f.table).await.unwrap().active_reservations, 0);
}

#[tokio::test]
async fn admin_all_day_is_confirmed_immediately() {
    let f = setup("all_day_admin.wal", unlimited()).await;
    let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
    let outcome = f
        .engine
        .create_reservation(&f.admin, all_day(f.table, date, Some("maintenance")))
        .await
        .unwrap();
    assert_eq!(outcome.reservation.approval, ApprovalState::NotRequired);
    assert_eq!(outcome.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn approve_flow() {
    let f = setup("approve.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let mut inbox = f.engine.notify.subscribe(alice.id);
    let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
    let id = f
        .engine
        .create_reservation(&alice, all_day(f.table, date, Some("league night")))
        .await
        .unwrap()
        .reservation
        .id;

    let err = f.engine.approve_reservation(&alice, id).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let outcome = f.engine.approve_reservation(&f.admin, id).await.unwrap();
    assert_eq!(outcome.reservation.approval, ApprovalState::Approved);
    assert!(outcome.reservation.approved());
    assert_eq!(outcome.reservation.rejection_reason(), None);
    assert_eq!(inbox.recv().await.unwrap().title, "Reservation approved");

    let again = f.engine.approve_reservation(&f.admin, id).await.unwrap_err();
    assert!(matches!(again, EngineError::InvalidState(_)));
    let reject = f
        .engine
        .reject_reservation(&f.admin, id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(reject, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn bounded_booking_not_rejectable() {
    let f = setup("not_rejectable.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let id = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap()
        .reservation
        .id;
    let err = f
        .engine
        .reject_reservation(&f.admin, id, "no")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NotRejectable(id));

    let err = f.engine.reject_reservation(&alice, id, "no").await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

// ── Window rules ─────────────────────────────────────────

#[tokio::test]
async fn time_rules_rejected_in_order() {
    let f = setup(
        "time_rules.wal",
        ReservationConfig {
            min_hours_in_advance: 2.0,
            ..unlimited()
        },
    )
    .await;
    let alice = Requester::member(Ulid::new());
    f.clock.set(DAY + 8 * H);

    let cases = [
        (DAY + 10 * H, DAY + 9 * H, EngineError::InvalidRange),
        (DAY + 7 * H, DAY + 9 * H, EngineError::PastDate),
        (
            DAY + 9 * H,
            DAY + 10 * H,
            EngineError::InsufficientNotice { required_hours: 2.0 },
        ),
        (
            DAY + 10 * H,
            DAY + 15 * H,
            EngineError::DurationExceeded { max_hours: 4.0 },
        ),
        (DAY + 21 * H, DAY + 23 * H, EngineError::OutsideOpeningHours),
    ];
    for (start, end, expected) in cases {
        let err = f
            .engine
            .create_reservation(&alice, bounded(f.table, start, end))
            .await
            .unwrap_err();
        assert_eq!(err, expected);
    }
    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 10 * H, DAY + 14 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_table_is_not_found() {
    let f = setup("unknown_table.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let missing = Ulid::new();
    let err = f
        .engine
        .create_reservation(&alice, bounded(missing, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NotFound(missing));
}

#[tokio::test]
async fn wall_clock_round_trips_in_club_timezone() {
    let f = setup(
        "timezone.wal",
        ReservationConfig {
            timezone: chrono_tz::Europe::Brussels,
            ..unlimited()
        },
    )
    .await;
    let alice = Requester::member(Ulid::new());

    // Winter (+01:00) and summer (+02:00) bookings, both 10:00-12:00 local.
    for (start, end) in [
        ("2026-11-03T10:00:00+01:00", "2026-11-03T12:00:00+01:00"),
        ("2027-06-15T10:00:00+02:00", "2027-06-15T12:00:00+02:00"),
    ] {
        let start = DateTime::parse_from_rfc3339(start).unwrap();
        let end = DateTime::parse_from_rfc3339(end).unwrap();
        let outcome = f
            .engine
            .create_reservation(
                &alice,
                ReservationRequest {
                    resource_id: f.table,
                    window: RequestedWindow::Bounded { start, end },
                    num_members: 2,
                    num_guests: 1,
                    reason: None,
                },
            )
            .await
            .unwrap();
        let stored = f.engine.get_reservation(outcome.reservation.id).await.unwrap();
        assert_eq!(stored.local_start(), start);
        assert_eq!(stored.local_start().offset(), start.offset());
        assert_eq!(stored.local_start().hour(), 10);
        assert_eq!(stored.local_end().hour(), 12);
        assert_eq!(stored.duration_hours, 2.0);
    }
}

#[tokio::test]
async fn end_keeps_its_submitted_offset() {
    let f = setup("end_offset.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    // 09:00Z to 10:00Z, written with different offsets on each side.
    let start = DateTime::parse_from_rfc3339("2026-11-02T10:00:00+01:00").unwrap();
    let end = DateTime::parse_from_rfc3339("2026-11-02T12:00:00+02:00").unwrap();
    let outcome = f
        .engine
        .create_reservation(
            &alice,
            ReservationRequest {
                resource_id: f.table,
                window: RequestedWindow::Bounded { start, end },
                num_members: 2,
                num_guests: 0,
                reason: None,
            },
        )
        .await
        .unwrap();

    let stored = f.engine.get_reservation(outcome.reservation.id).await.unwrap();
    assert_eq!(stored.span, Span::new(DAY + 9 * H, DAY + 10 * H));
    assert_eq!(stored.local_start(), start);
    assert_eq!(stored.local_end(), end);
    assert_eq!(stored.local_end().to_rfc3339(), "2026-11-02T12:00:00+02:00");
    assert_eq!(stored.duration_hours, 1.0);

    // A patch that leaves the window alone keeps both offsets.
    let patched = f
        .engine
        .update_reservation(
            &alice,
            stored.id,
            ReservationPatch {
                num_guests: Some(1),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(patched.reservation.local_end(), end);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_conflicting_creates_admit_one() {
    let f = setup("race.wal", unlimited()).await;
    let engine = Arc::new(f.engine);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let table = f.table;
        handles.push(tokio::spawn(async move {
            let user = Requester::member(Ulid::new());
            engine
                .create_reservation(&user, bounded(table, DAY + 9 * H, DAY + 11 * H))
                .await
        }));
    }

    let mut winners = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::ResourceConflict { conflicting }) => assert_eq!(conflicting.len(), 1),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    let active = engine
        .list_reservations(f.table, DAY, DAY + 24 * H)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_same_user_respects_quota() {
    let f = setup(
        "race_quota.wal",
        ReservationConfig {
            max_reservations_per_user_per_day: 2,
            ..ReservationConfig::default()
        },
    )
    .await;
    let engine = Arc::new(f.engine);
    let alice = Requester::member(Ulid::new());
    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = engine.clone();
        let table = f.table;
        handles.push(tokio::spawn(async move {
            let start = DAY + (9 + 2 * i) * H;
            engine
                .create_reservation(&alice, bounded(table, start, start + H))
                .await
        }));
    }
    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert_eq!(e, EngineError::DailyQuotaExceeded { limit: 2 }),
        }
    }
    assert_eq!(accepted, 2);
}

// ── Updates ──────────────────────────────────────────────

#[tokio::test]
async fn update_ignores_its_own_row() {
    let f = setup(
        "update_self.wal",
        ReservationConfig {
            max_reservations_per_user_per_day: 1,
            allow_consecutive_reservations: false,
            min_time_between_reservations_minutes: 30,
            ..ReservationConfig::default()
        },
    )
    .await;
    let alice = Requester::member(Ulid::new());
    let id = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap()
        .reservation
        .id;

    let moved = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                window: Some(RequestedWindow::Bounded {
                    start: to_local(DAY + 10 * H, 0),
                    end: to_local(DAY + 12 * H, 0),
                }),
                num_guests: Some(3),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.reservation.id, id);
    assert_eq!(moved.reservation.span, Span::new(DAY + 10 * H, DAY + 12 * H));
    assert_eq!(moved.reservation.num_guests, 3);

    let active = f
        .engine
        .list_reservations(f.table, DAY, DAY + 24 * H)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn update_still_checks_neighbours() {
    let f = setup("update_conflict.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let bob = Requester::member(Ulid::new());
    let bobs = f
        .engine
        .create_reservation(&bob, bounded(f.table, DAY + 12 * H, DAY + 14 * H))
        .await
        .unwrap()
        .reservation
        .id;
    let id = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap()
        .reservation
        .id;

    let err = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                window: Some(RequestedWindow::Bounded {
                    start: to_local(DAY + 11 * H, 0),
                    end: to_local(DAY + 13 * H, 0),
                }),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ResourceConflict { conflicting: vec![bobs] });

    // Nothing was written.
    let unchanged = f.engine.get_reservation(id).await.unwrap();
    assert_eq!(unchanged.span, Span::new(DAY + 9 * H, DAY + 11 * H));
}

#[tokio::test]
async fn update_and_cancel_require_owner_or_admin() {
    let f = setup("update_forbidden.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let mallory = Requester::member(Ulid::new());
    let id = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap()
        .reservation
        .id;

    let patch = ReservationPatch {
        num_guests: Some(4),
        ..ReservationPatch::default()
    };
    let err = f
        .engine
        .update_reservation(&mallory, id, patch.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    let err = f.engine.cancel_reservation(&mallory, id).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    f.engine.update_reservation(&f.admin, id, patch).await.unwrap();
    let cancelled = f.engine.cancel_reservation(&alice, id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let err = f
        .engine
        .update_reservation(&alice, id, ReservationPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn update_moves_reservation_between_tables() {
    let path = test_wal_path("update_move.wal");
    let clock = Arc::new(ManualClock::new(DAY - 24 * H));
    let engine =
        Engine::with_clock(path.clone(), Arc::new(NotifyHub::new()), unlimited(), clock.clone()).unwrap();
    let admin = Requester::admin(Ulid::new());
    let (t1, t2) = (Ulid::new(), Ulid::new());
    engine.create_table(&admin, t1, "Window".into()).await.unwrap();
    engine.create_table(&admin, t2, "Corner".into()).await.unwrap();

    let alice = Requester::member(Ulid::new());
    let id = engine
        .create_reservation(&alice, bounded(t1, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap()
        .reservation
        .id;
    engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                resource_id: Some(t2),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();

    assert!(engine.list_reservations(t1, DAY, DAY + 24 * H).await.unwrap().is_empty());
    assert_eq!(engine.get_reservation(id).await.unwrap().resource_id, t2);
    drop(engine);

    let reopened = Engine::with_clock(path, Arc::new(NotifyHub::new()), unlimited(), clock).unwrap();
    assert!(reopened.list_reservations(t1, DAY, DAY + 24 * H).await.unwrap().is_empty());
    let on_t2 = reopened.list_reservations(t2, DAY, DAY + 24 * H).await.unwrap();
    assert_eq!(on_t2.len(), 1);
    assert_eq!(on_t2[0].id, id);
}

#[tokio::test]
async fn update_to_all_day_reenters_approval() {
    let f = setup("update_all_day.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let id = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap()
        .reservation
        .id;
    let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();

    let err = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                window: Some(RequestedWindow::AllDay { date, days: 1 }),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::MissingReason);
    let unchanged = f.engine.get_reservation(id).await.unwrap();
    assert!(!unchanged.all_day);
    assert_eq!(unchanged.span, Span::new(DAY + 9 * H, DAY + 11 * H));

    let outcome = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                window: Some(RequestedWindow::AllDay { date, days: 1 }),
                reason: Some("birthday dinner".into()),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.reservation.all_day);
    assert_eq!(outcome.reservation.approval, ApprovalState::PendingApproval);
    assert_eq!(outcome.status, BookingStatus::PendingApproval);
    let pending = f.engine.list_pending_approvals().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
}

#[tokio::test]
async fn moving_approved_all_day_needs_fresh_approval() {
    let f = setup("all_day_move.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let id = f
        .engine
        .create_reservation(
            &alice,
            all_day(f.table, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(), Some("league night")),
        )
        .await
        .unwrap()
        .reservation
        .id;
    f.engine.approve_reservation(&f.admin, id).await.unwrap();

    // Same days, same table: the approval stands.
    let edited = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                num_guests: Some(2),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.reservation.approval, ApprovalState::Approved);
    assert_eq!(edited.message(), "confirmed");

    let moved = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                window: Some(RequestedWindow::AllDay {
                    date: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
                    days: 3,
                }),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.reservation.approval, ApprovalState::PendingApproval);
    assert!(!moved.reservation.approved());
    assert_eq!(moved.message(), "pending administrator approval");
    assert_eq!(f.engine.list_pending_approvals().await.len(), 1);

    // Switching tables counts as a move too.
    f.engine.approve_reservation(&f.admin, id).await.unwrap();
    let other = Ulid::new();
    f.engine.create_table(&f.admin, other, "Table 2".into()).await.unwrap();
    let relocated = f
        .engine
        .update_reservation(
            &alice,
            id,
            ReservationPatch {
                resource_id: Some(other),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(relocated.reservation.resource_id, other);
    assert_eq!(relocated.reservation.approval, ApprovalState::PendingApproval);
}

// ── Lifecycle and persistence ────────────────────────────

#[tokio::test]
async fn cancelled_and_completed_free_the_slot() {
    let f = setup("retired.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());
    let first = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap()
        .reservation
        .id;
    f.engine.cancel_reservation(&alice, first).await.unwrap();

    let second = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap()
        .reservation
        .id;
    let err = f.engine.complete_reservation(&alice, second).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    let done = f.engine.complete_reservation(&f.admin, second).await.unwrap();
    assert_eq!(done.status, ReservationStatus::Completed);

    f.engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap();
    // History is retained.
    assert_eq!(
        f.engine.get_reservation(first).await.unwrap().status,
        ReservationStatus::Cancelled
    );
}

#[tokio::test]
async fn failed_append_leaves_no_trace() {
    let f = setup("store_failure.wal", ReservationConfig::default()).await;
    let alice = Requester::member(Ulid::new());
    let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
    let kept = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap()
        .reservation;
    assert_eq!(f.engine.count_user_reservations_on_day(alice.id, date).await, 1);

    f.engine.stop_wal_writer().await;

    let err = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 12 * H, DAY + 13 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StoreFailure(_)), "{err:?}");
    let listed = f.engine.list_reservations(f.table, DAY, DAY + 24 * H).await.unwrap();
    assert_eq!(listed, vec![kept.clone()]);
    assert_eq!(f.engine.count_user_reservations_on_day(alice.id, date).await, 1);
    assert_eq!(f.engine.get_table(f.table).await.unwrap().active_reservations, 1);

    let err = f
        .engine
        .update_reservation(
            &alice,
            kept.id,
            ReservationPatch {
                window: Some(RequestedWindow::Bounded {
                    start: to_local(DAY + 15 * H, 0),
                    end: to_local(DAY + 16 * H, 0),
                }),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StoreFailure(_)), "{err:?}");
    let err = f.engine.cancel_reservation(&alice, kept.id).await.unwrap_err();
    assert!(matches!(err, EngineError::StoreFailure(_)), "{err:?}");
    assert_eq!(f.engine.get_reservation(kept.id).await.unwrap(), kept);
    assert_eq!(f.engine.count_user_reservations_on_day(alice.id, date).await, 1);
}

#[tokio::test]
async fn replay_restores_reservations_and_policy() {
    let path = test_wal_path("replay.wal");
    let clock = Arc::new(ManualClock::new(DAY - 24 * H));
    let engine = Engine::with_clock(
        path.clone(),
        Arc::new(NotifyHub::new()),
        ReservationConfig::default(),
        clock.clone(),
    )
    .unwrap();
    let admin = Requester::admin(Ulid::new());
    let table = Ulid::new();
    engine.create_table(&admin, table, "Table 1".into()).await.unwrap();

    let alice = Requester::member(Ulid::new());
    let date = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
    let approved = engine
        .create_reservation(&alice, all_day(table, date, Some("birthday")))
        .await
        .unwrap()
        .reservation
        .id;
    engine.approve_reservation(&admin, approved).await.unwrap();
    let bounded_id = engine
        .create_reservation(&alice, bounded(table, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap()
        .reservation
        .id;
    engine
        .update_config(
            &admin,
            ReservationConfig {
                max_reservations_per_user_per_day: 1,
                ..ReservationConfig::default()
            },
        )
        .await
        .unwrap();
    drop(engine);

    let reopened = Engine::with_clock(
        path,
        Arc::new(NotifyHub::new()),
        ReservationConfig::default(),
        clock,
    )
    .unwrap();
    assert_eq!(reopened.config().await.max_reservations_per_user_per_day, 1);
    assert_eq!(
        reopened.get_reservation(approved).await.unwrap().approval,
        ApprovalState::Approved
    );
    assert!(reopened.get_reservation(bounded_id).await.unwrap().is_active());

    // The replayed quota index is live: alice is full on DAY.
    let err = reopened
        .create_reservation(&alice, bounded(table, DAY + 15 * H, DAY + 16 * H))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DailyQuotaExceeded { limit: 1 });
}

// ── Inventory and policy ─────────────────────────────────

#[tokio::test]
async fn table_inventory_rules() {
    let f = setup("inventory.wal", unlimited()).await;
    let alice = Requester::member(Ulid::new());

    let err = f
        .engine
        .create_table(&alice, Ulid::new(), "Mine".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    let err = f
        .engine
        .create_table(&f.admin, f.table, "Again".into())
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AlreadyExists(f.table));

    let id = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 10 * H))
        .await
        .unwrap()
        .reservation
        .id;
    let err = f.engine.remove_table(&f.admin, f.table).await.unwrap_err();
    assert_eq!(err, EngineError::HasActiveReservations(f.table));

    f.engine.cancel_reservation(&alice, id).await.unwrap();
    f.engine.remove_table(&f.admin, f.table).await.unwrap();
    assert!(f.engine.list_tables().await.is_empty());
    assert_eq!(
        f.engine.get_reservation(id).await.unwrap_err(),
        EngineError::NotFound(id)
    );
}

#[tokio::test]
async fn policy_updates_are_admin_only_and_validated() {
    let f = setup("policy.wal", ReservationConfig::default()).await;
    let alice = Requester::member(Ulid::new());

    let tighter = ReservationConfig {
        max_hours_per_reservation: 1.0,
        ..ReservationConfig::default()
    };
    let err = f
        .engine
        .update_config(&alice, tighter.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let broken = ReservationConfig {
        max_hours_per_reservation: 0.0,
        ..ReservationConfig::default()
    };
    let err = f.engine.update_config(&f.admin, broken).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert_eq!(f.engine.config().await.max_hours_per_reservation, 4.0);

    f.engine.update_config(&f.admin, tighter).await.unwrap();
    let err = f
        .engine
        .create_reservation(&alice, bounded(f.table, DAY + 9 * H, DAY + 11 * H))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DurationExceeded { max_hours: 1.0 });
}

#[tokio::test]
async fn listing_requires_ordered_range() {
    let f = setup("list_range.wal", unlimited()).await;
    let err = f
        .engine
        .list_reservations(f.table, DAY + H, DAY)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::InvalidRange);
}
