use super::*;
use crate::limits::*;
use chrono::{Utc, Weekday};
use std::collections::HashSet;

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tidyslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    (engine, path)
}

async fn weekday_employee(engine: &Engine, name: &str) -> EmployeeId {
    let id = Ulid::new();
    engine.add_employee(id, name.into()).await.unwrap();
    engine
        .set_availability(EmployeeAvailability::weekly(
            id,
            &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            t("08:00"),
            t("17:00"),
        ))
        .await
        .unwrap();
    id
}

fn booking(employee_id: EmployeeId, d: &str, start: &str, minutes: u32) -> Booking {
    Booking {
        id: Ulid::new(),
        client_id: Ulid::new(),
        employee_id,
        date: date(d),
        start_time: t(start),
        duration_minutes: minutes,
        status: BookingStatus::Scheduled,
        service_type: ServiceType::Cleaning,
        notes: None,
    }
}

fn off_request(employee_id: EmployeeId, start: &str, end: &str) -> OffRequest {
    OffRequest {
        id: Ulid::new(),
        employee_id,
        start_date: date(start),
        end_date: date(end),
        selected_dates: Vec::new(),
        reason: "family".into(),
        duration_type: DurationType::MultiDay,
        status: OffRequestStatus::Approved,
        created_at: Utc::now(),
        decided_at: None,
        decided_by: None,
    }
}

fn candidate(employee_id: EmployeeId, d: &str, start: &str, minutes: u32) -> Candidate {
    Candidate {
        employee_id,
        slot: Slot {
            date: date(d),
            start_time: t(start),
            duration_minutes: minutes,
        },
        exclude_booking_id: None,
    }
}

#[test]
fn employee_state_keeps_bookings_sorted() {
    let emp = Ulid::new();
    let mut es = EmployeeState::new(Employee {
        id: emp,
        name: "Ana".into(),
        active: true,
    });
    es.insert_booking(booking(emp, "2024-12-12", "09:00", 60));
    es.insert_booking(booking(emp, "2024-12-11", "13:00", 60));
    es.insert_booking(booking(emp, "2024-12-11", "09:00", 60));

    let on_11 = es.bookings_on(date("2024-12-11"));
    assert_eq!(on_11.len(), 2);
    assert_eq!(on_11[0].start_time, t("09:00"));
    assert_eq!(on_11[1].start_time, t("13:00"));
    assert!(es.bookings_on(date("2024-12-10")).is_empty());
}

#[tokio::test]
async fn add_employee_rejects_duplicates_and_blank_names() {
    let (engine, _) = new_engine("add_employee.journal");
    let id = Ulid::new();
    engine.add_employee(id, "Ana".into()).await.unwrap();
    assert!(matches!(
        engine.add_employee(id, "Ana".into()).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        engine.add_employee(Ulid::new(), "  ".into()).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.add_employee(Ulid::new(), "x".repeat(MAX_NAME_LEN + 1)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn availability_needs_existing_employee_and_sane_hours() {
    let (engine, _) = new_engine("availability.journal");
    let ghost = Ulid::new();
    let record = EmployeeAvailability::weekly(ghost, &[Weekday::Mon], t("08:00"), t("17:00"));
    assert!(matches!(engine.set_availability(record).await, Err(EngineError::NotFound(_))));

    let emp = Ulid::new();
    engine.add_employee(emp, "Ana".into()).await.unwrap();
    let backwards = EmployeeAvailability::weekly(emp, &[Weekday::Mon], t("17:00"), t("08:00"));
    assert!(matches!(
        engine.set_availability(backwards).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn exceptions_and_overrides_change_verdicts() {
    let (engine, _) = new_engine("overrides.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    let settings = CheckSettings::default();

    // Wednesday, normally a working day.
    assert!(engine.check(&candidate(emp, "2024-12-11", "09:00", 60), &settings).await.unwrap().is_ok());
    engine
        .add_exception(emp, date("2024-12-11"), "dentist".into())
        .await
        .unwrap();
    assert_eq!(
        engine.check(&candidate(emp, "2024-12-11", "09:00", 60), &settings).await.unwrap(),
        Verdict::Rejected(Rejection::NotWorkingDay)
    );

    // Explicit yes beats the exception; clearing it restores the exception.
    engine
        .set_monthly_override(emp, date("2024-12-11"), Some(true))
        .await
        .unwrap();
    assert!(engine.check(&candidate(emp, "2024-12-11", "09:00", 60), &settings).await.unwrap().is_ok());
    engine.set_monthly_override(emp, date("2024-12-11"), None).await.unwrap();
    assert!(!engine.check(&candidate(emp, "2024-12-11", "09:00", 60), &settings).await.unwrap().is_ok());

    engine.remove_exception(emp, date("2024-12-11")).await.unwrap();
    assert!(engine.check(&candidate(emp, "2024-12-11", "09:00", 60), &settings).await.unwrap().is_ok());
}

#[tokio::test]
async fn off_request_lifecycle() {
    let (engine, _) = new_engine("off_request_lifecycle.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    let settings = CheckSettings::default();
    let wanted = candidate(emp, "2024-12-11", "09:00", 60);

    // Submitted as approved, but the engine files it as pending.
    let filed = engine
        .submit_off_request(off_request(emp, "2024-12-10", "2024-12-12"))
        .await
        .unwrap();
    assert_eq!(filed.status, OffRequestStatus::Pending);
    assert!(engine.check(&wanted, &settings).await.unwrap().is_ok());

    let manager = Ulid::new();
    engine.approve_off_request(filed.id, Some(manager)).await.unwrap();
    assert_eq!(
        engine.check(&wanted, &settings).await.unwrap(),
        Verdict::Rejected(Rejection::TimeOff { request_id: filed.id })
    );
    let stored = engine.get_off_requests(emp).await.unwrap();
    assert_eq!(stored[0].decided_by, Some(manager));
    assert!(stored[0].decided_at.is_some());

    // Decided requests stay decided.
    assert!(matches!(
        engine.reject_off_request(filed.id, None).await,
        Err(EngineError::InvalidTransition { from: "approved", .. })
    ));
    assert!(engine.withdraw_off_request(filed.id).await.is_err());
}

#[tokio::test]
async fn withdraw_pending_off_request() {
    let (engine, _) = new_engine("off_request_withdraw.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    let filed = engine
        .submit_off_request(off_request(emp, "2024-12-10", "2024-12-12"))
        .await
        .unwrap();
    engine.withdraw_off_request(filed.id).await.unwrap();
    assert!(engine.get_off_requests(emp).await.unwrap().is_empty());
    assert!(matches!(
        engine.approve_off_request(filed.id, None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn create_booking_validates_input() {
    let (engine, _) = new_engine("create_booking.journal");
    let emp = weekday_employee(&engine, "Ana").await;

    let zero = booking(emp, "2024-12-11", "09:00", 0);
    assert!(matches!(engine.create_booking(zero).await, Err(EngineError::LimitExceeded(_))));

    let orphan = booking(Ulid::new(), "2024-12-11", "09:00", 60);
    assert!(matches!(engine.create_booking(orphan).await, Err(EngineError::NotFound(_))));

    let ok = booking(emp, "2024-12-11", "09:00", 60);
    engine.create_booking(ok.clone()).await.unwrap();
    assert!(matches!(engine.create_booking(ok.clone()).await, Err(EngineError::AlreadyExists(_))));
    assert_eq!(engine.get_booking(ok.id).await.unwrap(), ok);
}

#[tokio::test]
async fn stored_bookings_drive_overlap_checks() {
    let (engine, _) = new_engine("overlap.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    let settings = CheckSettings::default();
    let existing = booking(emp, "2024-12-11", "09:00", 120);
    engine.create_booking(existing.clone()).await.unwrap();

    assert_eq!(
        engine.check(&candidate(emp, "2024-12-11", "10:00", 120), &settings).await.unwrap(),
        Verdict::Rejected(Rejection::Overlap { booking_id: existing.id })
    );
    assert!(engine.check(&candidate(emp, "2024-12-11", "11:00", 60), &settings).await.unwrap().is_ok());

    engine.cancel_booking(existing.id).await.unwrap();
    assert!(engine.check(&candidate(emp, "2024-12-11", "10:00", 120), &settings).await.unwrap().is_ok());
}

#[tokio::test]
async fn booking_status_transitions() {
    let (engine, _) = new_engine("booking_status.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    let b = booking(emp, "2024-12-11", "09:00", 60);
    engine.create_booking(b.clone()).await.unwrap();

    assert!(matches!(
        engine.complete_booking(b.id).await,
        Err(EngineError::InvalidTransition { from: "scheduled", to: "completed", .. })
    ));
    engine.start_booking(b.id).await.unwrap();
    engine.complete_booking(b.id).await.unwrap();
    assert_eq!(engine.get_booking(b.id).await.unwrap().status, BookingStatus::Completed);
    assert!(engine.cancel_booking(b.id).await.is_err());
}

#[tokio::test]
async fn reassigning_booking_moves_it_between_employees() {
    let (engine, _) = new_engine("reassign.journal");
    let ana = weekday_employee(&engine, "Ana").await;
    let ben = weekday_employee(&engine, "Ben").await;
    let mut b = booking(ana, "2024-12-11", "09:00", 120);
    engine.create_booking(b.clone()).await.unwrap();

    b.employee_id = ben;
    b.start_time = t("10:00");
    engine.update_booking(b.clone()).await.unwrap();

    assert!(engine.get_bookings_on(ana, date("2024-12-11")).await.unwrap().is_empty());
    let bens = engine.get_bookings_on(ben, date("2024-12-11")).await.unwrap();
    assert_eq!(bens, vec![b.clone()]);
    assert_eq!(engine.get_employee_for_entity(&b.id), Some(ben));

    // Editing in place never conflicts with itself.
    let editing = Candidate {
        exclude_booking_id: Some(b.id),
        ..candidate(ben, "2024-12-11", "10:30", 60)
    };
    assert!(engine.check(&editing, &CheckSettings::default()).await.unwrap().is_ok());
}

#[tokio::test]
async fn unavailable_employees_across_roster() {
    let (engine, _) = new_engine("unavailable.journal");
    let free = weekday_employee(&engine, "Ana").await;
    let busy = weekday_employee(&engine, "Ben").await;
    let away = weekday_employee(&engine, "Cleo").await;
    engine
        .create_booking(booking(busy, "2024-12-11", "09:00", 120))
        .await
        .unwrap();
    let req = engine
        .submit_off_request(off_request(away, "2024-12-10", "2024-12-12"))
        .await
        .unwrap();
    engine.approve_off_request(req.id, None).await.unwrap();

    let slot = Slot {
        date: date("2024-12-11"),
        start_time: t("10:00"),
        duration_minutes: 60,
    };
    let greyed = engine
        .unavailable_employees(&slot, None, &CheckSettings::default())
        .await;
    assert_eq!(greyed, HashSet::from([busy, away]));
    assert!(!greyed.contains(&free));
}

#[tokio::test]
async fn free_windows_carve_out_bookings() {
    let (engine, _) = new_engine("free_windows.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    engine
        .create_booking(booking(emp, "2024-12-11", "09:00", 120))
        .await
        .unwrap();
    let settings = CheckSettings::default();

    let free = engine.free_windows(emp, date("2024-12-11"), &settings).await.unwrap();
    assert_eq!(free, vec![Window::new(480, 540), Window::new(660, 1020)]);
    assert!(engine.free_windows(emp, date("2024-12-14"), &settings).await.unwrap().is_empty());
}

#[tokio::test]
async fn contracts_upsert_by_id() {
    let (engine, _) = new_engine("contracts.journal");
    let client = Ulid::new();
    let mut contract = ClientContract {
        id: Ulid::new(),
        client_id: client,
        status: ContractStatus::Pending,
        start_date: date("2024-01-01"),
        end_date: None,
    };
    engine.save_contract(contract.clone()).await.unwrap();
    contract.status = ContractStatus::Active;
    engine.save_contract(contract.clone()).await.unwrap();
    assert_eq!(engine.get_contracts(client), vec![contract.clone()]);

    contract.end_date = Some(date("2023-12-31"));
    assert!(matches!(
        engine.save_contract(contract).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.journal");
    let emp;
    let b;
    let req_id;
    let client = Ulid::new();
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        emp = weekday_employee(&engine, "Ana").await;
        b = booking(emp, "2024-12-11", "09:00", 60);
        engine.create_booking(b.clone()).await.unwrap();
        engine.start_booking(b.id).await.unwrap();
        let req = engine
            .submit_off_request(off_request(emp, "2024-12-20", "2024-12-24"))
            .await
            .unwrap();
        req_id = req.id;
        engine.approve_off_request(req_id, None).await.unwrap();
        engine
            .save_contract(ClientContract {
                id: Ulid::new(),
                client_id: client,
                status: ContractStatus::Active,
                start_date: date("2024-01-01"),
                end_date: None,
            })
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let stored = engine.get_booking(b.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::InProgress);
    assert!(engine.get_availability(emp).await.unwrap().is_some());
    let requests = engine.get_off_requests(emp).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status, OffRequestStatus::Approved);
    assert_eq!(engine.get_employee_for_entity(&req_id), Some(emp));
    assert_eq!(engine.get_contracts(client).len(), 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.journal");
    let emp;
    let kept;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        emp = weekday_employee(&engine, "Ana").await;
        kept = booking(emp, "2024-12-11", "09:00", 60);
        engine.create_booking(kept.clone()).await.unwrap();
        for i in 0..5 {
            let mut b = booking(emp, "2024-12-12", "09:00", 30);
            b.start_time = TimeOfDay::new(9 + i, 0).unwrap();
            engine.create_booking(b.clone()).await.unwrap();
            engine.cancel_booking(b.id).await.unwrap();
        }
        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_journal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_booking(kept.id).await.unwrap(), kept);
    assert_eq!(engine.get_bookings_on(emp, date("2024-12-12")).await.unwrap().len(), 5);
    assert_eq!(engine.list_employees().await.len(), 1);
}

#[tokio::test]
async fn mutations_notify_subscribers() {
    let (engine, _) = new_engine("notify.journal");
    let emp = weekday_employee(&engine, "Ana").await;
    let mut rx = engine.notify.subscribe(emp);

    let b = booking(emp, "2024-12-11", "09:00", 60);
    engine.create_booking(b.clone()).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::BookingCreated { booking } => assert_eq!(booking.id, b.id),
        other => panic!("unexpected event {other:?}"),
    }
}
