use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Weekday};
use ulid::Ulid;

use tidyslot::controller::{BookingController, BookingDraft, BookingForm};
use tidyslot::engine::{list_unavailable, CheckSettings, DaySchedule, Engine, Slot};
use tidyslot::model::*;
use tidyslot::notify::NotifyHub;

const EMPLOYEES: usize = 200;
const BOOKINGS_PER_DAY: u32 = 4;
const DAYS: u64 = 10;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn time_of(minutes: u32) -> TimeOfDay {
    TimeOfDay::new(minutes / 60, minutes % 60).unwrap()
}

async fn setup(engine: &Engine, first_day: NaiveDate) -> Vec<EmployeeId> {
    let started = Instant::now();
    let mut ids = Vec::with_capacity(EMPLOYEES);
    for i in 0..EMPLOYEES {
        let id = Ulid::new();
        engine.add_employee(id, format!("employee-{i:03}")).await.unwrap();
        engine
            .set_availability(EmployeeAvailability::weekly(
                id,
                &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                time_of(8 * 60),
                time_of(17 * 60),
            ))
            .await
            .unwrap();
        for d in 0..DAYS {
            let date = first_day + Days::new(d);
            for slot in 0..BOOKINGS_PER_DAY {
                engine
                    .create_booking(Booking {
                        id: Ulid::new(),
                        client_id: Ulid::new(),
                        employee_id: id,
                        date,
                        start_time: time_of(8 * 60 + slot * 120),
                        duration_minutes: 90,
                        status: BookingStatus::Scheduled,
                        service_type: ServiceType::Cleaning,
                        notes: None,
                    })
                    .await
                    .unwrap();
            }
        }
        ids.push(id);
    }
    println!(
        "  {} employees, {} bookings in {:.2}s",
        EMPLOYEES,
        EMPLOYEES as u64 * DAYS * BOOKINGS_PER_DAY as u64,
        started.elapsed().as_secs_f64()
    );
    ids
}

fn phase1_pure_check(days: &[DaySchedule], date: NaiveDate) {
    let settings = CheckSettings::default();
    let mut latencies = Vec::new();
    for start in (8 * 60..17 * 60).step_by(15) {
        let slot = Slot {
            date,
            start_time: time_of(start),
            duration_minutes: 60,
        };
        let t = Instant::now();
        let unavailable = list_unavailable(days, &slot, None, &settings);
        latencies.push(t.elapsed());
        std::hint::black_box(unavailable);
    }
    print_latency("list_unavailable (pre-fetched)", &mut latencies);
}

async fn phase2_refresh(controller: &BookingController<Arc<Engine>>, employee: EmployeeId, date: NaiveDate) {
    let mut latencies = Vec::new();
    for start in (8 * 60..17 * 60).step_by(15) {
        let draft = BookingDraft {
            employee_id: Some(employee),
            date: Some(date),
            start_time: Some(time_of(start)),
            duration_minutes: Some(60),
            ..BookingDraft::default()
        };
        let t = Instant::now();
        std::hint::black_box(controller.refresh(&draft).await);
        latencies.push(t.elapsed());
    }
    print_latency("refresh (fetch + check)", &mut latencies);
}

async fn phase3_submit(controller: &BookingController<Arc<Engine>>, employees: &[EmployeeId], date: NaiveDate) {
    let mut latencies = Vec::new();
    let mut accepted = 0;
    for &employee in employees {
        let mut form = BookingForm::new();
        form.edit(|d| {
            *d = BookingDraft {
                client_id: Some(Ulid::new()),
                employee_id: Some(employee),
                date: Some(date),
                start_time: Some(time_of(16 * 60)),
                duration_minutes: Some(30),
                service_type: Some(ServiceType::Visit),
                ..BookingDraft::default()
            }
        })
        .unwrap();
        let t = Instant::now();
        if controller.submit(&mut form).await.is_ok() {
            accepted += 1;
        }
        latencies.push(t.elapsed());
    }
    println!("  {accepted}/{} accepted", employees.len());
    print_latency("submit (fetch + check + journal)", &mut latencies);
}

#[tokio::main]
async fn main() {
    let path = std::env::temp_dir().join(format!("tidyslot_bench_{}.journal", Ulid::new()));
    let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap());
    // A Monday.
    let first_day: NaiveDate = "2024-12-02".parse().unwrap();
    let mid_week = first_day + Days::new(2);

    println!("=== tidyslot validation benchmark ===");
    println!("\n[setup]");
    let employees = setup(&engine, first_day).await;

    println!("\n[phase 1] pure conflict check");
    let days = engine.day_schedules(mid_week).await;
    phase1_pure_check(&days, mid_week);

    let controller = BookingController::new(engine.clone(), CheckSettings::default());
    println!("\n[phase 2] live refresh");
    phase2_refresh(&controller, employees[0], mid_week).await;

    println!("\n[phase 3] submit");
    phase3_submit(&controller, &employees, mid_week).await;

    let _ = std::fs::remove_file(&path);
    println!("\n=== benchmark complete ===");
}
