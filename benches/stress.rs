use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveTime, Weekday};
use ulid::Ulid;

use agendad::engine::{BookingRequest, ConflictScope, Engine, EngineError};
use agendad::model::*;
use agendad::notify::NotifyHub;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const BASE: i64 = 1_893_456_000_000; // 2030-01-01T00:00:00Z

fn engine(label: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("agendad_bench_{label}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    Arc::new(Engine::new(dir.join("agendad.wal"), Arc::new(NotifyHub::new())).expect("open engine"))
}

fn settings(name: &str) -> AgendaSettings {
    let day = |weekday| WorkingDay {
        weekday,
        start: NaiveTime::from_hms_opt(0, 0, 0).expect("midnight"),
        end: NaiveTime::from_hms_opt(23, 59, 0).expect("23:59"),
        enabled: true,
    };
    AgendaSettings {
        name: name.into(),
        working_hours: [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
        .into_iter()
        .map(day)
        .collect(),
        slot_duration_minutes: 60,
        breaks: Vec::new(),
        min_advance_hours: 0,
        max_advance_days: 0,
        buffer_minutes: 0,
        utc_offset_minutes: 0,
        is_active: true,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let engine = engine("seq");
    let user = Ulid::new();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = BASE + (i as i64) * HOUR;
        let t = Instant::now();
        engine
            .create_appointment(NewAppointment::new(user, "Consulta", s, s + HOUR))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} appointments in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_owners() {
    let engine = engine("owners");
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Independent owners never contend on the same schedule lock.
            let user = Ulid::new();
            for j in 0..n_per_task {
                let s = BASE + (j as i64) * HOUR;
                engine
                    .create_appointment(NewAppointment::new(user, "Consulta", s, s + HOUR))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} owners x {n_per_task} appointments = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_booking() {
    let engine = engine("contended");
    let org = Ulid::new();
    let agenda = engine
        .create_agenda(Ulid::new(), org, settings("Recepção"))
        .await
        .unwrap();

    let rounds = 100;
    let racers = 20;
    let mut created = 0usize;
    let mut conflicts = 0usize;
    let start = Instant::now();

    for round in 0..rounds {
        let s = BASE + (round as i64) * HOUR;
        let attempts = (0..racers).map(|r| {
            let engine = engine.clone();
            async move {
                engine
                    .book_public(
                        org,
                        BookingRequest {
                            agenda_id: agenda.id,
                            span: Span::new(s, s + HOUR),
                            client_phone: format!("55119{round:04}{r:04}"),
                            client_name: Some(format!("Cliente {r}")),
                            client_email: None,
                            title: None,
                            description: None,
                        },
                    )
                    .await
            }
        });
        for result in futures::future::join_all(attempts).await {
            match result {
                Ok(_) => created += 1,
                Err(EngineError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected booking error: {e}"),
            }
        }
    }

    let elapsed = start.elapsed();
    println!(
        "  {rounds} slots x {racers} racers: {created} created, {conflicts} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(created, rounds, "exactly one booking per slot");
}

async fn phase4_read_under_load() {
    let engine = engine("reads");
    let user = Ulid::new();
    for i in 0..5000 {
        let s = BASE + (i as i64) * HOUR;
        engine
            .create_appointment(NewAppointment::new(user, "Consulta", s, s + HOUR))
            .await
            .unwrap();
    }

    let writer_engine = engine.clone();
    let writer = tokio::spawn(async move {
        let other = Ulid::new();
        for i in 0..2000 {
            let s = BASE + (i as i64) * HOUR;
            writer_engine
                .create_appointment(NewAppointment::new(other, "Retorno", s, s + HOUR))
                .await
                .unwrap();
        }
    });

    let n = 5000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let s = BASE + ((i % 5000) as i64) * HOUR + HOUR / 2;
        let t = Instant::now();
        let hit = engine
            .check_conflict(ConflictScope::Owner(user), Span::new(s, s + HOUR), None)
            .await
            .unwrap();
        latencies.push(t.elapsed());
        assert!(hit.is_some());
    }
    writer.await.unwrap();
    print_latency("conflict-check latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== agendad stress benchmark ===\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent owners");
    phase2_concurrent_owners().await;

    println!("\n[phase 3] contended public booking");
    phase3_contended_booking().await;

    println!("\n[phase 4] conflict checks under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
