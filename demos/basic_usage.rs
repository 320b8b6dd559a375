// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic quiz-sync usage example.
//!
//! Demonstrates:
//! 1. Opening the tiers (progress API, SQLite file, session memory)
//! 2. Answering questions through the facade
//! 3. Offline behaviour: saves land locally and queue for the API
//! 4. Loading and reconciling progress
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! No server is required: when nothing listens on `QUIZ_API_URL` (default
//! `http://localhost:3000/api`) the example shows the offline path.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! QUIZ_API_URL=https://quiz.example.com/api QUIZ_API_TOKEN=... cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use quiz_sync::{ProgressService, ProgressSyncConfig, QuestionAttempt, ServiceState};

const DB_PATH: &str = "./quiz_sync_demo.db";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().map_err(|e| e.to_string())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quiz_sync=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              quiz-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the service
    // ─────────────────────────────────────────────────────────────────────────
    let config = ProgressSyncConfig {
        api_base_url: std::env::var("QUIZ_API_URL").unwrap_or_else(|_| "http://localhost:3000/api".into()),
        api_token: std::env::var("QUIZ_API_TOKEN").ok(),
        username: "demo-learner".into(),
        durable_path: Some(DB_PATH.into()),
        // Fail fast against a missing server
        progress_timeout_ms: 1_000,
        light_timeout_ms: 500,
        queue_save_timeout_ms: 1_000,
        drain_interval_secs: 5,
        ..Default::default()
    };
    println!("📦 API: {}  durable: {}", config.api_base_url, DB_PATH);

    let service = ProgressService::connect(config).await?;
    println!("   State: {}", service.state());
    service.start().await;
    assert_eq!(service.state(), ServiceState::Running);
    println!("   ✅ Running (restored {} queued writes)", service.queue_depth());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Answer a short quiz
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Answering 'Communication Skills' (legacy name, 4 questions)...");
    let answers = [("s1", "b", "b"), ("s2", "a", "c"), ("s3", "d", "d"), ("s4", "a", "a")];
    for (scenario, selected, expected) in answers {
        let start = std::time::Instant::now();
        let attempt = QuestionAttempt::answered(scenario, selected, expected, 3_500);
        match service.answer("Communication Skills", attempt, 25, answers.len()).await {
            Ok((status, saved)) => println!(
                "   └─ {scenario}: {status} api={} local={} ({:?})",
                saved.api_saved,
                saved.local_saved,
                start.elapsed()
            ),
            Err(e) => println!("   └─ {scenario}: rejected: {e}"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Offline queue
    // ─────────────────────────────────────────────────────────────────────────
    let stats = service.queue_stats();
    println!("\n📮 Sync queue: pending={} enqueued={} synced={}", stats.pending, stats.total_enqueued, stats.total_synced);
    for entry in service.queue().entries() {
        println!("   └─ {} / {} ({}), retries={}", entry.username, entry.quiz_id, entry.write.as_str(), entry.retry_count);
    }
    if stats.pending > 0 {
        println!("   Pretending the network came back...");
        service.notify_online();
        tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
        println!("   └─ pending now: {}", service.queue_depth());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Load and inspect every tier
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Loading progress...");
    let loaded = service.load("communication").await;
    match &loaded.data {
        Some(record) => println!(
            "   └─ {} answered={} score={}% xp={} status={} (from {:?}, recovered={})",
            record.quiz_id,
            record.questions_answered,
            record.score_percentage,
            record.experience,
            record.status,
            loaded.source,
            loaded.recovered
        ),
        None => println!("   └─ nothing stored"),
    }
    for reading in service.read("communication").await? {
        let answered = reading.record.as_ref().map(|r| r.questions_answered);
        println!("   └─ {:<9} answered={:?} error={:?}", reading.tier.as_str(), answered, reading.error);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Reset
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧽 Resetting...");
    let cleared = service.reset("communication").await;
    println!("   └─ local copies cleared: {cleared}, remote pending: {}", service.queue_depth());

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics and shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n🛑 Stopping...");
    service.stop().await;
    println!("   ✅ State: {}", service.state());
    drop(service);

    for suffix in ["", "-shm", "-wal"] {
        let _ = std::fs::remove_file(format!("{DB_PATH}{suffix}"));
    }

    println!("\nDone.\n");

    Ok(())
}

/// Print every `quiz_sync_*` metric captured so far, one line each.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite, _, _, value)| {
            let key = composite.key();
            let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let reading = match value {
                DebugValue::Counter(n) => n.to_string(),
                DebugValue::Gauge(g) => format!("{:.0}", g.into_inner()),
                DebugValue::Histogram(samples) if samples.is_empty() => "-".to_string(),
                DebugValue::Histogram(samples) => {
                    let total: f64 = samples.iter().map(|s| s.into_inner()).sum();
                    format!("n={} mean={:.1}ms", samples.len(), 1_000.0 * total / samples.len() as f64)
                }
            };
            format!("{}[{}] {}", key.name(), labels.join(" "), reading)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ nothing recorded");
    }
    for line in lines {
        println!("   └─ {line}");
    }
}
