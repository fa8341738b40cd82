// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic crm-data usage example.
//!
//! Demonstrates, against the in-process store:
//! 1. Creating leads (sanitization, defaults, validation failure)
//! 2. Cached reads and list queries
//! 3. Optimistic locking on update
//! 4. A real-time listener
//! 5. Health check and captured metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use crm_data::query::QueryOptions;
use crm_data::storage::InMemoryStore;
use crm_data::{CrmDataConfig, DataError, DataManager, GetOptions, WriteOptions};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              crm-data: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Create leads
    // ─────────────────────────────────────────────────────────────────────────
    let manager = DataManager::new(CrmDataConfig::default(), Arc::new(InMemoryStore::new()));

    let data = json!({"name": "<script>alert(1)</script>John", "phone": "+971 50 123 4567"});
    let john = manager
        .create("leads", data.as_object().cloned().unwrap_or_default(), WriteOptions::new())
        .await?;
    println!("✅ Created {} name={:?} status={:?}", john.id, john.str_field("name"), john.str_field("status"));

    let bad = json!({"name": "Sara Haddad", "phone": "abc"});
    match manager
        .create("leads", bad.as_object().cloned().unwrap_or_default(), WriteOptions::new())
        .await
    {
        Err(DataError::Validation(e)) => println!("🚫 Rejected: {}", e),
        other => println!("⚠️  Unexpected: {:?}", other),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Reads
    // ─────────────────────────────────────────────────────────────────────────
    manager.get("leads", Some(&john.id), GetOptions::new()).await?;
    manager.get("leads", Some(&john.id), GetOptions::new()).await?;
    let stats = manager.cache().stats();
    println!("📖 Cache: hits={} misses={} entries={}", stats.hits, stats.misses, stats.entry_count);

    let new_leads = manager
        .list("leads", GetOptions::new().query(QueryOptions::new().where_eq("status", "newLead")))
        .await?;
    println!("📋 New leads: {}", new_leads.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Optimistic locking
    // ─────────────────────────────────────────────────────────────────────────
    let contacted = json!({"status": "contacted"});
    let updated = manager
        .update(
            "leads",
            &john.id,
            contacted.as_object().cloned().unwrap_or_default(),
            WriteOptions::new().expected_version(john.version),
        )
        .await?;
    println!("✏️  Updated to version {}", updated.version);

    let stale = manager
        .update(
            "leads",
            &john.id,
            contacted.as_object().cloned().unwrap_or_default(),
            WriteOptions::new().expected_version(john.version),
        )
        .await;
    if let Err(e) = stale {
        println!("🔒 Stale write refused: {}", e);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Real-time listener
    // ─────────────────────────────────────────────────────────────────────────
    let listener = manager
        .subscribe("leads", QueryOptions::new(), |snapshot| {
            println!("🔔 Snapshot: {} documents, {} changes", snapshot.len(), snapshot.changes.len());
        })
        .await?;
    let omar = json!({"name": "Omar Khalil", "phone": "0501112233"});
    manager
        .create("leads", omar.as_object().cloned().unwrap_or_default(), WriteOptions::new())
        .await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    manager.unsubscribe(&listener);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Health and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let health = manager.health_check().await;
    println!("\n🩺 Health: {}", serde_json::to_string_pretty(&health)?);

    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    manager.shutdown().await;
    println!("\n👋 Done");
    Ok(())
}

/// Print every captured metric, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, samples.len(), sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, value) in &counters {
        println!("   counter   {} = {}", name, value);
    }
    for (name, value) in &gauges {
        println!("   gauge     {} = {:.2}", name, value);
    }
    for (name, count, sum) in &histograms {
        println!("   histogram {} count={} sum={:.4}", name, count, sum);
    }
}
