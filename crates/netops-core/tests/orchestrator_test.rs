use async_trait::async_trait;
use netops_core::inventory::Device;
use netops_core::orchestrator::{run_many, sort_results, RunOptions};
use netops_core::progress::{ProgressManager, ProgressSlot};
use netops_core::systems::{ResultTable, System, SystemFactory, INFO_HEADER};
use netops_core::transport::TransportKind;
use netops_core::{NetopsError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn device(property: &str) -> Device {
    Device {
        property: property.to_string(),
        device: String::new(),
        mgmt_ip: "192.0.2.1".to_string(),
        system: "GPON".to_string(),
        transport: TransportKind::Telnet,
        port: 23,
        roles: Vec::new(),
        user_env: "USER1".to_string(),
        pw_env: "PW1".to_string(),
        enabled: true,
        notes: String::new(),
        invalid: None,
    }
}

/// 记录同时处于会话中的任务数
#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicUsize,
}

struct SlowSystem {
    property: String,
    gauge: Arc<Gauge>,
    delay: Duration,
}

#[async_trait]
impl System for SlowSystem {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable> {
        let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        progress.start(2, "TEST");
        tokio::time::sleep(self.delay).await;
        progress.update(2);
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);

        if self.property.starts_with("bad") {
            return Err(NetopsError::discovery("cannot list slots"));
        }
        let mut table = ResultTable::new(INFO_HEADER);
        if !self.property.starts_with("empty") {
            table.push([self.property.as_str(), "aa", "50 Mbps", "Active"]);
        }
        Ok(table)
    }

    async fn close(&mut self) {
        self.gauge.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct SlowFactory {
    gauge: Arc<Gauge>,
}

impl SystemFactory for SlowFactory {
    fn build(&self, device: &Device) -> Result<Box<dyn System>> {
        let delay = Duration::from_millis(5 + (device.property.len() as u64 % 4) * 5);
        Ok(Box::new(SlowSystem {
            property: device.property.clone(),
            gauge: self.gauge.clone(),
            delay,
        }))
    }
}

fn options(concurrency: usize) -> RunOptions {
    RunOptions::new(concurrency, Arc::new(ProgressManager::new(concurrency, false)))
}

#[tokio::test]
async fn test_concurrency_never_exceeds_bound() {
    let gauge = Arc::new(Gauge::default());
    let devices: Vec<Device> = (0..20).map(|i| device(&format!("site{}", i))).collect();
    let factory = Arc::new(SlowFactory { gauge: gauge.clone() });

    let results = run_many(devices, factory, options(3)).await;

    assert_eq!(results.len(), 20);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(gauge.closed.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn test_every_device_has_exactly_one_entry() {
    let gauge = Arc::new(Gauge::default());
    let names = ["Oak", "bad-pine", "empty-elm", "birch", "bad-ash", "Cedar"];
    let devices: Vec<Device> = names.iter().map(|n| device(n)).collect();
    let factory = Arc::new(SlowFactory { gauge: gauge.clone() });

    let mut results = run_many(devices, factory, options(2)).await;
    sort_results(&mut results);

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for r in &results {
        *seen.entry(r.property.as_str()).or_default() += 1;
    }
    assert_eq!(seen.len(), names.len());
    assert!(seen.values().all(|&n| n == 1));

    let order: Vec<&str> = results.iter().map(|r| r.property.as_str()).collect();
    assert_eq!(order, vec!["bad-ash", "bad-pine", "birch", "Cedar", "empty-elm", "Oak"]);

    let bad = results.iter().find(|r| r.property == "bad-pine").unwrap();
    assert_eq!(bad.table.header, vec!["Property", "System", "Status"]);
    assert_eq!(bad.table.rows.len(), 1);
    assert!(bad.table.rows[0][2].contains("Error:"));

    let empty = results.iter().find(|r| r.property == "empty-elm").unwrap();
    assert!(empty.table.rows.is_empty());
    assert_eq!(empty.table.header.len(), 4);
}

#[tokio::test]
async fn test_overall_progress_counts_devices() {
    let gauge = Arc::new(Gauge::default());
    let progress = Arc::new(ProgressManager::with_draw_target(
        2,
        true,
        indicatif::ProgressDrawTarget::hidden(),
    ));
    let opts = RunOptions::new(2, progress.clone());
    let devices: Vec<Device> = (0..5).map(|i| device(&format!("p{}", i))).collect();
    run_many(devices, Arc::new(SlowFactory { gauge }), opts).await;
    assert_eq!(progress.overall_position(), 5);
    assert_eq!(progress.idle_slots(), 2);
}
