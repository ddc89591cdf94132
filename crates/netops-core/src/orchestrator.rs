//! 有界并发的设备扇出
//!
//! 每台设备一个 tokio 任务：先拿并发许可，再领进度槽位，随后在任务内构造采集器并执行。
//! 结果按完成顺序收集；任何失败（包括任务 panic）都替换为单行错误表，保证一台设备恰好一条结果。

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{NetopsError, Result};
use crate::inventory::Device;
use crate::mass_config::ConfigPlan;
use crate::progress::{ProgressManager, ProgressSlot};
use crate::systems::{ResultTable, SystemFactory};

/// 调用采集器的读路径或写路径
#[derive(Debug, Clone)]
pub enum RunMode {
    GetInfo,
    /// 每台设备的脚本在任务内按计划渲染
    SetConfig(Arc<ConfigPlan>),
}

#[derive(Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub mode: RunMode,
    pub progress: Arc<ProgressManager>,
}

impl RunOptions {
    pub fn new(concurrency: usize, progress: Arc<ProgressManager>) -> Self {
        Self {
            concurrency,
            mode: RunMode::GetInfo,
            progress,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }
}

/// 单台设备的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub property: String,
    pub system: String,
    pub table: ResultTable,
}

impl RunResult {
    fn failed(property: &str, system: &str, error: &str) -> Self {
        Self {
            property: property.to_string(),
            system: system.to_string(),
            table: ResultTable::error_placeholder(property, system, error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.table.is_error()
    }
}

/// 对全部设备执行一次采集，返回完成顺序的结果
pub async fn run_many(
    devices: Vec<Device>,
    factory: Arc<dyn SystemFactory>,
    options: RunOptions,
) -> Vec<RunResult> {
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let progress = options.progress.clone();
    progress.start_overall(devices.len() as u64);
    tracing::info!(
        devices = devices.len(),
        concurrency = options.concurrency,
        "Starting device run"
    );

    let mut tasks = FuturesUnordered::new();
    for device in devices {
        let property = device.property.clone();
        let system = device.system.clone();
        let handle = tokio::spawn(run_device(
            device,
            factory.clone(),
            semaphore.clone(),
            progress.clone(),
            options.mode.clone(),
        ));
        tasks.push(async move { (property, system, handle.await) });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some((property, system, joined)) = tasks.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(property = %property, system = %system, error = %e, "Device task aborted");
                RunResult::failed(&property, &system, &format!("task aborted: {}", e))
            }
        };
        progress.inc_overall();
        results.push(result);
    }
    progress.finish();

    let failed = results.iter().filter(|r| r.is_error()).count();
    tracing::info!(total = results.len(), failed, "Device run finished");
    results
}

async fn run_device(
    device: Device,
    factory: Arc<dyn SystemFactory>,
    semaphore: Arc<Semaphore>,
    progress: Arc<ProgressManager>,
    mode: RunMode,
) -> RunResult {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            return RunResult::failed(&device.property, &device.system, &e.to_string());
        }
    };
    let slot = progress.acquire().await;
    slot.label(&device.property);

    match collect(&device, factory.as_ref(), &slot, &mode).await {
        Ok(table) => {
            slot.done("Done");
            tracing::debug!(property = %device.property, rows = table.rows.len(), "Device finished");
            RunResult {
                property: device.property,
                system: device.system,
                table,
            }
        }
        Err(e) => {
            slot.done("Error");
            tracing::warn!(property = %device.property, system = %device.system, error = %e, "Device failed");
            RunResult::failed(&device.property, &device.system, &e.to_string())
        }
    }
}

async fn collect(
    device: &Device,
    factory: &dyn SystemFactory,
    slot: &ProgressSlot,
    mode: &RunMode,
) -> Result<ResultTable> {
    device.check_valid()?;
    let payload = match mode {
        RunMode::GetInfo => None,
        RunMode::SetConfig(plan) => Some(plan.payload_for(device)?),
    };
    let mut system = factory.build(device)?;
    let outcome = match &payload {
        None => system.get_info(slot).await,
        Some(payload) => system.set_config(payload, slot).await,
    };
    system.close().await;
    outcome
}

/// 按物业名（忽略大小写）稳定排序
pub fn sort_results(results: &mut [RunResult]) {
    results.sort_by_cached_key(|r| r.property.to_lowercase());
}

/// 无设备可运行时的提示错误
pub fn empty_selection() -> NetopsError {
    NetopsError::inventory("no devices matched the selection")
}
