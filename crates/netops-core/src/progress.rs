//! 进度条池
//!
//! 池中有 N 个可复用的进度条（N = 并发数）和一个总进度条。
//! 槽位通过计数信号量领取，信号量直接产出被占用的进度条；`ProgressSlot` 释放时归还为 "Idle"。
//! 关闭进度显示时返回隐藏的进度条，调用方无需区分。

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const SLOT_TEMPLATE: &str = "{prefix:>24.bold} {msg:<6} [{bar:30.cyan/blue}] {pos}/{len}";
const OVERALL_TEMPLATE: &str = "{msg} [{bar:40.green/white}] {pos}/{len} ({elapsed_precise})";
const IDLE: &str = "Idle";

type Pool = Arc<Mutex<Vec<ProgressBar>>>;

/// 单台设备任务占用的进度条
pub struct ProgressSlot {
    bar: ProgressBar,
    pool: Option<Pool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ProgressSlot {
    /// 不显示任何内容的空槽位
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            pool: None,
            _permit: None,
        }
    }

    /// 设置左侧标签（通常为物业名）
    pub fn label(&self, label: &str) {
        self.bar.set_prefix(label.to_string());
    }

    /// 重置为新的上限和描述
    pub fn start(&self, total: u64, desc: &str) {
        self.bar.reset();
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_message(desc.to_string());
    }

    pub fn update(&self, n: u64) {
        self.bar.inc(n);
    }

    /// 直接拉满并附加结尾说明
    pub fn done(&self, tail: &str) {
        if let Some(len) = self.bar.length() {
            if self.bar.position() < len {
                self.bar.set_position(len);
            }
        }
        let msg = self.bar.message();
        if msg.is_empty() {
            self.bar.set_message(tail.to_string());
        } else {
            self.bar.set_message(format!("{} {}", msg, tail));
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }
}

impl Drop for ProgressSlot {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            self.bar.set_prefix("");
            self.bar.set_message(IDLE);
            self.bar.set_length(1);
            self.bar.set_position(1);
            // 先归还进度条，信号量许可随后在字段析构时释放
            pool.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(self.bar.clone());
        }
    }
}

pub struct ProgressManager {
    multi: MultiProgress,
    pool: Pool,
    permits: Arc<Semaphore>,
    overall: ProgressBar,
    enabled: bool,
}

impl ProgressManager {
    pub fn new(pool_size: usize, enabled: bool) -> Self {
        let target = if enabled {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self::with_draw_target(pool_size, enabled, target)
    }

    pub fn with_draw_target(pool_size: usize, enabled: bool, target: ProgressDrawTarget) -> Self {
        Self::from_multi(MultiProgress::with_draw_target(target), pool_size, enabled)
    }

    /// 挂到已有的 `MultiProgress` 上（日志 writer 与进度条共用同一个）
    pub fn from_multi(multi: MultiProgress, pool_size: usize, enabled: bool) -> Self {
        let pool_size = pool_size.max(1);
        let slot_style = ProgressStyle::with_template(SLOT_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bars: Vec<ProgressBar> = if enabled {
            (0..pool_size)
                .map(|_| {
                    let bar = multi.add(ProgressBar::new(1));
                    bar.set_style(slot_style.clone());
                    bar.set_message(IDLE);
                    bar.set_position(1);
                    bar
                })
                .collect()
        } else {
            Vec::new()
        };

        let overall = if enabled {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::with_template(OVERALL_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar.set_message("Processing properties");
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            multi,
            pool: Arc::new(Mutex::new(bars)),
            permits: Arc::new(Semaphore::new(pool_size)),
            overall,
            enabled,
        }
    }

    /// 供日志输出暂停进度条重绘
    pub fn multi(&self) -> MultiProgress {
        self.multi.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 领取一个空闲槽位；池满时等待其他任务释放
    pub async fn acquire(&self) -> ProgressSlot {
        if !self.enabled {
            return ProgressSlot::hidden();
        }
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return ProgressSlot::hidden();
        };
        let bar = self
            .pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        match bar {
            Some(bar) => {
                bar.set_message("Starting...");
                bar.set_length(0);
                bar.set_position(0);
                ProgressSlot {
                    bar,
                    pool: Some(self.pool.clone()),
                    _permit: Some(permit),
                }
            }
            None => ProgressSlot::hidden(),
        }
    }

    pub fn start_overall(&self, total: u64) {
        self.overall.set_length(total);
        self.overall.set_position(0);
    }

    pub fn inc_overall(&self) {
        self.overall.inc(1);
    }

    pub fn overall_position(&self) -> u64 {
        self.overall.position()
    }

    pub fn finish(&self) {
        self.overall.finish();
    }

    /// 当前空闲的槽位数
    pub fn idle_slots(&self) -> usize {
        self.pool.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
