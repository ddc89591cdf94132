//! tracing 初始化
//!
//! 终端输出经由 `MultiProgress::suspend` 写出，避免日志行撕裂正在刷新的进度条。

use indicatif::MultiProgress;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use time::UtcOffset;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::TelemetryConfig;

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: String,  // trace|debug|info|warn|error
    pub format: String, // text|json
    pub no_ansi: bool,
    pub file: Option<PathBuf>,
}

impl From<&TelemetryConfig> for LogConfig {
    fn from(cfg: &TelemetryConfig) -> Self {
        Self {
            level: cfg.log_level.clone(),
            format: cfg.log_format.clone(),
            no_ansi: cfg.log_no_ansi,
            file: cfg.log_file.clone(),
        }
    }
}

/// 经由进度条暂停后再写 stderr 的 writer
pub struct ProgressAwareWriter {
    multi: Option<MultiProgress>,
}

impl Write for ProgressAwareWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.multi {
            Some(multi) => multi.suspend(|| io::stderr().write_all(buf))?,
            None => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// 使用提供的配置初始化 tracing；`RUST_LOG` 优先于配置中的级别
pub fn init_tracing_with(cfg: &LogConfig, multi: Option<MultiProgress>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.to_ascii_lowercase()));

    let base = fmt::layer()
        .with_target(false)
        .with_ansi(!cfg.no_ansi)
        .with_writer(move || ProgressAwareWriter {
            multi: multi.clone(),
        });
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let fmt_layer = if cfg.format.eq_ignore_ascii_case("json") {
        base.json().boxed()
    } else {
        base.with_timer(fmt::time::OffsetTime::new(
            offset,
            time::format_description::well_known::Rfc3339,
        ))
        .boxed()
    };

    // 文件层：纯文本、无 ANSI，追加写入
    let file_layer = match &cfg.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_timer(fmt::time::OffsetTime::new(
                        offset,
                        time::format_description::well_known::Rfc3339,
                    ))
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}
