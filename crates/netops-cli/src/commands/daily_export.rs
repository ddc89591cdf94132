use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use netops_core::export::{export_dir, zip_dir, ExportFactory};
use netops_core::inventory::{load_inventory, Device};
use netops_core::orchestrator::{empty_selection, run_many, sort_results, RunOptions};
use netops_core::progress::ProgressManager;
use netops_core::systems::SystemFamily;
use netops_core::transport::SessionOptions;
use netops_core::upload::UploadSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::AppContext;
use crate::ui::{log_detail, print_error, print_header, print_info, print_success, print_warning, results_table};

const UPLOAD_SUBDIR: &str = "Daily_Export_and_Hash_Logs";

#[derive(Parser, Debug)]
#[command(
    about = "Export the configuration of every MikroTik site",
    after_help = r#"Examples:
  netops daily-export --inventory sites.csv
  netops daily-export --inventory sites.csv --only "Oak Park,Pine Ridge" --no-upload
  netops daily-export --inventory sites.csv --keep
"#
)]
pub struct DailyExportArgs {
    /// 设备清单 CSV
    #[arg(short, long, value_name = "CSV")]
    pub inventory: PathBuf,

    /// 只导出这些物业（逗号分隔）
    #[arg(long, value_name = "NAMES")]
    pub only: Option<String>,

    /// 并发设备数，默认取配置中的 run.concurrency
    #[arg(short, long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// 不上传压缩包
    #[arg(long)]
    pub no_upload: bool,

    /// 上传后保留本地目录和压缩包
    #[arg(long)]
    pub keep: bool,
}

/// 启用的 MikroTik 设备，可按物业名进一步过滤
fn export_targets(devices: Vec<Device>, only: Option<&str>) -> Vec<Device> {
    let allow: Vec<&str> = only
        .map(|s| s.split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    devices
        .into_iter()
        .filter(|d| d.enabled)
        .filter(|d| matches!(d.family(), Ok(SystemFamily::Ettp)))
        .filter(|d| allow.is_empty() || allow.contains(&d.property.as_str()))
        .collect()
}

pub async fn run_daily_export(args: DailyExportArgs, ctx: &AppContext) -> Result<()> {
    let cfg = ctx.config.clone();
    let devices = load_inventory(&args.inventory)
        .with_context(|| format!("Failed to load inventory {}", args.inventory.display()))?;
    let devices = export_targets(devices, args.only.as_deref());
    if devices.is_empty() {
        return Err(empty_selection().into());
    }

    let today = Local::now().date_naive();
    let dir = export_dir(&cfg.output.export_dir, today);
    let concurrency = args.concurrency.unwrap_or(cfg.run.concurrency).max(1);
    print_header("Daily export");
    log_detail("devices", &devices.len().to_string());
    log_detail("directory", &dir.display().to_string());

    let progress = Arc::new(ProgressManager::from_multi(
        ctx.multi.clone(),
        concurrency,
        ctx.progress,
    ));
    let factory = Arc::new(ExportFactory::new(
        dir.clone(),
        today,
        SessionOptions::from_config(&cfg),
    ));
    let mut results = run_many(devices, factory, RunOptions::new(concurrency, progress)).await;
    sort_results(&mut results);

    println!("{}", results_table(&results));
    let failed = results.iter().filter(|r| r.is_error()).count();
    let ok = results.len() - failed;
    if failed == 0 {
        print_success(&format!("Completed: {} ok / {} total", ok, results.len()));
    } else {
        print_warning(&format!("Completed: {} ok / {} total", ok, results.len()));
    }

    let archive = zip_dir(&dir).with_context(|| format!("Failed to archive {}", dir.display()))?;
    print_success(&format!("Archive written: {}", archive.display()));

    let uploaded = if args.no_upload {
        false
    } else {
        match UploadSink::from_config(&cfg) {
            Some(sink) => {
                let report = sink.upload_files(UPLOAD_SUBDIR, std::slice::from_ref(&archive)).await;
                for (name, error) in &report.failed {
                    print_error(&format!("Upload of {} failed: {}", name, error));
                }
                if report.failed.is_empty() {
                    print_success(&format!("Uploaded {}", archive.display()));
                }
                report.failed.is_empty() && !report.uploaded.is_empty()
            }
            None => {
                print_info("Upload skipped (upload.host is not configured)");
                false
            }
        }
    };

    // 只有上传成功的输出才会被清理
    if uploaded && !args.keep {
        remove_outputs(&dir, &archive);
        print_info("Local exports removed (use --keep to retain them)");
    }
    Ok(())
}

/// 删除当天目录与压缩包，失败只告警
fn remove_outputs(dir: &Path, archive: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        print_warning(&format!("Could not remove {}: {}", dir.display(), e));
    }
    if let Err(e) = std::fs::remove_file(archive) {
        print_warning(&format!("Could not remove {}: {}", archive.display(), e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netops_core::transport::TransportKind;

    fn device(property: &str, system: &str, enabled: bool) -> Device {
        Device {
            property: property.to_string(),
            device: String::new(),
            mgmt_ip: "192.0.2.1".to_string(),
            system: system.to_string(),
            transport: TransportKind::Ssh,
            port: 22,
            roles: Vec::new(),
            user_env: "USER1".to_string(),
            pw_env: "PW1".to_string(),
            enabled,
            notes: String::new(),
            invalid: None,
        }
    }

    #[test]
    fn test_keep_flag() {
        let args = DailyExportArgs::try_parse_from(["daily-export", "-i", "sites.csv", "--keep"]).unwrap();
        assert!(args.keep);
        assert!(!args.no_upload);
    }

    #[test]
    fn test_remove_outputs() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("2025-03-09_Daily_Exports");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Oak_export_2025-03-09.txt"), "x").unwrap();
        let archive = zip_dir(&dir).unwrap();

        remove_outputs(&dir, &archive);
        assert!(!dir.exists());
        assert!(!archive.exists());
        // 已不存在时只告警
        remove_outputs(&dir, &archive);
    }

    #[test]
    fn test_export_targets() {
        let devices = vec![
            device("Oak", "MikroTik", true),
            device("Pine", "ETTP", true),
            device("Elm", "GPON", true),
            device("Ash", "ETTP", false),
        ];
        let all: Vec<String> = export_targets(devices.clone(), None)
            .into_iter()
            .map(|d| d.property)
            .collect();
        assert_eq!(all, vec!["Oak", "Pine"]);

        let only = export_targets(devices, Some(" Pine , Elm"));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].property, "Pine");
    }
}
