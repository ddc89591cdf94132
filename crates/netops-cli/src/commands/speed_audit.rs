use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use netops_core::inventory::{
    load_inventory, parse_selection, select, split_role_args, Device, DeviceFilter,
};
use netops_core::orchestrator::{run_many, sort_results, RunOptions};
use netops_core::progress::ProgressManager;
use netops_core::report::{snapshot_path, write_snapshot, write_workbook};
use netops_core::systems::DefaultSystemFactory;
use netops_core::upload::UploadSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::AppContext;
use crate::ui::{
    confirm_action, log_detail, print_error, print_header, print_info, print_success,
    print_warning, prompt_line, results_table,
};

/// 上传到文件服务器时的子目录
const UPLOAD_SUBDIR: &str = "Monthly_Speed_Audit";

#[derive(Parser, Debug)]
#[command(
    about = "Collect speed and status for every selected property",
    after_help = r#"Examples:
  netops speed-audit --inventory sites.csv
  netops speed-audit --inventory sites.csv --system GPON --role residential
  netops speed-audit --inventory sites.csv --role core,edge --exclude-role lab
  netops speed-audit --inventory sites.csv --select --concurrency 4 --no-upload
"#
)]
pub struct SpeedAuditArgs {
    /// 设备清单 CSV
    #[arg(short, long, value_name = "CSV")]
    pub inventory: PathBuf,

    /// 只运行这些系统家族（可重复）
    #[arg(long = "system", value_name = "FAMILY", action = clap::ArgAction::Append)]
    pub systems: Vec<String>,

    /// 只运行带有任一角色的设备（可重复或逗号分隔）
    #[arg(long = "role", value_name = "ROLE", action = clap::ArgAction::Append)]
    pub roles: Vec<String>,

    /// 跳过带有任一角色的设备，优先于 --role
    #[arg(long = "exclude-role", value_name = "ROLE", action = clap::ArgAction::Append)]
    pub exclude_roles: Vec<String>,

    /// 包含 Enabled 为否的设备
    #[arg(long)]
    pub include_disabled: bool,

    /// 并发设备数，默认取配置中的 run.concurrency
    #[arg(short, long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// 运行前交互式挑选设备
    #[arg(long)]
    pub select: bool,

    /// 不上传生成的工作簿
    #[arg(long)]
    pub no_upload: bool,
}

pub fn workbook_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}_Speed_Audit.xlsx", date.format("%Y_%m_%d")))
}

pub(crate) fn choose_devices(devices: Vec<Device>) -> Result<Vec<Device>> {
    print_header("Devices");
    for (i, d) in devices.iter().enumerate() {
        println!("  {:>3}. {:<32} {:<6} {}", i + 1, d.property, d.system, d.mgmt_ip);
    }
    let expr = prompt_line("Select devices (e.g. 1,3,5-8; empty for all)");
    if expr.trim().is_empty() {
        return Ok(devices);
    }
    let picked = parse_selection(&expr, devices.len())?;
    Ok(picked.into_iter().map(|i| devices[i].clone()).collect())
}

pub async fn run_speed_audit(args: SpeedAuditArgs, ctx: &AppContext) -> Result<()> {
    let cfg = ctx.config.clone();
    let devices = load_inventory(&args.inventory)
        .with_context(|| format!("Failed to load inventory {}", args.inventory.display()))?;
    let filter = DeviceFilter {
        systems: args.systems.clone(),
        include_roles: split_role_args(&args.roles),
        exclude_roles: split_role_args(&args.exclude_roles),
        enabled_only: !args.include_disabled,
    };
    let mut devices = select(&devices, &filter);
    if args.select && !devices.is_empty() {
        devices = choose_devices(devices)?;
        if !confirm_action(&format!("Run speed audit on {} device(s)?", devices.len())) {
            print_warning("Cancelled");
            return Ok(());
        }
    }
    if devices.is_empty() {
        return Err(netops_core::orchestrator::empty_selection().into());
    }

    let concurrency = args.concurrency.unwrap_or(cfg.run.concurrency).max(1);
    print_header("Speed audit");
    log_detail("devices", &devices.len().to_string());
    log_detail("concurrency", &concurrency.to_string());

    let progress = Arc::new(ProgressManager::from_multi(
        ctx.multi.clone(),
        concurrency,
        ctx.progress,
    ));
    let factory = Arc::new(DefaultSystemFactory::new(cfg.clone()));
    let mut results = run_many(devices, factory, RunOptions::new(concurrency, progress)).await;
    sort_results(&mut results);

    println!("{}", results_table(&results));
    let failed = results.iter().filter(|r| r.is_error()).count();
    if failed > 0 {
        print_warning(&format!("{} of {} device(s) failed", failed, results.len()));
    }

    let today = Local::now().date_naive();
    let workbook = workbook_path(&cfg.output.dir, today);
    write_workbook(&workbook, &results)?;
    print_success(&format!("Workbook written: {}", workbook.display()));

    let snapshot = snapshot_path(&cfg.output.snapshot_dir, today);
    let rows = write_snapshot(&snapshot, &results)?;
    print_success(&format!("Snapshot written: {} ({} rows)", snapshot.display(), rows));

    if args.no_upload {
        return Ok(());
    }
    match UploadSink::from_config(&cfg) {
        Some(sink) => {
            let report = sink.upload_files(UPLOAD_SUBDIR, &[workbook]).await;
            for name in &report.uploaded {
                print_success(&format!("Uploaded {}", name));
            }
            for (name, error) in &report.failed {
                print_error(&format!("Upload of {} failed: {}", name, error));
            }
        }
        None => print_info("Upload skipped (upload.host is not configured)"),
    }
    Ok(())
}
