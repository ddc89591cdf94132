use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use netops_core::inventory::{load_inventory, select, split_role_args, Device, DeviceFilter};
use netops_core::mass_config::{
    build_plans, read_devices_csv, write_devices_csv, BuildTarget, ConfigPlan, RunLevel,
};
use netops_core::orchestrator::{empty_selection, run_many, sort_results, RunMode, RunOptions};
use netops_core::progress::ProgressManager;
use netops_core::systems::DefaultSystemFactory;
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::AppContext;
use crate::commands::speed_audit::choose_devices;
use crate::ui::{
    confirm_action, log_detail, print_header, print_success, print_warning, results_table,
};

/// 未指定 --system 时只面向 MikroTik
const DEFAULT_SYSTEM: &str = "ETTP";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MassConfigMode {
    /// 写出筛选后的设备 CSV
    Collect,
    /// 按设备 CSV 渲染模板
    Build,
    /// 连接设备并按 run level 下发
    Run,
}

#[derive(Parser, Debug)]
#[command(
    about = "Render and push a RouterOS script to many MikroTik routers",
    after_help = r#"Examples:
  netops mass-config --mode collect -i sites.csv --role edge --exclude-role lab
  netops mass-config --mode build --devices-csv mass_config_devices.csv --template dns.rsc --plan-dir plans
  netops mass-config --mode run -i sites.csv --template dns.rsc --run-level dry-run
  netops mass-config --mode run -i sites.csv --plan-dir plans --run-level apply --yes

Template placeholders: {site} or {{ site }}; columns from --devices-csv override inventory fields."#
)]
pub struct MassConfigArgs {
    #[arg(long, value_enum, default_value_t = MassConfigMode::Run)]
    pub mode: MassConfigMode,

    /// 设备清单 CSV（collect 与 run 模式）
    #[arg(short, long, value_name = "CSV")]
    pub inventory: Option<PathBuf>,

    /// 系统家族（可重复），默认 ETTP
    #[arg(long = "system", value_name = "FAMILY", action = clap::ArgAction::Append)]
    pub systems: Vec<String>,

    /// 只包含带有任一角色的设备（可重复或逗号分隔）
    #[arg(long = "role", value_name = "ROLE", action = clap::ArgAction::Append)]
    pub roles: Vec<String>,

    /// 排除带有任一角色的设备，优先于 --role
    #[arg(long = "exclude-role", value_name = "ROLE", action = clap::ArgAction::Append)]
    pub exclude_roles: Vec<String>,

    /// 包含 Enabled 为否的设备
    #[arg(long)]
    pub include_disabled: bool,

    /// build 的输入；run 时按 site 列提供额外变量
    #[arg(long, value_name = "CSV")]
    pub devices_csv: Option<PathBuf>,

    /// collect 的输出
    #[arg(long, value_name = "CSV", default_value = "mass_config_devices.csv")]
    pub output_csv: PathBuf,

    /// RouterOS 脚本模板
    #[arg(long, value_name = "RSC")]
    pub template: Option<PathBuf>,

    /// build 写入 / run 读取 `{site}.rsc` 的目录
    #[arg(long, value_name = "DIR")]
    pub plan_dir: Option<PathBuf>,

    /// build 时把全部渲染结果合并到一个文件
    #[arg(long, value_name = "RSC", conflicts_with = "plan_dir")]
    pub single_output: Option<PathBuf>,

    /// dry-run | upload | apply
    #[arg(long, value_name = "LEVEL", default_value = "dry-run")]
    pub run_level: RunLevel,

    /// 导入后保留设备上的脚本文件
    #[arg(long)]
    pub keep_remote_file: bool,

    /// 并发设备数，默认取配置中的 run.concurrency
    #[arg(short, long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// 运行前交互式挑选设备
    #[arg(long)]
    pub select: bool,

    /// apply 时不再确认
    #[arg(short, long)]
    pub yes: bool,
}

impl MassConfigArgs {
    pub fn device_filter(&self) -> DeviceFilter {
        let systems = if self.systems.is_empty() {
            vec![DEFAULT_SYSTEM.to_string()]
        } else {
            self.systems.clone()
        };
        DeviceFilter {
            systems,
            include_roles: split_role_args(&self.roles),
            exclude_roles: split_role_args(&self.exclude_roles),
            enabled_only: !self.include_disabled,
        }
    }

    fn template_text(&self) -> Result<Option<String>> {
        self.template
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read template {}", path.display()))
            })
            .transpose()
    }
}

fn filtered_devices(args: &MassConfigArgs) -> Result<Vec<Device>> {
    let Some(inventory) = &args.inventory else {
        bail!("--inventory is required for {:?} mode", args.mode);
    };
    let devices = load_inventory(inventory)
        .with_context(|| format!("Failed to load inventory {}", inventory.display()))?;
    Ok(select(&devices, &args.device_filter()))
}

pub fn run_collect(args: &MassConfigArgs) -> Result<usize> {
    let devices = filtered_devices(args)?;
    let rows = write_devices_csv(&args.output_csv, &devices)?;
    print_success(&format!("Wrote {} device(s) to {}", rows, args.output_csv.display()));
    Ok(rows)
}

pub fn run_build(args: &MassConfigArgs) -> Result<Vec<PathBuf>> {
    let Some(csv) = &args.devices_csv else {
        bail!("--devices-csv is required for build mode");
    };
    let Some(template) = args.template_text()? else {
        bail!("--template is required for build mode");
    };
    let rows = read_devices_csv(csv)?;
    let default_dir = PathBuf::from("mass_config_plans");
    let target = match (&args.single_output, &args.plan_dir) {
        (Some(single), _) => BuildTarget::Single(single),
        (None, Some(dir)) => BuildTarget::PlanDir(dir),
        (None, None) => BuildTarget::PlanDir(&default_dir),
    };
    let files = build_plans(&rows, &template, target)?;
    print_success(&format!("Built {} plan file(s)", files.len()));
    Ok(files)
}

fn config_plan(args: &MassConfigArgs) -> Result<ConfigPlan> {
    let template = args.template_text()?;
    if template.is_none() && args.plan_dir.is_none() {
        bail!("run mode needs --template or --plan-dir");
    }
    let mut plan = ConfigPlan::new(template.unwrap_or_default(), args.run_level)
        .keep_remote_file(args.keep_remote_file);
    if let Some(csv) = &args.devices_csv {
        plan = plan.with_rows(read_devices_csv(csv)?);
    }
    if let Some(dir) = &args.plan_dir {
        plan = plan.with_plan_dir(dir.clone());
    }
    Ok(plan)
}

async fn run_push(args: MassConfigArgs, ctx: &AppContext) -> Result<()> {
    let cfg = ctx.config.clone();
    let plan = config_plan(&args)?;
    let mut devices = filtered_devices(&args)?;
    if args.select && !devices.is_empty() {
        devices = choose_devices(devices)?;
    }
    if devices.is_empty() {
        return Err(empty_selection().into());
    }
    if args.run_level == RunLevel::Apply
        && !args.yes
        && !confirm_action(&format!("Apply configuration to {} device(s)?", devices.len()))
    {
        print_warning("Cancelled");
        return Ok(());
    }

    let concurrency = args.concurrency.unwrap_or(cfg.run.concurrency).max(1);
    print_header("Mass config");
    log_detail("devices", &devices.len().to_string());
    log_detail("run level", args.run_level.as_str());
    log_detail("concurrency", &concurrency.to_string());

    let progress = Arc::new(ProgressManager::from_multi(
        ctx.multi.clone(),
        concurrency,
        ctx.progress,
    ));
    let factory = Arc::new(DefaultSystemFactory::new(cfg).without_modems());
    let options = RunOptions::new(concurrency, progress).with_mode(RunMode::SetConfig(Arc::new(plan)));
    let mut results = run_many(devices, factory, options).await;
    sort_results(&mut results);
    println!("{}", results_table(&results));

    let failed = results.iter().filter(|r| r.is_error()).count();
    if failed > 0 {
        bail!("{} of {} device(s) failed", failed, results.len());
    }
    print_success(&format!("{} device(s) finished at {}", results.len(), args.run_level));
    Ok(())
}

pub async fn run_mass_config(args: MassConfigArgs, ctx: &AppContext) -> Result<()> {
    match args.mode {
        MassConfigMode::Collect => run_collect(&args).map(|_| ()),
        MassConfigMode::Build => run_build(&args).map(|_| ()),
        MassConfigMode::Run => run_push(args, ctx).await,
    }
}
