use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use netops_core::config::NetopsConfig;
use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::compare::{run_compare, CompareArgs};
use crate::commands::daily_export::{run_daily_export, DailyExportArgs};
use crate::commands::mass_config::{run_mass_config, MassConfigArgs};
use crate::commands::pw_gen::{run_pw_gen, PwGenArgs};
use crate::commands::speed_audit::{run_speed_audit, SpeedAuditArgs};

#[derive(Parser, Debug)]
#[command(
    name = "netops",
    author,
    version,
    about = "Speed audits, daily exports and snapshot comparison for managed network properties",
    long_about = None,
    after_help = r#"Examples:
  # Audit every enabled GPON and CMTS site, 8 devices at a time
  netops speed-audit --inventory sites.csv --system GPON --system CMTS --concurrency 8

  # Pick sites interactively and skip the upload
  netops speed-audit --inventory sites.csv --select --no-upload

  # Export MikroTik configurations
  netops daily-export --inventory sites.csv

  # Render a RouterOS script for every edge router and apply it
  netops mass-config --mode run --inventory sites.csv --role edge --template dns.rsc --run-level apply

  # Compare two archived snapshots
  netops compare --snapshot-dir ./snapshots --prev-date 2025-10-01 --curr-date 2025-11-01
  netops compare --prev old.csv --curr new.csv --output changes.xlsx

  # Generate passwords
  netops pw-gen --length 20 --count 5 --digits 1-9

Credentials are read from the environment variables named in the inventory.
Config: netops.toml in the working directory, or --config; NETOPS__SECTION__KEY overrides."#
)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// 日志级别（trace|debug|info|warn|error）
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// 额外写入的日志文件
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// 关闭进度条
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// 只输出警告和错误
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// 采集各物业的速率与设备状态，生成审计工作簿和快照
    SpeedAudit(SpeedAuditArgs),
    /// 导出 MikroTik 设备配置
    DailyExport(DailyExportArgs),
    /// 向 MikroTik 批量下发 RouterOS 脚本
    MassConfig(MassConfigArgs),
    /// 对比两次速率快照
    Compare(CompareArgs),
    /// 生成随机密码
    PwGen(PwGenArgs),
}

/// 命令共享的运行环境
pub struct AppContext {
    pub config: Arc<NetopsConfig>,
    pub multi: MultiProgress,
    pub progress: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    pub fn apply_overrides(&self, cfg: &mut NetopsConfig) {
        if let Some(level) = &self.log_level {
            cfg.telemetry.log_level = level.clone();
        }
        if let Some(file) = &self.log_file {
            cfg.telemetry.log_file = Some(file.clone());
        }
        if self.quiet {
            cfg.telemetry.log_level = "warn".to_string();
        }
        if self.no_progress || self.quiet {
            cfg.run.progress = false;
        }
    }
}

pub async fn run(command: Commands, ctx: &AppContext) -> Result<()> {
    match command {
        Commands::SpeedAudit(args) => run_speed_audit(args, ctx).await?,
        Commands::DailyExport(args) => run_daily_export(args, ctx).await?,
        Commands::MassConfig(args) => run_mass_config(args, ctx).await?,
        Commands::Compare(args) => run_compare(args)?,
        Commands::PwGen(args) => run_pw_gen(args)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "netops",
            "speed-audit",
            "--inventory",
            "sites.csv",
            "--quiet",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let mut cfg = NetopsConfig::default();
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.telemetry.log_level, "warn");
        assert!(!cfg.run.progress);
        assert!(matches!(cli.command, Commands::SpeedAudit(_)));
    }

    #[test]
    fn test_log_file_override() {
        let cli = Cli::try_parse_from(["netops", "--log-file", "run.log", "pw-gen"]).unwrap();
        let mut cfg = NetopsConfig::default();
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.telemetry.log_file, Some(PathBuf::from("run.log")));
        assert!(cfg.run.progress);
    }

    #[test]
    fn test_mass_config_subcommand() {
        let cli = Cli::try_parse_from([
            "netops",
            "mass-config",
            "--mode",
            "build",
            "--devices-csv",
            "d.csv",
            "--template",
            "t.rsc",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::MassConfig(_)));
    }
}
