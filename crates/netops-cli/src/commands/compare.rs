use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use netops_core::report::compare::CHANGE_KINDS;
use netops_core::report::{
    compare_snapshots, load_snapshot, snapshot_path, summarize, write_comparison_workbook,
};
use std::path::{Path, PathBuf};

use crate::ui::{key_value_table, print_header, print_info, print_success};

#[derive(Parser, Debug)]
#[command(
    about = "Compare two speed snapshots and write a change workbook",
    after_help = r#"Examples:
  netops compare --prev ./snapshots/speed_snapshot_2025-10-01.csv --curr ./snapshots/speed_snapshot_2025-11-01.csv
  netops compare --snapshot-dir ./snapshots --prev-date 2025-10-01 --curr-date 2025-11-01 --output report.xlsx
"#
)]
pub struct CompareArgs {
    /// 上一次的快照
    #[arg(long, value_name = "CSV")]
    pub prev: Option<PathBuf>,

    /// 本次的快照
    #[arg(long, value_name = "CSV")]
    pub curr: Option<PathBuf>,

    /// 快照目录，与 --prev-date / --curr-date 配合使用
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// 上一次快照的日期（YYYY-MM-DD）
    #[arg(long, value_name = "DATE")]
    pub prev_date: Option<NaiveDate>,

    /// 本次快照的日期（YYYY-MM-DD）
    #[arg(long, value_name = "DATE")]
    pub curr_date: Option<NaiveDate>,

    /// 输出工作簿，默认写在本次快照旁边
    #[arg(short, long, value_name = "XLSX")]
    pub output: Option<PathBuf>,
}

/// 显式路径优先，否则由快照目录和日期拼出
fn resolve(explicit: Option<PathBuf>, dir: Option<&Path>, date: Option<NaiveDate>) -> Option<PathBuf> {
    explicit.or_else(|| Some(snapshot_path(dir?, date?)))
}

pub fn default_output(curr: &Path) -> PathBuf {
    let stem = curr
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "current".to_string());
    let parent = curr.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("Report_Speed_Comparison_{}.xlsx", stem))
}

pub fn run_compare(args: CompareArgs) -> Result<()> {
    let dir = args.snapshot_dir.as_deref();
    let (Some(prev_path), Some(curr_path)) = (
        resolve(args.prev, dir, args.prev_date),
        resolve(args.curr, dir, args.curr_date),
    ) else {
        bail!("Specify either --prev and --curr, or --snapshot-dir with --prev-date and --curr-date");
    };

    print_header("Snapshot comparison");
    print_info(&format!("Previous: {}", prev_path.display()));
    print_info(&format!("Current:  {}", curr_path.display()));
    let prev = load_snapshot(&prev_path)
        .with_context(|| format!("Failed to load {}", prev_path.display()))?;
    let curr = load_snapshot(&curr_path)
        .with_context(|| format!("Failed to load {}", curr_path.display()))?;

    let changes = compare_snapshots(&prev, &curr);
    let summary = summarize(&changes, &curr);

    let mut rows = vec![(
        "Total Active Identities (Current)".to_string(),
        summary.total_active.to_string(),
    )];
    rows.extend(
        CHANGE_KINDS
            .iter()
            .zip(summary.global)
            .map(|((label, _), count)| (label.to_string(), count.to_string())),
    );
    println!("{}", key_value_table(["METRIC", "COUNT"], &rows));

    let label = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let output = args.output.unwrap_or_else(|| default_output(&curr_path));
    write_comparison_workbook(&output, &changes, &summary, &label(&prev_path), &label(&curr_path))?;
    print_success(&format!(
        "{} change(s) written to {}",
        changes.len(),
        output.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_paths() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        assert_eq!(
            resolve(None, Some(Path::new("snaps")), Some(date)),
            Some(PathBuf::from("snaps/speed_snapshot_2025-10-01.csv"))
        );
        assert_eq!(
            resolve(Some(PathBuf::from("a.csv")), None, None),
            Some(PathBuf::from("a.csv"))
        );
        assert_eq!(resolve(None, None, Some(date)), None);
    }

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("snaps/speed_snapshot_2025-11-01.csv")),
            PathBuf::from("snaps/Report_Speed_Comparison_speed_snapshot_2025-11-01.xlsx")
        );
    }

    #[test]
    fn test_missing_inputs_rejected() {
        let args = CompareArgs {
            prev: Some(PathBuf::from("a.csv")),
            curr: None,
            snapshot_dir: None,
            prev_date: None,
            curr_date: None,
            output: None,
        };
        assert!(run_compare(args).is_err());
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let header = "Property,System,Identity,Mac/Serial,Speed,Status,Notes\n";
        std::fs::write(
            dir.path().join("speed_snapshot_2025-10-01.csv"),
            format!("{}Oak,GPON,U1,aa,50 Mbps,Active,\n", header),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("speed_snapshot_2025-11-01.csv"),
            format!("{}Oak,GPON,U1,aa,100 Mbps,Active,\n", header),
        )
        .unwrap();
        let args = CompareArgs {
            prev: None,
            curr: None,
            snapshot_dir: Some(dir.path().to_path_buf()),
            prev_date: NaiveDate::from_ymd_opt(2025, 10, 1),
            curr_date: NaiveDate::from_ymd_opt(2025, 11, 1),
            output: None,
        };
        run_compare(args).unwrap();
        assert!(dir
            .path()
            .join("Report_Speed_Comparison_speed_snapshot_2025-11-01.xlsx")
            .exists());
    }
}
