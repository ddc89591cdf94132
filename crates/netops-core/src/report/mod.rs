//! 报表输出：多工作表审计簿、快照 CSV 与两次快照的对比

pub mod compare;
pub mod snapshot;
pub mod workbook;

pub use compare::{compare_snapshots, summarize, write_comparison_workbook, ChangeRecord, ChangeSummary};
pub use snapshot::{load_snapshot, snapshot_path, write_snapshot, SnapshotRow};
pub use workbook::{sheet_names, write_workbook, TOC_SHEET};

/// Excel 工作表名最大长度
pub const MAX_SHEET_NAME: usize = 31;

const INVALID_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// Excel 保留的工作表名（不区分大小写）
pub const RESERVED_SHEET_NAMES: &[&str] = &["History"];

/// 替换非法字符、截断到 31 个字符；空名回退为 `Sheet`
pub fn sanitize_sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if INVALID_SHEET_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches('\'');
    let name: String = cleaned.chars().take(MAX_SHEET_NAME).collect();
    if name.is_empty() {
        "Sheet".to_string()
    } else {
        name
    }
}

/// 在已用名集合中去重（Excel 不区分大小写），冲突时追加 `_1`、`_2`…
pub fn unique_sheet_name(base: &str, used: &mut Vec<String>) -> String {
    let taken = |name: &str, used: &[String]| {
        RESERVED_SHEET_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
            || used.iter().any(|u| u.eq_ignore_ascii_case(name))
    };
    let mut name = base.to_string();
    let mut i = 1;
    while taken(&name, used) {
        let suffix = format!("_{}", i);
        let keep = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
        name = base.chars().take(keep).collect::<String>() + &suffix;
        i += 1;
    }
    used.push(name.clone());
    name
}

/// 工作簿内部跳转链接
pub(crate) fn internal_link(sheet: &str) -> String {
    format!("internal:'{}'!A1", sheet.replace('\'', "''"))
}

/// 按字符数估算列宽
pub(crate) fn column_widths<'a, I>(rows: I) -> Vec<usize>
where
    I: IntoIterator<Item = &'a Vec<String>>,
{
    let mut widths: Vec<usize> = Vec::new();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }
    widths
}
