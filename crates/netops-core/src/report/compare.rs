//! 两次速率快照的对比
//!
//! 以 (Property, Identity) 为键做外连接：仅旧侧存在为 "Removed Entry"，仅新侧为 "New Entry"；
//! 两侧都有时比较速率（能解析出数字则按数值比较方向）、设备标识和状态，多项变化以 "; " 连接。

use once_cell::sync::Lazy;
use regex::Regex;
use rust_xlsxwriter::{
    Color, ConditionalFormatText, ConditionalFormatTextRule, Format, FormatBorder, Url, Workbook,
    Worksheet,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::snapshot::SnapshotRow;
use super::{column_widths, internal_link, sanitize_sheet_name, unique_sheet_name};
use crate::error::Result;

pub const REMOVED_ENTRY: &str = "Removed Entry";
pub const NEW_ENTRY: &str = "New Entry";
pub const SPEED_INCREASED: &str = "Speed Increased";
pub const SPEED_DECREASED: &str = "Speed Decreased";
pub const SPEED_CHANGED: &str = "Speed Changed";
pub const EQUIPMENT_CHANGED: &str = "Equipment Changed";
pub const STATUS_CHANGED: &str = "Status Changed";

/// 汇总指标名与其在 Change 文本中的匹配子串
pub const CHANGE_KINDS: [(&str, &str); 7] = [
    ("New Entries", NEW_ENTRY),
    ("Removed Entries", REMOVED_ENTRY),
    ("Speed Increased", SPEED_INCREASED),
    ("Speed Decreased", SPEED_DECREASED),
    ("Speed Changed", SPEED_CHANGED),
    ("Equipment Changed", EQUIPMENT_CHANGED),
    ("Status Changed", STATUS_CHANGED),
];

pub const SUMMARY_SHEET: &str = "Summary";
pub const ALL_CHANGES_SHEET: &str = "All Changes";
const TOP_PROPERTIES: usize = 5;

const DISPLAY_COLUMNS: [&str; 9] = [
    "Property",
    "Identity",
    "Change",
    "Prev Speed",
    "Curr Speed",
    "Prev Mac/Serial",
    "Curr Mac/Serial",
    "Prev Status",
    "Curr Status",
];
const CHANGE_COLUMN: u16 = 2;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9]+\.?[0-9]*)").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub property: String,
    pub identity: String,
    pub change: String,
    pub prev_speed: String,
    pub curr_speed: String,
    pub prev_mac_serial: String,
    pub curr_mac_serial: String,
    pub prev_status: String,
    pub curr_status: String,
}

impl ChangeRecord {
    fn cells(&self) -> Vec<String> {
        vec![
            self.property.clone(),
            self.identity.clone(),
            self.change.clone(),
            self.prev_speed.clone(),
            self.curr_speed.clone(),
            self.prev_mac_serial.clone(),
            self.curr_mac_serial.clone(),
            self.prev_status.clone(),
            self.curr_status.clone(),
        ]
    }
}

/// 速率文本中的第一个数字，如 `50 Mbps` → 50
pub fn speed_number(speed: &str) -> Option<f64> {
    NUMBER_RE
        .captures(speed)
        .and_then(|c| c[1].parse::<f64>().ok())
}

fn speed_change(prev: &str, curr: &str) -> Option<&'static str> {
    match (prev.is_empty(), curr.is_empty()) {
        (true, true) => None,
        (true, false) | (false, true) => Some(SPEED_CHANGED),
        (false, false) => match (speed_number(prev), speed_number(curr)) {
            (Some(p), Some(c)) if c > p => Some(SPEED_INCREASED),
            (Some(p), Some(c)) if c < p => Some(SPEED_DECREASED),
            (Some(_), Some(_)) => None,
            _ => (!prev.trim().eq_ignore_ascii_case(curr.trim())).then_some(SPEED_CHANGED),
        },
    }
}

type Key = (String, String);

/// 同一键出现多次时取第一行
fn index(rows: &[SnapshotRow]) -> BTreeMap<Key, &SnapshotRow> {
    let mut map = BTreeMap::new();
    for row in rows {
        let key = (row.property.trim().to_string(), row.identity.trim().to_string());
        map.entry(key).or_insert(row);
    }
    map
}

/// 按键排序输出有变化的记录；无变化的键不产出记录
pub fn compare_snapshots(prev: &[SnapshotRow], curr: &[SnapshotRow]) -> Vec<ChangeRecord> {
    let prev_index = index(prev);
    let curr_index = index(curr);
    let mut keys: Vec<&Key> = prev_index.keys().chain(curr_index.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut records = Vec::new();
    for key in keys {
        let (p, c) = (prev_index.get(key), curr_index.get(key));
        let mut flags: Vec<String> = Vec::new();
        match (p, c) {
            (Some(_), None) => flags.push(REMOVED_ENTRY.to_string()),
            (None, Some(_)) => flags.push(NEW_ENTRY.to_string()),
            (Some(p), Some(c)) => {
                if let Some(flag) = speed_change(&p.speed, &c.speed) {
                    flags.push(flag.to_string());
                }
                if !p.mac_serial.is_empty() && !c.mac_serial.is_empty() && p.mac_serial != c.mac_serial {
                    flags.push(EQUIPMENT_CHANGED.to_string());
                }
                if !p.status.is_empty() && !c.status.is_empty() && p.status != c.status {
                    flags.push(format!("{} ({} → {})", STATUS_CHANGED, p.status, c.status));
                }
            }
            (None, None) => {}
        }
        if flags.is_empty() {
            continue;
        }

        let field = |row: Option<&&SnapshotRow>, get: fn(&SnapshotRow) -> &String| {
            row.map(|r| get(r).clone()).unwrap_or_default()
        };
        records.push(ChangeRecord {
            property: key.0.clone(),
            identity: key.1.clone(),
            change: flags.join("; "),
            prev_speed: field(p, |r| &r.speed),
            curr_speed: field(c, |r| &r.speed),
            prev_mac_serial: field(p, |r| &r.mac_serial),
            curr_mac_serial: field(c, |r| &r.mac_serial),
            prev_status: field(p, |r| &r.status),
            curr_status: field(c, |r| &r.status),
        });
    }
    tracing::debug!(prev = prev.len(), curr = curr.len(), changes = records.len(), "Snapshots compared");
    records
}

/// 单个物业的各类变化计数（顺序同 `CHANGE_KINDS`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyChanges {
    pub property: String,
    pub counts: [usize; 7],
}

impl PropertyChanges {
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    /// 当前快照中状态为 Active 的行数
    pub total_active: usize,
    pub global: [usize; 7],
    /// 按物业名排序
    pub per_property: Vec<PropertyChanges>,
    /// 变化总数最多的前 5 个物业
    pub top: Vec<PropertyChanges>,
}

fn count_kinds<'a>(changes: impl Iterator<Item = &'a ChangeRecord>) -> [usize; 7] {
    let mut counts = [0; 7];
    for record in changes {
        for (i, (_, needle)) in CHANGE_KINDS.iter().enumerate() {
            if record.change.contains(needle) {
                counts[i] += 1;
            }
        }
    }
    counts
}

pub fn summarize(changes: &[ChangeRecord], curr: &[SnapshotRow]) -> ChangeSummary {
    let total_active = curr
        .iter()
        .filter(|r| r.status.trim().eq_ignore_ascii_case("active"))
        .count();

    let mut grouped: BTreeMap<&str, Vec<&ChangeRecord>> = BTreeMap::new();
    for record in changes {
        grouped.entry(record.property.as_str()).or_default().push(record);
    }
    let per_property: Vec<PropertyChanges> = grouped
        .into_iter()
        .map(|(property, records)| PropertyChanges {
            property: property.to_string(),
            counts: count_kinds(records.into_iter()),
        })
        .collect();

    let mut top = per_property.clone();
    top.sort_by(|a, b| b.total().cmp(&a.total()));
    top.truncate(TOP_PROPERTIES);

    ChangeSummary {
        total_active,
        global: count_kinds(changes.iter()),
        per_property,
        top,
    }
}

struct Styles {
    bold: Format,
    italic: Format,
    header: Format,
}

impl Styles {
    fn new() -> Self {
        Self {
            bold: Format::new().set_bold(),
            italic: Format::new().set_italic(),
            header: Format::new()
                .set_bold()
                .set_background_color(Color::RGB(0xDDDDDD))
                .set_border(FormatBorder::Thin),
        }
    }
}

/// 写对比工作簿：Summary、All Changes 以及每个有变化物业一个工作表
pub fn write_comparison_workbook(
    path: &Path,
    changes: &[ChangeRecord],
    summary: &ChangeSummary,
    prev_label: &str,
    curr_label: &str,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let styles = Styles::new();

    let mut used = vec![SUMMARY_SHEET.to_string(), ALL_CHANGES_SHEET.to_string()];
    let property_sheets: BTreeMap<&str, String> = summary
        .per_property
        .iter()
        .map(|p| {
            let base = match p.property.trim() {
                "" => "Unknown".to_string(),
                name => sanitize_sheet_name(name),
            };
            (p.property.as_str(), unique_sheet_name(&base, &mut used))
        })
        .collect();

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SUMMARY_SHEET)?;
    write_summary(sheet, summary, &property_sheets, prev_label, curr_label, &styles)?;

    let sheet = workbook.add_worksheet();
    sheet.set_name(ALL_CHANGES_SHEET)?;
    if changes.is_empty() {
        sheet.write_string_with_format(0, 0, "No changes detected between runs.", &styles.bold)?;
    } else {
        let rows: Vec<Vec<String>> = changes.iter().map(ChangeRecord::cells).collect();
        write_changes(sheet, &rows, &styles)?;

        for (property, name) in &property_sheets {
            let rows: Vec<Vec<String>> = changes
                .iter()
                .filter(|c| c.property == *property)
                .map(ChangeRecord::cells)
                .collect();
            let sheet = workbook.add_worksheet();
            sheet.set_name(name)?;
            write_changes(sheet, &rows, &styles)?;
        }
    }

    workbook.save(path)?;
    tracing::info!(path = %path.display(), changes = changes.len(), "Comparison workbook written");
    Ok(())
}

fn write_summary(
    sheet: &mut Worksheet,
    summary: &ChangeSummary,
    property_sheets: &BTreeMap<&str, String>,
    prev_label: &str,
    curr_label: &str,
    styles: &Styles,
) -> Result<()> {
    sheet.write_string_with_format(0, 0, "Speed Audit Comparison Summary", &styles.bold)?;
    sheet.write_string_with_format(2, 0, "Previous Run:", &styles.bold)?;
    sheet.write_string(2, 1, prev_label)?;
    sheet.write_string_with_format(3, 0, "Current Run:", &styles.bold)?;
    sheet.write_string(3, 1, curr_label)?;

    sheet.write_string_with_format(5, 0, "Global Stats", &styles.bold)?;
    sheet.write_string_with_format(6, 0, "Metric", &styles.bold)?;
    sheet.write_string_with_format(6, 1, "Count", &styles.bold)?;
    sheet.write_string(7, 0, "Total Active Identities (Current)")?;
    sheet.write_number(7, 1, summary.total_active as f64)?;
    let mut row = 8;
    for ((label, _), count) in CHANGE_KINDS.iter().zip(summary.global) {
        sheet.write_string(row, 0, *label)?;
        sheet.write_number(row, 1, count as f64)?;
        row += 1;
    }
    sheet.set_column_width(0, 40)?;
    sheet.set_column_width(1, 15)?;

    row += 2;
    sheet.write_string_with_format(row, 0, "Per-Property Changes", &styles.bold)?;
    row += 1;
    if summary.per_property.is_empty() {
        sheet.write_string_with_format(row, 0, "No changes detected.", &styles.italic)?;
        row += 2;
    } else {
        row = write_counts(sheet, row, &summary.per_property, false, Some(property_sheets), styles)?;
    }

    sheet.write_string_with_format(row, 0, "Top 5 Properties by Total Changes", &styles.bold)?;
    row += 1;
    if summary.top.is_empty() {
        sheet.write_string_with_format(row, 0, "No changes to highlight.", &styles.italic)?;
    } else {
        write_counts(sheet, row, &summary.top, true, None, styles)?;
    }
    sheet.set_freeze_panes(5, 0)?;
    Ok(())
}

/// 写物业计数表，返回下一个可用行
fn write_counts(
    sheet: &mut Worksheet,
    start: u32,
    items: &[PropertyChanges],
    with_total: bool,
    links: Option<&BTreeMap<&str, String>>,
    styles: &Styles,
) -> Result<u32> {
    let mut header = vec!["Property"];
    if with_total {
        header.push("Total Changes");
    }
    header.extend(CHANGE_KINDS.iter().map(|(label, _)| *label));
    for (col, title) in header.iter().enumerate() {
        sheet.write_string_with_format(start, col as u16, *title, &styles.bold)?;
    }

    for (i, item) in items.iter().enumerate() {
        let row = start + 1 + i as u32;
        match links.and_then(|l| l.get(item.property.as_str())) {
            Some(name) => {
                sheet.write_url_with_text(row, 0, Url::new(internal_link(name)), &item.property)?;
            }
            None => {
                sheet.write_string(row, 0, &item.property)?;
            }
        }
        let mut col = 1u16;
        if with_total {
            sheet.write_number(row, col, item.total() as f64)?;
            col += 1;
        }
        for count in item.counts {
            sheet.write_number(row, col, count as f64)?;
            col += 1;
        }
    }
    Ok(start + items.len() as u32 + 3)
}

fn write_changes(sheet: &mut Worksheet, rows: &[Vec<String>], styles: &Styles) -> Result<()> {
    for (col, title) in DISPLAY_COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &styles.header)?;
    }
    for (i, row) in rows.iter().enumerate() {
        for (col, cell) in row.iter().enumerate() {
            sheet.write_string(i as u32 + 1, col as u16, cell)?;
        }
    }
    let last_row = rows.len() as u32;
    let last_col = DISPLAY_COLUMNS.len() as u16 - 1;
    sheet.autofilter(0, 0, last_row, last_col)?;
    sheet.set_freeze_panes(1, 0)?;

    let header: Vec<String> = DISPLAY_COLUMNS.iter().map(|c| c.to_string()).collect();
    let widths = column_widths(std::iter::once(&header).chain(rows.iter()));
    for (col, width) in widths.into_iter().enumerate() {
        sheet.set_column_width(col as u16, (width + 2).clamp(10, 50) as f64)?;
    }

    if last_row > 0 {
        let highlights = [
            (NEW_ENTRY, 0xC6EFCE),
            (REMOVED_ENTRY, 0xFFC7CE),
            (SPEED_INCREASED, 0xC6EFCE),
            (SPEED_DECREASED, 0xFFEB9C),
            (EQUIPMENT_CHANGED, 0xC9DAF8),
            (STATUS_CHANGED, 0xE6E6E6),
        ];
        for (needle, rgb) in highlights {
            let rule = ConditionalFormatText::new()
                .set_rule(ConditionalFormatTextRule::Contains(needle.to_string()))
                .set_format(Format::new().set_background_color(Color::RGB(rgb)));
            sheet.add_conditional_format(1, CHANGE_COLUMN, last_row, CHANGE_COLUMN, &rule)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(property: &str, identity: &str, mac: &str, speed: &str, status: &str) -> SnapshotRow {
        SnapshotRow {
            property: property.to_string(),
            system: "GPON".to_string(),
            identity: identity.to_string(),
            mac_serial: mac.to_string(),
            speed: speed.to_string(),
            status: status.to_string(),
            notes: String::new(),
        }
    }

    mod compare_tests {
        use super::*;

        #[test]
        fn test_single_speed_increase() {
            let prev = vec![row("Oak", "U1", "aa", "50 Mbps", "Active"), row("Oak", "U2", "bb", "20 Mbps", "Active")];
            let curr = vec![row("Oak", "U1", "aa", "100 Mbps", "Active"), row("Oak", "U2", "bb", "20 Mbps", "Active")];
            let changes = compare_snapshots(&prev, &curr);
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].change, "Speed Increased");
            assert_eq!(changes[0].prev_speed, "50 Mbps");
            assert_eq!(changes[0].curr_speed, "100 Mbps");
        }

        #[test]
        fn test_new_removed_and_combined() {
            let prev = vec![row("Oak", "U1", "aa", "50 Mbps", "Active"), row("Oak", "Gone", "cc", "", "Inactive")];
            let curr = vec![row("Oak", "U1", "zz", "20M", "Inactive"), row("Elm", "New", "dd", "10 Mbps", "Active")];
            let changes = compare_snapshots(&prev, &curr);
            let kinds: Vec<(&str, &str)> = changes
                .iter()
                .map(|c| (c.identity.as_str(), c.change.as_str()))
                .collect();
            assert_eq!(
                kinds,
                vec![
                    ("New", "New Entry"),
                    ("Gone", "Removed Entry"),
                    ("U1", "Speed Decreased; Equipment Changed; Status Changed (Active → Inactive)"),
                ]
            );
        }

        #[test]
        fn test_speed_rules() {
            assert_eq!(speed_change("50 Mbps", "50"), None);
            assert_eq!(speed_change("", "50 Mbps"), Some(SPEED_CHANGED));
            assert_eq!(speed_change("INT Disabled", "int disabled "), None);
            assert_eq!(speed_change("INT Disabled", "No Data"), Some(SPEED_CHANGED));
            assert_eq!(speed_change("1000 Mbps*", "300 Mbps"), Some(SPEED_DECREASED));
            assert_eq!(speed_number("100/20"), Some(100.0));
        }
    }

    mod summary_tests {
        use super::*;

        fn change(property: &str, change: &str) -> ChangeRecord {
            ChangeRecord {
                property: property.to_string(),
                change: change.to_string(),
                ..Default::default()
            }
        }

        #[test]
        fn test_summarize_counts_and_top() {
            let changes = vec![
                change("Oak", "New Entry"),
                change("Oak", "Speed Increased; Status Changed (Active → Inactive)"),
                change("Elm", "Removed Entry"),
            ];
            let curr = vec![row("Oak", "U1", "", "", "Active"), row("Oak", "U2", "", "", "inactive")];
            let summary = summarize(&changes, &curr);
            assert_eq!(summary.total_active, 1);
            assert_eq!(summary.global, [1, 1, 1, 0, 0, 0, 1]);
            assert_eq!(summary.per_property[0].property, "Elm");
            assert_eq!(summary.top[0].property, "Oak");
            assert_eq!(summary.top[0].total(), 3);
        }

        #[test]
        fn test_top_is_capped() {
            let changes: Vec<ChangeRecord> = (0..8).map(|i| change(&format!("P{}", i), "New Entry")).collect();
            assert_eq!(summarize(&changes, &[]).top.len(), 5);
        }
    }

    mod workbook_tests {
        use super::*;

        #[test]
        fn test_write_comparison_workbook() {
            let dir = tempfile::tempdir().unwrap();
            let prev = vec![row("Oak", "U1", "aa", "50 Mbps", "Active")];
            let curr = vec![row("Oak", "U1", "aa", "100 Mbps", "Active"), row("Elm/2", "U9", "", "", "Active")];
            let changes = compare_snapshots(&prev, &curr);
            let summary = summarize(&changes, &curr);
            let path = dir.path().join("cmp.xlsx");
            write_comparison_workbook(&path, &changes, &summary, "prev.csv", "curr.csv").unwrap();
            assert!(path.exists());

            let empty = dir.path().join("empty.xlsx");
            write_comparison_workbook(&empty, &[], &summarize(&[], &[]), "a", "b").unwrap();
            assert!(empty.exists());
        }
    }
}
