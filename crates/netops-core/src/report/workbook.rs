//! 审计工作簿：目录页 + 每个结果一个工作表

use rust_xlsxwriter::{Color, Format, Url, Workbook, Worksheet};
use std::path::Path;

use super::{column_widths, internal_link, sanitize_sheet_name, unique_sheet_name};
use crate::error::Result;
use crate::orchestrator::RunResult;

pub const TOC_SHEET: &str = "Table_of_Contents";
const TOC_TITLE: &str = "Table of Contents";
const BACK_TO_TOC: &str = "← Back to TOC";
/// 结果表从第 3 行开始（0 基）
const TABLE_START_ROW: u32 = 2;

/// 为每个结果分配不冲突的工作表名
pub fn sheet_names(results: &[RunResult]) -> Vec<String> {
    let mut used = vec![TOC_SHEET.to_string()];
    results
        .iter()
        .map(|r| unique_sheet_name(&sanitize_sheet_name(&r.property), &mut used))
        .collect()
}

/// 写出审计工作簿；结果顺序即工作表顺序
pub fn write_workbook(path: &Path, results: &[RunResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let names = sheet_names(results);
    let mut workbook = Workbook::new();

    write_toc(workbook.add_worksheet(), results, &names)?;
    let bold = Format::new().set_bold();
    for (result, name) in results.iter().zip(&names) {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name)?;
        sheet.write_url_with_text(0, 0, Url::new(internal_link(TOC_SHEET)), BACK_TO_TOC)?;
        write_table(sheet, TABLE_START_ROW, &result.table.header, &result.table.rows, &bold)?;
    }

    workbook.save(path)?;
    tracing::info!(path = %path.display(), sheets = results.len(), "Workbook written");
    Ok(())
}

fn write_toc(sheet: &mut Worksheet, results: &[RunResult], names: &[String]) -> Result<()> {
    let title = Format::new()
        .set_bold()
        .set_font_color(Color::Blue)
        .set_font_size(14);
    sheet.set_name(TOC_SHEET)?;
    sheet.set_column_width(0, (TOC_TITLE.len() + 4) as f64)?;
    sheet.write_string_with_format(0, 0, TOC_TITLE, &title)?;
    sheet.write_string(1, 0, "Property")?;
    sheet.write_string(1, 1, "System")?;

    let mut system_width = "System".len();
    for (i, (result, name)) in results.iter().zip(names).enumerate() {
        let row = i as u32 + 2;
        sheet.write_url_with_text(row, 0, Url::new(internal_link(name)), &result.property)?;
        sheet.write_string(row, 1, &result.system)?;
        system_width = system_width.max(result.system.len());
    }
    sheet.set_column_width(1, (system_width + 2) as f64)?;
    Ok(())
}

/// 写表头与数据行，列宽取该列最长单元格 + 2
pub(crate) fn write_table(
    sheet: &mut Worksheet,
    start_row: u32,
    header: &[String],
    rows: &[Vec<String>],
    header_format: &Format,
) -> Result<()> {
    for (col, title) in header.iter().enumerate() {
        sheet.write_string_with_format(start_row, col as u16, title, header_format)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let r = start_row + 1 + i as u32;
        for (col, cell) in row.iter().enumerate() {
            sheet.write_string(r, col as u16, cell)?;
        }
    }
    let header_row = header.to_vec();
    let widths = column_widths(std::iter::once(&header_row).chain(rows.iter()));
    for (col, width) in widths.into_iter().enumerate() {
        sheet.set_column_width(col as u16, (width + 2) as f64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::ResultTable;

    fn result(property: &str) -> RunResult {
        let mut table = ResultTable::new(&["Identity", "Mac/Serial", "Speed", "Status"]);
        table.push(["Unit 1", "aa", "50 Mbps", "Active"]);
        RunResult {
            property: property.to_string(),
            system: "GPON".to_string(),
            table,
        }
    }

    #[test]
    fn test_sheet_names_dedupe_and_reserve_toc() {
        let results = vec![result("Oak"), result("Oak"), result("Table_of_Contents"), result("a/b")];
        assert_eq!(
            sheet_names(&results),
            vec!["Oak", "Oak_1", "Table_of_Contents_1", "a_b"]
        );
    }

    #[test]
    fn test_history_property_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![result("history"), result("Oak")];
        assert_eq!(sheet_names(&results), vec!["history_1", "Oak"]);
        write_workbook(&dir.path().join("audit.xlsx"), &results).unwrap();
    }

    #[test]
    fn test_write_workbook_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("audit.xlsx");
        let results = vec![
            result("Oak"),
            RunResult {
                property: "Pine".to_string(),
                system: "CMTS".to_string(),
                table: ResultTable::error_placeholder("Pine", "CMTS", "timed out"),
            },
        ];
        write_workbook(&path, &results).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.len() > 0);
    }
}
