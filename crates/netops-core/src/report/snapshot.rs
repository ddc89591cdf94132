//! 速率快照 CSV：每个子实体一行，供后续对比

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NetopsError, Result};
use crate::orchestrator::RunResult;
use crate::systems::{COL_IDENTITY, COL_MAC_SERIAL, COL_NOTES, COL_SPEED, COL_STATUS};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    #[serde(rename = "Property")]
    pub property: String,
    #[serde(rename = "System", default)]
    pub system: String,
    #[serde(rename = "Identity", default)]
    pub identity: String,
    #[serde(rename = "Mac/Serial", default)]
    pub mac_serial: String,
    #[serde(rename = "Speed", default)]
    pub speed: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Notes", default)]
    pub notes: String,
}

/// `{dir}/speed_snapshot_{YYYY-MM-DD}.csv`
pub fn snapshot_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("speed_snapshot_{}.csv", date.format("%Y-%m-%d")))
}

/// 把结果表展开为快照行；错误表只保留状态列
pub fn snapshot_rows(results: &[RunResult]) -> Vec<SnapshotRow> {
    let mut rows = Vec::new();
    for result in results {
        let table = &result.table;
        let cell = |row: &[String], name: &str| {
            table
                .column(name)
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or_default()
        };
        for row in &table.rows {
            let mut snap = SnapshotRow {
                property: result.property.clone(),
                system: result.system.clone(),
                status: cell(row, COL_STATUS),
                ..Default::default()
            };
            if !table.is_error() {
                snap.identity = cell(row, COL_IDENTITY);
                snap.mac_serial = cell(row, COL_MAC_SERIAL);
                snap.speed = cell(row, COL_SPEED);
                snap.notes = cell(row, COL_NOTES);
            }
            rows.push(snap);
        }
    }
    rows
}

pub fn write_snapshot(path: &Path, results: &[RunResult]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let rows = snapshot_rows(results);
    let mut writer = csv::Writer::from_path(path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Snapshot written");
    Ok(rows.len())
}

/// 读取快照；缺少 `Property` 列时报错，其余列缺失按空值处理
pub fn load_snapshot(path: &Path) -> Result<Vec<SnapshotRow>> {
    if !path.exists() {
        return Err(NetopsError::report(format!(
            "snapshot not found: {}",
            path.display()
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let has_property = reader.headers()?.iter().any(|h| h == "Property");
    if !has_property {
        return Err(NetopsError::report(format!(
            "snapshot {} has no Property column",
            path.display()
        )));
    }
    let mut rows = Vec::new();
    for (i, record) in reader.deserialize::<SnapshotRow>().enumerate() {
        let row = record.map_err(|e| {
            NetopsError::report(format!("{} row {}: {}", path.display(), i + 2, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}
