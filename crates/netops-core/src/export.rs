//! 每日配置导出
//!
//! 对每台 MikroTik 设备执行 `/export`，输出写入 `{property}_export_{date}.txt`；
//! 随后经 SFTP 取回设备上的 `log.N.txt` 哈希日志并在设备上删除。
//! 失败时写 `{property}_export_{date}_ERROR.txt` 并让该设备在结果中显示为错误行。
//! 复用 `run_many`，并发上限与“每台设备一条结果”的约束保持一致。
//! 全部设备结束后，整个目录打包为 `{dir}.zip` 供上传。

use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{NetopsError, Result};
use crate::inventory::Device;
use crate::progress::ProgressSlot;
use crate::systems::{device_transport, ResultTable, System, SystemFactory, SystemFamily};
use crate::transport::{SessionOptions, Transport, TransportKind};

pub const CMD_EXPORT: &str = "/export";
pub const EXPORT_HEADER: &[&str] = &["File", "Bytes", "Status"];
pub const EXPORTED: &str = "Exported";
pub const HASH_LOG: &str = "Hash log";

pub fn export_file_name(property: &str, date: NaiveDate) -> String {
    format!("{}_export_{}.txt", file_stem(property), date.format("%Y-%m-%d"))
}

pub fn error_file_name(property: &str, date: NaiveDate) -> String {
    format!("{}_export_{}_ERROR.txt", file_stem(property), date.format("%Y-%m-%d"))
}

pub fn hash_log_file_name(property: &str, index: u32, date: NaiveDate) -> String {
    format!("{}_hash_log_{}_{}.csv", file_stem(property), index, date.format("%Y-%m-%d"))
}

/// 设备文件列表中的 `log.N.txt` 编号，按数值升序
pub fn hash_log_indexes<S: AsRef<str>>(names: &[S]) -> Vec<u32> {
    let mut indexes: Vec<u32> = names
        .iter()
        .filter_map(|n| n.as_ref().strip_prefix("log.")?.strip_suffix(".txt")?.parse().ok())
        .collect();
    indexes.sort_unstable();
    indexes.dedup();
    indexes
}

fn hash_log_remove_command(remote: &str) -> String {
    format!("/file remove [ find name={} ]", remote)
}

/// 当天的导出目录：`{root}/{date}_Daily_Exports`
pub fn export_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(format!("{}_Daily_Exports", date.format("%Y-%m-%d")))
}

/// 物业名中的路径分隔符替换为 `_`
fn file_stem(property: &str) -> String {
    property
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

/// 导出任务的错误文件内容，区分网络类错误与其他错误
pub fn error_text(error: &NetopsError) -> String {
    if error.is_retriable() || matches!(error, NetopsError::Authentication { .. }) {
        format!("SSH failed: {}", error)
    } else {
        format!("Unexpected: {}", error)
    }
}

pub struct ExportJob {
    property: String,
    transport: Option<Box<dyn Transport>>,
    /// 构造阶段的失败（如凭据缺失），延迟到执行时写错误文件
    pending: Option<NetopsError>,
    dir: PathBuf,
    date: NaiveDate,
}

impl ExportJob {
    pub fn new(property: &str, transport: Box<dyn Transport>, dir: PathBuf, date: NaiveDate) -> Self {
        Self {
            property: property.to_string(),
            transport: Some(transport),
            pending: None,
            dir,
            date,
        }
    }

    pub fn failed(property: &str, error: NetopsError, dir: PathBuf, date: NaiveDate) -> Self {
        Self {
            property: property.to_string(),
            transport: None,
            pending: Some(error),
            dir,
            date,
        }
    }

    async fn export(&mut self) -> Result<String> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| NetopsError::internal("export job has no session"))?;
        Ok(transport.run(CMD_EXPORT).await?.stdout)
    }

    /// 取回全部哈希日志；设备上的删除失败只记录日志
    async fn pull_hash_logs(&mut self) -> Result<Vec<(PathBuf, usize)>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| NetopsError::internal("export job has no session"))?;
        let names = transport.list_files(".").await?;
        let mut pulled = Vec::new();
        for index in hash_log_indexes(names.as_slice()) {
            let remote = format!("log.{}.txt", index);
            let bytes = transport.get_file(&remote).await?;
            let path = self.dir.join(hash_log_file_name(&self.property, index, self.date));
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&path, &bytes).await?;
            if let Err(e) = transport.run(&hash_log_remove_command(&remote)).await {
                tracing::debug!(property = %self.property, file = %remote, error = %e, "Remote hash log not removed");
            }
            pulled.push((path, bytes.len()));
        }
        Ok(pulled)
    }

    async fn write(&mut self, name: String, content: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

#[async_trait]
impl System for ExportJob {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable> {
        progress.start(1, "EXPORT");
        match self.export().await {
            Ok(text) => {
                let path = self.write(export_file_name(&self.property, self.date), &text).await?;
                progress.update(1);
                tracing::info!(property = %self.property, path = %path.display(), "Export saved");
                let mut table = ResultTable::new(EXPORT_HEADER);
                table.push([file_label(&path), text.len().to_string(), EXPORTED.to_string()]);
                match self.pull_hash_logs().await {
                    Ok(logs) => {
                        for (path, size) in logs {
                            table.push([file_label(&path), size.to_string(), HASH_LOG.to_string()]);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(property = %self.property, error = %e, "Hash log pull failed");
                        table.push(["log.*.txt".to_string(), "0".to_string(), format!("Hash logs failed: {}", e)]);
                    }
                }
                Ok(table)
            }
            Err(e) => {
                let name = error_file_name(&self.property, self.date);
                if let Err(write_err) = self.write(name, &error_text(&e)).await {
                    tracing::error!(property = %self.property, error = %write_err, "Cannot write export error file");
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close().await;
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 只为 MikroTik 设备构造导出任务，会话固定为 SSH
pub struct ExportFactory {
    dir: PathBuf,
    date: NaiveDate,
    options: SessionOptions,
}

impl ExportFactory {
    pub fn new(dir: PathBuf, date: NaiveDate, options: SessionOptions) -> Self {
        Self { dir, date, options }
    }
}

impl SystemFactory for ExportFactory {
    fn build(&self, device: &Device) -> Result<Box<dyn System>> {
        let family = device.family()?;
        if family != SystemFamily::Ettp {
            return Err(NetopsError::unsupported(format!("{} (export)", device.system)));
        }
        let mut device = device.clone();
        if device.transport != TransportKind::Ssh {
            device.transport = TransportKind::Ssh;
            device.port = TransportKind::Ssh.default_port();
        }
        let job = match device_transport(&device, None, &self.options) {
            Ok(transport) => ExportJob::new(&device.property, transport, self.dir.clone(), self.date),
            Err(e) => ExportJob::failed(&device.property, e, self.dir.clone(), self.date),
        };
        Ok(Box::new(job))
    }
}

/// 导出目录中当天生成的全部文件（按名称排序）
pub fn produced_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// 把目录下的文件打包为同级的 `{dir}.zip`，条目位于压缩包根部
pub fn zip_dir(dir: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| NetopsError::report(format!("cannot zip {}", dir.display())))?;
    let zip_path = dir.with_file_name(format!("{}.zip", name.to_string_lossy()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(std::fs::File::create(&zip_path)?);
    let files = produced_files(dir)?;
    for file in &files {
        writer.start_file(file_label(file), options)?;
        writer.write_all(&std::fs::read(file)?)?;
    }
    writer.finish()?;
    tracing::info!(zip = %zip_path.display(), files = files.len(), "Export archive created");
    Ok(zip_path)
}
