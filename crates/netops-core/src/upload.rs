//! 报表上传
//!
//! 通过 SFTP 把生成的文件写到 `{base_dir}/{subdir}/{file_name}`。上传是尽力而为：
//! 任何失败只记录警告，不影响采集结果。

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::config::{NetopsConfig, UploadConfig};
use crate::error::{NetopsError, Result};
use crate::inventory::Credentials;
use crate::transport::{SessionOptions, SshTransport, Target, Transport};

/// 远端文件存储
#[async_trait]
pub trait RemoteStore: Send {
    async fn put(&mut self, remote_path: &str, bytes: &[u8]) -> Result<()>;
    async fn close(&mut self);
}

#[async_trait]
impl RemoteStore for SshTransport {
    async fn put(&mut self, remote_path: &str, bytes: &[u8]) -> Result<()> {
        self.put_file(remote_path, bytes).await
    }

    async fn close(&mut self) {
        Transport::close(self).await;
    }
}

/// 一次上传的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub fn remote_path(base_dir: &str, subdir: &str, file_name: &str) -> String {
    [base_dir.trim_end_matches('/'), subdir.trim_matches('/'), file_name]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

pub struct UploadSink {
    config: UploadConfig,
    options: SessionOptions,
}

impl UploadSink {
    /// 未配置上传主机时返回 `None`
    pub fn from_config(cfg: &NetopsConfig) -> Option<Self> {
        cfg.upload.host.as_ref()?;
        Some(Self {
            config: cfg.upload.clone(),
            options: SessionOptions::from_config(cfg),
        })
    }

    fn store(&self) -> Result<SshTransport> {
        let host = self
            .config
            .host
            .clone()
            .ok_or_else(|| NetopsError::config_error("upload.host is not set"))?;
        let user_env = self
            .config
            .user_env
            .as_deref()
            .ok_or_else(|| NetopsError::config_error("upload.user_env is not set"))?;
        let pw_env = self
            .config
            .pw_env
            .as_deref()
            .ok_or_else(|| NetopsError::config_error("upload.pw_env is not set"))?;
        let target = Target {
            host,
            port: self.config.port,
            credentials: Credentials::from_env(user_env, pw_env)?,
        };
        Ok(SshTransport::new(target, self.options.clone()))
    }

    /// 上传一组本地文件；无法建立会话时整体跳过
    pub async fn upload_files(&self, subdir: &str, files: &[PathBuf]) -> UploadReport {
        match self.store() {
            Ok(mut store) => {
                let report = upload_with(&mut store, &self.config.base_dir, subdir, files).await;
                RemoteStore::close(&mut store).await;
                report
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upload skipped");
                UploadReport {
                    uploaded: Vec::new(),
                    failed: files
                        .iter()
                        .map(|f| (display_name(f), e.to_string()))
                        .collect(),
                }
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// 逐个读取并写入远端；单个文件失败不影响其余文件
pub async fn upload_with<S: RemoteStore + ?Sized>(
    store: &mut S,
    base_dir: &str,
    subdir: &str,
    files: &[PathBuf],
) -> UploadReport {
    let mut report = UploadReport::default();
    for file in files {
        let name = display_name(file);
        let outcome = match tokio::fs::read(file).await {
            Ok(bytes) => store.put(&remote_path(base_dir, subdir, &name), &bytes).await,
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(()) => {
                tracing::info!(file = %name, "Uploaded");
                report.uploaded.push(name);
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Upload failed");
                report.failed.push((name, e.to_string()));
            }
        }
    }
    report
}
