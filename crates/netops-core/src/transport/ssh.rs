//! SSH 传输（russh）
//!
//! 首次执行命令时建立连接并做密码认证；每条命令使用独立的 session channel。
//! 任何失败都会断开连接，退避后整条命令重新执行，最多 `retry.attempts` 次。
//! 文件读写走同一连接上的 SFTP 子系统，重试规则相同。

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{CommandOutput, SessionOptions, Target, Transport};
use crate::backoff::RetryState;
use crate::error::{NetopsError, Result};

/// 客户端回调：设备会重置主机密钥，因此接受任何服务器公钥
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy)]
enum FileOp<'a> {
    List(&'a str),
    Get(&'a str),
    Put(&'a str, &'a [u8]),
}

impl FileOp<'_> {
    fn path(&self) -> &str {
        match self {
            FileOp::List(p) | FileOp::Get(p) | FileOp::Put(p, _) => p,
        }
    }
}

enum FileReply {
    Names(Vec<String>),
    Bytes(Vec<u8>),
    Done,
}

pub struct SshTransport {
    target: Target,
    options: SessionOptions,
    handle: Option<Handle<AcceptAnyHostKey>>,
}

impl SshTransport {
    pub fn new(target: Target, options: SessionOptions) -> Self {
        Self {
            target,
            options,
            handle: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    async fn connect(&mut self) -> Result<&mut Handle<AcceptAnyHostKey>> {
        if self.handle.is_none() {
            let host = self.target.host.clone();
            let timeout = self.options.connect_timeout;
            let config = Arc::new(client::Config {
                inactivity_timeout: Some(self.options.command_timeout),
                ..Default::default()
            });

            let connect = client::connect(config, (host.as_str(), self.target.port), AcceptAnyHostKey);
            let mut handle = tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| NetopsError::timeout(format!("ssh connect to {}", host), timeout.as_secs()))?
                .map_err(|e| NetopsError::connection(&host, e))?;

            let creds = &self.target.credentials;
            let auth = handle.authenticate_password(creds.username.clone(), creds.password.clone());
            let accepted = tokio::time::timeout(timeout, auth)
                .await
                .map_err(|_| NetopsError::timeout(format!("ssh auth to {}", host), timeout.as_secs()))?
                .map_err(|e| NetopsError::connection(&host, e))?;
            if !accepted {
                return Err(NetopsError::authentication(&host));
            }
            tracing::debug!(host = %host, port = self.target.port, "SSH session established");
            self.handle = Some(handle);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| NetopsError::internal("ssh handle missing after connect"))
    }

    async fn exec_once(&mut self, command: &str) -> Result<CommandOutput> {
        let host = self.target.host.clone();
        let timeout = self.options.command_timeout;
        let handle = self.connect().await?;

        let exec = async {
            let mut channel = handle.channel_open_session().await?;
            channel.exec(true, command).await?;

            let mut out = Vec::new();
            let mut exit_code = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => out.extend_from_slice(data),
                    // stderr 合并到输出中
                    ChannelMsg::ExtendedData { ref data, .. } => out.extend_from_slice(data),
                    ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                    _ => {}
                }
            }
            Ok::<_, russh::Error>(CommandOutput {
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::new(),
                exit_code,
            })
        };

        tokio::time::timeout(timeout, exec)
            .await
            .map_err(|_| NetopsError::timeout(format!("ssh exec on {}", host), timeout.as_secs()))?
            .map_err(|e| NetopsError::connection(&host, e))
    }

    async fn exec_with_retry(&mut self, command: &str) -> Result<CommandOutput> {
        let mut retry = RetryState::new(&self.options.retry);
        loop {
            match self.exec_once(command).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    // 连接状态未知，下次尝试重新建立
                    self.close().await;
                    match retry.on_failure(&e) {
                        Some(wait) => {
                            tracing::warn!(
                                host = %self.target.host,
                                command,
                                attempt = retry.attempt() - 1,
                                wait_ms = wait.as_millis() as u64,
                                error = %e,
                                "SSH command failed, retrying"
                            );
                            tokio::time::sleep(wait).await;
                        }
                        None => return Err(e),
                    }
                }
            }
        }
    }

    /// 在当前连接上打开 SFTP 子系统
    async fn sftp(&mut self) -> Result<SftpSession> {
        let host = self.target.host.clone();
        let timeout = self.options.connect_timeout;
        let handle = self.connect().await?;
        let open = async {
            let channel = handle.channel_open_session().await?;
            channel.request_subsystem(true, "sftp").await?;
            Ok::<_, russh::Error>(channel)
        };
        let channel = tokio::time::timeout(timeout, open)
            .await
            .map_err(|_| NetopsError::timeout(format!("sftp open on {}", host), timeout.as_secs()))?
            .map_err(|e| NetopsError::transfer(&host, e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| NetopsError::transfer(&host, e))
    }

    async fn file_op_once(&mut self, op: FileOp<'_>) -> Result<FileReply> {
        let host = self.target.host.clone();
        let timeout = self.options.command_timeout;
        let sftp = self.sftp().await?;
        let fail = |e: russh_sftp::client::error::Error| NetopsError::transfer(&host, e);

        let work = async {
            match op {
                FileOp::List(dir) => {
                    let entries = sftp.read_dir(dir).await.map_err(fail)?;
                    Ok::<_, NetopsError>(FileReply::Names(entries.map(|e| e.file_name()).collect()))
                }
                FileOp::Get(path) => {
                    let mut file = sftp.open(path).await.map_err(fail)?;
                    let mut buf = Vec::new();
                    file.read_to_end(&mut buf).await?;
                    Ok(FileReply::Bytes(buf))
                }
                FileOp::Put(path, bytes) => {
                    if let Some((dir, _)) = path.rsplit_once('/') {
                        for prefix in dir_prefixes(dir) {
                            if sftp.metadata(prefix.as_str()).await.is_ok() {
                                continue;
                            }
                            // 并发创建或权限问题交给随后的写入来报告
                            if let Err(e) = sftp.create_dir(prefix.as_str()).await {
                                tracing::debug!(host = %host, dir = %prefix, error = %e, "SFTP mkdir failed");
                            }
                        }
                    }
                    let mut file = sftp.create(path).await.map_err(fail)?;
                    file.write_all(bytes).await?;
                    file.shutdown().await?;
                    Ok(FileReply::Done)
                }
            }
        };
        let outcome = tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| NetopsError::timeout(format!("sftp {} on {}", op.path(), host), timeout.as_secs()));
        if let Err(e) = sftp.close().await {
            tracing::debug!(host = %host, error = %e, "SFTP close failed");
        }
        outcome?
    }

    async fn file_op(&mut self, op: FileOp<'_>) -> Result<FileReply> {
        let mut retry = RetryState::new(&self.options.retry);
        loop {
            match self.file_op_once(op).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    self.close().await;
                    match retry.on_failure(&e) {
                        Some(wait) => {
                            tracing::warn!(
                                host = %self.target.host,
                                path = op.path(),
                                attempt = retry.attempt() - 1,
                                wait_ms = wait.as_millis() as u64,
                                error = %e,
                                "SFTP operation failed, retrying"
                            );
                            tokio::time::sleep(wait).await;
                        }
                        None => return Err(e),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        tracing::trace!(host = %self.target.host, command, "ssh exec");
        self.exec_with_retry(command).await
    }

    async fn list_files(&mut self, dir: &str) -> Result<Vec<String>> {
        match self.file_op(FileOp::List(dir)).await? {
            FileReply::Names(names) => Ok(names),
            _ => Err(NetopsError::internal("unexpected sftp reply to list")),
        }
    }

    async fn get_file(&mut self, path: &str) -> Result<Vec<u8>> {
        match self.file_op(FileOp::Get(path)).await? {
            FileReply::Bytes(bytes) => Ok(bytes),
            _ => Err(NetopsError::internal("unexpected sftp reply to get")),
        }
    }

    async fn put_file(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        tracing::trace!(host = %self.target.host, path, bytes = bytes.len(), "sftp put");
        match self.file_op(FileOp::Put(path, bytes)).await? {
            FileReply::Done => Ok(()),
            _ => Err(NetopsError::internal("unexpected sftp reply to put")),
        }
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let bye = handle.disconnect(Disconnect::ByApplication, "", "English");
            match tokio::time::timeout(Duration::from_secs(2), bye).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(host = %self.target.host, error = %e, "SSH disconnect failed"),
                Err(_) => tracing::debug!(host = %self.target.host, "SSH disconnect timed out"),
            }
        }
    }
}

/// 逐级目录前缀：`/srv/a/b` → `/srv`, `/srv/a`, `/srv/a/b`
pub fn dir_prefixes(dir: &str) -> Vec<String> {
    let mut current = String::new();
    if dir.starts_with('/') {
        current.push('/');
    }
    let mut prefixes = Vec::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Credentials;

    #[test]
    fn test_dir_prefixes() {
        assert_eq!(dir_prefixes("/srv/a/b"), vec!["/srv", "/srv/a", "/srv/a/b"]);
        assert_eq!(dir_prefixes("reports//daily/"), vec!["reports", "reports/daily"]);
        assert!(dir_prefixes("/").is_empty());
    }

    fn unreachable() -> SshTransport {
        let target = Target {
            host: "127.0.0.1".into(),
            // 端口 1 通常没有监听
            port: 1,
            credentials: Credentials {
                username: "u".into(),
                password: "p".into(),
            },
        };
        let mut options = SessionOptions::default();
        options.connect_timeout = Duration::from_secs(2);
        options.retry.attempts = 1;
        SshTransport::new(target, options)
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let mut t = unreachable();
        let err = t.run("/export").await.unwrap_err();
        assert!(err.is_retriable(), "unexpected error: {err}");
        t.close().await;
    }

    #[tokio::test]
    async fn test_put_file_needs_session() {
        let mut t = unreachable();
        assert!(t.put_file("/srv/reports/a.xlsx", b"x").await.is_err());
        assert!(t.list_files(".").await.is_err());
    }
}
