//! 设备传输层：SSH 与 Telnet 两种实现共享同一个 `Transport` 抽象

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{NetopsConfig, RetryConfig};
use crate::error::{NetopsError, Result};
use crate::inventory::Credentials;

pub mod ssh;
pub mod telnet;

pub use ssh::SshTransport;
pub use telnet::{PromptMode, TelnetProfile, TelnetTransport};

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssh,
    Telnet,
}

impl TransportKind {
    pub fn default_port(self) -> u16 {
        match self {
            TransportKind::Ssh => 22,
            TransportKind::Telnet => 23,
        }
    }
}

impl FromStr for TransportKind {
    type Err = NetopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(TransportKind::Ssh),
            "telnet" => Ok(TransportKind::Telnet),
            other => Err(NetopsError::inventory(format!("unknown access method '{}'", other))),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ssh => write!(f, "ssh"),
            TransportKind::Telnet => write!(f, "telnet"),
        }
    }
}

/// 单条命令的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出与标准错误合并后的文本
    pub stdout: String,
    /// 始终为空，保留以对齐 (out, err, rc) 的形状
    pub stderr: String,
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
            exit_code: None,
        }
    }
}

/// 单台设备的会话
///
/// 会话由设备任务独占，首次执行命令时建立连接，任务结束时关闭。
#[async_trait]
pub trait Transport: Send {
    async fn run(&mut self, command: &str) -> Result<CommandOutput>;

    /// 列出远端目录中的文件名
    async fn list_files(&mut self, dir: &str) -> Result<Vec<String>> {
        Err(no_file_transfer(dir))
    }

    async fn get_file(&mut self, path: &str) -> Result<Vec<u8>> {
        Err(no_file_transfer(path))
    }

    /// 写入远端文件，必要时创建父目录
    async fn put_file(&mut self, path: &str, _bytes: &[u8]) -> Result<()> {
        Err(no_file_transfer(path))
    }

    /// 尽力关闭，错误只记录不返回
    async fn close(&mut self);
}

fn no_file_transfer(path: &str) -> NetopsError {
    NetopsError::transfer(path, "session does not support file transfer")
}

/// 连接目标
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
}

/// 会话超时与重试参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub read_timeout: Duration,
    pub retry: RetryConfig,
}

impl SessionOptions {
    pub fn from_config(cfg: &NetopsConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.run.connect_timeout_sec),
            command_timeout: Duration::from_secs(cfg.run.command_timeout_sec),
            read_timeout: Duration::from_secs(cfg.run.telnet_read_timeout_sec),
            retry: cfg.retry.clone(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&NetopsConfig::default())
    }
}

/// 按传输方式构造会话（尚未连接）；Telnet 使用设备家族对应的登录画像
pub fn build_transport(
    kind: TransportKind,
    target: Target,
    telnet_profile: Option<TelnetProfile>,
    options: &SessionOptions,
) -> Box<dyn Transport> {
    match kind {
        TransportKind::Ssh => Box::new(SshTransport::new(target, options.clone())),
        TransportKind::Telnet => Box::new(TelnetTransport::new(
            target,
            telnet_profile.unwrap_or_default(),
            options.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_ports() {
        assert_eq!("SSH".parse::<TransportKind>().unwrap(), TransportKind::Ssh);
        assert_eq!(" telnet ".parse::<TransportKind>().unwrap(), TransportKind::Telnet);
        assert!("rlogin".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Ssh.default_port(), 22);
        assert_eq!(TransportKind::Telnet.default_port(), 23);
    }

    struct CommandsOnly;

    #[async_trait]
    impl Transport for CommandsOnly {
        async fn run(&mut self, _command: &str) -> Result<CommandOutput> {
            Ok(CommandOutput::default())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_file_transfer_defaults_to_error() {
        let mut t = CommandsOnly;
        let err = t.put_file("a.rsc", b"x").await.unwrap_err();
        assert!(matches!(err, NetopsError::Transfer { .. }));
        assert!(t.list_files(".").await.is_err());
        assert!(t.get_file("log.1.txt").await.is_err());
    }
}
