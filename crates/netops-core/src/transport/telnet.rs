//! Telnet 会话：登录握手 → 可选 enable → 逐条命令读到提示符
//!
//! `TelnetSession` 对任意 `AsyncRead + AsyncWrite` 流工作，测试中使用 `tokio::io::duplex`。
//! Telnet 不做应用层重试，任何失败直接返回给调用方。

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::{CommandOutput, SessionOptions, Target, Transport};
use crate::error::{NetopsError, Result};
use crate::inventory::Credentials;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// 提示符自动探测最多读取的行数
pub const AUTO_PROMPT_MAX_LINES: usize = 5;
/// 自动探测时每行的等待时间
pub const AUTO_PROMPT_LINE_TIMEOUT: Duration = Duration::from_millis(600);
/// 逐行回退模式下，连续空闲多久视为输出结束
pub const LINE_MODE_IDLE: Duration = Duration::from_millis(600);
const PROMPT_ENDINGS: &[char] = &['#', '>', '$'];

/// 登录后如何确定提示符
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    Fixed(Vec<u8>),
    Auto,
}

/// 进入特权模式的命令及其提示符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableStep {
    pub command: String,
    pub prompt: Vec<u8>,
}

/// 某一设备家族的 Telnet 登录画像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelnetProfile {
    pub username_prompt: Vec<u8>,
    pub password_prompt: Vec<u8>,
    pub prompt: PromptMode,
    pub enable: Option<EnableStep>,
}

impl Default for TelnetProfile {
    fn default() -> Self {
        Self {
            username_prompt: b"login: ".to_vec(),
            password_prompt: b"password: ".to_vec(),
            prompt: PromptMode::Auto,
            enable: None,
        }
    }
}

impl TelnetProfile {
    pub fn new(username_prompt: &str, password_prompt: &str, prompt: PromptMode) -> Self {
        Self {
            username_prompt: username_prompt.as_bytes().to_vec(),
            password_prompt: password_prompt.as_bytes().to_vec(),
            prompt,
            enable: None,
        }
    }

    pub fn with_enable(mut self, command: &str, prompt: &str) -> Self {
        self.enable = Some(EnableStep {
            command: command.to_string(),
            prompt: prompt.as_bytes().to_vec(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationState {
    Data,
    Iac,
    Verb(u8),
    Sub,
    SubIac,
}

/// 在任意字节流上运行的 Telnet 协议状态机
pub struct TelnetSession<S> {
    stream: S,
    buf: Vec<u8>,
    state: NegotiationState,
    prompt: Option<Vec<u8>>,
    read_timeout: Duration,
    host: String,
}

impl<S> TelnetSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, host: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            state: NegotiationState::Data,
            prompt: None,
            read_timeout,
            host: host.into(),
        }
    }

    /// 当前提示符；`None` 表示处于逐行回退模式
    pub fn prompt(&self) -> Option<&[u8]> {
        self.prompt.as_deref()
    }

    /// 登录握手，随后确定提示符并按需进入特权模式
    pub async fn login(&mut self, profile: &TelnetProfile, creds: &Credentials) -> Result<()> {
        self.read_until(&profile.username_prompt, self.read_timeout).await?;
        self.write_line(&creds.username).await?;
        self.read_until(&profile.password_prompt, self.read_timeout).await?;
        self.write_line(&creds.password).await?;

        match &profile.prompt {
            PromptMode::Fixed(prompt) => {
                let markers = [prompt.as_slice(), profile.username_prompt.as_slice()];
                let (which, _) = self.read_until_any(&markers, self.read_timeout).await?;
                if which == 1 {
                    return Err(NetopsError::authentication(&self.host));
                }
                self.prompt = Some(prompt.clone());
            }
            PromptMode::Auto => self.detect_prompt().await?,
        }

        if let Some(enable) = &profile.enable {
            self.write_line(&enable.command).await?;
            self.read_until(&enable.prompt, self.read_timeout).await?;
            self.prompt = Some(enable.prompt.clone());
        }
        tracing::debug!(
            host = %self.host,
            prompt = ?self.prompt.as_deref().map(String::from_utf8_lossy),
            "Telnet login complete"
        );
        Ok(())
    }

    /// 发送空行，读取少量行，取最后一个以 `#`/`>`/`$` 结尾的行作为提示符
    pub async fn detect_prompt(&mut self) -> Result<()> {
        self.write_raw(b"\n").await?;
        let mut found = None;
        for _ in 0..AUTO_PROMPT_MAX_LINES {
            let line = match self.read_until(b"\n", AUTO_PROMPT_LINE_TIMEOUT).await {
                Ok(line) => line,
                // 提示符本身没有换行，超时后检查残留的半行
                Err(NetopsError::Timeout { .. }) => std::mem::take(&mut self.buf),
                Err(e) => return Err(e),
            };
            let text = String::from_utf8_lossy(&line);
            let candidate = text.trim_end_matches(['\r', '\n']);
            if candidate.trim_end().ends_with(PROMPT_ENDINGS) {
                found = Some(candidate.trim_start().as_bytes().to_vec());
            }
            if found.is_some() && self.buf.is_empty() {
                break;
            }
        }
        if found.is_none() {
            // 探测结束后才到达的提示符不能混进第一条命令的输出
            let late = self.read_until_idle(LINE_MODE_IDLE).await?;
            found = late_prompt(&String::from_utf8_lossy(&late));
        }
        if found.is_none() {
            tracing::debug!(host = %self.host, "No prompt detected, falling back to line reads");
        }
        self.prompt = found;
        Ok(())
    }

    /// 执行一条命令，返回去掉回显行和提示符的输出
    pub async fn run(&mut self, command: &str) -> Result<String> {
        self.write_line(command).await?;
        let raw = match self.prompt.clone() {
            Some(prompt) => {
                let mut out = self.read_until(&prompt, self.read_timeout).await?;
                out.truncate(out.len() - prompt.len());
                out
            }
            None => self.read_until_idle(LINE_MODE_IDLE).await?,
        };
        Ok(strip_echo(&String::from_utf8_lossy(&raw), command))
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(host = %self.host, error = %e, "Telnet shutdown failed");
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.write_raw(&bytes).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| NetopsError::connection(&self.host, e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| NetopsError::connection(&self.host, e))
    }

    /// 读到 `marker`（含）为止，返回消费的字节
    pub async fn read_until(&mut self, marker: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let (_, out) = self.read_until_any(&[marker], timeout).await?;
        Ok(out)
    }

    /// 读到任一标记出现为止，返回最早出现的标记下标及消费的字节
    async fn read_until_any(
        &mut self,
        markers: &[&[u8]],
        timeout: Duration,
    ) -> Result<(usize, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        loop {
            let hit = markers
                .iter()
                .enumerate()
                .filter_map(|(i, m)| find(&self.buf, m).map(|pos| (pos + m.len(), i)))
                .min();
            if let Some((end, which)) = hit {
                let out: Vec<u8> = self.buf.drain(..end).collect();
                return Ok((which, out));
            }
            self.fill(deadline, timeout).await?;
        }
    }

    /// 逐行回退模式：持续读取直到空闲超过 `idle`
    async fn read_until_idle(&mut self, idle: Duration) -> Result<Vec<u8>> {
        loop {
            let deadline = Instant::now() + idle;
            match self.fill(deadline, idle).await {
                Ok(()) => continue,
                Err(NetopsError::Timeout { .. }) => return Ok(std::mem::take(&mut self.buf)),
                Err(e) => return Err(e),
            }
        }
    }

    async fn fill(&mut self, deadline: Instant, timeout: Duration) -> Result<()> {
        let mut chunk = [0u8; 4096];
        let n = match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                return Err(NetopsError::connection(&self.host, "connection closed by peer"));
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(NetopsError::connection(&self.host, e)),
            Err(_) => {
                return Err(NetopsError::timeout(
                    format!("telnet read from {}", self.host),
                    timeout.as_secs(),
                ))
            }
        };
        let replies = self.absorb(&chunk[..n]);
        if !replies.is_empty() {
            self.write_raw(&replies).await?;
        }
        Ok(())
    }

    /// 剥离 IAC 协商序列，数据写入缓冲区；对所有选项一律拒绝
    fn absorb(&mut self, input: &[u8]) -> Vec<u8> {
        let mut replies = Vec::new();
        for &b in input {
            self.state = match (self.state, b) {
                (NegotiationState::Data, IAC) => NegotiationState::Iac,
                (NegotiationState::Data, b'\r') => NegotiationState::Data,
                (NegotiationState::Data, _) => {
                    self.buf.push(b);
                    NegotiationState::Data
                }
                (NegotiationState::Iac, IAC) => {
                    self.buf.push(IAC);
                    NegotiationState::Data
                }
                (NegotiationState::Iac, DO | DONT | WILL | WONT) => NegotiationState::Verb(b),
                (NegotiationState::Iac, SB) => NegotiationState::Sub,
                (NegotiationState::Iac, _) => NegotiationState::Data,
                (NegotiationState::Verb(verb), opt) => {
                    match verb {
                        DO => replies.extend_from_slice(&[IAC, WONT, opt]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, opt]),
                        _ => {}
                    }
                    NegotiationState::Data
                }
                (NegotiationState::Sub, IAC) => NegotiationState::SubIac,
                (NegotiationState::Sub, _) => NegotiationState::Sub,
                (NegotiationState::SubIac, SE) => NegotiationState::Data,
                (NegotiationState::SubIac, _) => NegotiationState::Sub,
            };
        }
        replies
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// 设备会回显命令，输出的第一行若包含命令文本则丢弃
pub fn strip_echo(raw: &str, command: &str) -> String {
    let command = command.trim();
    match raw.split_once('\n') {
        Some((first, rest)) if !command.is_empty() && first.contains(command) => rest.to_string(),
        None if !command.is_empty() && raw.contains(command) => String::new(),
        _ => raw.to_string(),
    }
}

/// 基于 TCP 的 Telnet 传输，首次执行命令时才建立连接并登录
pub struct TelnetTransport {
    target: Target,
    profile: TelnetProfile,
    options: SessionOptions,
    session: Option<TelnetSession<TcpStream>>,
}

impl TelnetTransport {
    pub fn new(target: Target, profile: TelnetProfile, options: SessionOptions) -> Self {
        Self {
            target,
            profile,
            options,
            session: None,
        }
    }

    async fn session(&mut self) -> Result<&mut TelnetSession<TcpStream>> {
        if self.session.is_none() {
            let host = self.target.host.clone();
            let connect = TcpStream::connect((host.as_str(), self.target.port));
            let stream = tokio::time::timeout(self.options.connect_timeout, connect)
                .await
                .map_err(|_| {
                    NetopsError::timeout(
                        format!("telnet connect to {}", host),
                        self.options.connect_timeout.as_secs(),
                    )
                })?
                .map_err(|e| NetopsError::connection(&host, e))?;
            let mut session = TelnetSession::new(stream, host, self.options.read_timeout);
            session.login(&self.profile, &self.target.credentials).await?;
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| NetopsError::internal("telnet session missing after login"))
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        let session = self.session().await?;
        tracing::trace!(command, "telnet exec");
        Ok(CommandOutput::text(session.run(command).await?))
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown().await;
        }
    }
}

/// 空闲读取内容中最后一个非空行，若像提示符则采用
fn late_prompt(text: &str) -> Option<Vec<u8>> {
    text.lines()
        .map(str::trim_start)
        .filter(|l| !l.trim().is_empty())
        .last()
        .filter(|l| l.trim_end().ends_with(PROMPT_ENDINGS))
        .map(|l| l.as_bytes().to_vec())
}
