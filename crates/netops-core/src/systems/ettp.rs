//! MikroTik (ETTP) 采集：邻居发现 → 按接口拆分视图 → 逐个 modem 嵌套 SSH 读取限速
//!
//! 速率优先级：以太网口协商速率（带 `*`）> Internet 队列被禁用（1000 Mbps）>
//! 详细队列导出中第一条可解析的规则 > 默认 1000 Mbps。

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{ConfigPayload, ResultTable, System, ACTIVE, INACTIVE, INFO_HEADER, NO_DATA};
use crate::config::{EttpConfig, NetopsConfig};
use crate::error::{NetopsError, Result};
use crate::inventory::Credentials;
use crate::mass_config::{import_command, import_failure, remove_command, RunLevel};
use crate::progress::ProgressSlot;
use crate::transport::{SessionOptions, SshTransport, Target, Transport, TransportKind};

/// 接入点接口，不计入 modem
pub const AP_MARKER: &str = "AP_";
pub const MODEM_MARKER: &str = "_Modem";
pub const INTERNET_MARKER: &str = "_INT";
pub const PUBLIC_MARKER: &str = "_Public";

/// 无法从队列推断时的默认速率
pub const DEFAULT_RATE: &str = "1000 Mbps";

pub const CMD_QUEUE_SIMPLE: &str = "/queue simple export";
pub const CMD_QUEUE_VERBOSE: &str = "/queue simple export verbose";
pub const CMD_ETHERNET: &str = "/interface ethernet export";
pub const CMD_IDENTITY: &str = "/system identity print";

/// 配置下发结果表头
pub const CONFIG_HEADER: &[&str] = &["Action", "Status", "Detail"];

pub const STATUS_NO_MODEM_IP: &str = "No Modem IP";
pub const STATUS_UNREACHABLE: &str = "Could Not Connect";

static CONTINUATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\r?\n\s*").unwrap());
static ADD_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*add\b[^\n]*").unwrap());
static INTERNET_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bname="?Internet"?\b"#).unwrap());
static INTERNET_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\btarget=Bridge_Internet\b").unwrap());
static DISABLED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bdisabled=(yes|no)\b").unwrap());
static QUEUE_RATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d+)([MK])?$").unwrap());
static MAX_LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d+)([MK])$").unwrap());
static LINK_SPEED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bspeed=(\d+Mbps)\b").unwrap());
static IDENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*name:\s*(.+?)\s*$").unwrap());

/// 邻居脚本输出中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub identity: String,
    pub interface: String,
    pub ip: String,
    pub mac: String,
}

/// 按 (Identity, Mac) 合并后的 modem 视图；空字符串视为缺失
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemView {
    pub identity: String,
    pub mac: String,
    pub modem_ip: Option<String>,
    pub internet_ip: Option<String>,
    pub public_ip: Option<String>,
}

/// 解析 `identity,interface,ip,mac;...` 格式的邻居输出
pub fn parse_neighbors(text: &str) -> Vec<Neighbor> {
    text.split(';')
        .map(|record| record.split(',').map(str::trim).collect::<Vec<_>>())
        .filter(|fields| !(fields.len() == 1 && fields[0].is_empty()))
        .map(|fields| {
            let field = |i: usize| fields.get(i).copied().unwrap_or_default().to_string();
            Neighbor {
                identity: field(0),
                interface: field(1),
                ip: field(2),
                mac: field(3),
            }
        })
        .collect()
}

/// 去掉接入点行后按接口名拆成三个视图，再按 (Identity, Mac) 外连接
///
/// 结果按键的字典序排列；同一视图内重复的键只取第一次出现的地址。
pub fn merge_views(neighbors: &[Neighbor]) -> Vec<ModemView> {
    let mut merged: BTreeMap<(String, String), ModemView> = BTreeMap::new();
    for n in neighbors.iter().filter(|n| !n.interface.contains(AP_MARKER)) {
        for marker in [MODEM_MARKER, INTERNET_MARKER, PUBLIC_MARKER] {
            if !n.interface.contains(marker) {
                continue;
            }
            let entry = merged
                .entry((n.identity.clone(), n.mac.clone()))
                .or_insert_with(|| ModemView {
                    identity: n.identity.clone(),
                    mac: n.mac.clone(),
                    ..Default::default()
                });
            let field = view_slot(entry, marker);
            if field.is_none() && !n.ip.is_empty() {
                *field = Some(n.ip.clone());
            }
        }
    }
    merged.into_values().collect()
}

fn view_slot<'a>(view: &'a mut ModemView, marker: &str) -> &'a mut Option<String> {
    match marker {
        MODEM_MARKER => &mut view.modem_ip,
        INTERNET_MARKER => &mut view.internet_ip,
        _ => &mut view.public_ip,
    }
}

/// `/queue simple export` 中名为 Internet（或指向 Bridge_Internet）的队列是否被禁用
pub fn is_internet_queue_disabled(simple_export: &str) -> bool {
    let text = CONTINUATION_RE.replace_all(simple_export.trim(), " ");
    let mut candidates: Vec<&str> = ADD_LINE_RE
        .find_iter(&text)
        .map(|m| m.as_str())
        .filter(|line| INTERNET_NAME_RE.is_match(line) || INTERNET_TARGET_RE.is_match(line))
        .collect();
    // 显式 name=Internet 优先
    candidates.sort_by_key(|line| if INTERNET_NAME_RE.is_match(line) { 0 } else { 1 });
    candidates
        .first()
        .and_then(|rule| DISABLED_RE.captures(rule))
        .is_some_and(|c| &c[1] == "yes")
}

/// 一条队列规则：`key=value` 或无值的标志（值为 `None`）
pub type QueueRule = HashMap<String, Option<String>>;

/// 解析 `/queue simple export verbose`：`add` 开始新规则，后续行续接，`/` 开头的段落行忽略
pub fn parse_queue_export_verbose(text: &str) -> Vec<QueueRule> {
    let mut items: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('/') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("add ") {
            if !current.is_empty() {
                items.push(current.join(" "));
                current.clear();
            }
            current.push(rest.trim());
        } else if !current.is_empty() {
            current.push(line);
        }
    }
    if !current.is_empty() {
        items.push(current.join(" "));
    }

    items
        .iter()
        .map(|rule| {
            split_words(rule)
                .into_iter()
                .map(|tok| match tok.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (tok.clone(), None),
                })
                .collect()
        })
        .collect()
}

/// 类 shell 分词：空白分隔，支持单/双引号与反斜杠转义；未闭合的引号按字面收尾
pub fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    cur.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(esc) = chars.next() {
                                if !matches!(esc, '"' | '\\' | '$' | '`') {
                                    cur.push('\\');
                                }
                                cur.push(esc);
                            }
                        }
                        _ => cur.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(esc) = chars.next() {
                    cur.push(esc);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut cur));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                cur.push(c);
            }
        }
    }
    if in_word {
        words.push(cur);
    }
    words
}

fn format_rate(num: &str, unit: Option<&str>) -> String {
    match unit {
        Some(u) if u.eq_ignore_ascii_case("k") => format!("{} Kbps", num),
        _ => format!("{} Mbps", num),
    }
}

/// 从单条队列规则推断速率：优先 `queue=` 类型名（如 `50M_down/...`），其次 `max-limit=`
pub fn rate_from_rule(rule: &QueueRule) -> Option<String> {
    let value = |key: &str| rule.get(key).and_then(|v| v.as_deref());
    let disabled = match rule.get("disabled") {
        Some(Some(v)) => matches!(v.to_ascii_lowercase().as_str(), "yes" | "true" | "on" | "1"),
        // 无值标志等同于 true
        Some(None) => true,
        None => false,
    };
    if disabled {
        return None;
    }

    if let Some(queue) = value("queue").filter(|q| !q.is_empty()) {
        let left = queue.split('/').next().unwrap_or_default();
        let head = left.split('_').next().unwrap_or_default();
        if let Some(c) = QUEUE_RATE_RE.captures(head) {
            return Some(format_rate(&c[1], c.get(2).map(|m| m.as_str())));
        }
    }
    if let Some(limit) = value("max-limit").filter(|l| !l.is_empty()) {
        let left = limit.split('/').next().unwrap_or_default();
        if let Some(c) = MAX_LIMIT_RE.captures(left) {
            return Some(format_rate(&c[1], c.get(2).map(|m| m.as_str())));
        }
    }
    None
}

/// 以太网口导出中第一个协商速率，如 `1000Mbps`
pub fn ethernet_link_speed(ethernet_export: &str) -> Option<String> {
    LINK_SPEED_RE
        .captures(ethernet_export)
        .map(|c| c[1].to_string())
}

/// 由三份导出文本推断 modem 速率
pub fn modem_rate(simple_export: &str, verbose_export: &str, ethernet_export: &str) -> String {
    if let Some(speed) = ethernet_link_speed(ethernet_export) {
        return format!("{}*", speed);
    }
    if is_internet_queue_disabled(simple_export) {
        return DEFAULT_RATE.to_string();
    }
    parse_queue_export_verbose(verbose_export)
        .iter()
        .find_map(rate_from_rule)
        .unwrap_or_else(|| DEFAULT_RATE.to_string())
}

/// `/system identity print` 中的设备名
pub fn parse_identity(output: &str) -> Option<String> {
    IDENTITY_RE
        .captures(output)
        .map(|c| c[1].to_string())
        .filter(|name| !name.is_empty())
}

/// 为单个 modem 建立会话
#[async_trait]
pub trait ModemConnector: Send + Sync {
    async fn connect(&self, modem_ip: &str) -> Result<Box<dyn Transport>>;
}

/// 使用统一 modem 凭据的 SSH 连接器
pub struct SshModemConnector {
    credentials: Credentials,
    options: SessionOptions,
}

impl SshModemConnector {
    /// modem 凭据在构造时解析一次
    pub fn from_config(config: &NetopsConfig, options: SessionOptions) -> Result<Self> {
        let ettp = &config.ettp;
        let credentials = Credentials::from_env(&ettp.modem_user_env, &ettp.modem_pw_env)?;
        Ok(Self {
            credentials,
            options,
        })
    }
}

#[async_trait]
impl ModemConnector for SshModemConnector {
    async fn connect(&self, modem_ip: &str) -> Result<Box<dyn Transport>> {
        let target = Target {
            host: modem_ip.to_string(),
            port: TransportKind::Ssh.default_port(),
            credentials: self.credentials.clone(),
        };
        Ok(Box::new(SshTransport::new(target, self.options.clone())))
    }
}

/// 不访问 modem 的连接器，用于只下发配置的运行
pub struct NoModemAccess;

#[async_trait]
impl ModemConnector for NoModemAccess {
    async fn connect(&self, modem_ip: &str) -> Result<Box<dyn Transport>> {
        Err(NetopsError::connection(modem_ip, "modem access disabled for this run"))
    }
}

pub struct EttpSystem {
    transport: Box<dyn Transport>,
    modems: Arc<dyn ModemConnector>,
    config: EttpConfig,
}

impl EttpSystem {
    pub fn new(
        transport: Box<dyn Transport>,
        modems: Arc<dyn ModemConnector>,
        config: EttpConfig,
    ) -> Self {
        Self {
            transport,
            modems,
            config,
        }
    }

    /// 本地存在脚本文件时发送脚本内容，否则使用回退命令
    fn neighbor_command(&self) -> String {
        let script = Path::new(&self.config.neighbor_script);
        match std::fs::read_to_string(script) {
            Ok(body) if !body.trim().is_empty() => body,
            _ => self.config.fallback_command.clone(),
        }
    }

    async fn read_modem_speed(&mut self, modem_ip: &str) -> Result<String> {
        let mut session = self.modems.connect(modem_ip).await?;
        let outputs = async {
            let simple = session.run(CMD_QUEUE_SIMPLE).await?;
            let verbose = session.run(CMD_QUEUE_VERBOSE).await?;
            let ethernet = session.run(CMD_ETHERNET).await?;
            Ok::<_, crate::error::NetopsError>((simple, verbose, ethernet))
        }
        .await;
        session.close().await;
        let (simple, verbose, ethernet) = outputs?;
        Ok(modem_rate(&simple.stdout, &verbose.stdout, &ethernet.stdout))
    }
}

#[async_trait]
impl System for EttpSystem {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable> {
        let command = self.neighbor_command();
        let output = self.transport.run(&command).await?;
        let modems = merge_views(&parse_neighbors(&output.stdout));
        tracing::debug!(modems = modems.len(), "ETTP neighbors discovered");

        let mut table = ResultTable::new(INFO_HEADER);
        progress.start(modems.len() as u64, "ETTP");
        for modem in modems {
            let row = match (&modem.modem_ip, &modem.internet_ip, &modem.public_ip) {
                (None, _, _) => [NO_DATA.to_string(), STATUS_NO_MODEM_IP.to_string()],
                (Some(_), None, None) => [NO_DATA.to_string(), INACTIVE.to_string()],
                (Some(ip), _, _) => match self.read_modem_speed(ip).await {
                    Ok(rate) => [rate, ACTIVE.to_string()],
                    Err(e) => {
                        tracing::warn!(
                            modem = %ip,
                            identity = %modem.identity,
                            error = %e,
                            "Modem unreachable"
                        );
                        [NO_DATA.to_string(), STATUS_UNREACHABLE.to_string()]
                    }
                },
            };
            let [speed, status] = row;
            table.push([modem.identity, modem.mac, speed, status]);
            progress.update(1);
        }
        Ok(table)
    }

    /// 连接 → 上传脚本 → `/import` → 删除脚本，按 run level 提前结束
    async fn set_config(&mut self, payload: &ConfigPayload, progress: &ProgressSlot) -> Result<ResultTable> {
        let mut table = ResultTable::new(CONFIG_HEADER);
        progress.start(payload.steps(), "CONFIG");

        let identity = self.transport.run(CMD_IDENTITY).await?;
        let name = parse_identity(&identity.stdout).unwrap_or_else(|| "router".to_string());
        table.push(["connect", "ok", name.as_str()]);
        progress.update(1);
        if payload.run_level == RunLevel::DryRun {
            let size = format!("{} bytes", payload.script.len());
            table.push(["render", "ok", size.as_str()]);
            return Ok(table);
        }

        self.transport
            .put_file(&payload.remote_name, payload.script.as_bytes())
            .await?;
        table.push(["upload", "ok", payload.remote_name.as_str()]);
        progress.update(1);
        if payload.run_level == RunLevel::Upload {
            return Ok(table);
        }

        let imported = self.transport.run(&import_command(&payload.remote_name)).await?;
        progress.update(1);
        let failure = import_failure(&imported.stdout);
        if let Some(line) = &failure {
            table.push(["import", "failed", line.as_str()]);
        } else {
            table.push(["import", "ok", ""]);
        }

        if !payload.keep_remote_file {
            match self.transport.run(&remove_command(&payload.remote_name)).await {
                Ok(_) => table.push(["cleanup", "ok", payload.remote_name.as_str()]),
                Err(e) => {
                    tracing::warn!(identity = %name, error = %e, "Failed to remove uploaded script");
                    let reason = e.to_string();
                    table.push(["cleanup", "failed", reason.as_str()]);
                }
            }
            progress.update(1);
        }

        match failure {
            Some(line) => Err(NetopsError::apply(name, line)),
            None => Ok(table),
        }
    }

    async fn close(&mut self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::fake::ScriptedTransport;

    const NEIGHBORS: &str = "\
        101,ether2_Modem,192.168.88.2,AA:BB:CC:00:00:01;\
        101,vlan10_INT,100.64.0.2,AA:BB:CC:00:00:01;\
        101,vlan20_Public,203.0.113.2,AA:BB:CC:00:00:01;\
        102,ether3_Modem,192.168.88.3,AA:BB:CC:00:00:02;\
        103,ether4_Modem,,AA:BB:CC:00:00:03;\
        103,vlan10_INT,100.64.0.3,AA:BB:CC:00:00:03;\
        lobby,wlan_AP_1,192.168.88.50,AA:BB:CC:00:00:99;\
        ";

    mod neighbor_tests {
        use super::*;

        #[test]
        fn test_parse_and_merge() {
            let neighbors = parse_neighbors(NEIGHBORS);
            assert_eq!(neighbors.len(), 7);
            let merged = merge_views(&neighbors);
            assert_eq!(merged.len(), 3);
            assert_eq!(merged[0].identity, "101");
            assert_eq!(merged[0].modem_ip.as_deref(), Some("192.168.88.2"));
            assert_eq!(merged[0].public_ip.as_deref(), Some("203.0.113.2"));
            assert_eq!(merged[1].internet_ip, None);
            // 空 IP 视为缺失
            assert_eq!(merged[2].modem_ip, None);
            assert!(merged.iter().all(|m| m.identity != "lobby"));
        }

        #[test]
        fn test_empty_output() {
            assert!(parse_neighbors("").is_empty());
            assert!(merge_views(&parse_neighbors(" ; ")).is_empty());
        }
    }

    mod queue_tests {
        use super::*;

        #[test]
        fn test_disabled_internet_queue() {
            let simple = "/queue simple\n\
                add max-limit=50M/50M name=Internet target=Bridge_Internet disabled=yes\n\
                add max-limit=5M/5M name=Guest target=Bridge_Guest\n";
            assert!(is_internet_queue_disabled(simple));
        }

        #[test]
        fn test_continuation_lines_joined() {
            let simple = "/queue simple\nadd disabled=yes max-limit=50M/50M \\\n    name=Internet target=Bridge_Internet\n";
            assert!(is_internet_queue_disabled(simple));
        }

        #[test]
        fn test_name_match_preferred_over_target() {
            let simple = "/queue simple\n\
                add name=Legacy target=Bridge_Internet disabled=yes\n\
                add name=\"Internet\" target=ether1 disabled=no\n";
            assert!(!is_internet_queue_disabled(simple));
            assert!(!is_internet_queue_disabled("/queue simple\nadd name=Guest disabled=yes\n"));
        }

        #[test]
        fn test_verbose_rules() {
            let verbose = "# jan/02/2024 by RouterOS\n/queue simple\n\
                add disabled=yes max-limit=10M/10M name=Old\n\
                add max-limit=0/0 name=Internet queue=\"100M_down/100M_up\" \\\n\
                    target=Bridge_Internet\n";
            let rules = parse_queue_export_verbose(verbose);
            assert_eq!(rules.len(), 2);
            assert_eq!(rate_from_rule(&rules[0]), None);
            assert_eq!(rate_from_rule(&rules[1]).as_deref(), Some("100 Mbps"));
        }

        #[test]
        fn test_rate_units() {
            let rule = |s: &str| parse_queue_export_verbose(&format!("add {}", s)).remove(0);
            assert_eq!(rate_from_rule(&rule("queue=512k_down/512k_up")).as_deref(), Some("512 Kbps"));
            assert_eq!(rate_from_rule(&rule("queue=25/25")).as_deref(), Some("25 Mbps"));
            assert_eq!(rate_from_rule(&rule("queue=default max-limit=20M/20M")).as_deref(), Some("20 Mbps"));
            assert_eq!(rate_from_rule(&rule("max-limit=20000000/20000000")), None);
        }

        #[test]
        fn test_modem_rate_precedence() {
            let simple = "add name=Internet disabled=yes";
            let verbose = "add name=Internet max-limit=50M/50M";
            assert_eq!(modem_rate(simple, verbose, ""), "1000 Mbps");
            assert_eq!(modem_rate("", verbose, ""), "50 Mbps");
            assert_eq!(modem_rate("", "", ""), "1000 Mbps");
            let eth = "set [ find default-name=ether1 ] auto-negotiation=no speed=100Mbps";
            assert_eq!(modem_rate(simple, verbose, eth), "100Mbps*");
        }

        #[test]
        fn test_split_words() {
            assert_eq!(split_words(r#"a="b c" d\ e 'f g'"#), vec!["a=b c", "d e", "f g"]);
            assert_eq!(split_words("  "), Vec::<String>::new());
        }
    }

    mod system_tests {
        use super::*;

        struct FakeModems {
            simple: String,
        }

        #[async_trait]
        impl ModemConnector for FakeModems {
            async fn connect(&self, modem_ip: &str) -> Result<Box<dyn Transport>> {
                if modem_ip.ends_with(".3") {
                    return Ok(Box::new(ScriptedTransport::new().fail(CMD_QUEUE_SIMPLE, "reset")));
                }
                Ok(Box::new(
                    ScriptedTransport::new()
                        .on(CMD_QUEUE_SIMPLE, &self.simple)
                        .on(CMD_QUEUE_VERBOSE, "add name=Internet queue=\"25M_down/25M_up\"")
                        .on(CMD_ETHERNET, ""),
                ))
            }
        }

        fn system(neighbors: &str) -> EttpSystem {
            let config = EttpConfig {
                neighbor_script: "/nonexistent/neighbors.rsc".into(),
                ..Default::default()
            };
            EttpSystem::new(
                Box::new(ScriptedTransport::new().on(&config.fallback_command, neighbors)),
                Arc::new(FakeModems {
                    simple: "add name=Internet target=Bridge_Internet disabled=yes".into(),
                }),
                config,
            )
        }

        #[tokio::test]
        async fn test_rows_per_modem_state() {
            let mut sys = system(
                "101,ether2_Modem,192.168.88.2,M1;101,vlan10_INT,100.64.0.2,M1;\
                 102,ether3_Modem,192.168.88.3,M2;102,vlan10_INT,100.64.0.3,M2;\
                 103,ether4_Modem,192.168.88.4,M3;\
                 104,vlan10_INT,100.64.0.5,M4;",
            );
            let table = sys.get_info(&ProgressSlot::hidden()).await.unwrap();
            assert_eq!(table.header, INFO_HEADER);
            assert_eq!(
                table.rows,
                vec![
                    vec!["101", "M1", "1000 Mbps", "Active"],
                    vec!["102", "M2", "No Data", "Could Not Connect"],
                    vec!["103", "M3", "No Data", "Inactive"],
                    vec!["104", "M4", "No Data", "No Modem IP"],
                ]
            );
        }

        fn payload(run_level: RunLevel, keep: bool) -> ConfigPayload {
            ConfigPayload {
                script: "/ip dns set servers=1.1.1.1\n".to_string(),
                remote_name: crate::mass_config::REMOTE_SCRIPT.to_string(),
                run_level,
                keep_remote_file: keep,
            }
        }

        fn router(transport: ScriptedTransport) -> EttpSystem {
            EttpSystem::new(Box::new(transport), Arc::new(NoModemAccess), EttpConfig::default())
        }

        #[tokio::test]
        async fn test_dry_run_only_reads_identity() {
            let transport = ScriptedTransport::new().on(CMD_IDENTITY, "  name: oak-core\n");
            let log = transport.log.clone();
            let files = transport.files.clone();
            let table = router(transport)
                .set_config(&payload(RunLevel::DryRun, false), &ProgressSlot::hidden())
                .await
                .unwrap();
            assert_eq!(table.rows[0], vec!["connect", "ok", "oak-core"]);
            assert_eq!(*log.lock().unwrap(), vec![CMD_IDENTITY]);
            assert!(files.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_apply_uploads_imports_and_cleans_up() {
            let transport = ScriptedTransport::new()
                .on(CMD_IDENTITY, "name: oak-core")
                .on("/import", "Script file loaded and executed successfully");
            let log = transport.log.clone();
            let files = transport.files.clone();
            let table = router(transport)
                .set_config(&payload(RunLevel::Apply, false), &ProgressSlot::hidden())
                .await
                .unwrap();

            let actions: Vec<&str> = table.rows.iter().map(|r| r[0].as_str()).collect();
            assert_eq!(actions, vec!["connect", "upload", "import", "cleanup"]);
            assert_eq!(
                *log.lock().unwrap(),
                vec![
                    CMD_IDENTITY.to_string(),
                    "put __netops_mass_config.rsc".to_string(),
                    "/import file=\"__netops_mass_config.rsc\"".to_string(),
                    "/file remove [ find name=\"__netops_mass_config.rsc\" ]".to_string(),
                ]
            );
            assert_eq!(
                files.lock().unwrap()["__netops_mass_config.rsc"],
                b"/ip dns set servers=1.1.1.1\n".to_vec()
            );
        }

        #[tokio::test]
        async fn test_upload_level_keeps_file_and_skips_import() {
            let transport = ScriptedTransport::new().on(CMD_IDENTITY, "name: r1");
            let log = transport.log.clone();
            router(transport)
                .set_config(&payload(RunLevel::Upload, false), &ProgressSlot::hidden())
                .await
                .unwrap();
            assert!(log.lock().unwrap().iter().all(|c| !c.starts_with("/import") && !c.starts_with("/file")));
        }

        #[tokio::test]
        async fn test_import_failure_is_device_error() {
            let transport = ScriptedTransport::new()
                .on(CMD_IDENTITY, "name: r1")
                .on("/import", "failure: already have such address\n");
            let log = transport.log.clone();
            let err = router(transport)
                .set_config(&payload(RunLevel::Apply, true), &ProgressSlot::hidden())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("already have such address"));
            // 保留远端脚本时不发送删除命令
            assert!(log.lock().unwrap().iter().all(|c| !c.starts_with("/file remove")));
        }

        #[test]
        fn test_parse_identity() {
            assert_eq!(parse_identity("  name: Oak Core \r\n").as_deref(), Some("Oak Core"));
            assert_eq!(parse_identity("bad"), None);
        }

        #[tokio::test]
        async fn test_no_neighbors_is_header_only() {
            let mut sys = system("");
            let table = sys.get_info(&ProgressSlot::hidden()).await.unwrap();
            assert!(table.is_empty());
            assert_eq!(table.header.len(), 4);
        }
    }
}
