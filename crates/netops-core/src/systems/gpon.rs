//! GPON OLT 采集
//!
//! 枚举槽位 → 每槽位扫描固定数量的端口描述 → 对有描述的 ONU 读取 FSAN 与 GEM 端口流量模板。
//! 速率取去掉哨兵值后最小的模板编号；存在多个模板时写入 Notes。

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use super::{ResultTable, System, ACTIVE, COL_NOTES, INACTIVE, INFO_HEADER};
use crate::config::GponConfig;
use crate::error::Result;
use crate::progress::ProgressSlot;
use crate::transport::{PromptMode, TelnetProfile, Transport};

pub const CMD_NO_PAGING: &str = "setline 0";
pub const CMD_SLOTS: &str = "slots";

/// 未配置模板时的速率列
pub const SPEED_DISABLED: &str = "INT Disabled";
/// 空描述占位
pub const EMPTY_DESCRIPTION: &str = "-";

/// 长行（同时包含 ONU 与 GEM 列）的 token 数
pub const FULL_ROW_TOKENS: usize = 13;
/// 长行中模板所在列
pub const FULL_ROW_PROFILE_INDEX: usize = 3;
/// 续行中模板所在列
pub const CONTINUATION_PROFILE_INDEX: usize = 2;
/// 表头行的首个 token
pub const HEADER_TOKENS: &[&str] = &["onu", "gpononu", "fixed", "traf"];

static SLOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(\d+):").unwrap());
static PORT_DESC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:-\d+){3})/\S+\s+(\S+)").unwrap());
static ONU_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:-\d+){3}$").unwrap());
static FSAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]{4}\s?[A-Za-z0-9]{6,12})").unwrap());

/// GPON 与 DSL 机框共用：`login: ` / `password: `，`> ` 提示符
pub fn telnet_profile() -> TelnetProfile {
    TelnetProfile::new("login: ", "password: ", PromptMode::Fixed(b"> ".to_vec()))
}

/// `slots` 输出中的槽位号
pub fn parse_slots(text: &str) -> Vec<String> {
    SLOT_RE.captures_iter(text).map(|c| c[1].to_string()).collect()
}

/// `port description list` 输出中带描述的端口：(原始接口名, 描述)
pub fn parse_port_descriptions(text: &str) -> Vec<(String, String)> {
    text.trim()
        .lines()
        .filter_map(|line| {
            let c = PORT_DESC_RE.captures(line)?;
            let desc = c[2].to_string();
            (desc != EMPTY_DESCRIPTION).then(|| (c[1].to_string(), desc))
        })
        .collect()
}

/// `1-9-4-289` → `9/4/289`
pub fn format_port_name(interface: &str) -> String {
    let parts: Vec<&str> = interface.split('-').collect();
    parts[parts.len().saturating_sub(3)..].join("/")
}

/// `onu show` 输出中的 FSAN，如 `ZNTS 03E3B53F`
pub fn parse_fsan(text: &str) -> String {
    FSAN_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default()
}

/// `gpononu gemports` 输出中的全部流量模板编号
///
/// 跳过分隔线、表头和提示符；只接受含 ONU/GEM 标识的行；按 token 数决定模板所在列。
pub fn parse_traf_prof(text: &str) -> Vec<u32> {
    text.lines()
        .filter_map(|raw| {
            let parts: Vec<&str> = raw.split_whitespace().collect();
            let head = parts.first()?.to_ascii_lowercase();
            let skip = head.starts_with('=')
                || HEADER_TOKENS.contains(&head.as_str())
                || head.ends_with('>');
            if skip {
                return None;
            }
            if !parts.iter().any(|p| ONU_ID_RE.is_match(p)) {
                return None;
            }
            let index = if parts.len() == FULL_ROW_TOKENS {
                FULL_ROW_PROFILE_INDEX
            } else {
                CONTINUATION_PROFILE_INDEX
            };
            let token = parts.get(index)?;
            if token.chars().all(|c| c.is_ascii_digit()) {
                token.parse().ok()
            } else {
                None
            }
        })
        .collect()
}

/// 去掉哨兵值后取最小模板作为速率；多个模板时给出备注（含摄像头模板时特别说明）
pub fn pick_speed_and_note(values: &[u32], config: &GponConfig) -> (Option<String>, String) {
    let valid: BTreeSet<u32> = values
        .iter()
        .copied()
        .filter(|v| !config.sentinel_profiles.contains(v))
        .collect();
    let Some(&speed) = valid.first() else {
        return (None, String::new());
    };
    let note = if valid.len() > 1 {
        if valid.contains(&config.camera_profile) && speed != config.camera_profile {
            "Camera profile present".to_string()
        } else {
            let list: Vec<String> = valid.iter().map(u32::to_string).collect();
            format!("Multiple profiles: {}", list.join(", "))
        }
    } else {
        String::new()
    };
    (Some(format!("{} Mbps", speed)), note)
}

pub struct GponSystem {
    transport: Box<dyn Transport>,
    config: GponConfig,
}

impl GponSystem {
    pub fn new(transport: Box<dyn Transport>, config: GponConfig) -> Self {
        Self { transport, config }
    }

    async fn discover_ports(&mut self) -> Result<Vec<(String, String)>> {
        let slots = parse_slots(&self.transport.run(CMD_SLOTS).await?.stdout);
        tracing::debug!(slots = ?slots, "GPON slots discovered");
        let mut ports = Vec::new();
        for slot in &slots {
            for port in 1..=self.config.ports_per_slot {
                let out = self
                    .transport
                    .run(&format!("port description list 1/{}/{}", slot, port))
                    .await?;
                ports.extend(
                    parse_port_descriptions(&out.stdout)
                        .into_iter()
                        .map(|(iface, desc)| (format_port_name(&iface), desc)),
                );
            }
        }
        Ok(ports)
    }

    /// 单个 ONU 的查询失败只留空对应字段
    async fn run_tolerant(&mut self, command: &str) -> String {
        match self.transport.run(command).await {
            Ok(out) => out.stdout,
            Err(e) => {
                tracing::debug!(command, error = %e, "GPON query failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl System for GponSystem {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable> {
        if let Err(e) = self.transport.run(CMD_NO_PAGING).await {
            tracing::debug!(error = %e, "setline not supported");
        }
        let ports = self.discover_ports().await?;

        let mut header = INFO_HEADER.to_vec();
        header.push(COL_NOTES);
        let mut table = ResultTable::new(&header);
        progress.start(ports.len() as u64, "GPON");
        for (port, unit) in ports {
            let fsan = parse_fsan(&self.run_tolerant(&format!("onu show {}", port)).await);
            let gem = self
                .run_tolerant(&format!("gpononu gemports 1/{}/gpononu", port))
                .await;
            let (speed, note) = pick_speed_and_note(&parse_traf_prof(&gem), &self.config);
            let status = if speed.is_some() { ACTIVE } else { INACTIVE };
            tracing::trace!(port = %port, speed = ?speed, note = %note, "GPON port parsed");
            table.push([
                unit,
                fsan,
                speed.unwrap_or_else(|| SPEED_DISABLED.to_string()),
                status.to_string(),
                note,
            ]);
            progress.update(1);
        }
        Ok(table)
    }

    async fn close(&mut self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetopsError;
    use crate::systems::fake::ScriptedTransport;

    const GEMPORTS: &str = "\
                                            Fixed    Traf
ONU        GemPort      Name       Traf Prof  ...
========== ============ =========  =========
1-9-4-289  1-9-4-501  data 512 a b c d e f g h i
1-9-4-289  1-9-4-502  data 50  a b c d e f g h i
           1-9-4-503  vid  1000
           1-9-4-504  mgmt 0
zSH>
";

    mod parse_tests {
        use super::*;

        #[test]
        fn test_pick_speed_and_note_camera() {
            let cfg = GponConfig::default();
            assert_eq!(
                pick_speed_and_note(&[512, 0, 50, 1000], &cfg),
                (Some("50 Mbps".to_string()), "Camera profile present".to_string())
            );
        }

        #[test]
        fn test_pick_speed_and_note_variants() {
            let cfg = GponConfig::default();
            assert_eq!(pick_speed_and_note(&[0, 1, 512], &cfg), (None, String::new()));
            assert_eq!(
                pick_speed_and_note(&[100, 100], &cfg),
                (Some("100 Mbps".to_string()), String::new())
            );
            assert_eq!(
                pick_speed_and_note(&[200, 50], &cfg),
                (Some("50 Mbps".to_string()), "Multiple profiles: 50, 200".to_string())
            );
            assert_eq!(
                pick_speed_and_note(&[1000], &cfg),
                (Some("1000 Mbps".to_string()), String::new())
            );
        }

        #[test]
        fn test_traf_prof_column_heuristic() {
            // 13 token 的长行取第 4 列，续行取第 3 列
            assert_eq!(parse_traf_prof(GEMPORTS), vec![512, 50, 1000, 0]);
        }

        #[test]
        fn test_port_descriptions_skip_placeholder() {
            let out = "1-9-4-289/gpononu   Unit_101\n1-9-4-290/gpononu   -\njunk line\n";
            let ports = parse_port_descriptions(out);
            assert_eq!(ports, vec![("1-9-4-289".to_string(), "Unit_101".to_string())]);
            assert_eq!(format_port_name("1-9-4-289"), "9/4/289");
        }

        #[test]
        fn test_slots_and_fsan() {
            assert_eq!(parse_slots("1: GPON OLT\n  12: GPON OLT\nfoo: bar\n"), vec!["1", "12"]);
            assert_eq!(parse_fsan("Serial Number: ZNTS 03E3B53F\n"), "ZNTS 03E3B53F");
            assert_eq!(parse_fsan("no onu"), "");
        }
    }

    mod system_tests {
        use super::*;

        #[tokio::test]
        async fn test_single_port_flow() {
            let transport = ScriptedTransport::new()
                .on(CMD_SLOTS, "9: GPON\n")
                .on("port description list 1/9/4", "1-9-4-289/gpononu   Unit_101\n")
                .on("onu show 9/4/289", "Serial: ZNTS 03E3B53F")
                .fail("gpononu gemports 1/9/4/289/gpononu", "timeout");
            let cfg = GponConfig {
                ports_per_slot: 4,
                ..Default::default()
            };
            let mut sys = GponSystem::new(Box::new(transport), cfg);
            let table = sys.get_info(&ProgressSlot::hidden()).await.unwrap();
            assert_eq!(table.header.last().map(String::as_str), Some("Notes"));
            assert_eq!(
                table.rows,
                vec![vec!["Unit_101", "ZNTS 03E3B53F", "INT Disabled", "Inactive", ""]]
            );
        }

        #[tokio::test]
        async fn test_no_slots_is_header_only() {
            let mut sys = GponSystem::new(Box::new(ScriptedTransport::new()), GponConfig::default());
            let table = sys.get_info(&ProgressSlot::hidden()).await.unwrap();
            assert!(table.is_empty());
            assert_eq!(table.header.len(), 5);
        }

        #[tokio::test]
        async fn test_slot_listing_failure_aborts_device() {
            let transport = ScriptedTransport::new().fail(CMD_SLOTS, "connection reset");
            let mut sys = GponSystem::new(Box::new(transport), GponConfig::default());
            let err = sys.get_info(&ProgressSlot::hidden()).await.unwrap_err();
            assert!(matches!(err, NetopsError::Connection { .. }));
        }
    }
}
