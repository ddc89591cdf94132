//! CMTS 采集：从 running-config 的 description 中列出 modem，再逐个查询 DHCPv4 协商速率

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{ResultTable, System, ACTIVE, INFO_HEADER, NO_DATA};
use crate::error::Result;
use crate::progress::ProgressSlot;
use crate::transport::{PromptMode, TelnetProfile, Transport};

pub const CMD_NO_PAGING: &str = "terminal length 0";
pub const CMD_DESCRIPTIONS: &str = "show running-config verbose | include description";

static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Fa-f0-9]{4}\.[A-Fa-f0-9]{4}\.[A-Fa-f0-9]{4})").unwrap());
static MBPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+Mbps)").unwrap());

/// `Username: ` / `Password: ` 登录，`> ` 提示符，`en` 进入 `# ` 特权模式
pub fn telnet_profile() -> TelnetProfile {
    TelnetProfile::new("Username: ", "Password: ", PromptMode::Fixed(b"> ".to_vec()))
        .with_enable("en", "# ")
}

pub fn modem_command(mac: &str) -> String {
    format!("show cable modem {} verbose | include DHCPv4", mac)
}

/// 一个已配置描述的 cable modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableModem {
    pub mac: String,
    pub description: String,
}

/// 从 description 行中提取 MAC 与引号内的描述，按描述排序
pub fn parse_descriptions(text: &str) -> Vec<CableModem> {
    let mut modems: Vec<CableModem> = text
        .lines()
        .filter_map(|line| {
            let mac = MAC_RE.captures(line)?[1].to_string();
            let description = line.split('"').nth(1).unwrap_or_default().trim().to_string();
            Some(CableModem { mac, description })
        })
        .collect();
    modems.sort_by(|a, b| a.description.cmp(&b.description));
    modems
}

/// 第一个 `NNMbps` 标记
pub fn parse_modem_speed(text: &str) -> Option<String> {
    MBPS_RE.captures(text).map(|c| c[1].to_string())
}

pub struct CmtsSystem {
    transport: Box<dyn Transport>,
}

impl CmtsSystem {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl System for CmtsSystem {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable> {
        self.transport.run(CMD_NO_PAGING).await?;
        let listing = self.transport.run(CMD_DESCRIPTIONS).await?;
        let modems = parse_descriptions(&listing.stdout);

        let mut table = ResultTable::new(INFO_HEADER);
        progress.start(modems.len() as u64, "CMTS");
        for modem in modems {
            match self.transport.run(&modem_command(&modem.mac)).await {
                Ok(out) => match parse_modem_speed(&out.stdout) {
                    Some(speed) => {
                        table.push([modem.description, modem.mac, speed, ACTIVE.to_string()])
                    }
                    None => table.push([
                        modem.description,
                        modem.mac,
                        NO_DATA.to_string(),
                        NO_DATA.to_string(),
                    ]),
                },
                Err(e) => {
                    tracing::warn!(mac = %modem.mac, error = %e, "Cable modem query failed");
                    table.push([modem.description.as_str(), NO_DATA, NO_DATA, NO_DATA]);
                }
            }
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
    use crate::systems::fake::ScriptedTransport;

    const RUNNING: &str = r#"
 cable modem 0011.2233.4455 description "Unit 204"
 cable modem aabb.ccdd.eeff description "Unit 101"
 interface Cable1/0 description "Upstream trunk"
 cable modem 0011.2233.9999 description
"#;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_descriptions_sorted_by_description() {
            let modems = parse_descriptions(RUNNING);
            assert_eq!(modems.len(), 3);
            assert_eq!(modems[0].description, "");
            assert_eq!(modems[1].description, "Unit 101");
            assert_eq!(modems[1].mac, "aabb.ccdd.eeff");
            assert_eq!(modems[2].description, "Unit 204");
        }

        #[test]
        fn test_modem_speed() {
            let out = "DHCPv4 : 10.1.2.3 negotiated 300Mbps / 30Mbps";
            assert_eq!(parse_modem_speed(out).as_deref(), Some("300Mbps"));
            assert_eq!(parse_modem_speed("DHCPv4 : none"), None);
        }
    }

    mod system_tests {
        use super::*;

        #[tokio::test]
        async fn test_rows_for_match_miss_and_error() {
            let transport = ScriptedTransport::new()
                .on(CMD_DESCRIPTIONS, RUNNING)
                .on(&modem_command("aabb.ccdd.eeff"), "DHCPv4 100Mbps")
                .on(&modem_command("0011.2233.4455"), "DHCPv4 offline")
                .fail(&modem_command("0011.2233.9999"), "timeout");
            let mut sys = CmtsSystem::new(Box::new(transport));
            let table = sys.get_info(&ProgressSlot::hidden()).await.unwrap();
            assert_eq!(
                table.rows,
                vec![
                    vec!["", "No Data", "No Data", "No Data"],
                    vec!["Unit 101", "aabb.ccdd.eeff", "100Mbps", "Active"],
                    vec!["Unit 204", "0011.2233.4455", "No Data", "No Data"],
                ]
            );
        }

        #[tokio::test]
        async fn test_listing_failure_aborts_device() {
            let transport = ScriptedTransport::new().fail(CMD_DESCRIPTIONS, "connection reset");
            let mut sys = CmtsSystem::new(Box::new(transport));
            assert!(sys.get_info(&ProgressSlot::hidden()).await.is_err());
        }
    }
}
