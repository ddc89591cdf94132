//! DSL 机框采集：每个槽位固定端口数，逐端口读取 VDSL 统计与端口描述

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::gpon::{parse_slots, CMD_NO_PAGING, CMD_SLOTS};
use super::{ResultTable, System, ACTIVE, INACTIVE, INFO_HEADER};
use crate::config::DslConfig;
use crate::error::Result;
use crate::progress::ProgressSlot;
use crate::transport::Transport;

pub const STATUS_ERROR: &str = "Error";

static DESCRIPTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Description:\s+(.*)").unwrap());

/// `dslstat -v` 中关心的字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DslStat {
    pub active: bool,
    pub rate: Option<String>,
    pub serial: String,
}

/// 比特率向上取整为 Mbps
pub fn bps_to_mbps_ceil(bps: u64) -> u64 {
    bps.div_ceil(1_000_000)
}

/// 按行前缀提取：值为最后一个 `.` 之后的部分（设备用点号填充对齐）
pub fn parse_dslstat(text: &str) -> DslStat {
    let mut stat = DslStat::default();
    for line in text.lines().map(str::trim) {
        let value = line.rsplit('.').next().unwrap_or_default().trim();
        if line.starts_with("AdminStatus") {
            stat.active = value.eq_ignore_ascii_case("up");
        } else if line.starts_with("DslDownLineRate") {
            if let Ok(bps) = value.parse::<u64>() {
                stat.rate = Some(format!("{} Mbps", bps_to_mbps_ceil(bps)));
            }
        } else if line.starts_with("serialNumber") {
            stat.serial = value.to_string();
        }
    }
    stat
}

pub fn parse_port_description(text: &str) -> Option<String> {
    DESCRIPTION_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
}

pub struct DslSystem {
    transport: Box<dyn Transport>,
    config: DslConfig,
}

impl DslSystem {
    pub fn new(transport: Box<dyn Transport>, config: DslConfig) -> Self {
        Self { transport, config }
    }

    async fn port_row(&mut self, slot: &str, port: u32) -> Result<[String; 4]> {
        let stats = self
            .transport
            .run(&format!("dslstat 1-{}-{}-0/vdsl -v", slot, port))
            .await?;
        let stat = parse_dslstat(&stats.stdout);
        let desc = self
            .transport
            .run(&format!("port show 1/{}/{}/0/vdsl", slot, port))
            .await?;
        // 没有描述时以端口号标识
        let identity = parse_port_description(&desc.stdout)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| port_label(slot, port));
        let status = if stat.active { ACTIVE } else { INACTIVE };
        Ok([
            identity,
            stat.serial,
            stat.rate.unwrap_or_default(),
            status.to_string(),
        ])
    }
}

fn port_label(slot: &str, port: u32) -> String {
    format!("1/{}/{}", slot, port)
}

#[async_trait]
impl System for DslSystem {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable> {
        if let Err(e) = self.transport.run(CMD_NO_PAGING).await {
            tracing::debug!(error = %e, "setline not supported");
        }
        let slots = parse_slots(&self.transport.run(CMD_SLOTS).await?.stdout);

        let mut table = ResultTable::new(INFO_HEADER);
        let ports = self.config.ports_per_slot;
        progress.start(slots.len() as u64 * u64::from(ports), "DSL");
        for slot in &slots {
            for port in 1..=ports {
                match self.port_row(slot, port).await {
                    Ok(row) => table.push(row),
                    Err(e) => {
                        tracing::debug!(slot = %slot, port, error = %e, "DSL port query failed");
                        table.push([
                            port_label(slot, port),
                            String::new(),
                            String::new(),
                            STATUS_ERROR.to_string(),
                        ]);
                    }
                }
                progress.update(1);
            }
        }
        Ok(table)
    }

    async fn close(&mut self) {
        self.transport.close().await;
    }
}
