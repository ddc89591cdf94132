//! 设备家族采集器
//!
//! 每个家族按固定命令序列驱动一个 `Transport`，再用纯函数把 CLI 文本解析为结果行。
//! 单个子实体（modem、ONU、端口）失败只降级对应行；发现阶段失败才让整台设备失败。

use async_trait::async_trait;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::NetopsConfig;
use crate::error::{NetopsError, Result};
use crate::inventory::{Credentials, Device};
use crate::progress::ProgressSlot;
use crate::transport::{build_transport, SessionOptions, Target, TelnetProfile, Transport};

pub mod cmts;
pub mod dsl;
pub mod ettp;
pub mod gpon;

pub use cmts::CmtsSystem;
pub use dsl::DslSystem;
pub use ettp::{EttpSystem, ModemConnector, NoModemAccess, SshModemConnector};
pub use gpon::GponSystem;

pub const COL_IDENTITY: &str = "Identity";
pub const COL_MAC_SERIAL: &str = "Mac/Serial";
pub const COL_SPEED: &str = "Speed";
pub const COL_STATUS: &str = "Status";
pub const COL_NOTES: &str = "Notes";

/// 标准结果表头
pub const INFO_HEADER: &[&str] = &[COL_IDENTITY, COL_MAC_SERIAL, COL_SPEED, COL_STATUS];
/// 设备级失败时的占位表头
pub const ERROR_HEADER: &[&str] = &["Property", "System", COL_STATUS];

pub const NO_DATA: &str = "No Data";
pub const ACTIVE: &str = "Active";
pub const INACTIVE: &str = "Inactive";

/// 支持的设备家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SystemFamily {
    /// MikroTik RouterOS 边缘路由
    Ettp,
    Cmts,
    Gpon,
    Dsl,
}

impl SystemFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemFamily::Ettp => "ETTP",
            SystemFamily::Cmts => "CMTS",
            SystemFamily::Gpon => "GPON",
            SystemFamily::Dsl => "DSL",
        }
    }

    /// 该家族的 Telnet 登录画像
    pub fn telnet_profile(self) -> TelnetProfile {
        match self {
            SystemFamily::Cmts => cmts::telnet_profile(),
            SystemFamily::Gpon | SystemFamily::Dsl => gpon::telnet_profile(),
            SystemFamily::Ettp => TelnetProfile::default(),
        }
    }
}

impl FromStr for SystemFamily {
    type Err = NetopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ETTP" | "MIKROTIK" => Ok(SystemFamily::Ettp),
            "CMTS" => Ok(SystemFamily::Cmts),
            "GPON" => Ok(SystemFamily::Gpon),
            "DSL" => Ok(SystemFamily::Dsl),
            _ => Err(NetopsError::unsupported(s.trim())),
        }
    }
}

impl std::fmt::Display for SystemFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表头 + 数据行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    /// 设备级失败的单行占位表
    pub fn error_placeholder(property: &str, system: &str, error: &str) -> Self {
        let mut table = Self::new(ERROR_HEADER);
        table.push([
            property.to_string(),
            system.to_string(),
            format!("Error: {}", error),
        ]);
        table
    }

    pub fn not_implemented() -> Self {
        let mut table = Self::new(&["Result"]);
        table.push(["Not Implemented"]);
        table
    }

    pub fn is_error(&self) -> bool {
        self.header.iter().map(String::as_str).eq(ERROR_HEADER.iter().copied())
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 表头在前的行迭代，用于写表格
    pub fn all_rows(&self) -> impl Iterator<Item = &Vec<String>> {
        std::iter::once(&self.header).chain(self.rows.iter())
    }
}

pub use crate::mass_config::ConfigPayload;

/// 单台设备的采集器
#[async_trait]
pub trait System: Send {
    async fn get_info(&mut self, progress: &ProgressSlot) -> Result<ResultTable>;

    /// 只有 MikroTik 支持配置下发，其余家族返回占位表
    async fn set_config(
        &mut self,
        _payload: &ConfigPayload,
        _progress: &ProgressSlot,
    ) -> Result<ResultTable> {
        Ok(ResultTable::not_implemented())
    }

    /// 尽力关闭底层会话
    async fn close(&mut self);
}

/// 按设备构造采集器
pub trait SystemFactory: Send + Sync {
    fn build(&self, device: &Device) -> Result<Box<dyn System>>;
}

/// 家族 → 采集器的默认映射；凭据在构造时（即任务内）从环境读取
pub struct DefaultSystemFactory {
    config: Arc<NetopsConfig>,
    options: SessionOptions,
    modem_access: bool,
}

impl DefaultSystemFactory {
    pub fn new(config: Arc<NetopsConfig>) -> Self {
        let options = SessionOptions::from_config(&config);
        Self {
            config,
            options,
            modem_access: true,
        }
    }

    /// 配置下发不读取 modem，也就不需要 modem 凭据
    pub fn without_modems(mut self) -> Self {
        self.modem_access = false;
        self
    }
}

/// 根据设备清单条目建立（惰性）会话
pub fn device_transport(
    device: &Device,
    family: Option<SystemFamily>,
    options: &SessionOptions,
) -> Result<Box<dyn Transport>> {
    let target = Target {
        host: device.mgmt_ip.clone(),
        port: device.port,
        credentials: Credentials::resolve(device)?,
    };
    let profile = family.map(SystemFamily::telnet_profile);
    Ok(build_transport(device.transport, target, profile, options))
}

impl SystemFactory for DefaultSystemFactory {
    fn build(&self, device: &Device) -> Result<Box<dyn System>> {
        let family = device.family()?;
        let transport = device_transport(device, Some(family), &self.options)?;
        let system: Box<dyn System> = match family {
            SystemFamily::Ettp => {
                let modems: Arc<dyn ModemConnector> = if self.modem_access {
                    Arc::new(SshModemConnector::from_config(&self.config, self.options.clone())?)
                } else {
                    Arc::new(NoModemAccess)
                };
                Box::new(EttpSystem::new(transport, modems, self.config.ettp.clone()))
            }
            SystemFamily::Cmts => Box::new(CmtsSystem::new(transport)),
            SystemFamily::Gpon => Box::new(GponSystem::new(transport, self.config.gpon.clone())),
            SystemFamily::Dsl => Box::new(DslSystem::new(transport, self.config.dsl.clone())),
        };
        Ok(system)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parse() {
        assert_eq!("ettp".parse::<SystemFamily>().unwrap(), SystemFamily::Ettp);
        assert_eq!("MikroTik".parse::<SystemFamily>().unwrap(), SystemFamily::Ettp);
        assert_eq!(" gpon ".parse::<SystemFamily>().unwrap(), SystemFamily::Gpon);
        let err = "FIBERX".parse::<SystemFamily>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported system: FIBERX");
    }

    #[test]
    fn test_error_placeholder_shape() {
        let t = ResultTable::error_placeholder("Oak", "CMTS", "timed out");
        assert!(t.is_error());
        assert_eq!(t.header, vec!["Property", "System", "Status"]);
        assert_eq!(t.rows, vec![vec!["Oak", "CMTS", "Error: timed out"]]);
    }

    #[test]
    fn test_not_implemented() {
        let t = ResultTable::not_implemented();
        assert_eq!(t.all_rows().count(), 2);
        assert_eq!(t.rows[0][0], "Not Implemented");
    }
}
