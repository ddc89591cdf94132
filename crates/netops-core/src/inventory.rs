//! 设备清单（CSV）加载、筛选与凭据解析
//!
//! 清单中只保存凭据所在的环境变量名，真正的密码在使用时才从进程环境读取。

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{NetopsError, Result};
use crate::systems::SystemFamily;
use crate::transport::TransportKind;

/// 站点布局必需列
pub const SITE_REQUIRED: &[&str] = &["Site", "MgmtIP", "System", "Access", "UserEnv", "PwEnv"];
/// 旧版布局必需列（User/PW 列中同样是环境变量名）
pub const LEGACY_REQUIRED: &[&str] = &["Property", "IP", "User", "PW", "System", "Access"];

/// 清单中的一台设备，运行期间不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub property: String,
    pub device: String,
    pub mgmt_ip: String,
    pub system: String,
    pub transport: TransportKind,
    pub port: u16,
    pub roles: Vec<String>,
    pub user_env: String,
    pub pw_env: String,
    pub enabled: bool,
    pub notes: String,
    /// 行内容无法解析时的原因；该设备仍参与运行，并在结果中记为错误行
    pub invalid: Option<String>,
}

impl Device {
    /// 设备所属的系统家族；未知家族返回 `Unsupported`
    pub fn family(&self) -> Result<SystemFamily> {
        self.system.parse()
    }

    /// 清单行有误时返回 `Inventory` 错误
    pub fn check_valid(&self) -> Result<()> {
        match &self.invalid {
            Some(reason) => Err(NetopsError::inventory(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles
            .iter()
            .any(|want| self.roles.iter().any(|r| r.eq_ignore_ascii_case(want)))
    }
}

/// 已解析的登录凭据
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// 读取设备引用的两个环境变量
    pub fn resolve(device: &Device) -> Result<Self> {
        Self::from_env(&device.user_env, &device.pw_env)
    }

    pub fn from_env(user_env: &str, pw_env: &str) -> Result<Self> {
        let mut values = resolve_env_many(&[user_env, pw_env])?;
        let password = values.pop().unwrap_or_default();
        let username = values.pop().unwrap_or_default();
        Ok(Self { username, password })
    }
}

/// 读取单个环境变量；未设置或为空时报错
pub fn resolve_env(name: &str) -> Result<String> {
    let key = normalize_env_key(name);
    match std::env::var(&key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(NetopsError::credential(key)),
    }
}

pub fn resolve_env_many(names: &[&str]) -> Result<Vec<String>> {
    names.iter().map(|n| resolve_env(n)).collect()
}

/// 去掉 BOM、首尾空白和包裹的引号
pub fn normalize_cell(raw: &str) -> String {
    let s = raw.trim_start_matches('\u{feff}').trim();
    let s = s
        .strip_prefix('"')
        .and_then(|x| x.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|x| x.strip_suffix('\'')))
        .unwrap_or(s);
    s.trim().to_string()
}

/// 环境变量名：去掉所有空白并转为大写
pub fn normalize_env_key(raw: &str) -> String {
    normalize_cell(raw)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn parse_enabled(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    v.is_empty() || matches!(v.as_str(), "yes" | "y" | "true" | "1")
}

fn split_roles(raw: &str) -> Vec<String> {
    raw.split([',', ';', '|'])
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (normalize_cell(h).to_ascii_lowercase(), i))
            .collect();
        Self { index }
    }

    fn has(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has(c))
            .map(|c| c.to_string())
            .collect()
    }

    fn get(&self, record: &csv::StringRecord, name: &str) -> String {
        self.index
            .get(&name.to_ascii_lowercase())
            .and_then(|&i| record.get(i))
            .map(normalize_cell)
            .unwrap_or_default()
    }
}

/// 读取 CSV 清单；缺少必需列时报错并列出缺失的列
pub fn load_inventory(path: impl AsRef<Path>) -> Result<Vec<Device>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| NetopsError::inventory(format!("{}: {}", path.display(), e)))?;
    let cols = Columns::new(reader.headers()?);

    let legacy = cols.has("Property") && !cols.has("Site");
    let required = if legacy { LEGACY_REQUIRED } else { SITE_REQUIRED };
    let missing = cols.missing(required);
    if !missing.is_empty() {
        return Err(NetopsError::inventory(format!(
            "{} is missing required columns: {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut devices = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let mut device = if legacy {
            legacy_row(&cols, &record)
        } else {
            site_row(&cols, &record)
        };
        if let Some(reason) = device.invalid.take() {
            tracing::warn!(row = line + 2, property = %device.property, reason = %reason, "Invalid inventory row");
            device.invalid = Some(format!("row {}: {}", line + 2, reason));
        }
        devices.push(device);
    }
    tracing::debug!(path = %path.display(), count = devices.len(), "Inventory loaded");
    Ok(devices)
}

/// 解析失败的字段取默认值，原因记录在 `invalid` 中
fn site_row(cols: &Columns, r: &csv::StringRecord) -> Device {
    let property = cols.get(r, "Site");
    let system = cols.get(r, "System");
    let mut invalid = None;
    let transport = parse_access(&cols.get(r, "Access"), &system).unwrap_or_else(|e| {
        invalid = Some(row_reason(e));
        TransportKind::Ssh
    });
    let port = parse_port(&cols.get(r, "Port"), transport).unwrap_or_else(|e| {
        invalid.get_or_insert(row_reason(e));
        transport.default_port()
    });
    let device = match cols.get(r, "Device") {
        d if d.is_empty() => property.clone(),
        d => d,
    };
    Device {
        device,
        mgmt_ip: cols.get(r, "MgmtIP"),
        transport,
        port,
        roles: split_roles(&cols.get(r, "Roles")),
        user_env: normalize_env_key(&cols.get(r, "UserEnv")),
        pw_env: normalize_env_key(&cols.get(r, "PwEnv")),
        enabled: parse_enabled(&cols.get(r, "Enabled")),
        notes: cols.get(r, "Notes"),
        invalid,
        property,
        system,
    }
}

fn legacy_row(cols: &Columns, r: &csv::StringRecord) -> Device {
    let property = cols.get(r, "Property");
    let system = cols.get(r, "System");
    let (transport, invalid) = match parse_access(&cols.get(r, "Access"), &system) {
        Ok(t) => (t, None),
        Err(e) => (TransportKind::Ssh, Some(row_reason(e))),
    };
    Device {
        device: property.clone(),
        mgmt_ip: cols.get(r, "IP"),
        transport,
        port: transport.default_port(),
        roles: Vec::new(),
        user_env: normalize_env_key(&cols.get(r, "User")),
        pw_env: normalize_env_key(&cols.get(r, "PW")),
        enabled: true,
        notes: String::new(),
        invalid,
        property,
        system,
    }
}

fn row_reason(error: NetopsError) -> String {
    match error {
        NetopsError::Inventory { message } => message,
        other => other.to_string(),
    }
}

fn parse_access(raw: &str, system: &str) -> Result<TransportKind> {
    if raw.is_empty() {
        // MikroTik 走 SSH，其余设备默认 Telnet
        return Ok(match system.parse::<SystemFamily>() {
            Ok(SystemFamily::Ettp) => TransportKind::Ssh,
            Ok(_) => TransportKind::Telnet,
            Err(_) => TransportKind::Ssh,
        });
    }
    raw.parse()
}

fn parse_port(raw: &str, transport: TransportKind) -> Result<u16> {
    if raw.is_empty() {
        return Ok(transport.default_port());
    }
    raw.parse()
        .map_err(|_| NetopsError::inventory(format!("invalid port '{}'", raw)))
}

/// 设备筛选条件；空列表表示该维度不过滤
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub systems: Vec<String>,
    /// 含任一角色即入选
    pub include_roles: Vec<String>,
    /// 含任一角色即排除，优先于 `include_roles`
    pub exclude_roles: Vec<String>,
    pub enabled_only: bool,
}

impl DeviceFilter {
    pub fn matches(&self, d: &Device) -> bool {
        (!self.enabled_only || d.enabled)
            && (self.systems.is_empty()
                || self.systems.iter().any(|s| s.eq_ignore_ascii_case(&d.system)))
            && (self.include_roles.is_empty() || d.has_any_role(&self.include_roles))
            && !d.has_any_role(&self.exclude_roles)
    }
}

/// 角色参数可以重复，也可以逗号分隔
pub fn split_role_args(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|a| a.split(','))
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

pub fn select(devices: &[Device], filter: &DeviceFilter) -> Vec<Device> {
    devices.iter().filter(|d| filter.matches(d)).cloned().collect()
}

/// 解析交互式选择表达式（如 `1,4,7-9`，从 1 开始），返回去重且保持顺序的 0 基下标
pub fn parse_selection(expr: &str, len: usize) -> Result<Vec<usize>> {
    let mut picked = Vec::new();
    let out_of_range = |n: usize| NetopsError::inventory(format!("selection {} out of range 1-{}", n, len));
    let parse_one = |s: &str| -> Result<usize> {
        s.trim()
            .parse::<usize>()
            .map_err(|_| NetopsError::inventory(format!("invalid selection '{}'", s.trim())))
    };

    for part in expr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (parse_one(a)?, parse_one(b)?),
            None => {
                let n = parse_one(part)?;
                (n, n)
            }
        };
        if start > end {
            return Err(NetopsError::inventory(format!("invalid range '{}'", part)));
        }
        for n in start..=end {
            if n == 0 || n > len {
                return Err(out_of_range(n));
            }
            if !picked.contains(&(n - 1)) {
                picked.push(n - 1);
            }
        }
    }
    Ok(picked)
}
