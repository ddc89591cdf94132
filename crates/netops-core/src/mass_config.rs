//! RouterOS 批量配置下发
//!
//! 三种模式共用同一套筛选后的设备清单：
//! - collect：把筛选结果写成设备 CSV，供人工补充变量列；
//! - build：用设备 CSV 渲染模板，输出到计划目录或合并为单个文件；
//! - run：为每台设备生成 `ConfigPayload`，经 `run_many` 交给采集器的 `set_config`。
//!
//! 模板同时支持 `{name}` 与 `{{name}}` 两种占位符，变量名不区分大小写；
//! 未知变量原样保留，RouterOS 脚本中的 `do={ ... }` 不受影响。

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{NetopsError, Result};
use crate::inventory::{normalize_cell, Device};

/// 上传到设备上的脚本文件名
pub const REMOTE_SCRIPT: &str = "__netops_mass_config.rsc";

/// collect 模式输出的列
pub const DEVICES_HEADER: &[&str] = &["site", "ip", "system", "access", "port", "user_env", "pw_env", "roles"];

/// build 模式按顺序查找的文件名列
const NAME_COLUMNS: &[&str] = &["site", "device", "identity", "name"];

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
});

/// 模板变量，键为小写
pub type Vars = BTreeMap<String, String>;

/// 下发深度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunLevel {
    /// 只连接并读取 identity
    DryRun,
    /// 连接并上传脚本
    Upload,
    /// 上传后执行 `/import`
    Apply,
}

impl RunLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RunLevel::DryRun => "dry-run",
            RunLevel::Upload => "upload",
            RunLevel::Apply => "apply",
        }
    }
}

impl FromStr for RunLevel {
    type Err = NetopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dry-run" | "dryrun" => Ok(RunLevel::DryRun),
            "upload" => Ok(RunLevel::Upload),
            "apply" => Ok(RunLevel::Apply),
            other => Err(NetopsError::config_error(format!(
                "unknown run level '{}' (expected dry-run, upload or apply)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RunLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单台设备的下发内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    pub script: String,
    pub remote_name: String,
    pub run_level: RunLevel,
    pub keep_remote_file: bool,
}

impl ConfigPayload {
    /// 进度条的总步数：连接、上传、导入、清理
    pub fn steps(&self) -> u64 {
        match self.run_level {
            RunLevel::DryRun => 1,
            RunLevel::Upload => 2,
            RunLevel::Apply => 3 + u64::from(!self.keep_remote_file),
        }
    }
}

pub fn render_template(template: &str, vars: &Vars) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            match vars.get(&key) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// 清单字段作为模板变量
pub fn device_vars(device: &Device) -> Vars {
    [
        ("site", device.property.clone()),
        ("device", device.device.clone()),
        ("ip", device.mgmt_ip.clone()),
        ("mgmtip", device.mgmt_ip.clone()),
        ("system", device.system.clone()),
        ("roles", device.roles.join(",")),
        ("access", device.transport.to_string()),
        ("port", device.port.to_string()),
        ("user_env", device.user_env.clone()),
        ("pw_env", device.pw_env.clone()),
        ("notes", device.notes.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// 文件名中只保留字母数字、`-` 和 `_`
pub fn safe_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "device".to_string()
    } else {
        stem
    }
}

/// collect 模式：写出筛选后的设备列表
pub fn write_devices_csv(path: &Path, devices: &[Device]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(DEVICES_HEADER)?;
    for d in devices {
        writer.write_record([
            d.property.as_str(),
            d.mgmt_ip.as_str(),
            d.system.as_str(),
            &d.transport.to_string(),
            &d.port.to_string(),
            d.user_env.as_str(),
            d.pw_env.as_str(),
            &d.roles.join(","),
        ])?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = devices.len(), "Devices CSV written");
    Ok(devices.len())
}

/// 读取设备 CSV，每行转为变量表（表头小写）
pub fn read_devices_csv(path: &Path) -> Result<Vec<Vars>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| NetopsError::inventory(format!("{}: {}", path.display(), e)))?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| normalize_cell(h).to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let vars: Vars = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), normalize_cell(v)))
            .collect();
        rows.push(vars);
    }
    Ok(rows)
}

/// build 模式的输出位置
#[derive(Debug, Clone, Copy)]
pub enum BuildTarget<'a> {
    /// 每行一个 `{name}.rsc`
    PlanDir(&'a Path),
    /// 全部渲染结果合并为一个文件
    Single(&'a Path),
}

/// 渲染每一行并写出，返回生成的文件
pub fn build_plans(rows: &[Vars], template: &str, target: BuildTarget<'_>) -> Result<Vec<PathBuf>> {
    if rows.is_empty() {
        tracing::warn!("Devices CSV is empty; nothing to build");
        return Ok(Vec::new());
    }
    match target {
        BuildTarget::Single(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let merged = rows
                .iter()
                .map(|r| render_template(template, r))
                .collect::<Vec<_>>()
                .join("\n");
            std::fs::write(path, format!("{}\n", merged.trim()))?;
            tracing::info!(path = %path.display(), rows = rows.len(), "Built single plan");
            Ok(vec![path.to_path_buf()])
        }
        BuildTarget::PlanDir(dir) => {
            std::fs::create_dir_all(dir)?;
            let name_col = NAME_COLUMNS.iter().find(|c| rows[0].contains_key(**c));
            let mut written = Vec::with_capacity(rows.len());
            for row in rows {
                let base = name_col
                    .and_then(|c| row.get(*c))
                    .map(String::as_str)
                    .unwrap_or_default();
                let path = dir.join(format!("{}.rsc", safe_file_stem(base)));
                std::fs::write(&path, render_template(template, row))?;
                written.push(path);
            }
            tracing::info!(dir = %dir.display(), files = written.len(), "Built plan files");
            Ok(written)
        }
    }
}

/// run 模式的下发计划：模板 + 可选的逐站变量或预生成脚本
#[derive(Debug, Clone)]
pub struct ConfigPlan {
    template: String,
    per_site: HashMap<String, Vars>,
    plan_dir: Option<PathBuf>,
    run_level: RunLevel,
    keep_remote_file: bool,
}

impl ConfigPlan {
    pub fn new(template: impl Into<String>, run_level: RunLevel) -> Self {
        Self {
            template: template.into(),
            per_site: HashMap::new(),
            plan_dir: None,
            run_level,
            keep_remote_file: false,
        }
    }

    /// 设备 CSV 中按 `site` 列匹配的变量，覆盖清单字段
    pub fn with_rows(mut self, rows: Vec<Vars>) -> Self {
        for row in rows {
            let site = row.get("site").map(|s| s.trim().to_lowercase()).unwrap_or_default();
            if !site.is_empty() {
                self.per_site.entry(site).or_insert(row);
            }
        }
        self
    }

    /// 存在 `{site}.rsc` 时直接使用该文件
    pub fn with_plan_dir(mut self, dir: PathBuf) -> Self {
        self.plan_dir = Some(dir);
        self
    }

    pub fn keep_remote_file(mut self, keep: bool) -> Self {
        self.keep_remote_file = keep;
        self
    }

    pub fn run_level(&self) -> RunLevel {
        self.run_level
    }

    fn script_for(&self, device: &Device) -> Result<String> {
        if let Some(dir) = &self.plan_dir {
            let planned = dir.join(format!("{}.rsc", safe_file_stem(&device.property)));
            if planned.is_file() {
                tracing::debug!(property = %device.property, path = %planned.display(), "Using pre-built plan");
                return Ok(std::fs::read_to_string(planned)?);
            }
        }
        let mut vars = device_vars(device);
        if let Some(row) = self.per_site.get(&device.property.trim().to_lowercase()) {
            vars.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(render_template(&self.template, &vars))
    }

    pub fn payload_for(&self, device: &Device) -> Result<ConfigPayload> {
        let script = self.script_for(device)?;
        if script.trim().is_empty() {
            return Err(NetopsError::config_error(format!(
                "no configuration rendered for {}",
                device.property
            )));
        }
        Ok(ConfigPayload {
            script,
            remote_name: REMOTE_SCRIPT.to_string(),
            run_level: self.run_level,
            keep_remote_file: self.keep_remote_file,
        })
    }
}

/// RouterOS 导入输出中的失败行
pub fn import_failure(output: &str) -> Option<String> {
    const MARKERS: &[&str] = &[
        "failure:",
        "syntax error",
        "bad command name",
        "expected end of command",
        "input does not match",
    ];
    output
        .lines()
        .map(str::trim)
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(str::to_string)
}

pub fn import_command(remote_name: &str) -> String {
    format!("/import file=\"{}\"", remote_name)
}

pub fn remove_command(remote_name: &str) -> String {
    format!("/file remove [ find name=\"{}\" ]", remote_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;

    fn device(property: &str) -> Device {
        Device {
            property: property.to_string(),
            device: "rtr1".to_string(),
            mgmt_ip: "10.9.0.1".to_string(),
            system: "ETTP".to_string(),
            transport: TransportKind::Ssh,
            port: 22,
            roles: vec!["edge".to_string()],
            user_env: "USER1".to_string(),
            pw_env: "PW1".to_string(),
            enabled: true,
            notes: String::new(),
            invalid: None,
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_both_placeholder_styles() {
            let v = vars(&[("site", "Oak"), ("vlan", "40")]);
            assert_eq!(
                render_template("/system identity set name={site}-{{ vlan }}-{{VLAN}}", &v),
                "/system identity set name=Oak-40-40"
            );
        }

        #[test]
        fn test_unknown_and_script_blocks_untouched() {
            let v = vars(&[("site", "Oak")]);
            let tpl = ":foreach i in=[/interface find] do={ :put $i }\n:put {missing} {{ other }}";
            assert_eq!(render_template(tpl, &v), tpl);
        }

        #[test]
        fn test_safe_file_stem() {
            assert_eq!(safe_file_stem("Oak Park #2"), "Oak_Park__2");
            assert_eq!(safe_file_stem("  "), "device");
        }
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn test_dry_run_payload_renders_per_site() {
            let plan = ConfigPlan::new("name={site} dns={dns} ip={ip}", RunLevel::DryRun)
                .with_rows(vec![vars(&[("site", "OAK"), ("dns", "1.1.1.1")])]);
            let payload = plan.payload_for(&device("Oak")).unwrap();
            assert_eq!(payload.script, "name=OAK dns=1.1.1.1 ip=10.9.0.1");
            assert_eq!(payload.remote_name, REMOTE_SCRIPT);
            assert_eq!(payload.steps(), 1);

            let other = plan.payload_for(&device("Pine")).unwrap();
            assert_eq!(other.script, "name=Pine dns={dns} ip=10.9.0.1");
        }

        #[test]
        fn test_plan_dir_file_wins() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("Oak_Park.rsc"), "/ip dns set servers=9.9.9.9\n").unwrap();
            let plan = ConfigPlan::new("fallback {site}", RunLevel::Apply)
                .with_plan_dir(dir.path().to_path_buf())
                .keep_remote_file(true);
            let payload = plan.payload_for(&device("Oak Park")).unwrap();
            assert_eq!(payload.script, "/ip dns set servers=9.9.9.9\n");
            assert_eq!(payload.steps(), 3);
            assert_eq!(plan.payload_for(&device("Elm")).unwrap().script, "fallback Elm");
        }

        #[test]
        fn test_empty_script_rejected() {
            let plan = ConfigPlan::new("  \n", RunLevel::Apply);
            let err = plan.payload_for(&device("Oak")).unwrap_err();
            assert!(err.to_string().contains("no configuration rendered for Oak"));
        }

        #[test]
        fn test_run_level_parse() {
            assert_eq!("Dry-Run".parse::<RunLevel>().unwrap(), RunLevel::DryRun);
            assert_eq!("apply".parse::<RunLevel>().unwrap(), RunLevel::Apply);
            assert!("yolo".parse::<RunLevel>().is_err());
        }

        #[test]
        fn test_import_failure_detection() {
            assert_eq!(import_failure("Script file loaded and executed successfully\n"), None);
            assert_eq!(
                import_failure("  failure: already have such address\n").as_deref(),
                Some("failure: already have such address")
            );
            assert!(import_failure("syntax error (line 3 column 7)").is_some());
        }
    }

    mod csv_tests {
        use super::*;

        #[test]
        fn test_collect_then_build() {
            let dir = tempfile::tempdir().unwrap();
            let devices_csv = dir.path().join("devices.csv");
            assert_eq!(write_devices_csv(&devices_csv, &[device("Oak Park"), device("Elm")]).unwrap(), 2);

            let rows = read_devices_csv(&devices_csv).unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0]["site"], "Oak Park");
            assert_eq!(rows[0]["roles"], "edge");

            let plan_dir = dir.path().join("plans");
            let files = build_plans(&rows, "/system identity set name={site}\n", BuildTarget::PlanDir(&plan_dir)).unwrap();
            assert_eq!(files.len(), 2);
            assert_eq!(
                std::fs::read_to_string(plan_dir.join("Oak_Park.rsc")).unwrap(),
                "/system identity set name=Oak Park\n"
            );

            let single = dir.path().join("all.rsc");
            build_plans(&rows, "# {site}\n", BuildTarget::Single(&single)).unwrap();
            assert_eq!(std::fs::read_to_string(&single).unwrap(), "# Oak Park\n\n# Elm\n");
        }

        #[test]
        fn test_build_without_name_column() {
            let dir = tempfile::tempdir().unwrap();
            let rows = vec![vars(&[("vlan", "10")])];
            let files = build_plans(&rows, "vlan={vlan}", BuildTarget::PlanDir(dir.path())).unwrap();
            assert!(files[0].ends_with("device.rsc"));
        }
    }
}
