//! The unified configuration module for the netops tool.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The unified configuration for a netops run.
/// Loaded from defaults, then `netops.toml`, then `NETOPS__*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetopsConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ettp: EttpConfig,
    #[serde(default)]
    pub gpon: GponConfig,
    #[serde(default)]
    pub dsl: DslConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl NetopsConfig {
    /// 从指定路径或当前目录中的 netops.toml 加载配置；支持 NETOPS__ 前缀的环境变量覆盖（Figment）
    pub fn load_config(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        let mut figment = Figment::from(Serialized::defaults(NetopsConfig::default()));

        // 文件层：显式路径优先，否则尝试工作目录下 netops.toml
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let base_dir = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
                }
                figment = figment.merge(Toml::file(p));
                match p.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => cwd,
                }
            }
            None => {
                let default_path = Path::new("netops.toml");
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
                cwd
            }
        };

        figment = figment.merge(Env::prefixed("NETOPS__").split("__"));

        let mut cfg: NetopsConfig = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load config via Figment: {}", e))?;

        cfg.resolve_relative_paths(&base_dir);
        cfg.validate()?;
        Ok(cfg)
    }

    /// 验证配置参数的有效性
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.run.concurrency == 0 {
            return Err(anyhow::anyhow!("run.concurrency must be at least 1"));
        }
        if self.run.connect_timeout_sec == 0
            || self.run.command_timeout_sec == 0
            || self.run.telnet_read_timeout_sec == 0
        {
            return Err(anyhow::anyhow!("run timeouts must be greater than 0"));
        }
        if self.retry.attempts == 0 {
            return Err(anyhow::anyhow!("retry.attempts must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(anyhow::anyhow!("retry.multiplier must be >= 1.0"));
        }
        if self.gpon.ports_per_slot == 0 || self.dsl.ports_per_slot == 0 {
            return Err(anyhow::anyhow!("ports_per_slot must be at least 1"));
        }
        match self.telemetry.log_format.to_ascii_lowercase().as_str() {
            "text" | "json" => {}
            other => return Err(anyhow::anyhow!("Unknown log_format: {}", other)),
        }
        if self.upload.host.is_some() && self.upload.user_env.is_none() {
            return Err(anyhow::anyhow!("upload.user_env is required when upload.host is set"));
        }
        Ok(())
    }

    pub fn resolve_relative_paths(&mut self, base_dir: &Path) {
        fn make_absolute(path: &mut PathBuf, base: &Path) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }

        make_absolute(&mut self.output.dir, base_dir);
        make_absolute(&mut self.output.snapshot_dir, base_dir);
        make_absolute(&mut self.output.export_dir, base_dir);
        if let Some(log_file) = self.telemetry.log_file.as_mut() {
            make_absolute(log_file, base_dir);
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub log_no_ansi: bool,
    /// Optional plain-text log file written alongside the terminal output
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_no_ansi: false,
            log_file: None,
        }
    }
}

/// Fan-out and per-call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_sec: u64,
    #[serde(default = "default_telnet_read_timeout")]
    pub telnet_read_timeout_sec: u64,
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            connect_timeout_sec: default_connect_timeout(),
            command_timeout_sec: default_command_timeout(),
            telnet_read_timeout_sec: default_telnet_read_timeout(),
            progress: true,
        }
    }
}

/// SSH command retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// MikroTik edge router settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EttpConfig {
    /// Env var holding the username shared by all customer modems
    #[serde(default = "default_modem_user_env")]
    pub modem_user_env: String,
    #[serde(default = "default_modem_pw_env")]
    pub modem_pw_env: String,
    #[serde(default = "default_neighbor_script")]
    pub neighbor_script: String,
    #[serde(default = "default_fallback_command")]
    pub fallback_command: String,
}

impl Default for EttpConfig {
    fn default() -> Self {
        Self {
            modem_user_env: default_modem_user_env(),
            modem_pw_env: default_modem_pw_env(),
            neighbor_script: default_neighbor_script(),
            fallback_command: default_fallback_command(),
        }
    }
}

/// GPON OLT settings.
///
/// The sentinel and camera profile values are vendor conventions observed in the field;
/// confirm with the OLT owner before relying on them for new deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GponConfig {
    #[serde(default = "default_sentinel_profiles")]
    pub sentinel_profiles: Vec<u32>,
    #[serde(default = "default_camera_profile")]
    pub camera_profile: u32,
    #[serde(default = "default_gpon_ports")]
    pub ports_per_slot: u32,
}

impl Default for GponConfig {
    fn default() -> Self {
        Self {
            sentinel_profiles: default_sentinel_profiles(),
            camera_profile: default_camera_profile(),
            ports_per_slot: default_gpon_ports(),
        }
    }
}

/// DSL shelf settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DslConfig {
    #[serde(default = "default_dsl_ports")]
    pub ports_per_slot: u32,
}

impl Default for DslConfig {
    fn default() -> Self {
        Self {
            ports_per_slot: default_dsl_ports(),
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            snapshot_dir: default_snapshot_dir(),
            export_dir: default_export_dir(),
        }
    }
}

/// Remote file server for produced reports. Upload is skipped when `host` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub user_env: Option<String>,
    #[serde(default)]
    pub pw_env: Option<String>,
    #[serde(default = "default_upload_base")]
    pub base_dir: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_ssh_port(),
            user_env: None,
            pw_env: None,
            base_dir: default_upload_base(),
        }
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    6
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    60
}

fn default_telnet_read_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    300
}

fn default_modem_user_env() -> String {
    "USER1".to_string()
}

fn default_modem_pw_env() -> String {
    "PW3".to_string()
}

fn default_neighbor_script() -> String {
    "getNeighbors2.rsc".to_string()
}

fn default_fallback_command() -> String {
    "/system script print".to_string()
}

fn default_sentinel_profiles() -> Vec<u32> {
    vec![0, 1, 512]
}

fn default_camera_profile() -> u32 {
    1000
}

fn default_gpon_ports() -> u32 {
    16
}

fn default_dsl_ports() -> u32 {
    24
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_ssh_port() -> u16 {
    22
}

fn default_upload_base() -> String {
    "/srv/reports".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod defaults_tests {
        use super::*;

        #[test]
        fn test_defaults_are_valid() {
            let cfg = NetopsConfig::default();
            assert_eq!(cfg.run.concurrency, 6);
            assert_eq!(cfg.retry.attempts, 3);
            assert_eq!(cfg.gpon.sentinel_profiles, vec![0, 1, 512]);
            assert_eq!(cfg.dsl.ports_per_slot, 24);
            assert!(cfg.validate().is_ok());
        }

        #[test]
        fn test_zero_concurrency_rejected() {
            let mut cfg = NetopsConfig::default();
            cfg.run.concurrency = 0;
            assert!(cfg.validate().is_err());
        }

        #[test]
        fn test_unknown_log_format_rejected() {
            let mut cfg = NetopsConfig::default();
            cfg.telemetry.log_format = "xml".into();
            assert!(cfg.validate().is_err());
        }
    }

    mod load_tests {
        use super::*;
        use std::io::Write;

        #[test]
        fn test_load_from_file_resolves_paths() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("netops.toml");
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "[run]\nconcurrency = 9\n\n[output]\ndir = \"reports\"").unwrap();

            let cfg = NetopsConfig::load_config(Some(&path)).unwrap();
            assert_eq!(cfg.run.concurrency, 9);
            assert_eq!(cfg.output.dir, dir.path().join("reports"));
            assert_eq!(cfg.output.snapshot_dir, dir.path().join("snapshots"));
        }

        #[test]
        fn test_unknown_key_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("netops.toml");
            std::fs::write(&path, "[run]\nworkers = 3\n").unwrap();
            assert!(NetopsConfig::load_config(Some(&path)).is_err());
        }

        #[test]
        fn test_missing_file_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("absent.toml");
            assert!(NetopsConfig::load_config(Some(&path)).is_err());
        }
    }
}
