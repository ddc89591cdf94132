//! 统一错误处理系统

use thiserror::Error;

/// 核心错误类型
///
/// 除 `Internal` 之外，每个变体都只影响单台设备：编排层会把它们转换为该设备的错误行，
/// 而不会中断整个运行。
#[derive(Error, Debug)]
pub enum NetopsError {
    // === 凭据 ===
    #[error("Missing env var: {name}")]
    Credential { name: String },

    // === 网络和连接 ===
    #[error("Connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("Authentication failed for {host}")]
    Authentication { host: String },

    #[error("Timed out after {seconds}s during {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("File transfer with {host} failed: {message}")]
    Transfer { host: String, message: String },

    // === 解析 ===
    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    // === 输入输出 ===
    #[error("Inventory error: {message}")]
    Inventory { message: String },

    #[error("Config error: {message}")]
    Config { message: String },

    #[error("Report error: {message}")]
    Report { message: String },

    #[error("Unsupported system: {system}")]
    Unsupported { system: String },

    #[error("Configuration rejected by {host}: {message}")]
    Apply { host: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NetopsError {
    /// 网络层瞬态错误（连接、超时、文件传输、IO）
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            NetopsError::Connection { .. }
                | NetopsError::Timeout { .. }
                | NetopsError::Transfer { .. }
                | NetopsError::Io(_)
        )
    }

    pub fn credential(name: impl Into<String>) -> Self {
        NetopsError::Credential { name: name.into() }
    }

    /// 创建连接错误（带上下文）
    pub fn connection(host: impl Into<String>, message: impl std::fmt::Display) -> Self {
        NetopsError::Connection {
            host: host.into(),
            message: message.to_string(),
        }
    }

    pub fn transfer(host: impl Into<String>, message: impl std::fmt::Display) -> Self {
        NetopsError::Transfer {
            host: host.into(),
            message: message.to_string(),
        }
    }

    pub fn apply(host: impl Into<String>, message: impl Into<String>) -> Self {
        NetopsError::Apply {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn authentication(host: impl Into<String>) -> Self {
        NetopsError::Authentication { host: host.into() }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        NetopsError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        NetopsError::Discovery {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        NetopsError::Parse {
            message: message.into(),
        }
    }

    pub fn inventory(message: impl Into<String>) -> Self {
        NetopsError::Inventory {
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn config_error(message: impl Into<String>) -> Self {
        NetopsError::Config {
            message: message.into(),
        }
    }

    pub fn report(message: impl Into<String>) -> Self {
        NetopsError::Report {
            message: message.into(),
        }
    }

    pub fn unsupported(system: impl Into<String>) -> Self {
        NetopsError::Unsupported {
            system: system.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        NetopsError::Internal {
            message: message.into(),
        }
    }
}

/// Core 操作的 Result 类型别名
pub type Result<T> = std::result::Result<T, NetopsError>;

impl From<csv::Error> for NetopsError {
    fn from(err: csv::Error) -> Self {
        NetopsError::Inventory {
            message: err.to_string(),
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for NetopsError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        NetopsError::Report {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for NetopsError {
    fn from(err: zip::result::ZipError) -> Self {
        NetopsError::Report {
            message: format!("zip: {}", err),
        }
    }
}

impl From<russh::Error> for NetopsError {
    fn from(err: russh::Error) -> Self {
        NetopsError::Connection {
            host: "ssh".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(NetopsError::connection("10.0.0.1", "reset").is_retriable());
        assert!(NetopsError::timeout("exec", 60).is_retriable());
        assert!(!NetopsError::authentication("10.0.0.1").is_retriable());
        assert!(!NetopsError::credential("PW3").is_retriable());
    }

    #[test]
    fn test_credential_message_names_variable() {
        let err = NetopsError::credential("USER1");
        assert_eq!(err.to_string(), "Missing env var: USER1");
    }
}
