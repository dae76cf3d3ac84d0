//! 统一错误类型

use super::code::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum FlareError {
    /// 带错误代码的错误（暴露给调用方）
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Localized {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        params: Option<HashMap<String, String>>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（用于内部错误）
    #[error("系统错误: {0}")]
    System(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl FlareError {
    /// 创建带错误代码的错误
    pub fn localized(code: ErrorCode, reason: impl Into<String>) -> Self {
        FlareError::Localized {
            code,
            reason: reason.into(),
            details: None,
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        FlareError::System(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        FlareError::Io(msg.into())
    }

    // ============================================================
    // 便捷方法：前置条件 / 配置
    // ============================================================

    /// 创建参数错误
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::InvalidParameter, reason)
    }

    /// 创建配置错误
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConfigurationError, reason)
    }

    // ============================================================
    // 便捷方法：注册中心
    // ============================================================

    /// 注册中心不可用
    pub fn registry_unavailable(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::RegistryUnavailable, reason)
    }

    /// 订阅句柄已关闭
    pub fn listener_closed(service_name: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("service_name".to_string(), service_name.into());
        Self::Localized {
            code: ErrorCode::ListenerClosed,
            reason: "listener is closed".to_string(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 后端调用失败：保留后端原始信息作为详情
    pub fn backend(code: ErrorCode, reason: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        FlareError::Localized {
            code,
            reason: reason.into(),
            details: Some(cause.to_string()),
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建连接失败错误
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConnectionFailed, reason)
    }

    /// 创建反序列化错误
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::DeserializationError, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            FlareError::Localized { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            FlareError::Localized { reason, .. } => reason,
            FlareError::System(msg) => msg,
            FlareError::Io(msg) => msg,
        }
    }

    /// 获取错误详情
    pub fn details(&self) -> Option<&str> {
        match self {
            FlareError::Localized { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            FlareError::Io(_) => true,
            _ => self.code().map(|code| code.is_retryable()).unwrap_or(false),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, FlareError>;
