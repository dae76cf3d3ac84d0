//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误
/// - 2000-2999: 注册中心相关错误
/// - 6000-6999: 系统相关错误
/// - 7000-7999: 网络相关错误
/// - 8000-8999: 序列化相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,
    AuthenticationFailed = 1003,

    // ============================================================
    // 注册中心相关错误 (2000-2999)
    // ============================================================
    RegisterFailed = 2000,
    DeregisterFailed = 2001,
    SubscribeFailed = 2002,
    UnsubscribeFailed = 2003,
    QueryFailed = 2004,
    RegistryUnavailable = 2005,
    ListenerClosed = 2006,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ServiceUnavailable = 6001,
    ConfigurationError = 6002,

    // ============================================================
    // 网络相关错误 (7000-7999)
    // ============================================================
    NetworkError = 7000,
    NetworkTimeout = 7001,

    // ============================================================
    // 序列化相关错误 (8000-8999)
    // ============================================================
    SerializationError = 8000,
    DeserializationError = 8001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    InvalidParameter = 9001,
    OperationTimeout = 9002,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConnectionFailed),
            1001 => Some(ErrorCode::ConnectionTimeout),
            1002 => Some(ErrorCode::ConnectionClosed),
            1003 => Some(ErrorCode::AuthenticationFailed),
            2000 => Some(ErrorCode::RegisterFailed),
            2001 => Some(ErrorCode::DeregisterFailed),
            2002 => Some(ErrorCode::SubscribeFailed),
            2003 => Some(ErrorCode::UnsubscribeFailed),
            2004 => Some(ErrorCode::QueryFailed),
            2005 => Some(ErrorCode::RegistryUnavailable),
            2006 => Some(ErrorCode::ListenerClosed),
            6000 => Some(ErrorCode::InternalError),
            6001 => Some(ErrorCode::ServiceUnavailable),
            6002 => Some(ErrorCode::ConfigurationError),
            7000 => Some(ErrorCode::NetworkError),
            7001 => Some(ErrorCode::NetworkTimeout),
            8000 => Some(ErrorCode::SerializationError),
            8001 => Some(ErrorCode::DeserializationError),
            9000 => Some(ErrorCode::GeneralError),
            9001 => Some(ErrorCode::InvalidParameter),
            9002 => Some(ErrorCode::OperationTimeout),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::RegisterFailed => "REGISTER_FAILED",
            ErrorCode::DeregisterFailed => "DEREGISTER_FAILED",
            ErrorCode::SubscribeFailed => "SUBSCRIBE_FAILED",
            ErrorCode::UnsubscribeFailed => "UNSUBSCRIBE_FAILED",
            ErrorCode::QueryFailed => "QUERY_FAILED",
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::ListenerClosed => "LISTENER_CLOSED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Registry,
            6000..=6999 => ErrorCategory::System,
            7000..=7999 => ErrorCategory::Network,
            8000..=8999 => ErrorCategory::Serialization,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 后端的瞬时失败可以重试；前置条件错误和配置错误不可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionClosed
                | ErrorCode::RegisterFailed
                | ErrorCode::DeregisterFailed
                | ErrorCode::SubscribeFailed
                | ErrorCode::UnsubscribeFailed
                | ErrorCode::QueryFailed
                | ErrorCode::ServiceUnavailable
                | ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Registry,
    System,
    Network,
    Serialization,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::System => write!(f, "SYSTEM"),
            ErrorCategory::Network => write!(f, "NETWORK"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_u32() {
        for code in [
            ErrorCode::RegisterFailed,
            ErrorCode::RegistryUnavailable,
            ErrorCode::InvalidParameter,
            ErrorCode::UnknownError,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(4242), None);
    }

    #[test]
    fn registry_codes_fall_in_registry_category() {
        assert_eq!(ErrorCode::SubscribeFailed.category(), ErrorCategory::Registry);
        assert_eq!(ErrorCode::NetworkTimeout.category(), ErrorCategory::Network);
        assert_eq!(ErrorCode::InvalidParameter.category(), ErrorCategory::General);
    }

    #[test]
    fn precondition_errors_are_not_retryable() {
        assert!(ErrorCode::SubscribeFailed.is_retryable());
        assert!(!ErrorCode::InvalidParameter.is_retryable());
        assert!(!ErrorCode::ConfigurationError.is_retryable());
        assert!(!ErrorCode::RegistryUnavailable.is_retryable());
    }
}
