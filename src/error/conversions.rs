//! 错误类型转换实现

use super::{ErrorCode, FlareError};
use std::io;

impl From<io::Error> for FlareError {
    fn from(err: io::Error) -> Self {
        FlareError::io(err.to_string())
    }
}

impl From<serde_json::Error> for FlareError {
    fn from(err: serde_json::Error) -> Self {
        FlareError::localized(ErrorCode::SerializationError, format!("JSON 序列化错误: {}", err))
    }
}

impl From<toml::de::Error> for FlareError {
    fn from(err: toml::de::Error) -> Self {
        FlareError::configuration(format!("TOML 解析错误: {}", err))
    }
}

impl From<reqwest::Error> for FlareError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::NetworkTimeout
        } else if err.is_connect() {
            ErrorCode::ConnectionFailed
        } else if err.is_decode() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::NetworkError
        };
        FlareError::localized(code, err.to_string())
    }
}
