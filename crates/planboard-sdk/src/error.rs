//! SDK 错误类型
//!
//! 错误只在内部边界（KV 存储、远端适配器）之间传递；
//! 引擎对外的操作会把它们转换为日志或状态，不会抛给 UI。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanboardSDKError {
    #[error("KV store error: {0}")]
    KvStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    IO(String),

    /// 远端存储调用失败（网络、服务端错误等），属于可重试错误
    #[error("Remote error: {0}")]
    Remote(String),

    /// 远端适配器未实现该操作（如某实体类型不支持 soft delete）
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl PlanboardSDKError {
    /// 是否值得稍后重试（用于推送失败后的日志分级）
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::IO(_))
    }
}

impl From<serde_json::Error> for PlanboardSDKError {
    fn from(error: serde_json::Error) -> Self {
        PlanboardSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for PlanboardSDKError {
    fn from(error: std::io::Error) -> Self {
        PlanboardSDKError::IO(error.to_string())
    }
}

impl From<sled::Error> for PlanboardSDKError {
    fn from(error: sled::Error) -> Self {
        PlanboardSDKError::KvStore(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlanboardSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PlanboardSDKError::Remote("503".into()).is_transient());
        assert!(PlanboardSDKError::IO("disk".into()).is_transient());
        assert!(!PlanboardSDKError::Unsupported("task hard_delete".into()).is_transient());
        assert!(!PlanboardSDKError::Serialization("bad json".into()).is_transient());
    }

    #[test]
    fn json_error_converts_to_serialization() {
        let err: PlanboardSDKError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, PlanboardSDKError::Serialization(_)));
    }
}
