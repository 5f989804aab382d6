//! 推送 worker 错误类型
//!
//! 区分生命周期错误（未运行、重复启动）、适配器初始化错误和共享层错误，
//! 便于 hub 判断适配器是否就绪。

use push_shared::error::PushError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("推送适配器未运行: {provider}")]
    NotRunning { provider: String },

    #[error("推送适配器已启动: {provider}")]
    AlreadyStarted { provider: String },

    #[error("推送适配器初始化失败: {provider}, 原因={reason}")]
    Init { provider: String, reason: String },

    #[error(transparent)]
    Shared(#[from] PushError),
}

impl WorkerError {
    pub fn not_running(provider: &str) -> Self {
        Self::NotRunning {
            provider: provider.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::not_running("apns");
        assert_eq!(err.to_string(), "推送适配器未运行: apns");

        let init_err = WorkerError::Init {
            provider: "feishu".to_string(),
            reason: "没有可用的应用".to_string(),
        };
        assert_eq!(
            init_err.to_string(),
            "推送适配器初始化失败: feishu, 原因=没有可用的应用"
        );

        let shared: WorkerError = PushError::EmptyPayload.into();
        assert_eq!(shared.to_string(), "推送负载为空");
    }
}
