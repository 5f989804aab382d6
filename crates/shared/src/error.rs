//! 统一错误处理模块
//!
//! 定义推送链路中共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 按来源分为输入错误、查询错误、推送服务错误、配置错误和编解码错误五类，
//! 调用方据此决定跳过单条事件、中止整批发送还是标记适配器未就绪。

use thiserror::Error;

/// 推送系统错误类型
#[derive(Debug, Error)]
pub enum PushError {
    // ==================== 输入错误 ====================
    #[error("推送负载为空")]
    EmptyPayload,

    #[error("未知的推送类型: {0}")]
    UnknownPushType(String),

    #[error("无效的会话名: {0}")]
    InvalidTopic(String),

    // ==================== 存储查询错误 ====================
    #[error("存储错误: {0}")]
    Store(String),

    // ==================== 推送服务错误 ====================
    #[error("推送服务请求失败: {provider} - {message}")]
    Transport { provider: String, message: String },

    #[error("推送服务返回错误: {provider} code={code}, msg={message}")]
    Provider {
        provider: String,
        code: i64,
        message: String,
    },

    #[error("刷新访问令牌失败: app_id={app_id}, 原因={reason}")]
    TokenRefresh { app_id: String, reason: String },

    #[error("未配置的应用: app_id={app_id}")]
    UnknownApp { app_id: String },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 编解码错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("富文本渲染失败: {0}")]
    Render(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PushError>;

impl PushError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyPayload => "EMPTY_PAYLOAD",
            Self::UnknownPushType(_) => "UNKNOWN_PUSH_TYPE",
            Self::InvalidTopic(_) => "INVALID_TOPIC",
            Self::Store(_) => "STORE_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::TokenRefresh { .. } => "TOKEN_REFRESH_FAILED",
            Self::UnknownApp { .. } => "UNKNOWN_APP",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Render(_) => "RENDER_ERROR",
        }
    }

    /// 是否为瞬时错误
    ///
    /// 发送失败时据此决定中止原因，本模块内不做自动重试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Store(_) | Self::TokenRefresh { .. }
        )
    }

    pub fn transport(provider: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }
}
