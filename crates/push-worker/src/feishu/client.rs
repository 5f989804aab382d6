//! 飞书开放平台客户端
//!
//! 封装三个接口：获取 tenant_access_token、以 union_id 发送 post 消息、
//! 对已发送的消息发起应用内加急。

use std::time::Duration;

use async_trait::async_trait;
use push_shared::error::{PushError, Result};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

/// 飞书开放平台默认地址
pub const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";

const PROVIDER: &str = "feishu";

/// 令牌签发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub tenant_access_token: String,
    /// 有效期（秒）
    pub expire: i64,
}

/// 消息发送结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReply {
    pub status: u16,
    /// 飞书业务码，0 表示成功
    pub code: i64,
    pub msg: String,
    pub message_id: Option<String>,
}

/// 飞书接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeishuApi: Send + Sync {
    /// 用应用凭据换取 tenant_access_token
    async fn tenant_access_token(&self, app_id: &str, app_secret: &str) -> Result<TokenGrant>;

    /// 向 union_id 对应的用户发送 post 消息，`content` 为序列化后的富文本
    async fn send_message(&self, token: &str, union_id: &str, content: &str) -> Result<SendReply>;

    /// 对已发送的消息发起应用内加急
    async fn urgent_app(&self, token: &str, message_id: &str, union_id: &str) -> Result<()>;
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: i64,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    receive_id: &'a str,
    msg_type: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// 失败响应常带空的 `data: {}`
#[derive(Deserialize)]
struct SentMessage {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Serialize)]
struct UrgentRequest<'a> {
    user_id_list: [&'a str; 1],
}

/// 基于 reqwest 的飞书客户端
pub struct HttpFeishuClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeishuClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(FEISHU_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Config(format!("创建飞书客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// 读取响应体；飞书在 4xx 时同样返回带业务码的 JSON
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<(u16, T)> {
    let status = response.status().as_u16();
    let body = response
        .json::<T>()
        .await
        .map_err(|e| PushError::transport(PROVIDER, format!("HTTP {status}: {e}")))?;
    Ok((status, body))
}

#[async_trait]
impl FeishuApi for HttpFeishuClient {
    async fn tenant_access_token(&self, app_id: &str, app_secret: &str) -> Result<TokenGrant> {
        let response = self
            .client
            .post(self.url("/auth/v3/tenant_access_token/internal"))
            .json(&TokenRequest { app_id, app_secret })
            .send()
            .await
            .map_err(|e| PushError::TokenRefresh {
                app_id: app_id.to_string(),
                reason: e.to_string(),
            })?;

        let (_, body): (u16, TokenResponse) = decode(response).await?;
        if body.code != 0 {
            return Err(PushError::TokenRefresh {
                app_id: app_id.to_string(),
                reason: format!("code={}, msg={}", body.code, body.msg),
            });
        }

        Ok(TokenGrant {
            tenant_access_token: body.tenant_access_token,
            expire: body.expire,
        })
    }

    async fn send_message(&self, token: &str, union_id: &str, content: &str) -> Result<SendReply> {
        let response = self
            .client
            .post(self.url("/im/v1/messages"))
            .query(&[("receive_id_type", "union_id")])
            .bearer_auth(token)
            .json(&SendRequest {
                receive_id: union_id,
                msg_type: "post",
                content,
            })
            .send()
            .await
            .map_err(|e| PushError::transport(PROVIDER, e))?;

        let (status, body): (u16, ApiResponse<SentMessage>) = decode(response).await?;
        debug!(status, code = body.code, msg = %body.msg, "飞书消息响应");

        Ok(SendReply {
            status,
            code: body.code,
            msg: body.msg,
            message_id: body.data.and_then(|data| data.message_id),
        })
    }

    async fn urgent_app(&self, token: &str, message_id: &str, union_id: &str) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/im/v1/messages/{message_id}/urgent_app")))
            .query(&[("user_id_type", "union_id")])
            .bearer_auth(token)
            .json(&UrgentRequest {
                user_id_list: [union_id],
            })
            .send()
            .await
            .map_err(|e| PushError::transport(PROVIDER, e))?;

        let (_, body): (u16, ApiResponse<serde_json::Value>) = decode(response).await?;
        if body.code != 0 {
            return Err(PushError::Provider {
                provider: PROVIDER.to_string(),
                code: body.code,
                message: body.msg,
            });
        }
        Ok(())
    }
}
