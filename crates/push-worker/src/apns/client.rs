//! APNs 客户端
//!
//! 基于 a2 的证书认证客户端，连接复用和 HTTP/2 由 a2 负责。请求体在构建阶段
//! 已经序列化，这里只把信封转换为 a2 的请求选项并解读响应。
//! `ApnsTransport` 是发送侧的抽象，测试中以 mock 替换。

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use a2::request::payload::PayloadLike;
use a2::{Client, ClientConfig, CollapseId, Endpoint, NotificationOptions, Response};
use async_trait::async_trait;
use push_shared::error::{PushError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::payload::{ApnsEnvelope, Priority, PushType};
use super::resolver::token_prefix;
use crate::provider::DeliveryReport;

const PROVIDER: &str = "apns";

/// APNs 服务环境
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApnsEnvironment {
    Production,
    Development,
}

impl ApnsEnvironment {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::Production => Endpoint::Production,
            Self::Development => Endpoint::Sandbox,
        }
    }
}

/// APNs 发送接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApnsTransport: Send + Sync {
    /// 发送一条通知，只有请求未完成时返回 `Err`
    async fn push(&self, envelope: &ApnsEnvelope) -> Result<DeliveryReport>;
}

/// 交给 a2 的请求：信封的请求头选项加上已构建的请求体
#[derive(Debug, Serialize)]
struct EnvelopePayload<'a> {
    #[serde(skip)]
    device_token: &'a str,
    #[serde(skip)]
    options: NotificationOptions<'a>,
    #[serde(flatten)]
    body: Map<String, Value>,
}

impl PayloadLike for EnvelopePayload<'_> {
    fn get_device_token(&self) -> &str {
        self.device_token
    }

    fn get_options(&self) -> &NotificationOptions<'_> {
        &self.options
    }
}

fn options(envelope: &ApnsEnvelope) -> NotificationOptions<'_> {
    let collapse_id = if envelope.collapse_id.is_empty() {
        None
    } else {
        // 超过 64 字节时不带 collapse id 发送
        CollapseId::new(&envelope.collapse_id)
            .inspect_err(|e| {
                warn!(collapse_id = %envelope.collapse_id, error = %e, "忽略无效的 collapse id")
            })
            .ok()
    };

    NotificationOptions {
        apns_id: Some(&envelope.apns_id),
        apns_push_type: Some(match envelope.push_type {
            PushType::Alert => a2::PushType::Alert,
            PushType::Background => a2::PushType::Background,
        }),
        apns_expiration: u64::try_from(envelope.expiration.timestamp()).ok(),
        apns_priority: Some(match envelope.priority {
            Priority::High => a2::Priority::High,
            Priority::Low => a2::Priority::Normal,
        }),
        apns_topic: Some(&envelope.topic),
        apns_collapse_id: collapse_id,
        ..Default::default()
    }
}

fn payload(envelope: &ApnsEnvelope) -> Result<EnvelopePayload<'_>> {
    Ok(EnvelopePayload {
        device_token: &envelope.device_token,
        options: options(envelope),
        body: serde_json::from_str(&envelope.payload)?,
    })
}

/// 把 a2 的发送结果转为投递报告
///
/// APNs 给出的状态码（包括非 200）都是报告；连接、超时等未拿到响应的失败是错误。
fn report(result: std::result::Result<Response, a2::Error>) -> Result<DeliveryReport> {
    let response = match result {
        Ok(response) => response,
        Err(a2::Error::ResponseError(response)) => response,
        Err(e) => return Err(PushError::transport(PROVIDER, e)),
    };

    Ok(DeliveryReport {
        status: response.code,
        code: 0,
        // a2 的失败原因枚举与 APNs 的 reason 字符串同名
        reason: response
            .error
            .map(|body| format!("{:?}", body.reason))
            .unwrap_or_default(),
        id: response.apns_id,
    })
}

/// 基于 a2 的 APNs 客户端
pub struct HttpApnsClient {
    client: Client,
    environment: ApnsEnvironment,
    timeout: Duration,
}

impl HttpApnsClient {
    /// 用 PKCS#12 证书创建客户端
    pub fn new(
        pkcs12: &[u8],
        password: &str,
        environment: ApnsEnvironment,
        timeout: Duration,
    ) -> Result<Self> {
        let mut reader = pkcs12;
        Self::from_reader(&mut reader, password, environment, timeout)
    }

    /// 从证书文件创建客户端
    pub fn from_file(
        path: impl AsRef<Path>,
        password: &str,
        environment: ApnsEnvironment,
        timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            PushError::Config(format!("读取 APNs 证书失败: {}: {e}", path.display()))
        })?;
        Self::from_reader(&mut file, password, environment, timeout)
    }

    fn from_reader<R: Read>(
        reader: &mut R,
        password: &str,
        environment: ApnsEnvironment,
        timeout: Duration,
    ) -> Result<Self> {
        let config = ClientConfig::new(environment.endpoint());
        let client = Client::certificate(reader, password, config)
            .map_err(|e| PushError::Config(format!("APNs 证书无效: {e}")))?;

        Ok(Self {
            client,
            environment,
            timeout,
        })
    }

    pub fn environment(&self) -> ApnsEnvironment {
        self.environment
    }
}

#[async_trait]
impl ApnsTransport for HttpApnsClient {
    async fn push(&self, envelope: &ApnsEnvelope) -> Result<DeliveryReport> {
        let request = payload(envelope)?;
        let result = tokio::time::timeout(self.timeout, self.client.send(request))
            .await
            .map_err(|_| {
                PushError::transport(PROVIDER, format!("请求超时 {:?}", self.timeout))
            })?;
        let report = report(result)?;

        debug!(
            status = report.status,
            reason = %report.reason,
            apns_id = ?report.id,
            token = %token_prefix(&envelope.device_token),
            environment = ?self.environment,
            "APNs 响应"
        );
        Ok(report)
    }
}
