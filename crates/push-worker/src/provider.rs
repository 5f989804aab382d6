//! 推送适配器接口
//!
//! 通过 `PushProvider` trait 抽象各推送服务的能力：准备（转换、解析接收者、构建消息）、
//! 发送、结果分类、注销失效设备和频道订阅记录。`deliver_receipt` 在所有适配器之上
//! 统一实现一批消息的发送语义，新增适配器无需改动调度循环。

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use push_shared::error::{PushError, Result};
use push_shared::events::{ChannelReq, Receipt};
use push_shared::observability::metrics;
use tracing::{debug, info, warn};

/// 推送服务对单条消息的响应
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// HTTP 状态码
    pub status: u16,
    /// 业务错误码，没有业务码的服务为 0
    pub code: i64,
    /// 机器可读的失败原因
    pub reason: String,
    /// 推送服务分配的消息 ID
    pub id: Option<String>,
}

impl DeliveryReport {
    pub fn ok(id: Option<String>) -> Self {
        Self {
            status: 200,
            id,
            ..Default::default()
        }
    }
}

/// 中止整批发送的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// 推送服务暂时不可用，可由外层稍后重试
    Transient,
    /// 证书、主题等运维配置问题，与具体设备无关
    Config,
    /// 无法识别的失败原因，保守地按中止处理
    Unrecognized,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Config => "config",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl From<&PushError> for AbortReason {
    /// 请求未完成时的中止原因：可重试的错误为瞬时，配置错误为配置，其余无法识别
    fn from(err: &PushError) -> Self {
        if err.is_retryable() {
            Self::Transient
        } else if matches!(err, PushError::Config(_)) {
            Self::Config
        } else {
            Self::Unrecognized
        }
    }
}

/// 单条消息的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 投递成功
    Delivered,
    /// 该接收者投递失败，继续处理后续消息
    Rejected,
    /// 设备注册已失效：删除注册后继续
    Deregister,
    /// 停止处理本批剩余消息
    Abort(AbortReason),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
            Self::Deregister => "deregister",
            Self::Abort(_) => "aborted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort(reason) => write!(f, "aborted({})", reason.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// 推送适配器 trait
#[async_trait]
pub trait PushProvider: Send + Sync + 'static {
    /// 适配器构建的出站消息
    type Message: Send + Sync + 'static;

    /// 适配器名称，用于日志与指标标签
    fn name(&self) -> &'static str;

    /// 把回执展开为出站消息，顺序即发送顺序；无需发送时返回空列表
    async fn prepare(&self, receipt: &Receipt) -> Vec<Self::Message>;

    /// 发送单条消息。返回 `Err` 表示请求未能完成（网络错误等）
    async fn send(&self, message: &Self::Message) -> Result<DeliveryReport>;

    /// 对推送服务的响应分类
    fn classify(&self, report: &DeliveryReport) -> Outcome;

    /// 删除失效的设备注册
    async fn deregister(&self, message: &Self::Message) -> Result<()>;

    /// 频道订阅 / 退订记录
    async fn on_channel(&self, req: &ChannelReq) {
        info!(
            provider = self.name(),
            uid = %req.uid,
            channel = %req.channel,
            unsub = req.unsub,
            "收到频道请求"
        );
    }
}

/// 一批消息的发送汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub prepared: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub deregistered: usize,
    /// 中止原因，为 `None` 表示整批处理完成
    pub aborted: Option<AbortReason>,
}

impl BatchSummary {
    pub fn attempted(&self) -> usize {
        self.delivered + self.rejected + self.deregistered + usize::from(self.aborted.is_some())
    }
}

/// 按顺序发送一张回执对应的全部消息
///
/// - `Delivered` / `Rejected`：继续下一条
/// - `Deregister`：删除设备注册后继续，删除失败只记录日志
/// - `Abort` 或请求错误：停止本批剩余消息，不做重试
pub async fn deliver_receipt<P>(provider: &P, receipt: &Receipt) -> BatchSummary
where
    P: PushProvider + ?Sized,
{
    let name = provider.name();
    metrics::record_receipt(name);

    let messages = provider.prepare(receipt).await;
    let mut summary = BatchSummary {
        prepared: messages.len(),
        ..Default::default()
    };
    if messages.is_empty() {
        debug!(provider = name, topic = %receipt.payload.topic, "回执无需推送");
        return summary;
    }

    for (index, message) in messages.iter().enumerate() {
        let started = Instant::now();
        let report = match provider.send(message).await {
            Ok(report) => report,
            Err(e) => {
                let reason = AbortReason::from(&e);
                warn!(
                    provider = name,
                    error = %e,
                    error_code = e.code(),
                    remaining = messages.len() - index - 1,
                    "推送请求失败，停止本批发送"
                );
                metrics::record_batch_abort(name, reason.as_str());
                summary.aborted = Some(reason);
                break;
            }
        };

        let outcome = provider.classify(&report);
        metrics::record_delivery(name, outcome.as_str(), started.elapsed().as_secs_f64());

        match outcome {
            Outcome::Delivered => summary.delivered += 1,
            Outcome::Rejected => {
                warn!(
                    provider = name,
                    status = report.status,
                    code = report.code,
                    reason = %report.reason,
                    "推送被拒绝，继续发送"
                );
                summary.rejected += 1;
            }
            Outcome::Deregister => {
                warn!(provider = name, reason = %report.reason, "设备注册已失效");
                match provider.deregister(message).await {
                    Ok(()) => {
                        metrics::record_deregistration(name);
                        summary.deregistered += 1;
                    }
                    Err(e) => {
                        warn!(provider = name, error = %e, "删除失效设备失败");
                    }
                }
            }
            Outcome::Abort(reason) => {
                warn!(
                    provider = name,
                    status = report.status,
                    reason = %report.reason,
                    outcome = %outcome,
                    remaining = messages.len() - index - 1,
                    "停止本批发送"
                );
                metrics::record_batch_abort(name, reason.as_str());
                summary.aborted = Some(reason);
                break;
            }
        }
    }

    debug!(provider = name, summary = ?summary, "回执处理完成");
    summary
}
