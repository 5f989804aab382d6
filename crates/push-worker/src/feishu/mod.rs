//! 飞书推送适配器
//!
//! 通过飞书机器人向接收者发送固定文案的提醒。每个接收者相互独立：
//! 某个用户的令牌或发送失败只影响该用户。

pub mod client;
pub mod message;
pub mod token;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use push_shared::config::{DispatchConfig, FeishuConfig};
use push_shared::error::Result;
use push_shared::events::{Receipt, Uid};
use push_shared::store::{Stores, UserStore};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::provider::{DeliveryReport, Outcome, PushProvider};

pub use client::{FeishuApi, HttpFeishuClient};
pub use message::{FeishuMessage, NoticeKind};
pub use token::TenantTokenCache;

const PROVIDER: &str = "feishu";

/// 无法取得令牌时写入报告的业务码
const TOKEN_UNAVAILABLE: i64 = -1;

/// 飞书推送适配器
pub struct FeishuProvider {
    config: FeishuConfig,
    users: Arc<dyn UserStore>,
    api: Arc<dyn FeishuApi>,
    tokens: TenantTokenCache,
}

impl FeishuProvider {
    pub async fn new(
        config: FeishuConfig,
        dispatch: &DispatchConfig,
        stores: Stores,
    ) -> std::result::Result<Self, WorkerError> {
        let client = HttpFeishuClient::new(Duration::from_secs(dispatch.http_timeout_seconds))
            .map_err(|e| init_error(e.to_string()))?;
        Self::with_api(config, stores, Arc::new(client)).await
    }

    /// 加载应用凭据并预热令牌
    ///
    /// 配置中的应用覆盖存储中的同名应用。
    pub async fn with_api(
        config: FeishuConfig,
        stores: Stores,
        api: Arc<dyn FeishuApi>,
    ) -> std::result::Result<Self, WorkerError> {
        let mut secrets: HashMap<String, String> = stores
            .feishu_apps
            .get_all()
            .await
            .map_err(|e| init_error(format!("加载飞书应用失败: {e}")))?
            .into_iter()
            .map(|app| (app.app_id, app.app_secret))
            .collect();
        secrets.extend(config.apps.clone());
        if secrets.is_empty() {
            warn!("没有可用的飞书应用");
        }

        let tokens = TenantTokenCache::new(api.clone(), secrets);
        tokens.warm_up().await;
        info!(apps = tokens.app_count(), "飞书适配器初始化完成");

        Ok(Self {
            config,
            users: stores.users,
            api,
            tokens,
        })
    }

    async fn escalate(&self, token: &str, message_id: &str, message: &FeishuMessage) {
        match self.api.urgent_app(token, message_id, &message.union_id).await {
            Ok(()) => debug!(uid = %message.uid, message_id, "飞书消息已加急"),
            Err(e) => warn!(uid = %message.uid, message_id, error = %e, "飞书消息加急失败"),
        }
    }
}

fn init_error(reason: impl Into<String>) -> WorkerError {
    WorkerError::Init {
        provider: PROVIDER.to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl PushProvider for FeishuProvider {
    type Message = FeishuMessage;

    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn prepare(&self, receipt: &Receipt) -> Vec<FeishuMessage> {
        let Some(kind) = message::notice_kind(&receipt.payload, self.config.urgent_on_missed_call)
        else {
            return Vec::new();
        };

        let sender = Uid::parse_user_id(&receipt.payload.from);
        let mut uids: Vec<Uid> = receipt
            .to
            .keys()
            .copied()
            .filter(|uid| Some(*uid) != sender)
            .collect();
        if uids.is_empty() {
            return Vec::new();
        }
        uids.sort_unstable();

        let users = match self.users.get_all(&uids).await {
            Ok(users) => users,
            Err(e) => {
                warn!(topic = %receipt.payload.topic, error = %e, "查询飞书接收者失败");
                return Vec::new();
            }
        };

        let content = match message::build_post_content(&self.config.message_title, kind.text()) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "构建飞书消息失败");
                return Vec::new();
            }
        };

        users
            .into_iter()
            .filter_map(|user| {
                if user.union_id.is_empty() || user.feishu_app_id.is_empty() {
                    debug!(uid = %user.uid, "用户未绑定飞书");
                    return None;
                }
                if !self.tokens.knows(&user.feishu_app_id) {
                    warn!(uid = %user.uid, app_id = %user.feishu_app_id, "用户所属飞书应用未配置");
                    return None;
                }
                Some(FeishuMessage {
                    uid: user.uid,
                    union_id: user.union_id,
                    app_id: user.feishu_app_id,
                    content: content.clone(),
                    urgent: kind.is_call(),
                })
            })
            .collect()
    }

    async fn send(&self, message: &FeishuMessage) -> Result<DeliveryReport> {
        let token = match self.tokens.get(&message.app_id).await {
            Ok(token) => token,
            Err(e) => {
                // 只影响该用户，转为拒绝结果
                return Ok(DeliveryReport {
                    status: 0,
                    code: TOKEN_UNAVAILABLE,
                    reason: e.to_string(),
                    id: None,
                });
            }
        };

        let reply = self
            .api
            .send_message(&token, &message.union_id, &message.content)
            .await?;

        if reply.code == 0
            && message.urgent
            && let Some(message_id) = reply.message_id.as_deref()
        {
            self.escalate(&token, message_id, message).await;
        }

        Ok(DeliveryReport {
            status: reply.status,
            code: reply.code,
            reason: reply.msg,
            id: reply.message_id,
        })
    }

    fn classify(&self, report: &DeliveryReport) -> Outcome {
        if report.code == 0 {
            Outcome::Delivered
        } else {
            Outcome::Rejected
        }
    }

    async fn deregister(&self, _message: &FeishuMessage) -> Result<()> {
        Ok(())
    }
}
