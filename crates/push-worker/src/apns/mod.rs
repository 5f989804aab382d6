//! APNs 推送适配器
//!
//! 持有生产与开发两个环境的客户端。`apns.env = "dev"` 时只创建开发客户端；
//! 否则两者都创建，`dev_accounts` 中的用户走开发环境。

pub mod classify;
pub mod client;
pub mod payload;
pub mod resolver;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use push_shared::config::{ApnsConfig, DispatchConfig};
use push_shared::error::{PushError, Result};
use push_shared::events::{ChannelReq, Receipt, Uid};
use push_shared::richtext::TextRenderer;
use push_shared::store::{DeviceStore, Stores, UserStore};
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::payload::TransformContext;
use crate::provider::{DeliveryReport, Outcome, PushProvider};
use crate::templates::AlertTemplateEngine;

pub use client::{ApnsEnvironment, ApnsTransport, HttpApnsClient};
pub use payload::ApnsEnvelope;
pub use resolver::ApnsMessage;

const PROVIDER: &str = "apns";

/// APNs 推送适配器
pub struct ApnsProvider {
    config: ApnsConfig,
    devices: Arc<dyn DeviceStore>,
    users: Arc<dyn UserStore>,
    transform: TransformContext,
    templates: AlertTemplateEngine,
    production: Option<Arc<dyn ApnsTransport>>,
    development: Option<Arc<dyn ApnsTransport>>,
    dev_accounts: HashSet<Uid>,
}

impl ApnsProvider {
    /// 按配置读取证书并创建客户端，任何失败都使适配器不可用
    pub fn new(
        config: ApnsConfig,
        dispatch: &DispatchConfig,
        stores: Stores,
        renderer: Arc<dyn TextRenderer>,
    ) -> std::result::Result<Self, WorkerError> {
        if config.app_topic.is_empty() {
            return Err(init_error("未配置 app_topic"));
        }

        let timeout = Duration::from_secs(dispatch.http_timeout_seconds);
        let client = |environment| -> std::result::Result<Arc<dyn ApnsTransport>, WorkerError> {
            let client = HttpApnsClient::from_file(
                &config.credentials_file,
                &config.credentials_password,
                environment,
                timeout,
            )
            .map_err(|e| init_error(e.to_string()))?;
            Ok(Arc::new(client))
        };

        let development = Some(client(ApnsEnvironment::Development)?);
        let production = if config.is_dev_only() {
            None
        } else {
            Some(client(ApnsEnvironment::Production)?)
        };

        info!(
            app_topic = %config.app_topic,
            env = %config.env,
            dev_accounts = config.dev_accounts.len(),
            "APNs 适配器初始化完成"
        );
        Ok(Self::with_transports(
            config,
            stores,
            renderer,
            production,
            development,
        ))
    }

    /// 使用给定的客户端创建适配器
    pub fn with_transports(
        config: ApnsConfig,
        stores: Stores,
        renderer: Arc<dyn TextRenderer>,
        production: Option<Arc<dyn ApnsTransport>>,
        development: Option<Arc<dyn ApnsTransport>>,
    ) -> Self {
        let dev_accounts = config
            .dev_accounts
            .iter()
            .filter_map(|account| {
                let uid = Uid::parse_user_id(account).or_else(|| Uid::parse(account));
                if uid.is_none() {
                    warn!(account = %account, "无法解析开发账号");
                }
                uid
            })
            .collect();

        Self {
            templates: AlertTemplateEngine::new(config.templates.clone()),
            transform: TransformContext::new(&stores, renderer),
            devices: stores.devices,
            users: stores.users,
            config,
            production,
            development,
            dev_accounts,
        }
    }

    /// 选择用户对应的客户端
    fn transport_for(&self, uid: Uid) -> Option<&Arc<dyn ApnsTransport>> {
        if self.dev_accounts.contains(&uid) || self.production.is_none() {
            self.development.as_ref()
        } else {
            self.production.as_ref()
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
impl PushProvider for ApnsProvider {
    type Message = ApnsMessage;

    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn prepare(&self, receipt: &Receipt) -> Vec<ApnsMessage> {
        resolver::prepare_notifications(
            receipt,
            self.devices.as_ref(),
            &self.transform,
            &self.config,
            &self.templates,
            Utc::now(),
        )
        .await
    }

    async fn send(&self, message: &ApnsMessage) -> Result<DeliveryReport> {
        let transport = self
            .transport_for(message.uid)
            .ok_or_else(|| PushError::Config("没有可用的 APNs 客户端".to_string()))?;
        transport.push(&message.envelope).await
    }

    fn classify(&self, report: &DeliveryReport) -> Outcome {
        classify::classify(report)
    }

    async fn deregister(&self, message: &ApnsMessage) -> Result<()> {
        self.devices
            .delete(message.uid, &message.envelope.device_token)
            .await?;
        info!(
            uid = %message.uid,
            device = resolver::token_prefix(&message.envelope.device_token),
            "已删除失效设备"
        );
        Ok(())
    }

    async fn on_channel(&self, req: &ChannelReq) {
        let devices = match resolver::devices_for_user(self.devices.as_ref(), req.uid).await {
            Ok(devices) => devices.len(),
            Err(e) => {
                warn!(uid = %req.uid, error = %e, "查询用户设备失败");
                0
            }
        };
        let channels = match resolver::channels_for_user(self.users.as_ref(), req.uid).await {
            Ok(channels) => channels.len(),
            Err(e) => {
                warn!(uid = %req.uid, error = %e, "查询用户频道失败");
                0
            }
        };

        // 频道推送尚未接入 APNs，只做记录
        info!(
            uid = %req.uid,
            channel = %req.channel,
            unsub = req.unsub,
            requested_devices = req.devices.len(),
            devices,
            channels,
            "APNs 频道请求"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AbortReason, deliver_receipt};
    use client::MockApnsTransport;
    use push_shared::events::{Payload, Recipient};
    use push_shared::richtext::DraftyText;
    use push_shared::store::{DeviceDef, MemoryStore};
    use serde_json::json;

    fn config() -> ApnsConfig {
        ApnsConfig {
            enabled: true,
            app_topic: "com.example.im".to_string(),
            ..Default::default()
        }
    }

    fn receipt(to: &[Uid]) -> Receipt {
        Receipt {
            payload: Payload {
                what: "msg".to_string(),
                topic: "grpTeam".to_string(),
                from: Uid::new(1).user_id(),
                content: json!("hello"),
                ..Default::default()
            },
            to: to.iter().map(|uid| (*uid, Recipient::default())).collect(),
            channel: None,
        }
    }

    fn counting_transport(status: u16, reason: &'static str, times: usize) -> MockApnsTransport {
        let mut mock = MockApnsTransport::new();
        mock.expect_push().times(times).returning(move |_| {
            Ok(DeliveryReport {
                status,
                reason: reason.to_string(),
                ..Default::default()
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_dev_accounts_use_development_transport() {
        let store = Arc::new(MemoryStore::new());
        let (dev, prod) = (Uid::new(10), Uid::new(20));
        store.add_device(dev, DeviceDef::new("dev-1", "ios")).await;
        store.add_device(prod, DeviceDef::new("prod-1", "ios")).await;

        let mut config = config();
        config.dev_accounts = vec![dev.user_id(), "garbage!".to_string()];
        let provider = ApnsProvider::with_transports(
            config,
            Stores::memory(store),
            Arc::new(DraftyText),
            Some(Arc::new(counting_transport(200, "", 1))),
            Some(Arc::new(counting_transport(200, "", 1))),
        );

        let summary = deliver_receipt(&provider, &receipt(&[dev, prod])).await;
        assert_eq!(summary.delivered, 2);
    }

    #[tokio::test]
    async fn test_dev_only_mode_routes_everyone_to_development() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;

        let provider = ApnsProvider::with_transports(
            config(),
            Stores::memory(store),
            Arc::new(DraftyText),
            None,
            Some(Arc::new(counting_transport(200, "", 1))),
        );
        let summary = deliver_receipt(&provider, &receipt(&[uid])).await;
        assert_eq!(summary.delivered, 1);
    }

    #[tokio::test]
    async fn test_unregistered_device_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("stale-1", "ios")).await;
        store.add_device(uid, DeviceDef::new("live-1", "ios")).await;

        let mut mock = MockApnsTransport::new();
        mock.expect_push().times(2).returning(|envelope| {
            if envelope.device_token == "stale-1" {
                Ok(DeliveryReport {
                    status: 410,
                    reason: "Unregistered".to_string(),
                    ..Default::default()
                })
            } else {
                Ok(DeliveryReport::ok(Some(envelope.apns_id.clone())))
            }
        });

        let provider = ApnsProvider::with_transports(
            config(),
            Stores::memory(store.clone()),
            Arc::new(DraftyText),
            Some(Arc::new(mock)),
            None,
        );
        let summary = deliver_receipt(&provider, &receipt(&[uid])).await;

        assert_eq!(summary.deregistered, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(store.device_ids(uid).await, vec!["live-1".to_string()]);
    }

    #[tokio::test]
    async fn test_bad_device_token_aborts_without_deletion() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;
        store.add_device(uid, DeviceDef::new("ios-2", "ios")).await;

        let provider = ApnsProvider::with_transports(
            config(),
            Stores::memory(store.clone()),
            Arc::new(DraftyText),
            Some(Arc::new(counting_transport(400, "BadDeviceToken", 1))),
            None,
        );
        let summary = deliver_receipt(&provider, &receipt(&[uid])).await;

        assert_eq!(summary.aborted, Some(AbortReason::Config));
        assert_eq!(store.device_ids(uid).await.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_token_keeps_registration() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;
        store.add_device(uid, DeviceDef::new("ios-2", "ios")).await;

        let provider = ApnsProvider::with_transports(
            config(),
            Stores::memory(store.clone()),
            Arc::new(DraftyText),
            Some(Arc::new(counting_transport(410, "ExpiredToken", 1))),
            None,
        );
        let summary = deliver_receipt(&provider, &receipt(&[uid])).await;

        assert_eq!(summary.aborted, Some(AbortReason::Unrecognized));
        assert_eq!(summary.deregistered, 0);
        assert_eq!(store.device_ids(uid).await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_transport_aborts_as_config() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;

        let provider = ApnsProvider::with_transports(
            config(),
            Stores::memory(store),
            Arc::new(DraftyText),
            None,
            None,
        );
        let summary = deliver_receipt(&provider, &receipt(&[uid])).await;
        assert_eq!(summary.aborted, Some(AbortReason::Config));
    }

    #[test]
    fn test_init_requires_app_topic_and_credentials() {
        let store = Arc::new(MemoryStore::new());
        let dispatch = DispatchConfig::default();

        let result = ApnsProvider::new(
            ApnsConfig {
                enabled: true,
                ..Default::default()
            },
            &dispatch,
            Stores::memory(store.clone()),
            Arc::new(DraftyText),
        );
        assert!(matches!(result, Err(WorkerError::Init { .. })));

        let mut missing_cert = config();
        missing_cert.credentials_file = "/nonexistent/cert.p12".to_string();
        let result = ApnsProvider::new(
            missing_cert,
            &dispatch,
            Stores::memory(store),
            Arc::new(DraftyText),
        );
        assert!(matches!(result, Err(WorkerError::Init { .. })));
    }
}
