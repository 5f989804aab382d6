//! 接收者与设备解析
//!
//! 把一张回执展开为逐设备的 APNs 信封。接收者按 uid 升序处理，同一接收者的设备
//! 按注册顺序处理，这就是整批发送的顺序。

use std::borrow::Cow;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use push_shared::config::ApnsConfig;
use push_shared::error::Result;
use push_shared::events::{Receipt, TopicCategory, Uid, p2p_name_for_user};
use push_shared::store::{DeviceDef, DeviceStore, UserStore};
use tracing::{debug, warn};

use super::payload::{ApnsEnvelope, build_notification};
use crate::payload::{TransformContext, payload_to_data};
use crate::templates::AlertTemplateEngine;

const PLATFORM_IOS: &str = "ios";
const PLATFORM_WEB: &str = "web";

/// 发往单个设备的 APNs 消息
#[derive(Debug, Clone)]
pub struct ApnsMessage {
    /// 设备所属用户，注销设备时使用
    pub uid: Uid,
    pub envelope: ApnsEnvelope,
}

/// 日志中只输出设备令牌前缀
pub(crate) fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

/// 构建一张回执的全部 APNs 消息
///
/// 设备查询失败时放弃整张回执；没有任何设备且不是频道广播时直接返回空列表。
pub async fn prepare_notifications(
    receipt: &Receipt,
    devices: &dyn DeviceStore,
    transform: &TransformContext,
    config: &ApnsConfig,
    templates: &AlertTemplateEngine,
    now: DateTime<Utc>,
) -> Vec<ApnsMessage> {
    let mut uids: Vec<Uid> = receipt.to.keys().copied().collect();
    uids.sort_unstable();

    // 设备令牌全局唯一，跳过集合不区分接收者
    let skip: HashSet<&str> = receipt
        .to
        .values()
        .flat_map(|rcpt| rcpt.devices.iter().map(String::as_str))
        .collect();

    let (registered, count) = match devices.get_all(&uids).await {
        Ok(found) => found,
        Err(e) => {
            warn!(topic = %receipt.payload.topic, error = %e, "查询设备失败，放弃本次推送");
            return Vec::new();
        }
    };
    if count == 0 && receipt.channel.is_none() {
        debug!(topic = %receipt.payload.topic, "接收者没有注册设备");
        return Vec::new();
    }

    let base = match payload_to_data(&receipt.payload, transform).await {
        Ok(data) => data,
        Err(e) => {
            warn!(
                topic = %receipt.payload.topic,
                what = %receipt.payload.what,
                error = %e,
                "转换推送负载失败，跳过该事件"
            );
            return Vec::new();
        }
    };
    let p2p = TopicCategory::of(&receipt.payload.topic) == TopicCategory::P2P;

    let mut messages = Vec::with_capacity(count);
    for uid in uids {
        let Some(user_devices) = registered.get(&uid) else {
            continue;
        };
        let Some(rcpt) = receipt.to.get(&uid) else {
            continue;
        };

        let mut data = Cow::Borrowed(&base);
        if rcpt.delivered > 0 {
            data.to_mut().silent = true;
        }
        if p2p {
            match p2p_name_for_user(uid, &base.topic) {
                Ok(topic) => data.to_mut().topic = topic,
                Err(e) => warn!(uid = %uid, topic = %base.topic, error = %e, "点对点会话改名失败"),
            }
        }

        for device in user_devices {
            if device.device_id.is_empty() || skip.contains(device.device_id.as_str()) {
                continue;
            }
            match device.platform.as_str() {
                PLATFORM_IOS => {
                    match build_notification(
                        &data,
                        rcpt.unread,
                        &device.device_id,
                        config,
                        templates,
                        now,
                    ) {
                        Ok(envelope) => messages.push(ApnsMessage { uid, envelope }),
                        Err(e) => warn!(
                            uid = %uid,
                            device = token_prefix(&device.device_id),
                            error = %e,
                            "构建 APNs 通知失败，跳过该设备"
                        ),
                    }
                }
                // Web 推送由其他适配器处理
                PLATFORM_WEB => {}
                "" => {}
                other => warn!(
                    uid = %uid,
                    device = token_prefix(&device.device_id),
                    platform = other,
                    "未知的设备平台"
                ),
            }
        }
    }

    debug!(
        topic = %receipt.payload.topic,
        devices = count,
        messages = messages.len(),
        "APNs 通知构建完成"
    );
    messages
}

/// 用户的全部已注册设备
pub async fn devices_for_user(devices: &dyn DeviceStore, uid: Uid) -> Result<Vec<DeviceDef>> {
    let (mut found, _) = devices.get_all(&[uid]).await?;
    Ok(found.remove(&uid).unwrap_or_default())
}

/// 用户订阅的频道
pub async fn channels_for_user(users: &dyn UserStore, uid: Uid) -> Result<Vec<String>> {
    users.get_channels(uid).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use push_shared::error::PushError;
    use push_shared::events::{Payload, Recipient};
    use push_shared::richtext::DraftyText;
    use push_shared::store::{MemoryStore, Stores};
    use serde_json::json;

    struct FailingDevices;

    #[async_trait]
    impl DeviceStore for FailingDevices {
        async fn get_all(&self, _uids: &[Uid]) -> Result<(HashMap<Uid, Vec<DeviceDef>>, usize)> {
            Err(PushError::Store("connection refused".to_string()))
        }

        async fn delete(&self, _uid: Uid, _device_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> ApnsConfig {
        ApnsConfig {
            enabled: true,
            app_topic: "com.example.im".to_string(),
            ..Default::default()
        }
    }

    fn receipt(topic: &str, to: Vec<(Uid, Recipient)>) -> Receipt {
        Receipt {
            payload: Payload {
                what: "msg".to_string(),
                topic: topic.to_string(),
                from: Uid::new(1).user_id(),
                content: json!("hello"),
                ..Default::default()
            },
            to: to.into_iter().collect(),
            channel: None,
        }
    }

    async fn prepare(store: &Arc<MemoryStore>, receipt: &Receipt) -> Vec<ApnsMessage> {
        let stores = Stores::memory(store.clone());
        let ctx = TransformContext::new(&stores, Arc::new(DraftyText));
        prepare_notifications(
            receipt,
            stores.devices.as_ref(),
            &ctx,
            &config(),
            &AlertTemplateEngine::default(),
            Utc::now(),
        )
        .await
    }

    #[tokio::test]
    async fn test_skip_set_spans_recipients() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = (Uid::new(10), Uid::new(20));
        store.add_device(a, DeviceDef::new("shared", "ios")).await;
        store.add_device(a, DeviceDef::new("a-1", "ios")).await;
        store.add_device(b, DeviceDef::new("b-1", "ios")).await;

        // b 已在 "shared" 上收到，a 的同名设备也不应再推
        let rcpt_b = Recipient {
            devices: vec!["shared".to_string()],
            delivered: 1,
            unread: 2,
        };
        let receipt = receipt("grpTeam", vec![(a, Recipient::default()), (b, rcpt_b)]);

        let messages = prepare(&store, &receipt).await;
        let tokens: Vec<&str> = messages
            .iter()
            .map(|m| m.envelope.device_token.as_str())
            .collect();
        assert_eq!(tokens, vec!["a-1", "b-1"]);

        // 已交互式送达的接收者只收到静默推送
        let body: serde_json::Value = serde_json::from_str(&messages[1].envelope.payload).unwrap();
        assert!(body["aps"].get("alert").is_none());
        assert_eq!(body["aps"]["badge"], 2);
    }

    #[tokio::test]
    async fn test_platform_filtering() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;
        store.add_device(uid, DeviceDef::new("web-1", "web")).await;
        store.add_device(uid, DeviceDef::new("none-1", "")).await;
        store.add_device(uid, DeviceDef::new("fax-1", "fax")).await;
        store.add_device(uid, DeviceDef::new("", "ios")).await;

        let messages = prepare(&store, &receipt("grpTeam", vec![(uid, Recipient::default())])).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].envelope.device_token, "ios-1");
        assert_eq!(messages[0].uid, uid);
    }

    #[tokio::test]
    async fn test_p2p_topic_diverges_per_recipient() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = (Uid::new(1), Uid::new(2));
        store.add_device(a, DeviceDef::new("a-1", "ios")).await;
        store.add_device(b, DeviceDef::new("b-1", "ios")).await;

        let topic = a.p2p_name(b);
        let receipt = receipt(&topic, vec![(a, Recipient::default()), (b, Recipient::default())]);
        let messages = prepare(&store, &receipt).await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].envelope.collapse_id, b.user_id());
        assert_eq!(messages[1].envelope.collapse_id, a.user_id());
        for message in &messages {
            assert_ne!(message.envelope.collapse_id, topic);
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_aborts_receipt() {
        let store = Arc::new(MemoryStore::new());
        let ctx = TransformContext::new(&Stores::memory(store), Arc::new(DraftyText));
        let receipt = receipt("grpTeam", vec![(Uid::new(10), Recipient::default())]);

        let messages = prepare_notifications(
            &receipt,
            &FailingDevices,
            &ctx,
            &config(),
            &AlertTemplateEngine::default(),
            Utc::now(),
        )
        .await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_no_devices_and_unknown_action() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        assert!(
            prepare(&store, &receipt("grpTeam", vec![(uid, Recipient::default())]))
                .await
                .is_empty()
        );

        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;
        let mut unknown = receipt("grpTeam", vec![(uid, Recipient::default())]);
        unknown.payload.what = "pres".to_string();
        assert!(prepare(&store, &unknown).await.is_empty());
    }

    #[tokio::test]
    async fn test_user_helpers() {
        let store = Arc::new(MemoryStore::new());
        let uid = Uid::new(10);
        store.add_device(uid, DeviceDef::new("ios-1", "ios")).await;
        store.add_channel(uid, "chnNews").await;

        let devices = devices_for_user(store.as_ref(), uid).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices_for_user(store.as_ref(), Uid::new(11)).await.unwrap().is_empty());
        assert_eq!(
            channels_for_user(store.as_ref(), uid).await.unwrap(),
            vec!["chnNews".to_string()]
        );
    }

    #[test]
    fn test_token_prefix() {
        assert_eq!(token_prefix("0123456789abcdef"), "01234567");
        assert_eq!(token_prefix("abc"), "abc");
    }
}
