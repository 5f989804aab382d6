//! 推送链路集成测试
//!
//! 使用内存存储和记录型客户端，验证从回执到逐设备信封、响应分类、
//! 设备注销以及 worker 调度的完整流程。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use push_shared::config::{ApnsConfig, DispatchConfig, FeishuConfig};
use push_shared::error::Result;
use push_shared::events::{CallState, Uid};
use push_shared::richtext::DraftyText;
use push_shared::store::{MemoryStore, Stores};
use push_shared::test_utils::{TestDataGenerator, TestFixture, test_device_token, test_uid};
use push_worker::apns::{ApnsEnvelope, ApnsProvider, ApnsTransport};
use push_worker::feishu::client::{FeishuApi, SendReply, TokenGrant};
use push_worker::feishu::FeishuProvider;
use push_worker::provider::deliver_receipt;
use push_worker::{AbortReason, DeliveryReport, PushHub, PushWorker, WorkerState};
use serde_json::Value;

/// 记录所有信封，按设备令牌决定响应
#[derive(Default)]
struct RecordingTransport {
    envelopes: Mutex<Vec<ApnsEnvelope>>,
    unregistered: Vec<String>,
}

impl RecordingTransport {
    fn tokens(&self) -> Vec<String> {
        self.envelopes
            .lock()
            .iter()
            .map(|e| e.device_token.clone())
            .collect()
    }
}

#[async_trait]
impl ApnsTransport for RecordingTransport {
    async fn push(&self, envelope: &ApnsEnvelope) -> Result<DeliveryReport> {
        self.envelopes.lock().push(envelope.clone());
        if self.unregistered.contains(&envelope.device_token) {
            return Ok(DeliveryReport {
                status: 410,
                reason: "Unregistered".to_string(),
                ..Default::default()
            });
        }
        Ok(DeliveryReport::ok(Some(envelope.apns_id.clone())))
    }
}

/// 总是返回 503 的客户端
struct UnavailableTransport {
    calls: Mutex<usize>,
}

#[async_trait]
impl ApnsTransport for UnavailableTransport {
    async fn push(&self, _envelope: &ApnsEnvelope) -> Result<DeliveryReport> {
        *self.calls.lock() += 1;
        Ok(DeliveryReport {
            status: 503,
            reason: "ServiceUnavailable".to_string(),
            ..Default::default()
        })
    }
}

/// 记录发送目标的飞书接口
#[derive(Default)]
struct RecordingFeishu {
    sent: Mutex<Vec<String>>,
    urgent: Mutex<Vec<String>>,
}

#[async_trait]
impl FeishuApi for RecordingFeishu {
    async fn tenant_access_token(&self, _app_id: &str, _app_secret: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            tenant_access_token: "t-test".to_string(),
            expire: 7200,
        })
    }

    async fn send_message(&self, _token: &str, union_id: &str, _content: &str) -> Result<SendReply> {
        self.sent.lock().push(union_id.to_string());
        Ok(SendReply {
            status: 200,
            code: 0,
            msg: "success".to_string(),
            message_id: Some(format!("om_{union_id}")),
        })
    }

    async fn urgent_app(&self, _token: &str, _message_id: &str, union_id: &str) -> Result<()> {
        self.urgent.lock().push(union_id.to_string());
        Ok(())
    }
}

fn apns_config() -> ApnsConfig {
    ApnsConfig {
        enabled: true,
        app_topic: "com.example.im".to_string(),
        ..Default::default()
    }
}

fn apns_provider(store: Arc<MemoryStore>, transport: Arc<dyn ApnsTransport>) -> ApnsProvider {
    ApnsProvider::with_transports(
        apns_config(),
        Stores::memory(store),
        Arc::new(DraftyText),
        Some(transport),
        None,
    )
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("等待条件超时");
}

#[tokio::test]
async fn test_end_to_end_envelope_count() {
    let sender = test_uid();
    let (alice, bob) = (test_uid(), test_uid());
    let (a1, a2, b1, b2) = (
        test_device_token(),
        test_device_token(),
        test_device_token(),
        test_device_token(),
    );

    let store = TestFixture::new()
        .with_user(TestDataGenerator::user(sender, "Sender"))
        .with_topic(TestDataGenerator::group_topic("grpTeam", "Team"))
        .with_device(alice, &a1, "ios")
        .with_device(alice, &a2, "ios")
        .with_device(alice, "web-token", "web")
        .with_device(alice, "unknown-token", "")
        .with_device(bob, &b1, "ios")
        .with_device(bob, &b2, "ios")
        .into_store()
        .await;

    let mut receipt = TestDataGenerator::message_receipt(sender, "grpTeam", "hello team");
    receipt.to.insert(alice, TestDataGenerator::recipient(4));
    receipt
        .to
        .insert(bob, TestDataGenerator::delivered_recipient(1, vec![b1.clone()]));

    let transport = Arc::new(RecordingTransport::default());
    let provider = apns_provider(store, transport.clone());
    let summary = deliver_receipt(&provider, &receipt).await;

    assert_eq!(summary.prepared, 3);
    assert_eq!(summary.delivered, 3);
    let tokens = transport.tokens();
    assert_eq!(tokens.len(), 3);
    assert!(!tokens.contains(&b1));
    for token in [&a1, &a2, &b2] {
        assert!(tokens.contains(token));
    }

    for envelope in transport.envelopes.lock().iter() {
        let body: Value = serde_json::from_str(&envelope.payload).unwrap();
        if envelope.device_token == b2 {
            // 已在线送达：静默推送
            assert!(body["aps"].get("alert").is_none());
            assert_eq!(body["aps"]["badge"], 1);
        } else {
            assert_eq!(body["aps"]["alert"]["title"], "Team");
            assert_eq!(body["aps"]["alert"]["body"], "Sender: hello team");
            assert_eq!(body["aps"]["badge"], 4);
        }
    }
}

#[tokio::test]
async fn test_group_chat_scenario_alerts_every_recipient() {
    let (fixture, sender, recipients) = TestFixture::group_chat_scenario("grpLunch");
    let store = fixture.into_store().await;

    let mut receipt = TestDataGenerator::message_receipt(sender, "grpLunch", "noon?");
    for uid in &recipients {
        receipt.to.insert(*uid, TestDataGenerator::recipient(1));
    }

    let transport = Arc::new(RecordingTransport::default());
    let summary = deliver_receipt(&apns_provider(store, transport.clone()), &receipt).await;
    assert_eq!(summary.delivered, 2);
    for envelope in transport.envelopes.lock().iter() {
        assert_eq!(envelope.collapse_id, "grpLunch");
        assert_eq!(envelope.topic, "com.example.im");
    }
}

#[tokio::test]
async fn test_p2p_recipients_get_counterpart_topic() {
    let (alice, bob) = (test_uid(), test_uid());
    let topic = alice.p2p_name(bob);
    let store = TestFixture::new()
        .with_user(TestDataGenerator::user(alice, "Alice"))
        .with_device(alice, "alice-phone", "ios")
        .with_device(bob, "bob-phone", "ios")
        .into_store()
        .await;

    // 点对点会话中发送者本人的其他设备同样会收到推送
    let mut receipt = TestDataGenerator::message_receipt(alice, &topic, "hi bob");
    receipt.to.insert(alice, TestDataGenerator::recipient(0));
    receipt.to.insert(bob, TestDataGenerator::recipient(1));

    let transport = Arc::new(RecordingTransport::default());
    deliver_receipt(&apns_provider(store, transport.clone()), &receipt).await;

    let envelopes = transport.envelopes.lock();
    assert_eq!(envelopes.len(), 2);
    for envelope in envelopes.iter() {
        assert_ne!(envelope.collapse_id, topic);
        let expected = if envelope.device_token == "bob-phone" {
            alice.user_id()
        } else {
            bob.user_id()
        };
        assert_eq!(envelope.collapse_id, expected);
    }
}

#[tokio::test]
async fn test_unregistered_device_is_removed_and_batch_continues() {
    let sender = test_uid();
    let uid = test_uid();
    let store = TestFixture::new()
        .with_device(uid, "stale", "ios")
        .with_device(uid, "fresh", "ios")
        .into_store()
        .await;

    let mut receipt = TestDataGenerator::message_receipt(sender, "grpTeam", "x");
    receipt.to.insert(uid, TestDataGenerator::recipient(0));

    let transport = Arc::new(RecordingTransport {
        unregistered: vec!["stale".to_string()],
        ..Default::default()
    });
    let summary = deliver_receipt(&apns_provider(store.clone(), transport.clone()), &receipt).await;

    assert_eq!(summary.deregistered, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(store.device_ids(uid).await, vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_service_unavailable_aborts_without_deletion() {
    let sender = test_uid();
    let uid = test_uid();
    let store = TestFixture::new()
        .with_device(uid, "d-1", "ios")
        .with_device(uid, "d-2", "ios")
        .with_device(uid, "d-3", "ios")
        .into_store()
        .await;

    let mut receipt = TestDataGenerator::message_receipt(sender, "grpTeam", "x");
    receipt.to.insert(uid, TestDataGenerator::recipient(0));

    let transport = Arc::new(UnavailableTransport {
        calls: Mutex::new(0),
    });
    let summary = deliver_receipt(&apns_provider(store.clone(), transport.clone()), &receipt).await;

    assert_eq!(summary.aborted, Some(AbortReason::Transient));
    assert_eq!(*transport.calls.lock(), 1);
    assert_eq!(store.device_ids(uid).await.len(), 3);
}

#[tokio::test]
async fn test_hub_fans_out_to_apns_and_feishu() {
    let sender = test_uid();
    let (alice, bob) = (test_uid(), test_uid());
    let store = TestFixture::new()
        .with_feishu_app("cli_test", "secret")
        .with_user(TestDataGenerator::feishu_user(sender, "Sender", "on_sender", "cli_test"))
        .with_user(TestDataGenerator::feishu_user(alice, "Alice", "on_alice", "cli_test"))
        .with_user(TestDataGenerator::user(bob, "Bob"))
        .with_device(alice, "alice-phone", "ios")
        .with_device(bob, "bob-phone", "ios")
        .into_store()
        .await;

    let transport = Arc::new(RecordingTransport::default());
    let feishu_api = Arc::new(RecordingFeishu::default());
    let dispatch = DispatchConfig::default();

    let apns = PushWorker::new(apns_provider(store.clone(), transport.clone()), &dispatch);
    let feishu = PushWorker::new(
        FeishuProvider::with_api(
            FeishuConfig {
                enabled: true,
                ..Default::default()
            },
            Stores::memory(store.clone()),
            feishu_api.clone(),
        )
        .await
        .unwrap(),
        &dispatch,
    );
    apns.start().unwrap();
    feishu.start().unwrap();

    let mut hub = PushHub::new();
    hub.register(Arc::new(apns));
    hub.register(Arc::new(feishu));
    assert_eq!(hub.ready_handlers(), vec!["apns", "feishu"]);

    let mut receipt =
        TestDataGenerator::call_receipt(sender, "grpTeam", CallState::Started, false);
    receipt.to.insert(sender, TestDataGenerator::recipient(0));
    receipt.to.insert(alice, TestDataGenerator::recipient(0));
    receipt.to.insert(bob, TestDataGenerator::recipient(0));
    hub.push(&receipt).await;

    wait_until(|| transport.envelopes.lock().len() == 2).await;
    wait_until(|| feishu_api.urgent.lock().len() == 1).await;
    hub.stop().await;

    assert_eq!(*feishu_api.sent.lock(), vec!["on_alice".to_string()]);
    assert_eq!(*feishu_api.urgent.lock(), vec!["on_alice".to_string()]);
    for envelope in transport.envelopes.lock().iter() {
        let body: Value = serde_json::from_str(&envelope.payload).unwrap();
        assert_eq!(body["act"], "2");
        assert_eq!(body["aps"]["interruption-level"], "critical");
    }
    assert!(hub.ready_handlers().is_empty());
}

#[tokio::test]
async fn test_worker_rejects_after_stop() {
    let store = Arc::new(MemoryStore::new());
    let worker = PushWorker::new(
        apns_provider(store, Arc::new(RecordingTransport::default())),
        &DispatchConfig::default(),
    );
    worker.start().unwrap();
    assert_eq!(worker.state(), WorkerState::Running);

    worker.stop().await;
    assert_eq!(worker.state(), WorkerState::Stopped);
    let receipt = TestDataGenerator::message_receipt(Uid::new(1), "grpTeam", "late");
    assert!(worker.submit(receipt).await.is_err());
}
