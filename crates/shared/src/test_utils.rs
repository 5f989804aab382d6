//! 测试工具模块
//!
//! 提供集成测试所需的辅助函数、测试数据生成器和预置存储场景。
//! 用于简化测试代码编写，提高测试的可重复性和可维护性。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::events::{CallState, Payload, Receipt, Recipient, Uid};
use crate::store::{DeviceDef, FeishuApp, MemoryStore, TopicRecord, UserRecord};

// ==================== ID 生成 ====================

/// 生成唯一的测试用户 ID
///
/// 使用原子计数器确保并行测试时的唯一性
pub fn test_uid() -> Uid {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let base = (Utc::now().timestamp_micros() as u64 % 1_000_000_000) << 16;
    Uid::new(base + COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// 生成 64 位十六进制的测试设备令牌
pub fn test_device_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

// ==================== 测试数据生成器 ====================

/// 测试数据生成器
///
/// 提供生成测试用负载、回执、用户等数据的便捷方法
pub struct TestDataGenerator;

impl TestDataGenerator {
    /// 生成消息负载
    pub fn payload(what: &str, topic: &str, from: Uid, content: Value) -> Payload {
        Payload {
            what: what.to_string(),
            topic: topic.to_string(),
            from: from.user_id(),
            timestamp: Utc::now(),
            seq_id: 1,
            content,
            ..Default::default()
        }
    }

    /// 生成新消息回执
    pub fn message_receipt(from: Uid, topic: &str, text: &str) -> Receipt {
        Receipt {
            payload: Self::payload("msg", topic, from, json!(text)),
            to: HashMap::new(),
            channel: None,
        }
    }

    /// 生成通话信令回执
    pub fn call_receipt(from: Uid, topic: &str, state: CallState, audio_only: bool) -> Receipt {
        let mut receipt = Self::message_receipt(from, topic, "");
        receipt.payload.call_state = Some(state);
        receipt.payload.audio_only = audio_only;
        receipt
    }

    /// 未在线送达的接收者
    pub fn recipient(unread: i32) -> Recipient {
        Recipient {
            devices: Vec::new(),
            delivered: 0,
            unread,
        }
    }

    /// 已通过在线会话送达的接收者
    pub fn delivered_recipient(unread: i32, devices: Vec<String>) -> Recipient {
        Recipient {
            delivered: devices.len().max(1) as i32,
            devices,
            unread,
        }
    }

    /// 生成用户记录，昵称写入公开资料的 `fn` 字段
    pub fn user(uid: Uid, name: &str) -> UserRecord {
        UserRecord {
            uid,
            public: Some(json!({ "fn": name })),
            ..Default::default()
        }
    }

    /// 生成绑定飞书账号的用户记录
    pub fn feishu_user(uid: Uid, name: &str, union_id: &str, app_id: &str) -> UserRecord {
        UserRecord {
            union_id: union_id.to_string(),
            feishu_app_id: app_id.to_string(),
            ..Self::user(uid, name)
        }
    }

    /// 生成群组会话记录
    pub fn group_topic(name: &str, title: &str) -> TopicRecord {
        TopicRecord {
            name: name.to_string(),
            public: Some(json!({ "fn": title })),
        }
    }
}

// ==================== 断言辅助 ====================

/// 测试断言辅助结构
pub struct TestAssertions;

impl TestAssertions {
    /// 断言 JSON 字段等于期望值
    pub fn assert_json_field_eq(actual: &Value, field: &str, expected: &Value) {
        let actual_val = actual.get(field);
        assert_eq!(
            actual_val,
            Some(expected),
            "Field '{}' mismatch: actual={:?}, expected={:?}",
            field,
            actual_val,
            expected
        );
    }

    /// 断言 JSON 包含指定字段
    pub fn assert_json_has_field(value: &Value, field: &str) {
        assert!(
            value.get(field).is_some(),
            "Expected JSON to have field '{}', but it was missing. Value: {:?}",
            field,
            value
        );
    }

    /// 断言 JSON 不包含指定字段
    pub fn assert_json_missing_field(value: &Value, field: &str) {
        assert!(
            value.get(field).is_none(),
            "Expected JSON to omit field '{}'. Value: {:?}",
            field,
            value
        );
    }

    /// 断言时间在指定范围内
    pub fn assert_time_within(actual: DateTime<Utc>, expected: DateTime<Utc>, tolerance: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff < tolerance,
            "Time difference {:?} exceeds tolerance {:?}. Actual: {}, Expected: {}",
            diff,
            tolerance,
            actual,
            expected
        );
    }
}

// ==================== 测试 Fixture ====================

/// 测试 Fixture 构建器
///
/// 收集用户、设备、会话和飞书应用，最后一次性写入内存存储
#[derive(Default)]
pub struct TestFixture {
    pub users: Vec<UserRecord>,
    pub devices: Vec<(Uid, DeviceDef)>,
    pub topics: Vec<TopicRecord>,
    pub feishu_apps: Vec<FeishuApp>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加测试用户
    pub fn with_user(mut self, user: UserRecord) -> Self {
        self.users.push(user);
        self
    }

    /// 为用户注册设备
    pub fn with_device(mut self, uid: Uid, device_id: &str, platform: &str) -> Self {
        self.devices.push((uid, DeviceDef::new(device_id, platform)));
        self
    }

    /// 添加会话
    pub fn with_topic(mut self, topic: TopicRecord) -> Self {
        self.topics.push(topic);
        self
    }

    /// 添加飞书应用凭据
    pub fn with_feishu_app(mut self, app_id: &str, app_secret: &str) -> Self {
        self.feishu_apps.push(FeishuApp {
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
        });
        self
    }

    /// 写入内存存储
    pub async fn into_store(self) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for user in self.users {
            store.add_user(user).await;
        }
        for (uid, device) in self.devices {
            store.add_device(uid, device).await;
        }
        for topic in self.topics {
            store.add_topic(topic).await;
        }
        for app in self.feishu_apps {
            store.add_feishu_app(app).await;
        }
        store
    }

    /// 构建标准测试场景：一个发送者与两个各有一台 iOS 设备的接收者
    ///
    /// 返回 (fixture, 发送者, 接收者列表)
    pub fn group_chat_scenario(topic: &str) -> (Self, Uid, Vec<Uid>) {
        let sender = test_uid();
        let alice = test_uid();
        let bob = test_uid();

        let fixture = Self::new()
            .with_user(TestDataGenerator::user(sender, "Sender"))
            .with_user(TestDataGenerator::user(alice, "Alice"))
            .with_user(TestDataGenerator::user(bob, "Bob"))
            .with_device(alice, &test_device_token(), "ios")
            .with_device(bob, &test_device_token(), "ios")
            .with_topic(TestDataGenerator::group_topic(topic, "Team"));

        (fixture, sender, vec![alice, bob])
    }
}
