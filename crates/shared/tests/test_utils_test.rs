//! test_utils 模块的集成测试
//!
//! 验证测试工具模块的功能正确性

use push_shared::events::{CallState, Uid};
use push_shared::store::{DeviceStore, UserStore};
use push_shared::test_utils::*;
use serde_json::json;

// ==================== 测试数据生成器测试 ====================

#[test]
fn test_message_receipt_generation() {
    let from = test_uid();
    let receipt = TestDataGenerator::message_receipt(from, "grpTeam", "hello");

    assert_eq!(receipt.payload.what, "msg");
    assert_eq!(receipt.payload.topic, "grpTeam");
    assert_eq!(receipt.payload.content, json!("hello"));
    assert!(receipt.to.is_empty());
    assert!(receipt.channel.is_none());
}

#[test]
fn test_call_receipt_generation() {
    let receipt =
        TestDataGenerator::call_receipt(test_uid(), "grpTeam", CallState::Missed, false);
    assert_eq!(receipt.payload.call_state, Some(CallState::Missed));
    assert!(!receipt.payload.audio_only);
}

#[test]
fn test_recipient_generation() {
    let offline = TestDataGenerator::recipient(4);
    assert_eq!(offline.delivered, 0);
    assert_eq!(offline.unread, 4);

    let online = TestDataGenerator::delivered_recipient(1, vec!["dev-a".to_string()]);
    assert_eq!(online.delivered, 1);
    assert_eq!(online.devices, vec!["dev-a".to_string()]);
}

#[test]
fn test_feishu_user_generation() {
    let uid = Uid::new(42);
    let user = TestDataGenerator::feishu_user(uid, "Carol", "on_123", "cli_app");
    assert_eq!(user.union_id, "on_123");
    assert_eq!(user.feishu_app_id, "cli_app");
    assert_eq!(user.public.unwrap()["fn"], "Carol");
}

// ==================== 断言辅助测试 ====================

#[test]
fn test_json_assertions() {
    let value = json!({ "aps": { "badge": 3 }, "act": "audio" });
    TestAssertions::assert_json_has_field(&value, "aps");
    TestAssertions::assert_json_field_eq(&value, "act", &json!("audio"));
    TestAssertions::assert_json_missing_field(&value, "sound");
}

#[test]
#[should_panic(expected = "Expected JSON to have field")]
fn test_json_has_field_panics_on_missing() {
    TestAssertions::assert_json_has_field(&json!({}), "aps");
}

#[test]
fn test_time_within() {
    let now = chrono::Utc::now();
    TestAssertions::assert_time_within(
        now + chrono::Duration::milliseconds(200),
        now,
        chrono::Duration::seconds(1),
    );
}

// ==================== Fixture 测试 ====================

#[tokio::test]
async fn test_group_chat_scenario_store() {
    let (fixture, sender, recipients) = TestFixture::group_chat_scenario("grpTeam");
    let store = fixture.into_store().await;

    let (devices, count) = DeviceStore::get_all(store.as_ref(), &recipients)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(devices.len(), 2);

    let sender_record = UserStore::get(store.as_ref(), sender).await.unwrap().unwrap();
    assert_eq!(sender_record.public.unwrap()["fn"], "Sender");
}

#[tokio::test]
async fn test_fixture_feishu_apps() {
    let store = TestFixture::new()
        .with_feishu_app("cli_a", "secret-a")
        .with_feishu_app("cli_b", "secret-b")
        .into_store()
        .await;

    let apps = push_shared::store::FeishuAppStore::get_all(store.as_ref())
        .await
        .unwrap();
    assert_eq!(apps.len(), 2);
}
