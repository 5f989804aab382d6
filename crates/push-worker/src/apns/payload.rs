//! APNs 通知构建
//!
//! 把单个接收者的通知数据集转换为 APNs 请求信封：有效期、优先级、推送类型、
//! 打断级别以及 `{"aps": ..., "act"?: ...}` 请求体。

use chrono::{DateTime, Duration, Utc};
use push_shared::config::ApnsConfig;
use push_shared::error::Result;
use push_shared::events::PushAction;
use serde::Serialize;
use uuid::Uuid;

use crate::payload::{CallAction, NotificationData};
use crate::templates::{AlertTemplateEngine, RenderedAlert};

/// 未配置有效期时的默认值（秒）
pub const DEFAULT_TIME_TO_LIVE: i64 = 3600;
/// 来电通知的有效期（秒），过期的来电提醒没有意义
pub const CALL_TIME_TO_LIVE: i64 = 10;

const DEFAULT_SOUND: &str = "default";

fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// 通知打断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptionLevel {
    Passive,
    Active,
    TimeSensitive,
    Critical,
}

/// 推送优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// 节能投递
    Low = 5,
    /// 立即投递
    High = 10,
}

impl Priority {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// apns-push-type 请求头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
}

impl PushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
        }
    }
}

/// `aps.alert` 字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApsAlert {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action_loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub launch_image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary_arg: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub summary_arg_count: i32,
}

impl From<RenderedAlert> for ApsAlert {
    fn from(alert: RenderedAlert) -> Self {
        Self {
            action: alert.action,
            action_loc_key: alert.action_loc_key,
            body: alert.body,
            launch_image: alert.launch_image,
            loc_key: alert.loc_key,
            title: alert.title,
            subtitle: alert.subtitle,
            title_loc_key: alert.title_loc_key,
            summary_arg: alert.summary_arg,
            summary_arg_count: alert.summary_arg_count,
        }
    }
}

/// `aps` 字典
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Aps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<ApsAlert>,
    #[serde(skip_serializing_if = "is_zero")]
    pub badge: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub content_available: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption_level: Option<InterruptionLevel>,
    #[serde(skip_serializing_if = "is_zero")]
    pub mutable_content: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sound: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thread_id: String,
}

#[derive(Serialize)]
struct ApnsBody<'a> {
    aps: &'a Aps,
    #[serde(skip_serializing_if = "Option::is_none")]
    act: Option<CallAction>,
}

/// APNs 请求信封
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsEnvelope {
    pub apns_id: String,
    pub device_token: String,
    /// 应用 bundle id
    pub topic: String,
    /// 同一会话的通知互相覆盖
    pub collapse_id: String,
    pub expiration: DateTime<Utc>,
    pub priority: Priority,
    pub push_type: PushType,
    /// 序列化后的请求体
    pub payload: String,
}

/// 是否展示弹窗
///
/// 已读回执从不弹窗；普通消息在非静默时弹窗；来电与未接来电在 `call_alerts` 打开时弹窗。
pub fn should_present_alert(data: &NotificationData, config: &ApnsConfig) -> bool {
    config.enabled
        && data.what != PushAction::Read
        && ((data.webrtc.is_none() && !data.silent) || (data.is_ringing() && config.call_alerts))
}

/// 为单个设备构建 APNs 信封
///
/// 序列化失败是唯一的错误，此时不返回任何部分结果。
pub fn build_notification(
    data: &NotificationData,
    unread: i32,
    device_token: &str,
    config: &ApnsConfig,
    templates: &AlertTemplateEngine,
    now: DateTime<Utc>,
) -> Result<ApnsEnvelope> {
    let ringing = data.is_ringing();

    let ttl = if ringing {
        CALL_TIME_TO_LIVE
    } else if config.time_to_live > 0 {
        config.time_to_live
    } else {
        DEFAULT_TIME_TO_LIVE
    };

    let (priority, push_type, interruption_level) = if ringing {
        (Priority::High, PushType::Alert, InterruptionLevel::Critical)
    } else if data.what == PushAction::Read {
        (Priority::Low, PushType::Background, InterruptionLevel::Passive)
    } else {
        (
            Priority::High,
            PushType::Alert,
            InterruptionLevel::TimeSensitive,
        )
    };

    let alert = should_present_alert(data, config).then(|| ApsAlert::from(templates.render(data)));

    let aps = Aps {
        alert,
        badge: unread,
        content_available: 1,
        interruption_level: Some(interruption_level),
        mutable_content: 1,
        sound: DEFAULT_SOUND.to_string(),
        thread_id: data.topic.clone(),
    };

    // 超出时间范围的有效期按默认值处理
    let expiration = Duration::try_seconds(ttl)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TIME_TO_LIVE));

    let body = ApnsBody {
        aps: &aps,
        act: if ringing { data.act } else { None },
    };
    let payload = serde_json::to_string(&body)?;

    Ok(ApnsEnvelope {
        apns_id: Uuid::new_v4().to_string(),
        device_token: device_token.to_string(),
        topic: config.app_topic.clone(),
        collapse_id: data.topic.clone(),
        expiration,
        priority,
        push_type,
        payload,
    })
}
