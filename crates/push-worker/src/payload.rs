//! 推送负载转换
//!
//! 把消息事件转换为与推送服务无关的通知数据集。数据集是一组固定键名的可选字段，
//! 序列化后即客户端约定的键值表：所有值均为字符串，布尔标记只在置位时输出 `"true"`。

use std::fmt;
use std::sync::Arc;

use chrono::SecondsFormat;
use push_shared::error::Result;
use push_shared::events::{CallState, Payload, PushAction, TopicCategory, Uid};
use push_shared::richtext::TextRenderer;
use push_shared::store::{Stores, TopicStore, UserStore};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

/// 正文与富文本预览的最大字符数
pub const MAX_PAYLOAD_LENGTH: usize = 128;

/// 截断后追加的省略标记
const ELLIPSIS: char = '…';

/// 通话动作码，客户端据此决定通话横幅样式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    Audio = 1,
    Video = 2,
    Missed = 3,
}

impl CallAction {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// 替换消息正文的固定标记
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Audio => "[AUDIO CALL]",
            Self::Video => "[VIDEO CALL]",
            Self::Missed => "[MISSED CALL]",
        }
    }
}

impl fmt::Display for CallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for CallAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

fn flag<S: Serializer>(_: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str("true")
}

fn opt_as_string<S, T>(value: &Option<T>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: fmt::Display,
{
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

/// 通知数据集
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
    pub what: PushAction,
    #[serde(skip_serializing_if = "is_false", serialize_with = "flag")]
    pub silent: bool,
    pub topic: String,
    pub ts: String,
    /// 发送者，`from` 在部分推送通道中是保留字
    pub xfrom: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "opt_as_string"
    )]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// 富文本预览
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "modeWant", skip_serializing_if = "Option::is_none")]
    pub mode_want: Option<String>,
    #[serde(rename = "modeGiven", skip_serializing_if = "Option::is_none")]
    pub mode_given: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webrtc: Option<CallState>,
    #[serde(skip_serializing_if = "is_false", serialize_with = "flag")]
    pub aonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<CallAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
}

impl NotificationData {
    /// 只填充所有动作共有的字段
    pub fn from_payload(what: PushAction, pl: &Payload) -> Self {
        Self {
            what,
            silent: pl.silent,
            topic: pl.topic.clone(),
            ts: pl.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            xfrom: pl.from.clone(),
            seq: None,
            mime: None,
            content: None,
            rc: None,
            title: None,
            mode_want: None,
            mode_given: None,
            webrtc: None,
            aonly: false,
            act: None,
            replace: None,
        }
    }

    /// 来电或未接来电
    pub fn is_ringing(&self) -> bool {
        self.webrtc.is_some_and(|state| state.is_ringing())
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn title_str(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }
}

/// 负载转换所需的协作方
#[derive(Clone)]
pub struct TransformContext {
    pub users: Arc<dyn UserStore>,
    pub topics: Arc<dyn TopicStore>,
    pub renderer: Arc<dyn TextRenderer>,
}

impl TransformContext {
    pub fn new(stores: &Stores, renderer: Arc<dyn TextRenderer>) -> Self {
        Self {
            users: stores.users.clone(),
            topics: stores.topics.clone(),
            renderer,
        }
    }
}

/// 把消息事件转换为通知数据集
///
/// 未知的动作类型返回 `UnknownPushType`，调用方应跳过该事件。
pub async fn payload_to_data(pl: &Payload, ctx: &TransformContext) -> Result<NotificationData> {
    let what: PushAction = pl.what.parse()?;
    let mut data = NotificationData::from_payload(what, pl);

    match what {
        PushAction::Msg => {
            data.seq = Some(pl.seq_id);
            if !pl.content_type.is_empty() {
                data.mime = Some(pl.content_type.clone());
            }

            let mut content = ctx.renderer.plain_text(&pl.content)?;
            match TopicCategory::of(&pl.topic) {
                TopicCategory::P2P => {
                    data.title = Some(sender_name(pl, ctx).await);
                }
                TopicCategory::Group | TopicCategory::Find | TopicCategory::System => {
                    data.title = Some(topic_name(pl, ctx).await);
                    content = format!("{}: {}", sender_name(pl, ctx).await, content);
                }
                TopicCategory::Me | TopicCategory::Unknown => {}
            }
            data.content = Some(truncate(content, MAX_PAYLOAD_LENGTH));
            data.rc = Some(ctx.renderer.preview(&pl.content, MAX_PAYLOAD_LENGTH)?);

            if let Some(state) = pl.call_state {
                let action = if state == CallState::Missed {
                    CallAction::Missed
                } else if pl.audio_only {
                    CallAction::Audio
                } else {
                    CallAction::Video
                };
                data.webrtc = Some(state);
                data.aonly = pl.audio_only;
                data.content = Some(action.marker().to_string());
                data.act = Some(action);
                // 通话信令不是聊天消息，一律静默
                data.silent = true;
            }

            if let Some(replace) = pl.replace.as_ref().filter(|r| !r.is_empty()) {
                data.replace = Some(replace.clone());
                data.silent = true;
            }
        }
        PushAction::Sub => {
            data.mode_want = Some(pl.mode_want.to_string());
            data.mode_given = Some(pl.mode_given.to_string());
        }
        PushAction::Read => {
            data.seq = Some(pl.seq_id);
            data.silent = true;
        }
    }

    Ok(data)
}

/// 按字符数截断，超长时追加省略号
///
/// 先比较字节长度，短字符串无需逐字符计数。
pub fn truncate(text: String, max_chars: usize) -> String {
    if text.len() <= max_chars || text.chars().count() <= max_chars {
        return text;
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push(ELLIPSIS);
    truncated
}

/// 公开资料中的昵称（`fn` 字段）
fn friendly_name(public: Option<&Value>) -> Option<String> {
    public?.get("fn")?.as_str().map(str::to_string)
}

/// 发送者昵称，任何失败都返回空串
async fn sender_name(pl: &Payload, ctx: &TransformContext) -> String {
    if pl.from_public.is_some() {
        return friendly_name(pl.from_public.as_ref()).unwrap_or_else(|| {
            warn!(from = %pl.from, "发送者公开资料缺少昵称");
            String::new()
        });
    }

    let Some(uid) = Uid::parse_user_id(&pl.from).filter(|uid| !uid.is_zero()) else {
        warn!(from = %pl.from, "无法解析发送者 ID");
        return String::new();
    };

    match ctx.users.get(uid).await {
        Ok(Some(user)) => friendly_name(user.public.as_ref()).unwrap_or_default(),
        Ok(None) => {
            warn!(uid = %uid, "发送者不存在");
            String::new()
        }
        Err(e) => {
            warn!(uid = %uid, error = %e, "查询发送者失败");
            String::new()
        }
    }
}

/// 会话名称，任何失败都返回空串
async fn topic_name(pl: &Payload, ctx: &TransformContext) -> String {
    if pl.topic_public.is_some() {
        return friendly_name(pl.topic_public.as_ref()).unwrap_or_default();
    }

    match ctx.topics.get(&pl.topic).await {
        Ok(Some(topic)) => friendly_name(topic.public.as_ref()).unwrap_or_default(),
        Ok(None) => {
            warn!(topic = %pl.topic, "会话不存在");
            String::new()
        }
        Err(e) => {
            warn!(topic = %pl.topic, error = %e, "查询会话失败");
            String::new()
        }
    }
}
