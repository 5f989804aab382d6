//! 推送事件模型
//!
//! 定义进入推送引擎的统一事件格式：回执（Receipt）、消息负载（Payload）、
//! 接收者投递状态以及频道订阅请求。同时提供用户 ID 与会话名的编码规则，
//! 推送链路中的会话分类与点对点会话改名都依赖这里的实现。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PushError;

// ---------------------------------------------------------------------------
// Uid: 用户 ID
// ---------------------------------------------------------------------------

/// Uid 字符串形式的长度（8 字节 base64 无填充）
const UID_BASE64_LEN: usize = 11;
/// 点对点会话名去掉前缀后的长度（16 字节 base64 无填充）
const P2P_BASE64_LEN: usize = 22;

/// 用户 ID
///
/// 内部为 64 位整数，对外以小端字节序的 URL 安全 base64（无填充）表示。
/// 0 视为无效 ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uid(u64);

impl Uid {
    pub const ZERO: Uid = Uid(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// 用户会话名，形如 `usrXXXXXXXXXXX`
    pub fn user_id(&self) -> String {
        format!("usr{self}")
    }

    /// 解析 11 位 base64 形式的 ID，格式不合法时返回 `None`
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != UID_BASE64_LEN {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_le_bytes(raw)))
    }

    /// 解析 `usr` 前缀的用户会话名
    pub fn parse_user_id(s: &str) -> Option<Self> {
        s.strip_prefix("usr").and_then(Self::parse)
    }

    /// 与另一用户之间的点对点会话名，较小的 ID 在前
    pub fn p2p_name(&self, other: Uid) -> String {
        let (first, second) = if self.0 < other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&first.to_le_bytes());
        bytes.extend_from_slice(&second.to_le_bytes());
        format!("p2p{}", URL_SAFE_NO_PAD.encode(bytes))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0.to_le_bytes()))
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uid::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("无效的用户 ID: {s}")))
    }
}

/// 解析点对点会话名中的两个用户 ID
pub fn parse_p2p(topic: &str) -> Result<(Uid, Uid), PushError> {
    let invalid = || PushError::InvalidTopic(topic.to_string());

    let encoded = topic.strip_prefix("p2p").ok_or_else(invalid)?;
    if encoded.len() != P2P_BASE64_LEN {
        return Err(invalid());
    }
    let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| invalid())?;
    let (first, second) = bytes.split_at(8);
    let first: [u8; 8] = first.try_into().map_err(|_| invalid())?;
    let second: [u8; 8] = second.try_into().map_err(|_| invalid())?;
    Ok((
        Uid(u64::from_le_bytes(first)),
        Uid(u64::from_le_bytes(second)),
    ))
}

/// 点对点会话在指定用户视角下的名称，即对端用户的 `usr` 会话名
pub fn p2p_name_for_user(uid: Uid, topic: &str) -> Result<String, PushError> {
    let (first, second) = parse_p2p(topic)?;
    if first == uid {
        Ok(second.user_id())
    } else if second == uid {
        Ok(first.user_id())
    } else {
        Err(PushError::InvalidTopic(format!("{topic} 不属于用户 {uid}")))
    }
}

// ---------------------------------------------------------------------------
// TopicCategory: 会话分类
// ---------------------------------------------------------------------------

/// 会话分类，由会话名前缀决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    Me,
    Find,
    P2P,
    Group,
    System,
    Unknown,
}

impl TopicCategory {
    pub fn of(topic: &str) -> Self {
        match topic {
            "me" => Self::Me,
            "fnd" => Self::Find,
            "sys" => Self::System,
            t if t.starts_with("usr") || t.starts_with("p2p") => Self::P2P,
            t if t.starts_with("grp") || t.starts_with("chn") => Self::Group,
            _ => Self::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// PushAction / CallState / AccessMode
// ---------------------------------------------------------------------------

/// 推送动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushAction {
    /// 新消息
    Msg,
    /// 订阅变更
    Sub,
    /// 已读回执
    Read,
}

impl PushAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Msg => "msg",
            Self::Sub => "sub",
            Self::Read => "read",
        }
    }
}

impl FromStr for PushAction {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "msg" => Ok(Self::Msg),
            "sub" => Ok(Self::Sub),
            "read" => Ok(Self::Read),
            "" => Err(PushError::EmptyPayload),
            other => Err(PushError::UnknownPushType(other.to_string())),
        }
    }
}

impl fmt::Display for PushAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 音视频通话信令状态，字段缺省表示空闲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Started,
    Accepted,
    Finished,
    Missed,
    Declined,
    Disconnected,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Accepted => "accepted",
            Self::Finished => "finished",
            Self::Missed => "missed",
            Self::Declined => "declined",
            Self::Disconnected => "disconnected",
        }
    }

    /// 来电或未接来电，需要以高优先级提醒
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Started | Self::Missed)
    }
}

/// 会话权限位
///
/// 规范字符串形式：无权限为 `N`，否则为 `JRWPASDO` 中已置位字母按序拼接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessMode(pub u32);

impl AccessMode {
    pub const NONE: AccessMode = AccessMode(0);
    pub const JOIN: u32 = 0x01;
    pub const READ: u32 = 0x02;
    pub const WRITE: u32 = 0x04;
    pub const PRES: u32 = 0x08;
    pub const APPROVE: u32 = 0x10;
    pub const SHARE: u32 = 0x20;
    pub const DELETE: u32 = 0x40;
    pub const OWNER: u32 = 0x80;
    pub const INVALID: AccessMode = AccessMode(0x10_0000);
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            return f.write_str("N");
        }
        if *self == Self::INVALID {
            return Ok(());
        }
        const LETTERS: [char; 8] = ['J', 'R', 'W', 'P', 'A', 'S', 'D', 'O'];
        for (bit, letter) in LETTERS.iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload / Recipient / Receipt
// ---------------------------------------------------------------------------

/// 消息事件负载
///
/// `what` 保留原始字符串，由负载转换器解析，未知类型在转换阶段被拒绝。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub what: String,
    #[serde(default)]
    pub silent: bool,
    pub topic: String,
    pub from: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub seq_id: i64,
    #[serde(default)]
    pub content_type: String,
    /// 富文本内容（字符串或结构化文档）
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, rename = "webrtc")]
    pub call_state: Option<CallState>,
    #[serde(default, rename = "aonly")]
    pub audio_only: bool,
    /// 被编辑替换的原消息 ID
    #[serde(default)]
    pub replace: Option<String>,
    #[serde(default)]
    pub mode_want: AccessMode,
    #[serde(default)]
    pub mode_given: AccessMode,
    /// 发送者公开资料（冗余携带，避免回查存储）
    #[serde(default)]
    pub from_public: Option<serde_json::Value>,
    /// 会话公开资料
    #[serde(default)]
    pub topic_public: Option<serde_json::Value>,
}

/// 单个接收者的投递状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// 已通过在线会话收到该事件的设备
    #[serde(default)]
    pub devices: Vec<String>,
    /// 在线送达次数，大于 0 表示用户已交互式收到
    #[serde(default)]
    pub delivered: i32,
    /// 未读数，作为角标
    #[serde(default)]
    pub unread: i32,
}

/// 推送回执：一次待推送的消息事件及各接收者的投递状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Receipt {
    pub payload: Payload,
    #[serde(default)]
    pub to: HashMap<Uid, Recipient>,
    /// 广播频道
    #[serde(default)]
    pub channel: Option<String>,
}

/// 频道订阅 / 退订请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelReq {
    pub uid: Uid,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub unsub: bool,
}
