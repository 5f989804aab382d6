//! 飞书消息构建
//!
//! 飞书通知不携带消息正文，只按事件类型发送固定的提醒文案。

use push_shared::error::Result;
use push_shared::events::{CallState, Payload, PushAction, Uid};
use serde::Serialize;

/// 发往单个飞书用户的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeishuMessage {
    pub uid: Uid,
    pub union_id: String,
    pub app_id: String,
    /// 序列化后的 post 富文本
    pub content: String,
    /// 发送成功后是否加急
    pub urgent: bool,
}

/// 提醒类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    AudioCall,
    VideoCall,
    MissedCall,
    NewMessage,
}

impl NoticeKind {
    pub fn text(&self) -> &'static str {
        match self {
            Self::AudioCall => "有人给你打音频通话，快打开软件看看吧",
            Self::VideoCall => "有人给你打视频通话，快打开软件看看吧",
            Self::MissedCall => "你有一个未接来电，快打开软件看看吧",
            Self::NewMessage => "收到一条新消息，快打开软件看看吧",
        }
    }

    /// 通话类提醒需要加急
    pub fn is_call(&self) -> bool {
        !matches!(self, Self::NewMessage)
    }
}

/// 判断事件是否需要飞书提醒
///
/// 只处理新消息：普通消息和来电会提醒，未接来电仅在 `urgent_on_missed_call`
/// 打开时提醒，其余通话状态不提醒。
pub fn notice_kind(pl: &Payload, urgent_on_missed_call: bool) -> Option<NoticeKind> {
    if pl.what.parse::<PushAction>().ok()? != PushAction::Msg {
        return None;
    }

    match pl.call_state {
        None => Some(NoticeKind::NewMessage),
        Some(CallState::Started) if pl.audio_only => Some(NoticeKind::AudioCall),
        Some(CallState::Started) => Some(NoticeKind::VideoCall),
        Some(CallState::Missed) if urgent_on_missed_call => Some(NoticeKind::MissedCall),
        Some(_) => None,
    }
}

#[derive(Serialize)]
struct PostContent<'a> {
    zh_cn: PostBody<'a>,
}

#[derive(Serialize)]
struct PostBody<'a> {
    title: &'a str,
    content: [[PostElement<'a>; 1]; 1],
}

#[derive(Serialize)]
struct PostElement<'a> {
    tag: &'static str,
    text: &'a str,
}

/// 构建单段纯文本的 post 富文本
pub fn build_post_content(title: &str, text: &str) -> Result<String> {
    let content = PostContent {
        zh_cn: PostBody {
            title,
            content: [[PostElement { tag: "text", text }]],
        },
    };
    Ok(serde_json::to_string(&content)?)
}
