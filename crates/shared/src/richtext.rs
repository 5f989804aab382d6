//! 富文本渲染
//!
//! 消息正文是富文本文档，推送只需要纯文本与截断后的预览。渲染器作为黑盒
//! 协作方通过 `TextRenderer` 注入；`DraftyText` 是默认实现，支持纯字符串
//! 与 `{"txt": ..., "fmt": [...], "ent": [...]}` 两种形式的文档。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PushError, Result};

/// 富文本渲染接口
pub trait TextRenderer: Send + Sync {
    /// 转为纯文本
    fn plain_text(&self, content: &Value) -> Result<String>;

    /// 生成不超过 `max_len` 个字符的预览文档（JSON 字符串）
    fn preview(&self, content: &Value, max_len: usize) -> Result<String>;
}

/// 格式区间
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Span {
    #[serde(default)]
    at: i64,
    #[serde(default)]
    len: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<usize>,
}

/// 结构化文档
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    txt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fmt: Vec<Span>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ent: Vec<Value>,
}

/// 默认富文本渲染器
#[derive(Debug, Clone, Copy, Default)]
pub struct DraftyText;

impl DraftyText {
    fn parse(content: &Value) -> Result<Document> {
        match content {
            Value::Null => Ok(Document::default()),
            Value::String(s) => Ok(Document {
                txt: s.clone(),
                ..Default::default()
            }),
            Value::Object(_) => serde_json::from_value(content.clone())
                .map_err(|e| PushError::Render(format!("文档结构无效: {e}"))),
            other => Err(PushError::Render(format!("不支持的内容类型: {other}"))),
        }
    }
}

impl TextRenderer for DraftyText {
    fn plain_text(&self, content: &Value) -> Result<String> {
        Ok(Self::parse(content)?.txt)
    }

    fn preview(&self, content: &Value, max_len: usize) -> Result<String> {
        let doc = Self::parse(content)?;
        let txt: String = doc.txt.chars().take(max_len).collect();
        let limit = i64::try_from(max_len).unwrap_or(i64::MAX);

        // 只保留完整落在预览范围内的纯样式区间，实体（图片、附件等）一律丢弃
        let fmt = doc
            .fmt
            .into_iter()
            .filter(|span| {
                span.key.is_none()
                    && span.at >= 0
                    && span.len >= 0
                    && span.at.checked_add(span.len).is_some_and(|end| end <= limit)
            })
            .collect();

        let preview = Document {
            txt,
            fmt,
            ent: Vec::new(),
        };
        Ok(serde_json::to_string(&preview)?)
    }
}
