//! 通知弹窗模板
//!
//! 根据推送动作从配置的模板表中取出弹窗字段。模板只支持两个整值占位符：
//! 正文为 `$content` 时替换为消息正文，标题为 `$title` 时替换为会话或发送者名称。
//! 其余字段原样输出，便于客户端使用本地化键。

use push_shared::config::{AlertTemplate, AlertTemplates};

use crate::payload::NotificationData;

const CONTENT_PLACEHOLDER: &str = "$content";
const TITLE_PLACEHOLDER: &str = "$title";

/// 渲染后的弹窗字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedAlert {
    pub action: String,
    pub action_loc_key: String,
    pub body: String,
    pub launch_image: String,
    pub loc_key: String,
    pub title: String,
    pub subtitle: String,
    pub title_loc_key: String,
    pub summary_arg: String,
    pub summary_arg_count: i32,
}

/// 弹窗模板引擎
pub struct AlertTemplateEngine {
    templates: AlertTemplates,
}

impl AlertTemplateEngine {
    pub fn new(templates: AlertTemplates) -> Self {
        Self { templates }
    }

    /// 按数据集的动作类型渲染弹窗
    pub fn render(&self, data: &NotificationData) -> RenderedAlert {
        Self::render_with(self.templates.for_action(data.what), data)
    }

    /// 使用指定模板渲染
    pub fn render_with(template: &AlertTemplate, data: &NotificationData) -> RenderedAlert {
        RenderedAlert {
            action: template.action.clone(),
            action_loc_key: template.action_loc_key.clone(),
            body: substitute(&template.body, CONTENT_PLACEHOLDER, data.content_str()),
            launch_image: template.launch_image.clone(),
            loc_key: template.loc_key.clone(),
            title: substitute(&template.title, TITLE_PLACEHOLDER, data.title_str()),
            subtitle: template.subtitle.clone(),
            title_loc_key: template.title_loc_key.clone(),
            summary_arg: template.summary_arg.clone(),
            summary_arg_count: template.summary_arg_count,
        }
    }
}

impl Default for AlertTemplateEngine {
    fn default() -> Self {
        Self::new(AlertTemplates::default())
    }
}

/// 模板值与占位符完全相等时替换，部分包含不做处理
fn substitute(template: &str, placeholder: &str, value: &str) -> String {
    if template == placeholder {
        value.to_string()
    } else {
        template.to_string()
    }
}
