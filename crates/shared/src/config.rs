//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。
//! 每个推送适配器有独立的配置段，`enabled` 为 false 时该适配器不启动。

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::events::PushAction;
use crate::observability::ObservabilityConfig;

/// 调度循环配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 回执队列与频道请求队列的容量，队列满时提交方阻塞等待
    pub queue_capacity: usize,
    /// 停止时等待在途发送任务完成的最长时间
    pub drain_timeout_seconds: u64,
    /// 推送服务 HTTP 请求超时
    pub http_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            drain_timeout_seconds: 5,
            http_timeout_seconds: 10,
        }
    }
}

/// 通知弹窗模板
///
/// `body` 为 `$content` 时替换为消息正文，`title` 为 `$title` 时替换为解析出的标题。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertTemplate {
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

/// 按推送动作区分的弹窗模板表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertTemplates {
    pub msg: AlertTemplate,
    pub sub: AlertTemplate,
    pub read: AlertTemplate,
}

impl Default for AlertTemplates {
    fn default() -> Self {
        Self {
            msg: AlertTemplate {
                title: "$title".to_string(),
                body: "$content".to_string(),
                ..Default::default()
            },
            sub: AlertTemplate {
                title: "新的会话邀请".to_string(),
                body: "有人邀请你加入会话".to_string(),
                ..Default::default()
            },
            read: AlertTemplate::default(),
        }
    }
}

impl AlertTemplates {
    pub fn for_action(&self, action: PushAction) -> &AlertTemplate {
        match action {
            PushAction::Msg => &self.msg,
            PushAction::Sub => &self.sub,
            PushAction::Read => &self.read,
        }
    }
}

/// APNs 适配器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApnsConfig {
    pub enabled: bool,
    /// PKCS#12 证书路径
    pub credentials_file: String,
    pub credentials_password: String,
    /// 应用 bundle id，作为 apns-topic
    pub app_topic: String,
    /// 通知有效期（秒），不大于 0 时使用默认值
    pub time_to_live: i64,
    /// `dev` 只连接开发环境；其他值连接生产环境，并为测试账号额外建立开发环境连接
    pub env: String,
    /// 走开发环境推送的测试账号（11 位 uid 字符串）
    pub dev_accounts: Vec<String>,
    /// 来电与未接来电是否展示弹窗
    pub call_alerts: bool,
    pub templates: AlertTemplates,
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            credentials_file: String::new(),
            credentials_password: String::new(),
            app_topic: String::new(),
            time_to_live: 0,
            env: "prod".to_string(),
            dev_accounts: Vec::new(),
            call_alerts: true,
            templates: AlertTemplates::default(),
        }
    }
}

impl ApnsConfig {
    pub fn is_dev_only(&self) -> bool {
        self.env == "dev"
    }
}

/// 飞书适配器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeishuConfig {
    pub enabled: bool,
    /// 富文本消息标题
    pub message_title: String,
    /// 未接来电是否同样推送并加急
    pub urgent_on_missed_call: bool,
    /// 额外的应用凭据，与存储中的应用合并，app_id -> app_secret
    pub apps: HashMap<String, String>,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            message_title: "IM".to_string(),
            urgent_on_missed_call: false,
            apps: HashMap::new(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub apns: ApnsConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（PUSH_ 前缀，双下划线分隔层级，如 PUSH_APNS__APP_TOPIC -> apns.app_topic）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("PUSH_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("PUSH")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("apns.dev_accounts")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
