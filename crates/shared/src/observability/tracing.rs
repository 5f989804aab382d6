//! 日志订阅者装配
//!
//! 文本格式面向本地调试，JSON 格式面向日志采集。HTTP 客户端自身的调试日志
//! 默认压到 warn，避免逐个设备的连接细节淹没投递日志。

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::ObservabilityConfig;

const QUIET_TARGETS: [&str; 5] = [
    "hyper=warn",
    "h2=warn",
    "reqwest=warn",
    "rustls=warn",
    "a2=warn",
];

/// 由 `RUST_LOG` 或配置的日志级别构建过滤器
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directives = std::iter::once(log_level)
        .chain(QUIET_TARGETS)
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局日志订阅者，进程内重复调用返回错误
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let (json, text) = if config.json_logs {
        let layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false);
        (Some(layer), None)
    } else {
        (None, Some(fmt::layer().compact().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(build_filter(&config.log_level))
        .with(json)
        .with(text)
        .try_init()
        .context("日志订阅者已安装")
}
