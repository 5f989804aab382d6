//! 推送服务的可观测性入口
//!
//! 日志与 Prometheus 指标在进程启动时一次性装配，返回的守卫在进程退出前
//! 必须保持存活。

pub mod metrics;
pub mod tracing;

use std::net::SocketAddr;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

const UNNAMED_SERVICE: &str = "unknown-service";

/// 可观测性配置，对应配置文件中的 `[observability]` 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 写入日志和指标全局标签的服务名
    pub service_name: String,
    pub metrics_enabled: bool,
    /// 指标抓取端口，监听所有网卡
    pub metrics_port: u16,
    /// EnvFilter 指令，`RUST_LOG` 存在时以其为准
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: UNNAMED_SERVICE.to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// 读取布尔型环境变量，未设置或无法识别时返回 `None`
fn env_flag(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ObservabilityConfig {
    /// 只用环境变量构建配置，未设置的项取默认值
    ///
    /// 识别 `PUSH_METRICS_ENABLED`、`PUSH_METRICS_PORT`、`PUSH_LOG_FORMAT`
    /// （值为 `json` 时输出 JSON）以及 `RUST_LOG`。
    pub fn from_env(service_name: &str) -> Self {
        let defaults = Self::default();
        let metrics_port = std::env::var("PUSH_METRICS_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(defaults.metrics_port);
        let json_logs = std::env::var("PUSH_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(defaults.json_logs);

        Self {
            service_name: service_name.to_string(),
            metrics_enabled: env_flag("PUSH_METRICS_ENABLED").unwrap_or(defaults.metrics_enabled),
            metrics_port,
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            json_logs,
        }
    }

    /// 配置里没有写服务名时补上进程自己的名字
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        if self.service_name.is_empty() || self.service_name == UNNAMED_SERVICE {
            self.service_name = service_name.to_string();
        }
        self
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.metrics_port))
    }
}

/// 持有指标端点的守卫，drop 时停止抓取端点
pub struct ObservabilityGuard {
    service_name: String,
    metrics: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 不挂任何资源的守卫，供测试与关闭指标时使用
    pub fn empty() -> Self {
        Self {
            service_name: String::new(),
            metrics: None,
        }
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.metrics.take() {
            handle.shutdown();
            info!(service = %self.service_name, "指标端点已关闭");
        }
    }
}

/// 装配日志与指标
///
/// 日志先于指标初始化，指标端口绑定失败时错误能被记录下来。
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics = match config.metrics_enabled {
        true => Some(metrics::init(config).await?),
        false => None,
    };

    info!(
        service = %config.service_name,
        metrics_addr = ?metrics.as_ref().map(|_| config.metrics_addr()),
        json_logs = config.json_logs,
        "可观测性初始化完成"
    );

    Ok(ObservabilityGuard {
        service_name: config.service_name.clone(),
        metrics,
    })
}
