//! 推送 worker 服务
//!
//! 加载配置，按配置启动 APNs 与飞书适配器，收到 Ctrl-C 后停止全部适配器。

use std::sync::Arc;

use anyhow::Result;
use push_shared::{
    config::AppConfig,
    observability::{self, ObservabilityConfig},
    richtext::DraftyText,
    store::{MemoryStore, Stores},
};
use push_worker::PushHub;
use tokio::signal;
use tracing::{info, warn};

const SERVICE_NAME: &str = "push-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. .env 中的变量先于配置文件加载
    dotenvy::dotenv().ok();

    // 2. 加载配置，失败时使用默认值，日志与指标仍可由环境变量调整
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("加载配置失败，使用默认配置: {e}");
        AppConfig {
            observability: ObservabilityConfig::from_env(SERVICE_NAME),
            ..Default::default()
        }
    });

    let obs_config = config.observability.clone().with_service_name(SERVICE_NAME);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        apns = config.apns.enabled,
        feishu = config.feishu.enabled,
        "Starting push-worker..."
    );

    // 3. 独立运行时使用进程内存储
    let stores = Stores::memory(Arc::new(MemoryStore::new()));
    let hub = PushHub::from_config(&config, stores, Arc::new(DraftyText)).await;
    if hub.is_empty() {
        warn!("没有可用的推送适配器");
    }
    info!(ready = ?hub.ready_handlers(), "推送 worker 已就绪");

    signal::ctrl_c().await?;
    info!("收到关闭信号，停止推送 worker");

    hub.stop().await;
    info!("push-worker 已退出");
    Ok(())
}
