//! 推送链路的 Prometheus 指标
//!
//! 记录函数在没有安装 recorder 时是空操作，单元测试无需初始化。

use std::sync::OnceLock;

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

use super::ObservabilityConfig;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 投递耗时分桶，单位秒，覆盖 APNs 的毫秒级响应和飞书的秒级超时
const DELIVERY_BUCKETS: [f64; 9] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

enum Kind {
    Counter,
    Gauge,
    Histogram,
}

const DESCRIPTIONS: [(&str, Kind, &str); 7] = [
    ("push_receipts_total", Kind::Counter, "Receipts accepted by a provider"),
    ("push_deliveries_total", Kind::Counter, "Provider deliveries by outcome"),
    ("push_delivery_duration_seconds", Kind::Histogram, "Provider delivery latency"),
    ("push_batch_aborts_total", Kind::Counter, "Receipt batches aborted before completion"),
    ("push_deregistrations_total", Kind::Counter, "Device registrations removed after rejection"),
    ("push_token_refresh_total", Kind::Counter, "Tenant access token refresh attempts"),
    ("push_inflight_batches", Kind::Gauge, "Receipt batches currently being delivered"),
];

/// 指标抓取端点的句柄
pub struct MetricsHandle {
    server: JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止抓取端点，已记录的指标不受影响
    pub fn shutdown(self) {
        self.server.abort();
    }
}

fn describe_all() {
    for (name, kind, description) in DESCRIPTIONS {
        match kind {
            Kind::Counter => metrics::describe_counter!(name, description),
            Kind::Gauge => metrics::describe_gauge!(name, description),
            Kind::Histogram => metrics::describe_histogram!(name, description),
        }
    }
}

/// 安装全局 recorder 并在配置端口上提供 `/metrics`
///
/// 服务名作为全局标签附加到所有指标上。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full("push_delivery_duration_seconds".to_string()),
            &DELIVERY_BUCKETS,
        )?
        .install_recorder()
        .context("安装 Prometheus recorder 失败")?;
    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();

    describe_all();

    let addr = config.metrics_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("指标端口 {addr} 绑定失败"))?;

    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { StatusCode::NO_CONTENT }));

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "指标端点退出");
        }
    });
    info!(%addr, "指标端点已启动");

    Ok(MetricsHandle { server })
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一条进入适配器的回执
#[inline]
pub fn record_receipt(provider: &str) {
    metrics::counter!("push_receipts_total", "provider" => provider.to_string()).increment(1);
}

/// 记录一次投递及其分类结果
#[inline]
pub fn record_delivery(provider: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "push_deliveries_total",
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "push_delivery_duration_seconds",
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

/// 记录批次中止
#[inline]
pub fn record_batch_abort(provider: &str, reason: &str) {
    metrics::counter!(
        "push_batch_aborts_total",
        "provider" => provider.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录设备注销
#[inline]
pub fn record_deregistration(provider: &str) {
    metrics::counter!("push_deregistrations_total", "provider" => provider.to_string())
        .increment(1);
}

/// 记录访问令牌刷新
#[inline]
pub fn record_token_refresh(success: bool) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!("push_token_refresh_total", "status" => status).increment(1);
}

/// 更新在途批次数
#[inline]
pub fn set_inflight_batches(provider: &str, count: usize) {
    metrics::gauge!("push_inflight_batches", "provider" => provider.to_string()).set(count as f64);
}
