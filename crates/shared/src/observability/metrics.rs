//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出，
//! 指标通过独立的 HTTP 端口暴露。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 指标服务器任务句柄
pub struct MetricsHandle {
    server: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server.abort();
    }
}

/// 安装 Prometheus recorder 并在 `metrics_port` 上启动 `/metrics` 端点
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "catalog_events_published_total",
        "Product change events handed to the broker, by topic and outcome"
    );
    metrics::describe_counter!(
        "catalog_deliveries_total",
        "Inbound deliveries processed, by topic and outcome"
    );
    metrics::describe_histogram!(
        "catalog_delivery_duration_seconds",
        "Time from delivery receipt to ack or reject"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标服务已监听");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标服务异常退出");
        }
    }))
}

// ============================================================================
// 指标记录函数
// ============================================================================

#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录变更事件发布结果，`outcome` 取值 published / declare_failed / publish_failed / encode_failed
#[inline]
pub fn record_event_published(topic: &str, outcome: &str) {
    metrics::counter!(
        "catalog_events_published_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录入站投递处理结果，`outcome` 取值 ack / requeue
#[inline]
pub fn record_delivery(topic: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "catalog_deliveries_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "catalog_delivery_duration_seconds",
        "topic" => topic.to_string()
    )
    .record(duration_secs);
}
