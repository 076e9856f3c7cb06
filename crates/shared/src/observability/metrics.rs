//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
///
/// drop 时停止指标 HTTP 服务器。
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_lock_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册分布式锁相关指标的描述
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_lock_metrics(service_name: &str) {
    metrics::describe_counter!(
        "lock_acquire_total",
        "Lock acquisition outcomes, labelled by result"
    );
    metrics::describe_histogram!(
        "lock_acquire_wait_seconds",
        "Time spent waiting for a lock, successful or not"
    );
    metrics::describe_counter!(
        "lock_release_total",
        "Lock release outcomes, labelled by result"
    );
    metrics::describe_counter!(
        "lock_release_conflicts_total",
        "Release transactions aborted by a concurrent modification"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次锁获取的结果与等待时长
///
/// result: "acquired" | "timeout" | "error"
#[inline]
pub fn record_lock_acquire(result: &'static str, wait_secs: f64) {
    metrics::counter!("lock_acquire_total", "result" => result).increment(1);
    metrics::histogram!("lock_acquire_wait_seconds", "result" => result).record(wait_secs);
}

/// 记录一次锁释放的结果
///
/// result: "released" | "not_owner" | "error"
#[inline]
pub fn record_lock_release(result: &'static str) {
    metrics::counter!("lock_release_total", "result" => result).increment(1);
}

/// 记录一次因并发修改而中止的释放事务
#[inline]
pub fn record_release_conflict() {
    metrics::counter!("lock_release_conflicts_total").increment(1);
}
