//! 商品目录服务入口
//!
//! 装配存储、消息代理、评分网关和编排层，启动 HTTP 接口与评分更新消费任务。

use std::sync::Arc;

use catalog_service::{
    emitter::BrokerEmitter,
    gateway::ReviewingClient,
    http::{self, AppState},
    lifecycle::{self, Shutdown},
    receiver::{EventReceiver, RatingUpdateHandler},
    repository::{ElasticsearchProductRepository, InMemoryProductRepository, ProductRepository},
    service::CatalogService,
};
use catalog_shared::{
    broker::BrokerHandle,
    config::{AppConfig, StorageBackend},
    events::topics,
    kafka::KafkaBroker,
    observability,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("catalog-service")?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        addr = %config.server_addr(),
        environment = %config.environment,
        "Starting catalog-service"
    );

    let repository: Arc<dyn ProductRepository> = match config.storage.backend {
        StorageBackend::Elasticsearch => {
            info!(url = %config.storage.url, index = %config.storage.index, "使用 Elasticsearch 存储");
            Arc::new(ElasticsearchProductRepository::new(&config.storage)?)
        }
        StorageBackend::Memory => {
            if config.is_production() {
                warn!("生产环境使用内存存储，重启后数据丢失");
            }
            Arc::new(InMemoryProductRepository::new())
        }
    };

    let broker = BrokerHandle::new(Arc::new(KafkaBroker::new(&config.kafka)?));
    let emitter = Arc::new(BrokerEmitter::new(broker.clone()));
    let reviewing = Arc::new(ReviewingClient::new(&config.reviewing)?);

    let controller = Arc::new(CatalogService::new(repository, emitter, reviewing));

    // 接收器订阅失败时直接退出，不以半订阅状态运行
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rating_handler = Arc::new(RatingUpdateHandler::new(
        controller.clone(),
        config.receiver.reject_delay(),
    ));
    let workers = EventReceiver::new(broker, config.receiver.clone())
        .with_handler(topics::RATING_UPDATED, rating_handler)
        .start(shutdown_rx)
        .await?;

    let app = http::router(AppState::new(controller));
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!(addr = %config.server_addr(), "HTTP server listening");

    let grace = config.shutdown_timeout();
    let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

    let mut serve_rx = shutdown_tx.subscribe();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = serve_rx.wait_for(|stopping| *stopping).await;
    });

    // HTTP 连接与消费任务共用同一个宽限时间，从收到信号开始计时
    let work = async move {
        let served = server.await;
        futures::future::join_all(workers).await;
        served
    };

    match lifecycle::run_with_grace(work, shutdown_signal(), grace, &shutdown_tx).await {
        Shutdown::Exited(served) | Shutdown::Drained(served) => served?,
        Shutdown::TimedOut => {
            for abort in &aborts {
                abort.abort();
            }
            warn!(grace_secs = grace.as_secs(), "宽限时间耗尽，强制退出");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
