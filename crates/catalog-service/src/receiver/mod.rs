//! 入站事件接收
//!
//! 启动时先设置全局 prefetch，再为每个订阅的 topic 声明队列、声明 topic、绑定并开始消费。
//! 任一步骤失败都会让 `start` 返回错误，不存在部分订阅的状态。
//! 每个 topic 由独立任务消费，任务内最多同时处理 prefetch 条投递。

mod handler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use catalog_shared::broker::{BrokerHandle, Delivery};
use catalog_shared::config::ReceiverConfig;
use catalog_shared::error::CatalogError;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use handler::RatingUpdateHandler;

use crate::error::Result;

/// 单条投递的处理器，负责最终 ack 或 reject
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery);
}

pub struct EventReceiver {
    broker: BrokerHandle,
    config: ReceiverConfig,
    handlers: HashMap<String, Arc<dyn DeliveryHandler>>,
}

impl EventReceiver {
    pub fn new(broker: BrokerHandle, config: ReceiverConfig) -> Self {
        Self {
            broker,
            config,
            handlers: HashMap::new(),
        }
    }

    /// 为 topic 注册处理器
    pub fn with_handler(mut self, topic: &str, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.handlers.insert(topic.to_string(), handler);
        self
    }

    /// 完成订阅并启动消费任务，返回各 topic 的任务句柄
    ///
    /// `shutdown` 变为 `true` 后消费任务退出，正在处理的投递不会被确认，由 broker 重新投递。
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let prefetch = self.config.prefetch_count;
        self.broker.broker().set_prefetch(prefetch).await?;

        let mut workers = Vec::new();
        for topic in &self.config.topics {
            let Some(handler) = self.handlers.get(topic) else {
                warn!(topic = %topic, "topic 没有注册处理器，跳过订阅");
                continue;
            };

            let queue = self.config.queue_name(topic);
            let broker = self.broker.broker();

            broker.declare_queue(&queue).await?;
            if !self.broker.ensure_topic(topic).await {
                return Err(CatalogError::Kafka(format!("声明 topic {topic} 失败")).into());
            }
            broker.bind_queue(&queue, topic).await?;
            let stream = broker.consume(&queue).await?;

            info!(topic = %topic, queue = %queue, prefetch, "已订阅入站 topic");

            let handler = Arc::clone(handler);
            let mut shutdown = shutdown.clone();
            let topic = topic.clone();
            workers.push(tokio::spawn(async move {
                let drain = stream.for_each_concurrent(prefetch as usize, |delivery| {
                    let handler = Arc::clone(&handler);
                    async move { handler.handle(delivery).await }
                });

                tokio::select! {
                    _ = drain => warn!(topic = %topic, "投递流已结束"),
                    _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                        info!(topic = %topic, "收到关闭信号，消费任务退出");
                    }
                }
            }));
        }

        Ok(workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_shared::broker::MessageBroker;
    use catalog_shared::events::topics;
    use catalog_shared::test_utils::{InMemoryBroker, test_receiver_config};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct AckingHandler(mpsc::UnboundedSender<Vec<u8>>);

    #[async_trait]
    impl DeliveryHandler for AckingHandler {
        async fn handle(&self, delivery: Delivery) {
            let _ = self.0.send(delivery.body.clone());
            let _ = delivery.ack().await;
        }
    }

    fn build_receiver(
        broker: Arc<InMemoryBroker>,
        config: ReceiverConfig,
    ) -> (EventReceiver, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = EventReceiver::new(BrokerHandle::new(broker), config)
            .with_handler(topics::RATING_UPDATED, Arc::new(AckingHandler(tx)));
        (receiver, rx)
    }

    #[tokio::test]
    async fn test_start_declares_binds_and_consumes() {
        let broker = Arc::new(InMemoryBroker::new());
        let (receiver, mut rx) = build_receiver(broker.clone(), test_receiver_config());
        let (_tx, shutdown) = watch::channel(false);

        let workers = receiver.start(shutdown).await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(broker.prefetch(), 5);
        assert!(broker.has_queue("rating_updated:catalog"));
        assert!(broker.is_bound("rating_updated:catalog", "rating_updated"));
        assert_eq!(broker.declare_count("rating_updated"), 1);

        broker
            .publish("rating_updated", br#"{"product_id":"P1"}"#.to_vec())
            .await
            .unwrap();
        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, br#"{"product_id":"P1"}"#);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_skipped() {
        let broker = Arc::new(InMemoryBroker::new());
        let config = ReceiverConfig {
            topics: vec!["inventory_changed".to_string(), topics::RATING_UPDATED.to_string()],
            ..test_receiver_config()
        };
        let (receiver, _rx) = build_receiver(broker.clone(), config);
        let (_tx, shutdown) = watch::channel(false);

        let workers = receiver.start(shutdown).await.unwrap();
        assert_eq!(workers.len(), 1);
        assert!(!broker.has_queue("inventory_changed:catalog"));
        assert_eq!(broker.declare_count("inventory_changed"), 0);
    }

    #[tokio::test]
    async fn test_declare_failure_is_fatal() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_declare(true);
        let (receiver, _rx) = build_receiver(broker.clone(), test_receiver_config());
        let (_tx, shutdown) = watch::channel(false);

        assert!(receiver.start(shutdown).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_prefetch_is_fatal() {
        let broker = Arc::new(InMemoryBroker::new());
        let config = ReceiverConfig {
            prefetch_count: 0,
            ..test_receiver_config()
        };
        let (receiver, _rx) = build_receiver(broker.clone(), config);
        let (_tx, shutdown) = watch::channel(false);

        assert!(receiver.start(shutdown).await.is_err());
        assert!(!broker.has_queue("rating_updated:catalog"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let broker = Arc::new(InMemoryBroker::new());
        let (receiver, _rx) = build_receiver(broker.clone(), test_receiver_config());
        let (tx, shutdown) = watch::channel(false);

        let workers = receiver.start(shutdown).await.unwrap();
        tx.send(true).unwrap();

        for worker in workers {
            tokio::time::timeout(Duration::from_secs(1), worker)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
