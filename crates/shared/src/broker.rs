//! 消息代理抽象
//!
//! 业务层只依赖 topic / queue / 投递 / 确认这几个概念，不感知底层是 Kafka 还是进程内实现。
//! 约定：
//! - topic 是广播点，绑定到同一 topic 的每个队列都会收到一份消息副本；
//! - queue 是具名的持久订阅，多个进程消费同一 queue 时分摊消息；
//! - 每条投递必须且只能被 `ack` 或 `reject` 一次，由所有权保证。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::Result;

/// 投递流，每个元素都是一条待确认的消息
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// 投递结果回执
///
/// 实现方负责把确认结果回传给消息代理。`self: Box<Self>` 保证同一回执只能使用一次。
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<()>;

    /// `requeue = true` 时消息重新进入队列等待再次投递
    async fn reject(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// 一条待确认的投递
pub struct Delivery {
    pub topic: String,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            topic: topic.into(),
            body,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// 消息代理操作集合
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 声明持久化的广播 topic，topic 已存在时视为成功
    async fn declare_topic(&self, topic: &str) -> Result<()>;

    /// 以持久化方式发布消息，不等待代理确认
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()>;

    /// 声明持久化的具名队列
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// 将队列绑定到 topic
    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<()>;

    /// 设置每个消费者同时未确认的最大投递数
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// 开始以手动确认模式消费队列
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;
}

// ---------------------------------------------------------------------------
// BrokerHandle
// ---------------------------------------------------------------------------

/// 共享的消息代理句柄
///
/// 在 `MessageBroker` 之上维护"每个 topic 只声明一次"的状态。
/// Clone 后的句柄共享同一份声明状态，因此同一进程内同一 topic 无论多少并发发布者，
/// 声明动作最多执行一次；声明失败同样被记住，不会重试。
#[derive(Clone)]
pub struct BrokerHandle {
    broker: Arc<dyn MessageBroker>,
    declared: Arc<DashMap<String, Arc<OnceCell<bool>>>>,
}

impl BrokerHandle {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            declared: Arc::new(DashMap::new()),
        }
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    /// 确保 topic 已声明，返回声明是否成功
    ///
    /// 并发调用者在同一个 `OnceCell` 上等待，先到者执行声明，其余直接复用结果。
    pub async fn ensure_topic(&self, topic: &str) -> bool {
        let cell = self
            .declared
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        *cell
            .get_or_init(|| async {
                match self.broker.declare_topic(topic).await {
                    Ok(()) => {
                        info!(topic, "topic 已声明");
                        true
                    }
                    Err(e) => {
                        error!(topic, error = %e, "声明 topic 失败，后续发布不再重试声明");
                        false
                    }
                }
            })
            .await
    }

    /// 查询 topic 是否已完成声明（无论成败）
    pub fn is_declared(&self, topic: &str) -> bool {
        self.declared
            .get(topic)
            .is_some_and(|cell| cell.initialized())
    }

    pub async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()> {
        debug!(topic, bytes = body.len(), "发布消息");
        self.broker.publish(topic, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryBroker;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ensure_topic_declares_once() {
        let broker = Arc::new(InMemoryBroker::new());
        let handle = BrokerHandle::new(broker.clone());

        assert!(!handle.is_declared("product_updated"));
        assert!(handle.ensure_topic("product_updated").await);
        assert!(handle.ensure_topic("product_updated").await);
        assert!(handle.clone().ensure_topic("product_updated").await);

        assert!(handle.is_declared("product_updated"));
        assert_eq!(broker.declare_count("product_updated"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_share_one_declare() {
        let broker = Arc::new(InMemoryBroker::new().with_declare_delay(Duration::from_millis(20)));
        let handle = BrokerHandle::new(broker.clone());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                tokio::spawn(async move { h.ensure_topic("product_deleted").await })
            })
            .collect();

        for t in tasks {
            assert!(t.await.unwrap());
        }
        assert_eq!(broker.declare_count("product_deleted"), 1);
    }

    #[tokio::test]
    async fn test_failed_declare_is_not_retried() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_declare(true);
        let handle = BrokerHandle::new(broker.clone());

        assert!(!handle.ensure_topic("product_updated").await);
        broker.fail_declare(false);
        assert!(!handle.ensure_topic("product_updated").await);
        assert_eq!(broker.declare_count("product_updated"), 1);
    }

    #[tokio::test]
    async fn test_topics_are_tracked_independently() {
        let broker = Arc::new(InMemoryBroker::new());
        let handle = BrokerHandle::new(broker.clone());

        handle.ensure_topic("product_updated").await;
        handle.ensure_topic("product_deleted").await;

        assert_eq!(broker.declare_count("product_updated"), 1);
        assert_eq!(broker.declare_count("product_deleted"), 1);
        assert_eq!(broker.declare_count("product_price_updated"), 0);
    }
}
