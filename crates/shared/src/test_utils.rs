//! 测试工具模块
//!
//! 提供进程内的 `MessageBroker` 实现，用于在没有 Kafka 的环境下验证发布、声明、
//! 消费和确认行为。所有状态都可以从测试中直接观察。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::broker::{Acknowledger, Delivery, DeliveryStream, MessageBroker};
use crate::config::ReceiverConfig;
use crate::error::{CatalogError, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==================== 测试配置辅助 ====================

/// 拒绝等待缩短到毫秒级的接收配置，避免测试等待 5 秒
pub fn test_receiver_config() -> ReceiverConfig {
    ReceiverConfig {
        reject_delay_ms: 10,
        ..Default::default()
    }
}

// ==================== 投递结果 ====================

/// 一条投递最终的确认结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Acked { topic: String, body: Vec<u8> },
    Rejected { topic: String, body: Vec<u8>, requeue: bool },
}

impl DeliveryOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }

    pub fn is_requeue(&self) -> bool {
        matches!(self, Self::Rejected { requeue: true, .. })
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    topic: String,
    body: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    messages: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
}

impl QueueState {
    fn push_back(&self, msg: QueuedMessage) {
        lock(&self.messages).push_back(msg);
        self.notify.notify_one();
    }

    fn push_front(&self, msg: QueuedMessage) {
        lock(&self.messages).push_front(msg);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueuedMessage> {
        lock(&self.messages).pop_front()
    }
}

#[derive(Default)]
struct BrokerState {
    outcomes: Mutex<Vec<DeliveryOutcome>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl BrokerState {
    fn delivered(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn settle(&self, outcome: DeliveryOutcome) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        lock(&self.outcomes).push(outcome);
    }
}

// ==================== InMemoryBroker ====================

/// 进程内消息代理
///
/// 语义与生产实现对齐：topic 广播到所有绑定的队列，未绑定队列的 topic 上的消息被丢弃，
/// 重新入队的消息回到队首。
#[derive(Default)]
pub struct InMemoryBroker {
    declares: DashMap<String, usize>,
    declare_delay: Option<Duration>,
    fail_declare: AtomicBool,
    fail_publish: AtomicBool,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    queues: DashMap<String, Arc<QueueState>>,
    /// topic -> 绑定的队列
    bindings: DashMap<String, Vec<String>>,
    prefetch: AtomicU16,
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            prefetch: AtomicU16::new(u16::MAX),
            ..Default::default()
        }
    }

    /// 每次声明 topic 时额外等待，用于放大并发声明的竞争窗口
    pub fn with_declare_delay(mut self, delay: Duration) -> Self {
        self.declare_delay = Some(delay);
        self
    }

    pub fn fail_declare(&self, fail: bool) {
        self.fail_declare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn declare_count(&self, topic: &str) -> usize {
        self.declares.get(topic).map_or(0, |c| *c)
    }

    /// 发布到指定 topic 的全部消息体，按发布顺序
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        lock(&self.published)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn published_total(&self) -> usize {
        lock(&self.published).len()
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.queues.contains_key(queue)
    }

    pub fn is_bound(&self, queue: &str, topic: &str) -> bool {
        self.bindings
            .get(topic)
            .is_some_and(|queues| queues.iter().any(|q| q == queue))
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch.load(Ordering::SeqCst)
    }

    pub fn outcomes(&self) -> Vec<DeliveryOutcome> {
        lock(&self.state.outcomes).clone()
    }

    /// 观察到的同时未确认投递数峰值
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// 等待至少 `count` 条投递完成确认，超时返回当前已有的结果
    pub async fn wait_for_outcomes(&self, count: usize, timeout: Duration) -> Vec<DeliveryOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let outcomes = self.outcomes();
            if outcomes.len() >= count || tokio::time::Instant::now() >= deadline {
                return outcomes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_topic(&self, topic: &str) -> Result<()> {
        *self.declares.entry(topic.to_string()).or_insert(0) += 1;
        if let Some(delay) = self.declare_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_declare.load(Ordering::SeqCst) {
            return Err(CatalogError::Kafka(format!("模拟声明失败: {topic}")));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(CatalogError::Kafka(format!("模拟发布失败: {topic}")));
        }
        lock(&self.published).push((topic.to_string(), body.clone()));

        let queues = self
            .bindings
            .get(topic)
            .map(|q| q.value().clone())
            .unwrap_or_default();
        for queue in queues {
            if let Some(state) = self.queues.get(&queue) {
                state.push_back(QueuedMessage {
                    topic: topic.to_string(),
                    body: body.clone(),
                });
            }
        }
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<()> {
        if !self.queues.contains_key(queue) {
            return Err(CatalogError::Kafka(format!("队列 {queue} 未声明")));
        }
        let mut queues = self.bindings.entry(topic.to_string()).or_default();
        if !queues.iter().any(|q| q == queue) {
            queues.push(queue.to_string());
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        if count == 0 {
            return Err(CatalogError::Validation("prefetch 必须大于 0".to_string()));
        }
        self.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let queue_state = self
            .queues
            .get(queue)
            .map(|q| q.value().clone())
            .ok_or_else(|| CatalogError::Kafka(format!("队列 {queue} 未声明")))?;

        let consumer = ConsumerState {
            queue: queue_state,
            permits: Arc::new(Semaphore::new(self.prefetch() as usize)),
            broker: self.state.clone(),
        };

        let stream = futures::stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next_delivery().await?;
            Some((delivery, consumer))
        });
        Ok(Box::pin(stream))
    }
}

struct ConsumerState {
    queue: Arc<QueueState>,
    permits: Arc<Semaphore>,
    broker: Arc<BrokerState>,
}

impl ConsumerState {
    async fn next_delivery(&self) -> Option<Delivery> {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        loop {
            let notified = self.queue.notify.notified();
            if let Some(msg) = self.queue.pop() {
                self.broker.delivered();
                let acker = InMemoryAcker {
                    queue: self.queue.clone(),
                    broker: self.broker.clone(),
                    message: msg.clone(),
                    _permit: permit,
                };
                return Some(Delivery::new(msg.topic, msg.body, Box::new(acker)));
            }
            notified.await;
        }
    }
}

struct InMemoryAcker {
    queue: Arc<QueueState>,
    broker: Arc<BrokerState>,
    message: QueuedMessage,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.broker.settle(DeliveryOutcome::Acked {
            topic: self.message.topic.clone(),
            body: self.message.body.clone(),
        });
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<()> {
        self.broker.settle(DeliveryOutcome::Rejected {
            topic: self.message.topic.clone(),
            body: self.message.body.clone(),
            requeue,
        });
        if requeue {
            self.queue.push_front(self.message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn bound_broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue("rating_updated:catalog").await.unwrap();
        broker
            .bind_queue("rating_updated:catalog", "rating_updated")
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_bound_queue() {
        let broker = bound_broker().await;
        let mut stream = broker.consume("rating_updated:catalog").await.unwrap();

        broker
            .publish("rating_updated", b"{\"product_id\":\"P1\"}".to_vec())
            .await
            .unwrap();

        let delivery = stream.next().await.unwrap();
        assert_eq!(delivery.topic, "rating_updated");
        assert_eq!(delivery.body, b"{\"product_id\":\"P1\"}");
        delivery.ack().await.unwrap();

        assert_eq!(broker.outcomes().len(), 1);
        assert!(broker.outcomes()[0].is_ack());
    }

    #[tokio::test]
    async fn test_unbound_topic_messages_are_dropped() {
        let broker = bound_broker().await;
        broker.publish("product_updated", b"{}".to_vec()).await.unwrap();

        assert_eq!(broker.published("product_updated").len(), 1);
        assert!(broker.is_bound("rating_updated:catalog", "rating_updated"));
        assert!(!broker.is_bound("rating_updated:catalog", "product_updated"));
    }

    #[tokio::test]
    async fn test_requeued_message_is_redelivered() {
        let broker = bound_broker().await;
        let mut stream = broker.consume("rating_updated:catalog").await.unwrap();
        broker.publish("rating_updated", b"x".to_vec()).await.unwrap();

        stream.next().await.unwrap().reject(true).await.unwrap();
        let again = stream.next().await.unwrap();
        assert_eq!(again.body, b"x");
        again.reject(false).await.unwrap();

        let outcomes = broker.outcomes();
        assert!(outcomes[0].is_requeue());
        assert!(!outcomes[1].is_requeue());
    }

    #[tokio::test]
    async fn test_prefetch_limits_unacked_deliveries() {
        let broker = bound_broker().await;
        broker.set_prefetch(2).await.unwrap();
        let mut stream = broker.consume("rating_updated:catalog").await.unwrap();
        for _ in 0..3 {
            broker.publish("rating_updated", b"m".to_vec()).await.unwrap();
        }

        let first = stream.next().await.unwrap();
        let _second = stream.next().await.unwrap();
        let third = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(third.is_err(), "超过 prefetch 时不应继续投递");

        first.ack().await.unwrap();
        let third = tokio::time::timeout(Duration::from_millis(500), stream.next()).await;
        assert!(third.unwrap().is_some());
        assert_eq!(broker.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_switch() {
        let broker = InMemoryBroker::new();
        broker.fail_publish(true);
        assert!(broker.publish("product_updated", b"{}".to_vec()).await.is_err());
        assert_eq!(broker.published_total(), 0);
    }
}
