//! Kafka 消息代理实现
//!
//! 把 `MessageBroker` 的 topic / queue 语义映射到 Kafka：
//! - topic 直接对应 Kafka topic，多个消费组各自收到完整副本，即广播；
//! - queue 对应消费组（group.id），同组内多个进程分摊分区；
//! - 关闭自动提交，投递被确认后才按分区水位线提交位点；
//! - 重新入队发布到队列私有的重试 topic（只有该消费组订阅），原 topic 记录在消息头中，
//!   其他绑定同一 topic 的队列不会收到重投的副本。

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::broker::{Acknowledger, Delivery, DeliveryStream, MessageBroker};
use crate::config::KafkaConfig;
use crate::error::{CatalogError, Result};
use crate::offsets::OffsetTracker;
use crate::retry::RetryPolicy;

const DEFAULT_PREFETCH: u16 = 5;

/// 重投消息携带的原 topic
const ORIGIN_TOPIC_HEADER: &str = "x-origin-topic";

/// 队列私有的重试 topic
///
/// Kafka topic 名只允许字母、数字、`.`、`_`、`-`，其余字符替换为 `.`。
pub fn retry_topic(queue: &str) -> String {
    let base: String = queue
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '.'
            }
        })
        .collect();
    format!("{base}.retry")
}

/// 生产者配置：等待全部副本写入，开启幂等避免重试产生重复
fn producer_config(config: &KafkaConfig) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &config.brokers)
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set("message.timeout.ms", "5000");
    cfg
}

/// 消费者配置：队列名即消费组，位点由确认流程手动提交
fn consumer_config(config: &KafkaConfig, group_id: &str) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &config.brokers)
        .set("group.id", group_id)
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false");
    cfg
}

/// 基于 rdkafka 的消息代理
pub struct KafkaBroker {
    config: KafkaConfig,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    /// queue -> 已绑定的 topic 列表
    bindings: DashMap<String, Vec<String>>,
    prefetch: AtomicU16,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = producer_config(config)
            .create()
            .map_err(|e| CatalogError::Kafka(format!("创建生产者失败: {e}")))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .create()
            .map_err(|e| CatalogError::Kafka(format!("创建管理客户端失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 消息代理已初始化");
        Ok(Self {
            config: config.clone(),
            producer,
            admin,
            bindings: DashMap::new(),
            prefetch: AtomicU16::new(DEFAULT_PREFETCH),
        })
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn declare_topic(&self, topic: &str) -> Result<()> {
        let new_topic = NewTopic::new(
            topic,
            self.config.topic_partitions,
            TopicReplication::Fixed(self.config.replication_factor),
        );

        let results = self
            .admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| CatalogError::Kafka(format!("创建 topic 失败: {e}")))?;

        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, "topic 已创建"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %name, "topic 已存在");
                }
                Err((name, code)) => {
                    return Err(CatalogError::Kafka(format!("创建 topic {name} 失败: {code}")));
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(&body);

        // 入队到本地发送缓冲即返回，投递结果在后台任务中记录
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| CatalogError::Kafka(format!("发送消息失败: {e}")))?;

        let topic = topic.to_string();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => debug!(topic, "消息已被 broker 确认"),
                Ok(Err((e, _))) => warn!(topic, error = %e, "消息投递失败"),
                Err(_) => warn!(topic, "投递结果通道已关闭"),
            }
        });
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.bindings.entry(queue.to_string()).or_default();
        debug!(queue, "队列已声明");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<()> {
        let mut topics = self.bindings.entry(queue.to_string()).or_default();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
        debug!(queue, topic, "队列已绑定到 topic");
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
        let mut topics = self
            .bindings
            .get(queue)
            .map(|t| t.value().clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CatalogError::Kafka(format!("队列 {queue} 未绑定任何 topic")))?;

        let retry = retry_topic(queue);
        self.declare_topic(&retry).await?;
        topics.push(retry.clone());

        let consumer: StreamConsumer = consumer_config(&self.config, queue)
            .create()
            .map_err(|e| CatalogError::Kafka(format!("创建消费者失败: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| CatalogError::Kafka(format!("订阅 topic 失败: {e}")))?;

        let prefetch = self.prefetch.load(Ordering::SeqCst);
        info!(queue, ?topics, prefetch, "开始消费队列");

        let consumer = Arc::new(consumer);
        let ctx = PumpContext {
            consumer: consumer.clone(),
            settler: Settler {
                committer: consumer,
                republisher: Arc::new(self.producer.clone()),
                tracker: Arc::new(Mutex::new(OffsetTracker::new())),
                retry_topic: retry.into(),
                backoff: RetryPolicy::default(),
            },
            permits: Arc::new(Semaphore::new(prefetch as usize)),
        };

        let (tx, rx) = mpsc::channel(prefetch as usize);
        tokio::spawn(pump(ctx, queue.to_string(), tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// ---------------------------------------------------------------------------
// 消费泵
// ---------------------------------------------------------------------------

struct PumpContext {
    consumer: Arc<StreamConsumer>,
    settler: Settler,
    permits: Arc<Semaphore>,
}

/// 重投消息取消息头中的原 topic，普通消息取所在 topic
fn origin_topic<M: Message>(message: &M) -> String {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|h| h.key == ORIGIN_TOPIC_HEADER)
                .and_then(|h| h.value)
        })
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(str::to_string)
        .unwrap_or_else(|| message.topic().to_string())
}

/// 从 Kafka 拉取消息并转换为 `Delivery`
///
/// 每次拉取前先获取一个许可，许可随回执一起释放，因此未确认的投递数不超过 prefetch。
/// 下游丢弃投递流后退出。
async fn pump(ctx: PumpContext, queue: String, tx: mpsc::Sender<Delivery>) {
    loop {
        let permit = tokio::select! {
            _ = tx.closed() => break,
            permit = ctx.permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            _ = tx.closed() => break,
            received = ctx.consumer.recv() => received.map(|m| ReceivedMessage {
                source_topic: m.topic().to_string(),
                origin: origin_topic(&m),
                partition: m.partition(),
                offset: m.offset(),
                body: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
        };

        let message = match received {
            Ok(message) => message,
            Err(e) => {
                error!(queue = %queue, error = %e, "接收 Kafka 消息出错");
                drop(permit);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        ctx.settler.track(&message).await;
        debug!(
            queue = %queue,
            topic = %message.source_topic,
            origin = %message.origin,
            partition = message.partition,
            offset = message.offset,
            "收到投递"
        );

        let delivery = Delivery::new(
            message.origin.clone(),
            message.body.clone(),
            Box::new(KafkaAcker {
                settler: ctx.settler.clone(),
                message,
                _permit: permit,
            }),
        );

        if tx.send(delivery).await.is_err() {
            break;
        }
    }
    info!(queue = %queue, "消费泵已退出");
}

// ---------------------------------------------------------------------------
// 确认与重新入队
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ReceivedMessage {
    /// 实际读取的 topic，位点按它跟踪
    source_topic: String,
    /// 业务上的 topic，重投消息与原消息相同
    origin: String,
    partition: i32,
    offset: i64,
    body: Vec<u8>,
}

/// 按分区提交位点
trait OffsetCommitter: Send + Sync {
    fn commit_next(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()>;
}

impl OffsetCommitter for StreamConsumer {
    fn commit_next(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(|e| CatalogError::Acknowledge(format!("构造提交位点失败: {e}")))?;
        self.commit(&tpl, CommitMode::Async)
            .map_err(|e| CatalogError::Acknowledge(format!("提交位点失败: {e}")))
    }
}

/// 把被拒绝的消息写入重试 topic
#[async_trait]
trait Republisher: Send + Sync {
    async fn republish(&self, topic: &str, origin: &str, body: &[u8]) -> Result<()>;
}

#[async_trait]
impl Republisher for FutureProducer {
    async fn republish(&self, topic: &str, origin: &str, body: &[u8]) -> Result<()> {
        let headers = OwnedHeaders::new().insert(Header {
            key: ORIGIN_TOPIC_HEADER,
            value: Some(origin),
        });
        let record = FutureRecord::<(), [u8]>::to(topic)
            .payload(body)
            .headers(headers);
        self.send(record, Duration::from_secs(5))
            .await
            .map(|_| ())
            .map_err(|(e, _)| CatalogError::Kafka(format!("重新入队失败: {e}")))
    }
}

/// 同一消费者的所有回执共享的结算状态
#[derive(Clone)]
struct Settler {
    committer: Arc<dyn OffsetCommitter>,
    republisher: Arc<dyn Republisher>,
    tracker: Arc<Mutex<OffsetTracker>>,
    retry_topic: Arc<str>,
    backoff: RetryPolicy,
}

impl Settler {
    async fn track(&self, message: &ReceivedMessage) {
        self.tracker
            .lock()
            .await
            .track(&message.source_topic, message.partition, message.offset);
    }

    /// 标记位点完成，水位线前进时提交
    async fn complete(&self, message: &ReceivedMessage) -> Result<()> {
        let next = self.tracker.lock().await.complete(
            &message.source_topic,
            message.partition,
            message.offset,
        );
        let Some(next_offset) = next else {
            return Ok(());
        };

        self.committer
            .commit_next(&message.source_topic, message.partition, next_offset)?;
        debug!(
            topic = %message.source_topic,
            partition = message.partition,
            offset = next_offset,
            "位点已提交"
        );
        Ok(())
    }

    /// 写入重试 topic，失败时退避后继续，直到成功
    ///
    /// 位点只能在消息进入重试 topic 之后完成：否则消息既不会重投，
    /// 分区水位线也会永久停在这条消息上。
    async fn requeue(&self, message: &ReceivedMessage) {
        let mut attempt: u32 = 0;
        loop {
            match self
                .republisher
                .republish(&self.retry_topic, &message.origin, &message.body)
                .await
            {
                Ok(()) => {
                    debug!(
                        retry_topic = %self.retry_topic,
                        origin = %message.origin,
                        offset = message.offset,
                        attempt,
                        "投递已重新入队"
                    );
                    return;
                }
                Err(e) => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        retry_topic = %self.retry_topic,
                        offset = message.offset,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "重新入队失败，退避后重试"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

struct KafkaAcker {
    settler: Settler,
    message: ReceivedMessage,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for KafkaAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.settler.complete(&self.message).await
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<()> {
        if requeue {
            self.settler.requeue(&self.message).await;
        } else {
            warn!(
                topic = %self.message.origin,
                offset = self.message.offset,
                "投递被拒绝且不重新入队，消息丢弃"
            );
        }
        self.settler.complete(&self.message).await
    }
}
