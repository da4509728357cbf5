//! 商品变更事件发布
//!
//! 尽力而为、至多一次：声明、序列化或发布任一步失败都只记录日志并丢弃事件，
//! 不重试、不向调用方返回错误。事件丢失不影响目录数据本身。

use async_trait::async_trait;
use catalog_shared::broker::BrokerHandle;
use catalog_shared::events::ChangeEvent;
use catalog_shared::observability::metrics::record_event_published;
use tracing::{debug, error, warn};

/// 事件发布接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// 发布一个变更事件，失败在内部消化
    async fn emit(&self, event: ChangeEvent);
}

/// 发布到消息代理的事件发布器
///
/// topic 声明由共享的 `BrokerHandle` 保证每个 topic 只执行一次。
#[derive(Clone)]
pub struct BrokerEmitter {
    broker: BrokerHandle,
}

impl BrokerEmitter {
    pub fn new(broker: BrokerHandle) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl EventEmitter for BrokerEmitter {
    async fn emit(&self, event: ChangeEvent) {
        let topic = event.topic();
        let product_id = event.product_id();

        if !self.broker.ensure_topic(topic).await {
            warn!(topic, product_id, kind = %event.kind(), "topic 未声明，事件丢弃");
            record_event_published(topic, "declare_failed");
            return;
        }

        let payload = match event.to_payload() {
            Ok(p) => p,
            Err(e) => {
                error!(topic, product_id, error = %e, "事件序列化失败，事件丢弃");
                record_event_published(topic, "encode_failed");
                return;
            }
        };

        match self.broker.publish(topic, payload).await {
            Ok(()) => {
                debug!(topic, product_id, kind = %event.kind(), "事件已发布");
                record_event_published(topic, "published");
            }
            Err(e) => {
                error!(topic, product_id, error = %e, "事件发布失败，事件丢弃");
                record_event_published(topic, "publish_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_shared::events::topics;
    use catalog_shared::test_utils::InMemoryBroker;
    use std::sync::Arc;

    fn emitter_with(broker: Arc<InMemoryBroker>) -> BrokerEmitter {
        BrokerEmitter::new(BrokerHandle::new(broker))
    }

    #[tokio::test]
    async fn test_emit_publishes_wire_payload() {
        let broker = Arc::new(InMemoryBroker::new());
        let emitter = emitter_with(broker.clone());

        emitter.emit(ChangeEvent::updated("p-1")).await;
        emitter.emit(ChangeEvent::price_updated("p-1", 750.0)).await;
        emitter.emit(ChangeEvent::deleted("p-1")).await;

        assert_eq!(
            broker.published(topics::PRODUCT_UPDATED),
            vec![br#"{"id":"p-1"}"#.to_vec()]
        );
        assert_eq!(
            broker.published(topics::PRODUCT_PRICE_UPDATED),
            vec![br#"{"id":"p-1","price":750.0}"#.to_vec()]
        );
        assert_eq!(
            broker.published(topics::PRODUCT_DELETED),
            vec![br#"{"id":"p-1"}"#.to_vec()]
        );
    }

    #[tokio::test]
    async fn test_topic_declared_once_per_kind() {
        let broker = Arc::new(InMemoryBroker::new());
        let emitter = emitter_with(broker.clone());

        for i in 0..3 {
            emitter.emit(ChangeEvent::updated(format!("p-{i}"))).await;
        }

        assert_eq!(broker.declare_count(topics::PRODUCT_UPDATED), 1);
        assert_eq!(broker.published(topics::PRODUCT_UPDATED).len(), 3);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_publish(true);
        let emitter = emitter_with(broker.clone());

        emitter.emit(ChangeEvent::deleted("p-1")).await;

        assert_eq!(broker.published_total(), 0);
        assert_eq!(broker.declare_count(topics::PRODUCT_DELETED), 1);
    }

    #[tokio::test]
    async fn test_declare_failure_skips_publish() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_declare(true);
        let emitter = emitter_with(broker.clone());

        emitter.emit(ChangeEvent::updated("p-1")).await;
        emitter.emit(ChangeEvent::updated("p-2")).await;

        assert_eq!(broker.published_total(), 0);
        assert_eq!(broker.declare_count(topics::PRODUCT_UPDATED), 1);
    }
}
