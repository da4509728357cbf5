//! 评分更新消息处理
//!
//! 每条投递以 ack 或 reject(requeue) 结束：
//! 1. 解码失败：等待固定时长后拒绝并重新入队；
//! 2. 编排层更新评分失败：同样等待后拒绝并重新入队；
//! 3. 成功：确认。
//! 不设死信队列，也不限制重投次数，持续失败的消息会以固定间隔一直重投。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use catalog_shared::broker::Delivery;
use catalog_shared::events::RatingUpdatedMessage;
use catalog_shared::observability::metrics::record_delivery;
use tracing::{debug, error, warn};

use super::DeliveryHandler;
use crate::error::{ProductError, Result};
use crate::service::CatalogController;

pub struct RatingUpdateHandler {
    controller: Arc<dyn CatalogController>,
    reject_delay: Duration,
}

impl RatingUpdateHandler {
    pub fn new(controller: Arc<dyn CatalogController>, reject_delay: Duration) -> Self {
        Self {
            controller,
            reject_delay,
        }
    }

    async fn process(&self, body: &[u8]) -> Result<()> {
        let message =
            RatingUpdatedMessage::decode(body).map_err(|e| ProductError::Decode(e.to_string()))?;
        debug!(product_id = %message.product_id, "收到评分更新消息");
        self.controller.update_rating(&message.product_id).await
    }

    /// 等待固定时长后拒绝并重新入队，避免对 broker 形成紧密的重投循环
    async fn reject_later(&self, delivery: Delivery) {
        tokio::time::sleep(self.reject_delay).await;
        if let Err(e) = delivery.reject(true).await {
            error!(error = %e, "拒绝消息失败");
        }
    }
}

#[async_trait]
impl DeliveryHandler for RatingUpdateHandler {
    async fn handle(&self, delivery: Delivery) {
        let started = Instant::now();
        let topic = delivery.topic.clone();

        let outcome = match self.process(&delivery.body).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    error!(topic = %topic, error = %e, "确认消息失败");
                }
                "ack"
            }
            Err(e) => {
                match &e {
                    ProductError::Decode(_) => {
                        warn!(topic = %topic, error = %e, "评分更新消息无法解码，稍后重新入队")
                    }
                    _ => warn!(topic = %topic, error = %e, "更新商品评分失败，稍后重新入队"),
                }
                self.reject_later(delivery).await;
                "requeue"
            }
        };

        record_delivery(&topic, outcome, started.elapsed().as_secs_f64());
    }
}
