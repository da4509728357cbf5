//! 评分服务（reviewing）网关
//!
//! 编排层是评分服务的唯一调用方。入站评分更新消息只携带商品 ID，
//! 最新评分总是通过这里回源获取。

use std::time::Duration;

use async_trait::async_trait;
use catalog_shared::config::ReviewingConfig;
use catalog_shared::error::CatalogError;
use catalog_shared::retry::{RetryPolicy, retry_with_policy};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ProductError, Result};
use crate::models::Rating;

/// 评分查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingGateway: Send + Sync {
    async fn rating(&self, product_id: &str) -> Result<Rating>;
}

/// 评分服务的响应体
#[derive(Debug, Deserialize)]
struct RatingResponse {
    /// 满分 5 分
    rating: f32,
    customers: u32,
}

/// 基于 HTTP 的评分服务客户端
///
/// 请求 `GET {base_url}/products/{id}/rating`，瞬时故障按 `RetryPolicy` 重试。
pub struct ReviewingClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ReviewingClient {
    pub fn new(config: &ReviewingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(CatalogError::from)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::with_max_retries(config.max_retries),
        })
    }

    fn rating_url(&self, product_id: &str) -> String {
        format!("{}/products/{}/rating", self.base_url, product_id)
    }

    async fn fetch(&self, url: &str) -> std::result::Result<RatingResponse, CatalogError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<RatingResponse>().await?)
    }
}

#[async_trait]
impl RatingGateway for ReviewingClient {
    async fn rating(&self, product_id: &str) -> Result<Rating> {
        let url = self.rating_url(product_id);
        let body = retry_with_policy(&self.retry, "reviewing.rating", || self.fetch(&url))
            .await
            .map_err(|e| ProductError::RatingLookup {
                product_id: product_id.to_string(),
                message: e.to_string(),
            })?;

        debug!(product_id, stars = body.rating, customers = body.customers, "已获取评分");

        Rating::new(body.rating, body.customers).map_err(|e| ProductError::RatingLookup {
            product_id: product_id.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_url() {
        let client = ReviewingClient::new(&ReviewingConfig {
            base_url: "http://reviewing:8081/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.rating_url("P1"),
            "http://reviewing:8081/products/P1/rating"
        );
    }

    #[test]
    fn test_response_uses_rating_field_name() {
        let body: RatingResponse =
            serde_json::from_str(r#"{"rating":4.2,"customers":87}"#).unwrap();
        assert!((body.rating - 4.2).abs() < f32::EPSILON);
        assert_eq!(body.customers, 87);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_rating_lookup_error() {
        let client = ReviewingClient::new(&ReviewingConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_seconds: 1,
            max_retries: 0,
        })
        .unwrap();

        let err = client.rating("P1").await.unwrap_err();
        assert!(matches!(err, ProductError::RatingLookup { .. }));
    }
}
