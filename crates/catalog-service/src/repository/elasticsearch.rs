//! Elasticsearch 商品仓储
//!
//! 通过 REST API 读写 `products` 索引，文档 ID 即商品 ID。

use std::time::Duration;

use async_trait::async_trait;
use catalog_shared::config::StorageConfig;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::ProductRepository;
use crate::error::{ProductError, Result};
use crate::models::{NewProduct, Product, Rating};

/// 索引中存储的文档，评分拆成两个扁平字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Document {
    name: String,
    brand: String,
    price: f64,
    category: String,
    image: String,
    #[serde(default)]
    rating: f32,
    #[serde(default)]
    customers: u32,
}

impl Document {
    fn into_product(self, id: String) -> Product {
        Product {
            id,
            name: self.name,
            brand: self.brand,
            price: self.price,
            category: self.category,
            image: self.image,
            rating: Rating {
                stars: self.rating,
                customers: self.customers,
            },
        }
    }
}

impl From<&NewProduct> for Document {
    fn from(p: &NewProduct) -> Self {
        Self {
            name: p.name.clone(),
            brand: p.brand.clone(),
            price: p.price,
            category: p.category.clone(),
            image: p.image.clone(),
            rating: 0.0,
            customers: 0,
        }
    }
}

/// 部分更新只携带可编辑字段，评分不受影响
#[derive(Debug, Serialize)]
struct EditableFields<'a> {
    name: &'a str,
    brand: &'a str,
    price: f64,
    category: &'a str,
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Document,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

pub struct ElasticsearchProductRepository {
    client: Client,
    base_url: String,
    index: String,
}

impl ElasticsearchProductRepository {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ProductError::Storage(format!("创建 Elasticsearch 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        })
    }

    fn url(&self, endpoint: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}/{}", self.base_url, self.index, endpoint, id),
            None => format!("{}/{}/{}", self.base_url, self.index, endpoint),
        }
    }

    /// 将非 2xx 响应转换为错误，404 映射为 NotFound
    async fn check(&self, id: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ProductError::not_found(id));
        }
        let body = response.text().await.unwrap_or_default();
        error!(product_id = id, status = status.as_u16(), body = %body, "Elasticsearch 返回错误响应");
        Err(ProductError::Storage(format!("Elasticsearch 响应状态 {status}")))
    }

    async fn partial_update(&self, id: &str, doc: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(self.url("_update", Some(id)))
            .json(&json!({ "doc": doc }))
            .send()
            .await
            .map_err(|e| storage_error(id, "更新商品", e))?;
        self.check(id, response).await?;
        Ok(())
    }
}

fn storage_error(id: &str, action: &str, e: reqwest::Error) -> ProductError {
    error!(product_id = id, error = %e, "{action}失败");
    ProductError::Storage(format!("{action}失败: {e}"))
}

#[async_trait]
impl ProductRepository for ElasticsearchProductRepository {
    async fn get(&self, id: &str) -> Result<Product> {
        let response = self
            .client
            .get(self.url("_doc", Some(id)))
            .send()
            .await
            .map_err(|e| storage_error(id, "查询商品", e))?;

        let hit: Hit = self
            .check(id, response)
            .await?
            .json()
            .await
            .map_err(|e| storage_error(id, "解析商品文档", e))?;

        Ok(hit.source.into_product(hit.id))
    }

    async fn get_by_category(&self, category: &str) -> Result<Vec<Product>> {
        let query = json!({ "query": { "match": { "category": category } } });
        let response = self
            .client
            .post(self.url("_search", None))
            .json(&query)
            .send()
            .await
            .map_err(|e| storage_error(category, "按分类查询商品", e))?;

        // 索引尚未创建时 Elasticsearch 返回 404，视为没有商品
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let result: SearchResult = self
            .check(category, response)
            .await?
            .json()
            .await
            .map_err(|e| storage_error(category, "解析查询结果", e))?;

        Ok(result
            .hits
            .hits
            .into_iter()
            .map(|h| h.source.into_product(h.id))
            .collect())
    }

    async fn create(&self, product: &NewProduct) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        let response = self
            .client
            .put(self.url("_create", Some(&id)))
            .json(&Document::from(product))
            .send()
            .await
            .map_err(|e| storage_error(&id, "创建商品", e))?;

        self.check(&id, response).await?;
        debug!(product_id = %id, "商品文档已创建");
        Ok(id)
    }

    async fn update(&self, product: &Product) -> Result<()> {
        let fields = EditableFields {
            name: &product.name,
            brand: &product.brand,
            price: product.price,
            category: &product.category,
            image: &product.image,
        };
        let doc = serde_json::to_value(fields)
            .map_err(|e| ProductError::Storage(format!("编码商品文档失败: {e}")))?;
        self.partial_update(&product.id, doc).await
    }

    async fn update_price(&self, id: &str, price: f64) -> Result<()> {
        self.partial_update(id, json!({ "price": price })).await
    }

    async fn update_rating(&self, id: &str, rating: Rating) -> Result<()> {
        self.partial_update(
            id,
            json!({ "rating": rating.stars, "customers": rating.customers }),
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url("_doc", Some(id)))
            .send()
            .await
            .map_err(|e| storage_error(id, "删除商品", e))?;
        self.check(id, response).await?;
        Ok(())
    }
}
