//! 商品目录编排服务
//!
//! 目录状态的唯一变更入口。每次存储确认成功的变更都会在后台任务中发布对应事件，
//! 调用方不等待发布完成，也不受发布结果影响。

use std::sync::Arc;

use async_trait::async_trait;
use catalog_shared::events::ChangeEvent;
use tracing::{error, info};

use crate::emitter::EventEmitter;
use crate::error::{ProductError, Result};
use crate::gateway::RatingGateway;
use crate::models::{NewProduct, Product, validate_price};
use crate::repository::ProductRepository;

/// 目录操作接口，供 HTTP 层和入站事件处理器调用
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogController: Send + Sync {
    async fn get_product(&self, id: &str) -> Result<Product>;

    async fn get_products(&self, category: &str) -> Result<Vec<Product>>;

    async fn create_product(&self, product: NewProduct) -> Result<String>;

    async fn update_product(&self, product: Product) -> Result<()>;

    async fn update_product_price(&self, id: &str, price: f64) -> Result<()>;

    async fn delete_product(&self, id: &str) -> Result<()>;

    /// 从评分服务拉取最新评分并写入存储，不发布任何事件
    async fn update_rating(&self, id: &str) -> Result<()>;
}

pub struct CatalogService {
    repository: Arc<dyn ProductRepository>,
    emitter: Arc<dyn EventEmitter>,
    reviewing: Arc<dyn RatingGateway>,
}

impl CatalogService {
    pub fn new(
        repository: Arc<dyn ProductRepository>,
        emitter: Arc<dyn EventEmitter>,
        reviewing: Arc<dyn RatingGateway>,
    ) -> Self {
        Self {
            repository,
            emitter,
            reviewing,
        }
    }

    /// 在后台任务中发布事件，立即返回
    fn emit_in_background(&self, event: ChangeEvent) {
        let emitter = Arc::clone(&self.emitter);
        tokio::spawn(async move {
            emitter.emit(event).await;
        });
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProductError::Validation(format!("{field} 不能为空")));
    }
    Ok(())
}

#[async_trait]
impl CatalogController for CatalogService {
    async fn get_product(&self, id: &str) -> Result<Product> {
        require_non_empty("id", id)?;
        self.repository.get(id).await.inspect_err(|e| {
            if !e.is_not_found() {
                error!(product_id = id, error = %e, "查询商品失败");
            }
        })
    }

    async fn get_products(&self, category: &str) -> Result<Vec<Product>> {
        require_non_empty("category", category)?;
        self.repository
            .get_by_category(category)
            .await
            .inspect_err(|e| error!(category, error = %e, "按分类查询商品失败"))
    }

    async fn create_product(&self, product: NewProduct) -> Result<String> {
        validate_price(product.price)?;
        let id = self
            .repository
            .create(&product)
            .await
            .inspect_err(|e| error!(name = %product.name, error = %e, "创建商品失败"))?;

        info!(product_id = %id, name = %product.name, "商品已创建");
        Ok(id)
    }

    async fn update_product(&self, product: Product) -> Result<()> {
        require_non_empty("id", &product.id)?;
        validate_price(product.price)?;
        self.repository
            .update(&product)
            .await
            .inspect_err(|e| error!(product_id = %product.id, error = %e, "更新商品失败"))?;

        info!(product_id = %product.id, "商品已更新");
        self.emit_in_background(ChangeEvent::updated(product.id));
        Ok(())
    }

    async fn update_product_price(&self, id: &str, price: f64) -> Result<()> {
        require_non_empty("id", id)?;
        validate_price(price)?;
        self.repository
            .update_price(id, price)
            .await
            .inspect_err(|e| error!(product_id = id, price, error = %e, "更新商品价格失败"))?;

        info!(product_id = id, price, "商品价格已更新");
        self.emit_in_background(ChangeEvent::price_updated(id, price));
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> Result<()> {
        require_non_empty("id", id)?;
        self.repository
            .delete(id)
            .await
            .inspect_err(|e| error!(product_id = id, error = %e, "删除商品失败"))?;

        info!(product_id = id, "商品已删除");
        self.emit_in_background(ChangeEvent::deleted(id));
        Ok(())
    }

    async fn update_rating(&self, id: &str) -> Result<()> {
        require_non_empty("id", id)?;
        let rating = self
            .reviewing
            .rating(id)
            .await
            .inspect_err(|e| error!(product_id = id, error = %e, "获取商品评分失败"))?;

        self.repository
            .update_rating(id, rating)
            .await
            .inspect_err(|e| error!(product_id = id, error = %e, "更新商品评分失败"))?;

        info!(
            product_id = id,
            stars = rating.stars,
            customers = rating.customers,
            "商品评分已更新"
        );
        Ok(())
    }
}
