//! 仓储 Trait 定义
//!
//! 编排层只依赖该接口，便于替换存储实现和 mock 测试

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewProduct, Product, Rating};

/// 商品存储接口
///
/// 记录不存在时 `get` / `update` / `update_price` / `update_rating` / `delete`
/// 返回 `ProductError::NotFound`，其余失败统一为不透明的存储错误。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Product>;

    /// 按存储自身的顺序返回，没有匹配时返回空列表
    async fn get_by_category(&self, category: &str) -> Result<Vec<Product>>;

    /// 创建商品并返回存储分配的 ID
    async fn create(&self, product: &NewProduct) -> Result<String>;

    /// 更新名称、品牌、价格、分类和图片，不改变评分
    async fn update(&self, product: &Product) -> Result<()>;

    async fn update_price(&self, id: &str, price: f64) -> Result<()>;

    async fn update_rating(&self, id: &str, rating: Rating) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}
