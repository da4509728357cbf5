//! 商品目录领域模型

use serde::{Deserialize, Serialize};

use crate::error::{ProductError, Result};

/// 商品评分
///
/// 值对象，更新时整体替换，不做字段级合并。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rating {
    pub stars: f32,
    pub customers: u32,
}

impl Rating {
    pub const MAX_STARS: f32 = 5.0;

    /// 构造评分，星级必须是 [0, 5] 区间内的有限值
    pub fn new(stars: f32, customers: u32) -> Result<Self> {
        if !stars.is_finite() || !(0.0..=Self::MAX_STARS).contains(&stars) {
            return Err(ProductError::Validation(format!(
                "评分星级必须在 0 到 5 之间: {stars}"
            )));
        }
        Ok(Self { stars, customers })
    }
}

/// 商品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub price: f64,
    pub category: String,
    pub image: String,
    #[serde(default)]
    pub rating: Rating,
}

/// 创建商品的输入，不含存储分配的 ID 和评分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub brand: String,
    pub price: f64,
    pub category: String,
    pub image: String,
}

impl NewProduct {
    /// 绑定存储分配的 ID，评分取默认值
    pub fn into_product(self, id: impl Into<String>) -> Product {
        Product {
            id: id.into(),
            name: self.name,
            brand: self.brand,
            price: self.price,
            category: self.category,
            image: self.image,
            rating: Rating::default(),
        }
    }
}

/// 价格必须是非负有限值
pub fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(ProductError::Validation(format!("价格不能为负数: {price}")));
    }
    Ok(())
}
