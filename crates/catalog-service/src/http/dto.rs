//! HTTP 请求与响应 DTO

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{NewProduct, Product};

/// 创建商品请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200, message = "商品名称长度必须在1-200个字符之间"))]
    pub name: String,
    pub brand: String,
    #[validate(range(min = 0.0, message = "价格不能为负数"))]
    pub price: f64,
    #[validate(length(min = 1, message = "分类不能为空"))]
    pub category: String,
    #[serde(default)]
    pub image: String,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(req: CreateProductRequest) -> Self {
        Self {
            name: req.name,
            brand: req.brand,
            price: req.price,
            category: req.category,
            image: req.image,
        }
    }
}

/// 整体更新商品请求，ID 取自路径
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200, message = "商品名称长度必须在1-200个字符之间"))]
    pub name: String,
    pub brand: String,
    #[validate(range(min = 0.0, message = "价格不能为负数"))]
    pub price: f64,
    #[validate(length(min = 1, message = "分类不能为空"))]
    pub category: String,
    #[serde(default)]
    pub image: String,
}

impl UpdateProductRequest {
    /// 评分不由客户端写入，存储层在整体更新时保留原值
    pub fn into_product(self, id: String) -> Product {
        Product {
            id,
            name: self.name,
            brand: self.brand,
            price: self.price,
            category: self.category,
            image: self.image,
            rating: Default::default(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePriceRequest {
    #[validate(range(min = 0.0, message = "价格不能为负数"))]
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    pub category: Option<String>,
}

/// 商品响应，评分展开为 `rating` 和 `customers` 两个字段
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub price: f64,
    pub category: String,
    pub image: String,
    pub rating: f32,
    pub customers: u32,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            brand: product.brand,
            price: product.price,
            category: product.category,
            image: product.image,
            rating: product.rating.stars,
            customers: product.rating.customers,
        }
    }
}
