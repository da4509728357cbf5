//! 商品目录服务错误类型

use catalog_shared::error::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("商品不存在: {id}")]
    NotFound { id: String },

    /// 存储层的 I/O 或编解码失败，对编排层不透明
    #[error("存储错误: {0}")]
    Storage(String),

    #[error("消息解码失败: {0}")]
    Decode(String),

    #[error("评分查询失败: product_id={product_id}, {message}")]
    RatingLookup { product_id: String, message: String },

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Shared(#[from] CatalogError),
}

pub type Result<T> = std::result::Result<T, ProductError>;

impl ProductError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "PRODUCT_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::RatingLookup { .. } => "RATING_LOOKUP_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ProductError::not_found("p-1").error_code(), "PRODUCT_NOT_FOUND");
        assert_eq!(
            ProductError::Storage("timeout".into()).error_code(),
            "STORAGE_ERROR"
        );
        assert_eq!(
            ProductError::from(CatalogError::Kafka("down".into())).error_code(),
            "KAFKA_ERROR"
        );
    }

    #[test]
    fn test_not_found_is_distinct() {
        assert!(ProductError::not_found("p-1").is_not_found());
        assert!(!ProductError::Storage("x".into()).is_not_found());
        assert_eq!(
            ProductError::not_found("p-1").to_string(),
            "商品不存在: p-1"
        );
    }
}
