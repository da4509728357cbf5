//! 事件模型
//!
//! 定义商品目录对外广播的变更事件、事件在消息代理上的 JSON 线格式，
//! 以及外部评分服务推送的入站评分更新消息。

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理所有 topic 名称，防止字符串散落在各模块中导致拼写不一致
pub mod topics {
    pub const PRODUCT_UPDATED: &str = "product_updated";
    pub const PRODUCT_PRICE_UPDATED: &str = "product_price_updated";
    pub const PRODUCT_DELETED: &str = "product_deleted";
    pub const RATING_UPDATED: &str = "rating_updated";
}

// ---------------------------------------------------------------------------
// ChangeKind / ChangeEvent: 出站变更事件
// ---------------------------------------------------------------------------

/// 变更事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Updated,
    PriceUpdated,
    Deleted,
}

impl ChangeKind {
    /// 每种事件类型发布到独立的 topic
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Updated => topics::PRODUCT_UPDATED,
            Self::PriceUpdated => topics::PRODUCT_PRICE_UPDATED,
            Self::Deleted => topics::PRODUCT_DELETED,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Updated => "ProductUpdated",
            Self::PriceUpdated => "ProductPriceUpdated",
            Self::Deleted => "ProductDeleted",
        };
        write!(f, "{s}")
    }
}

/// 商品变更事件
///
/// 每次存储层确认成功的变更产生一个事件，事件本身不可变、不重试。
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Updated { id: String },
    PriceUpdated { id: String, price: f64 },
    Deleted { id: String },
}

/// Updated / Deleted 事件的线格式：`{"id": "..."}`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProductChangedMessage {
    pub id: String,
}

/// PriceUpdated 事件的线格式：`{"id": "...", "price": 800.0}`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProductPriceChangedMessage {
    pub id: String,
    pub price: f64,
}

impl ChangeEvent {
    pub fn updated(id: impl Into<String>) -> Self {
        Self::Updated { id: id.into() }
    }

    pub fn price_updated(id: impl Into<String>, price: f64) -> Self {
        Self::PriceUpdated {
            id: id.into(),
            price,
        }
    }

    pub fn deleted(id: impl Into<String>) -> Self {
        Self::Deleted { id: id.into() }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Updated { .. } => ChangeKind::Updated,
            Self::PriceUpdated { .. } => ChangeKind::PriceUpdated,
            Self::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            Self::Updated { id } | Self::PriceUpdated { id, .. } | Self::Deleted { id } => id,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    /// 序列化为线格式
    ///
    /// 字段顺序由结构体定义固定（id 在前，price 在后），相同事件总是得到相同字节。
    pub fn to_payload(&self) -> Result<Vec<u8>, CatalogError> {
        let bytes = match self {
            Self::Updated { id } | Self::Deleted { id } => {
                serde_json::to_vec(&ProductChangedMessage { id: id.clone() })?
            }
            Self::PriceUpdated { id, price } => serde_json::to_vec(&ProductPriceChangedMessage {
                id: id.clone(),
                price: *price,
            })?,
        };
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// RatingUpdatedMessage: 入站评分更新
// ---------------------------------------------------------------------------

/// 评分服务发布的评分变更通知
///
/// 只携带商品 ID，不携带评分值本身；接收方必须回源评分服务获取最新评分。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingUpdatedMessage {
    pub product_id: String,
}

impl RatingUpdatedMessage {
    pub fn decode(body: &[u8]) -> Result<Self, CatalogError> {
        Ok(serde_json::from_slice(body)?)
    }
}
