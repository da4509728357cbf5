//! 统一错误处理模块
//!
//! 定义基础设施层（消息代理、HTTP 客户端、序列化）共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum CatalogError {
    // ==================== 消息代理错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("消息确认失败: {0}")]
    Acknowledge(String),

    // ==================== 外部 HTTP 错误 ====================
    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    // ==================== 数据错误 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("参数验证失败: {0}")]
    Validation(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Acknowledge(_) => "ACKNOWLEDGE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// HTTP 错误中只有连接失败、超时和 5xx 属于瞬时故障；4xx 重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kafka(_) => true,
            Self::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}
