//! 共享库
//!
//! 商品目录服务的基础设施代码：配置、错误处理、事件模型、消息代理抽象与 Kafka 实现、
//! 下游调用重试以及可观测性。

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod offsets;
pub mod retry;
pub mod test_utils;
