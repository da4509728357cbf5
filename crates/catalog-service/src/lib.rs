//! 商品目录服务
//!
//! 编排层把商品读写委托给存储，在变更成功后异步发布领域事件；
//! 入站的评分更新消息经由接收器回调编排层，回源评分服务后写回存储。

pub mod emitter;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod models;
pub mod receiver;
pub mod repository;
pub mod service;

pub use error::{ProductError, Result};
