//! 商品目录 HTTP 接口
//!
//! 路由、请求 DTO 与错误映射。中间件顺序与部署环境一致：
//! CORS 在最外层，其次是请求追踪，最内层是请求 ID。

mod dto;
mod error;
mod handlers;

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use catalog_shared::observability::middleware as obs_middleware;
use tower_http::cors::{Any, CorsLayer};

pub use dto::{
    CreateProductRequest, ProductResponse, UpdatePriceRequest, UpdateProductRequest,
};
pub use error::ApiError;

use crate::service::CatalogController;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<dyn CatalogController>,
}

impl AppState {
    pub fn new(controller: Arc<dyn CatalogController>) -> Self {
        Self { controller }
    }
}

/// 构建完整路由，含中间件
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/products/{id}",
            get(handlers::get_product)
                .put(handlers::update_product)
                .patch(handlers::update_price)
                .delete(handlers::delete_product),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
}
