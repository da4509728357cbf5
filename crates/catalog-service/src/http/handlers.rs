//! 商品 REST 处理器
//!
//! 只做请求解析和状态码映射，业务语义全部委托给编排层。

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use validator::Validate;

use super::AppState;
use super::dto::{
    CreateProductRequest, ListProductsQuery, ProductResponse, UpdatePriceRequest,
    UpdateProductRequest,
};
use super::error::ApiError;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// GET /products?category=
pub async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ListProductsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ProductResponse>>> {
    let Query(query) = query?;
    let category = query
        .category
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::Validation("缺少 category 参数".to_string()))?;

    let products = state.controller.get_products(&category).await?;
    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

/// POST /products
pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    req.validate()?;

    let id = state.controller.create_product(req.into()).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/products/{id}"))],
    ))
}

/// GET /products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProductResponse>> {
    let product = state.controller.get_product(&id).await?;
    Ok(Json(product.into()))
}

/// PUT /products/{id}
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(req) = payload?;
    req.validate()?;

    state.controller.update_product(req.into_product(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /products/{id}
pub async fn update_price(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePriceRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(req) = payload?;
    req.validate()?;

    state.controller.update_product_price(&id, req.price).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /products/{id}
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.controller.delete_product(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health() -> &'static str {
    "Up"
}
