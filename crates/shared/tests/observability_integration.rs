//! 可观测性模块集成测试
//!
//! 指标记录函数在没有全局 recorder 时必须是空操作；中间件在真实路由上验证。

mod metrics_tests {
    use catalog_shared::observability::metrics::{
        record_delivery, record_event_published, record_http_request,
    };

    #[test]
    fn test_record_http_request_without_recorder() {
        record_http_request("GET", "/products/{id}", 200, 0.05);
        record_http_request("POST", "/products", 201, 0.12);
        record_http_request("DELETE", "/products/{id}", 404, 0.01);
        record_http_request("PUT", "/products/{id}", 500, 0.25);
    }

    #[test]
    fn test_record_broker_metrics_without_recorder() {
        record_event_published("product_updated", "published");
        record_event_published("product_deleted", "publish_failed");
        record_event_published("product_price_updated", "declare_failed");
        record_delivery("rating_updated", "ack", 0.02);
        record_delivery("rating_updated", "requeue", 5.0);
    }
}

mod middleware_tests {
    use axum::{Extension, Router, body::Body, http::Request, middleware, routing::get};
    use catalog_shared::observability::middleware::{
        REQUEST_ID_HEADER, RequestId, http_tracing, request_id,
    };
    use tower::ServiceExt;

    async fn echo_request_id(Extension(id): Extension<RequestId>) -> String {
        id.as_str().to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/products/{id}", get(echo_request_id))
            .layer(middleware::from_fn(http_tracing))
            .layer(middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let response = app()
            .oneshot(Request::get("/products/p-1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], header.as_bytes());
    }

    #[tokio::test]
    async fn test_upstream_request_id_is_kept() {
        let response = app()
            .oneshot(
                Request::get("/products/p-1")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[test]
    fn test_request_id_debug() {
        let id = RequestId("debug-test".to_string());
        assert!(format!("{id:?}").contains("debug-test"));
    }
}

mod config_tests {
    use catalog_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "unknown-service");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs());
    }

    #[test]
    fn test_with_service_name() {
        let config = ObservabilityConfig {
            log_format: "JSON".to_string(),
            ..Default::default()
        }
        .with_service_name("catalog-service");

        assert_eq!(config.service_name, "catalog-service");
        assert!(config.json_logs());
    }
}

mod guard_tests {
    use catalog_shared::observability::ObservabilityGuard;

    #[test]
    fn test_empty_guard() {
        let guard = ObservabilityGuard::empty();
        assert!(!guard.metrics_enabled());
        drop(guard);
    }
}
