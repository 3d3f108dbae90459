mod support;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use tower::ServiceExt;

#[tokio::test]
async fn readyz_returns_service_unavailable_when_not_ready() {
    let state = lf_api::test_state();
    state.readiness.store(false, Ordering::SeqCst);
    let app = lf_api::create_router(state);

    let response = app.oneshot(support::get("/readyz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = support::json_body(response).await;
    assert_eq!(body["code"], "service_unavailable");
}

#[tokio::test]
async fn health_is_ready_with_in_memory_store() {
    let app = lf_api::create_router(lf_api::test_state());

    let response = app.oneshot(support::get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(support::json_body(response).await["store"], "ok");
}
