use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::Multipart,
    http::StatusCode,
    routing::post,
};
use lf_common::{EmbeddingProvider, HttpEmbeddingProvider, ProviderConfig, ProviderError};
use serde_json::{Value, json};

async fn embed(mut multipart: Multipart) -> Result<Json<Value>, StatusCode> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("file") {
            let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            let len = bytes.len() as f32;
            return Ok(Json(json!({ "vector": [len, 0.5, -1.0] })));
        }
    }
    Err(StatusCode::UNPROCESSABLE_ENTITY)
}

async fn wrong_shape() -> Json<Value> {
    Json(json!({ "embedding": [1.0, 2.0] }))
}

async fn overloaded() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "vector": [1.0] }))
}

async fn spawn_fake_model() -> SocketAddr {
    let app = Router::new()
        .route("/embed", post(embed))
        .route("/wrong", post(wrong_shape))
        .route("/busy", post(overloaded))
        .route("/slow", post(slow));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn provider(addr: SocketAddr, path: &str, timeout: Duration) -> HttpEmbeddingProvider {
    HttpEmbeddingProvider::new(ProviderConfig {
        endpoint: format!("http://{addr}{path}"),
        timeout,
    })
    .unwrap()
}

#[tokio::test]
async fn sends_image_as_file_part_and_parses_vector() {
    let addr = spawn_fake_model().await;

    let embedding = provider(addr, "/embed", Duration::from_secs(2))
        .embed(b"12345")
        .await
        .unwrap();

    assert_eq!(embedding.vector, vec![5.0, 0.5, -1.0]);
}

#[tokio::test]
async fn classifies_provider_failures() {
    let addr = spawn_fake_model().await;

    let wrong = provider(addr, "/wrong", Duration::from_secs(2)).embed(b"x").await;
    let busy = provider(addr, "/busy", Duration::from_secs(2)).embed(b"x").await;
    let slow = provider(addr, "/slow", Duration::from_millis(200)).embed(b"x").await;

    assert!(matches!(wrong, Err(ProviderError::MalformedResponse(_))));
    assert!(matches!(busy, Err(ProviderError::Unavailable(_))));
    assert!(matches!(slow, Err(ProviderError::Timeout(_))));
}
