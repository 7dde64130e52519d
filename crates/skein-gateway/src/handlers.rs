use axum::Json;
use serde_json::{Value, json};

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "skein-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
