//! Gateway pipeline tests against a mock upstream.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skein_config::{AppConfig, RatePolicyConfig};
use skein_gateway::{build_app, build_state};

const SECRET: &str = "gateway-test-secret";

fn config(upstream: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.backends.identity_url = upstream.to_string();
    cfg.backends.posts_url = upstream.to_string();
    cfg.backends.media_url = upstream.to_string();
    cfg.backends.search_url = upstream.to_string();
    cfg.auth.secret = SECRET.to_string();
    // Generous budgets unless a test tightens them.
    cfg.rate_limit.global = RatePolicyConfig {
        limit: 1000,
        window_secs: 60,
    };
    cfg.rate_limit.strict = RatePolicyConfig {
        limit: 1000,
        window_secs: 60,
    };
    cfg
}

fn app(cfg: &AppConfig) -> Router {
    build_app(build_state(cfg).unwrap())
}

fn bearer(user_id: &str) -> String {
    #[derive(serde::Serialize)]
    struct TestClaims<'a> {
        #[serde(rename = "userId")]
        user_id: &'a str,
        exp: i64,
    }
    let claims = TestClaims {
        user_id,
        exp: time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_credential_never_reaches_the_backend() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/posts/123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Access denied.");
}

#[tokio::test]
async fn valid_credential_is_rewritten_and_forwarded_with_identity() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts/123"))
        .and(header("x-user-id", "u9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "123"})))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/posts/123")
                .header("authorization", bearer("u9"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "123");
}

#[tokio::test]
async fn auth_routes_forward_without_a_credential() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri()));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/login")
                .header("content-type", "text/plain")
                .body(Body::from(r#"{"username":"a"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn forged_credential_is_rejected() {
    let upstream = MockServer::start().await;
    let app = app(&config(&upstream.uri()));

    #[derive(serde::Serialize)]
    struct TestClaims<'a> {
        #[serde(rename = "userId")]
        user_id: &'a str,
        exp: i64,
    }
    let forged = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &TestClaims {
            user_id: "u9",
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
        },
        &jsonwebtoken::EncodingKey::from_secret(b"some-other-secret"),
    )
    .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/posts/123")
                .header("authorization", format!("Bearer {forged}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn exhausted_global_budget_rejects_with_retry_after() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let mut cfg = config(&upstream.uri());
    cfg.rate_limit.global = RatePolicyConfig {
        limit: 2,
        window_secs: 1,
    };
    let app = app(&cfg);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/posts/1")
                    .header("authorization", bearer("u1"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let rejected = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/posts/1")
                .header("authorization", bearer("u1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers().contains_key("retry-after"));
    let body = body_json(rejected).await;
    assert_eq!(body["message"], "Too many requests, please try again later.");

    // The window rolls over and the client is admitted again.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let readmitted = app
        .oneshot(
            Request::builder()
                .uri("/v1/posts/1")
                .header("authorization", bearer("u1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(readmitted.status(), StatusCode::OK);
}

#[tokio::test]
async fn rotating_forwarded_for_cannot_mint_fresh_budget() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let mut cfg = config(&upstream.uri());
    cfg.rate_limit.global = RatePolicyConfig {
        limit: 1,
        window_secs: 60,
    };
    let app = app(&cfg);

    // The header is client-controlled and untrusted by default, so every
    // spoofed value still lands on the same budget.
    let spoofed = |ip: &str| {
        Request::builder()
            .uri("/v1/posts/1")
            .header("authorization", bearer("u1"))
            .header("x-forwarded-for", ip.to_string())
            .body(Body::empty())
            .unwrap()
    };
    let first = app.clone().oneshot(spoofed("1.1.1.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.clone().oneshot(spoofed("2.2.2.2")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_budgets_follow_the_forwarded_client() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let mut cfg = config(&upstream.uri());
    cfg.server.trust_forwarded_for = true;
    cfg.rate_limit.global = RatePolicyConfig {
        limit: 1,
        window_secs: 60,
    };
    let app = app(&cfg);

    let from = |ip: &str| {
        Request::builder()
            .uri("/v1/posts/1")
            .header("authorization", bearer("u1"))
            .header("x-forwarded-for", ip.to_string())
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(
        app.clone().oneshot(from("1.1.1.1")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(from("2.2.2.2")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.oneshot(from("1.1.1.1")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn registration_draws_from_the_strict_budget() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&upstream)
        .await;

    let mut cfg = config(&upstream.uri());
    cfg.rate_limit.strict = RatePolicyConfig {
        limit: 1,
        window_secs: 60,
    };
    let app = app(&cfg);

    let register = || {
        Request::builder()
            .method("POST")
            .uri("/v1/auth/register")
            .body(Body::from(r#"{"username":"a"}"#))
            .unwrap()
    };
    let first = app.clone().oneshot(register()).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let second = app.clone().oneshot(register()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other auth endpoints only draw from the global budget.
    let login = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/login")
                .body(Body::from(r#"{"username":"a"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn trailing_slash_registration_still_draws_from_the_strict_budget() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&upstream)
        .await;

    let mut cfg = config(&upstream.uri());
    cfg.rate_limit.strict = RatePolicyConfig {
        limit: 1,
        window_secs: 60,
    };
    let app = app(&cfg);

    let register = || {
        Request::builder()
            .method("POST")
            .uri("/v1/auth/register/")
            .body(Body::from(r#"{"username":"a"}"#))
            .unwrap()
    };
    let first = app.clone().oneshot(register()).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let second = app.oneshot(register()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn multipart_uploads_keep_their_content_type() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/media/upload"))
        .and(header("content-type", "multipart/form-data; boundary=xyz"))
        .and(header("x-user-id", "u1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri()));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/media/upload")
                .header("authorization", bearer("u1"))
                .header("content-type", "multipart/form-data; boundary=xyz")
                .body(Body::from("--xyz--"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn unreachable_upstream_reports_a_redacted_error() {
    let mut cfg = config("http://127.0.0.1:1");
    cfg.server.upstream_timeout_ms = 2_000;
    let app = app(&cfg);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/posts/1")
                .header("authorization", bearer("u1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Internal server error");
    // A category, not the connection error detail.
    assert_eq!(body["error"], "upstream unavailable");
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let upstream = MockServer::start().await;
    let app = app(&config(&upstream.uri()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn serves_over_a_real_socket_and_forwards_the_query() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": []})))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&config(&upstream.uri()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/v1/search?q=rust"))
        .header("authorization", bearer("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap()["hits"], json!([]));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let upstream = MockServer::start().await;
    let app = app(&config(&upstream.uri()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-7");
}
