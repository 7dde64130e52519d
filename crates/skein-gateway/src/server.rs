use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use skein_auth::TokenVerifier;
use skein_config::AppConfig;

use crate::limiter::{CounterStore, RateLimiter};
use crate::routes::RouteTable;
use crate::{handlers, middleware as app_middleware, proxy};

/// Shared state for the dispatch pipeline.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub limiter: RateLimiter,
    pub verifier: Arc<TokenVerifier>,
    pub http: reqwest::Client,
    pub upstream_timeout: Duration,
    /// Whether `X-Forwarded-For` may name the client for rate limiting.
    pub trust_forwarded_for: bool,
}

pub fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let routes = RouteTable::from_config(&cfg.backends)
        .map_err(|e| anyhow::anyhow!("route table: {e}"))?;

    let store = match cfg.redis.url.as_deref() {
        Some(url) => {
            let pool = deadpool_redis::Config::from_url(url)
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
            CounterStore::new_redis(pool)
        }
        None => CounterStore::new_local(),
    };

    Ok(AppState {
        routes: Arc::new(routes),
        limiter: RateLimiter::new(store, &cfg.rate_limit),
        verifier: Arc::new(TokenVerifier::new(&cfg.auth.secret)),
        http: reqwest::Client::builder().build()?,
        upstream_timeout: cfg.upstream_timeout(),
        trust_forwarded_for: cfg.server.trust_forwarded_for,
    })
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Gateway-owned endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        // Everything else goes through the dispatch pipeline
        .fallback(proxy::dispatch)
        // Middleware stack (order: request id -> cors -> trace)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %method,
                        http.target = %uri,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .with_state(state)
}

pub struct SkeinGateway {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<SkeinGateway> {
        let state = build_state(&self.config)?;
        Ok(SkeinGateway {
            addr: self.addr,
            app: build_app(state),
        })
    }
}

impl SkeinGateway {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
