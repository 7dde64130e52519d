//! The dispatch pipeline: admit, resolve, authenticate, forward, relay.
//!
//! Stage order is fixed. Rate limiting runs before route resolution so floods
//! of unroutable requests still spend budget; authentication runs before any
//! upstream connection so an unauthenticated request never reaches a backend.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, header},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::limiter::Admission;
use crate::routes::{BodyPolicy, Route, RouteTable};
use crate::server::AppState;

/// Fallback handler: everything not served by the gateway itself.
pub async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(state: &AppState, request: Request<Body>) -> Result<Response, GatewayError> {
    let client = client_key(&request, state.trust_forwarded_for);
    let path = request.uri().path().to_string();

    if let Admission::Rejected { retry_after } = state.limiter.admit_global(&client).await {
        warn!(client = %client, path = %path, "global rate budget exhausted");
        return Err(GatewayError::RateLimited { retry_after });
    }
    if state.routes.is_strict(&path) {
        if let Admission::Rejected { retry_after } = state.limiter.admit_strict(&client).await {
            warn!(client = %client, path = %path, "strict rate budget exhausted");
            return Err(GatewayError::RateLimited { retry_after });
        }
    }

    let route = state.routes.resolve(&path).ok_or(GatewayError::RouteNotFound)?;

    let principal = if route.requires_auth {
        let header = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        match state.verifier.verify_bearer(header) {
            Ok(principal) => Some(principal),
            Err(e) => {
                debug!(path = %path, error = %e, "credential rejected");
                return Err(GatewayError::AccessDenied);
            }
        }
    } else {
        None
    };

    let rewritten = RouteTable::rewrite(&path);
    let mut target = route.upstream.clone();
    target.set_path(&rewritten);
    target.set_query(request.uri().query());

    let method = request.method().clone();
    let headers = forwarded_headers(request.headers(), route, principal.as_ref().map(|p| p.id.as_str()));

    debug!(
        method = %method,
        target = %target,
        user_id = principal.as_ref().map(|p| p.id.as_str()).unwrap_or("-"),
        "forwarding request"
    );

    let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());
    let upstream_response = state
        .http
        .request(method, target)
        .headers(headers)
        .body(body)
        .timeout(state.upstream_timeout)
        .send()
        .await
        .map_err(|e| {
            // Categories only; the detail stays in the gateway log.
            warn!(path = %path, error = %e, "upstream request failed");
            if e.is_timeout() {
                GatewayError::Upstream("upstream timeout".to_string())
            } else if e.is_connect() {
                GatewayError::Upstream("upstream unavailable".to_string())
            } else {
                GatewayError::Upstream("upstream request failed".to_string())
            }
        })?;

    let status = upstream_response.status();
    info!(path = %path, status = %status, "request proxied");

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|_| GatewayError::Internal("response assembly failed".to_string()))
}

/// Client identity for rate limiting.
///
/// `X-Forwarded-For` is client-controlled, so it only counts when the
/// deployment declares a trusted load balancer in front of the gateway.
/// Otherwise a client could rotate the header and mint a fresh budget per
/// request. Without that trust the peer address is the identity.
fn client_key(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the upstream header set.
///
/// Hop-by-hop headers and client credentials are dropped; backends trust the
/// injected `x-user-id`, so any incoming copy of it is dropped too.
fn forwarded_headers(incoming: &HeaderMap, route: &Route, user_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str)
            || is_credential_header(name_str)
            || name_str.eq_ignore_ascii_case("x-user-id")
            || name_str.eq_ignore_ascii_case("content-type")
        {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    let incoming_type = incoming
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let content_type = match (route.body_policy, incoming_type) {
        (BodyPolicy::JsonUnlessMultipart, Some(ct)) if ct.starts_with("multipart/") => {
            HeaderValue::from_str(ct).ok()
        }
        _ => Some(HeaderValue::from_static("application/json")),
    };
    if let Some(value) = content_type {
        headers.insert(header::CONTENT_TYPE, value);
    }

    if let Some(id) = user_id {
        if let Ok(value) = HeaderValue::from_str(id) {
            headers.insert("x-user-id", value);
        }
    }
    headers
}

/// RFC 9110 connection-scoped headers, plus `Host` which must name the
/// upstream, not the gateway.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

fn is_credential_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "authorization" | "cookie" | "set-cookie"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteTable;
    use skein_config::BackendsConfig;

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(is_hop_by_hop_header("host"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("x-request-id"));
    }

    #[test]
    fn credentials_never_reach_backends() {
        assert!(is_credential_header("Authorization"));
        assert!(is_credential_header("cookie"));
        assert!(!is_credential_header("accept"));
    }

    fn request_with_forwarded_for(value: &str) -> Request<Body> {
        Request::builder()
            .uri("/v1/posts")
            .header("x-forwarded-for", value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let request = request_with_forwarded_for("203.0.113.7");
        assert_eq!(client_key(&request, false), "unknown");
    }

    #[test]
    fn forwarded_for_names_the_client_behind_a_trusted_proxy() {
        let request = request_with_forwarded_for("203.0.113.7, 10.0.0.1");
        assert_eq!(client_key(&request, true), "203.0.113.7");
    }

    #[test]
    fn trusted_proxy_with_empty_header_falls_back_to_the_peer() {
        let mut request = request_with_forwarded_for("  ");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 4], 55000))));
        assert_eq!(client_key(&request, true), "192.0.2.4");
    }

    fn route(prefix: &str) -> Route {
        let table = RouteTable::from_config(&BackendsConfig::default()).unwrap();
        table.resolve(prefix).unwrap().clone()
    }

    #[test]
    fn spoofed_user_id_is_replaced() {
        let mut incoming = HeaderMap::new();
        incoming.insert("x-user-id", HeaderValue::from_static("attacker"));
        let headers = forwarded_headers(&incoming, &route("/v1/posts"), Some("u9"));
        assert_eq!(headers["x-user-id"], "u9");
    }

    #[test]
    fn json_routes_force_the_content_type() {
        let mut incoming = HeaderMap::new();
        incoming.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        let headers = forwarded_headers(&incoming, &route("/v1/posts"), None);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn media_route_preserves_multipart() {
        let mut incoming = HeaderMap::new();
        incoming.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );
        let headers = forwarded_headers(&incoming, &route("/v1/media"), Some("u1"));
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "multipart/form-data; boundary=xyz"
        );

        let json_headers = forwarded_headers(&HeaderMap::new(), &route("/v1/media"), Some("u1"));
        assert_eq!(json_headers[header::CONTENT_TYPE], "application/json");
    }
}
