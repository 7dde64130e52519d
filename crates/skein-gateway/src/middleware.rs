use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

// Middleware that ensures each request has an X-Request-Id and mirrors it on
// the response, so a client-reported failure can be matched to gateway logs.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => {
            let generated = Uuid::new_v4().to_string();
            HeaderValue::from_str(&generated)
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"))
        }
    };

    // Available to downstream stages (e.g. the trace span)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}
