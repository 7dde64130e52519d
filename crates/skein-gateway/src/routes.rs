//! The route table: data, not code.
//!
//! Adding a backend means adding an entry, not a handler. Each route pairs a
//! public path prefix with an upstream base URL, an authentication
//! requirement and a body policy. Matching is longest-prefix on path segment
//! boundaries, so `/v1/posts` matches `/v1/posts/123` but not `/v1/postscript`.

use url::Url;

use skein_config::BackendsConfig;

/// How the forwarded Content-Type is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Always forward as `application/json`.
    ForceJson,
    /// Preserve multipart uploads; force JSON for everything else.
    JsonUnlessMultipart,
}

#[derive(Debug, Clone)]
pub struct Route {
    /// Public prefix, e.g. `/v1/posts`.
    pub prefix: String,
    /// Upstream base URL.
    pub upstream: Url,
    /// Whether a verified credential is required before forwarding.
    pub requires_auth: bool,
    pub body_policy: BodyPolicy,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    /// Paths under the stricter rate budget.
    strict_paths: Vec<String>,
}

impl RouteTable {
    pub fn from_config(backends: &BackendsConfig) -> Result<Self, String> {
        let parse = |name: &str, raw: &str| {
            Url::parse(raw).map_err(|e| format!("invalid {name} backend URL {raw:?}: {e}"))
        };
        let routes = vec![
            Route {
                prefix: "/v1/auth".to_string(),
                upstream: parse("identity", &backends.identity_url)?,
                requires_auth: false,
                body_policy: BodyPolicy::ForceJson,
            },
            Route {
                prefix: "/v1/posts".to_string(),
                upstream: parse("posts", &backends.posts_url)?,
                requires_auth: true,
                body_policy: BodyPolicy::ForceJson,
            },
            Route {
                prefix: "/v1/media".to_string(),
                upstream: parse("media", &backends.media_url)?,
                requires_auth: true,
                body_policy: BodyPolicy::JsonUnlessMultipart,
            },
            Route {
                prefix: "/v1/search".to_string(),
                upstream: parse("search", &backends.search_url)?,
                requires_auth: true,
                body_policy: BodyPolicy::ForceJson,
            },
        ];
        Ok(Self {
            routes,
            strict_paths: vec!["/v1/auth/register".to_string()],
        })
    }

    /// Longest matching prefix on a segment boundary, or `None`.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| prefix_matches(&route.prefix, path))
            .max_by_key(|route| route.prefix.len())
    }

    /// Whether the path falls under the stricter rate budget. Matching uses
    /// the same segment-boundary rule as `resolve`, so `/v1/auth/register/`
    /// cannot slip past the budget that `/v1/auth/register` draws from.
    pub fn is_strict(&self, path: &str) -> bool {
        self.strict_paths.iter().any(|p| prefix_matches(p, path))
    }

    /// Rewrite the public path to the upstream's path space: `/v1/...`
    /// becomes `/api/...`. Paths outside `/v1` pass through unchanged.
    pub fn rewrite(path: &str) -> String {
        match path.strip_prefix("/v1") {
            Some(rest) => format!("/api{rest}"),
            None => path.to_string(),
        }
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::from_config(&BackendsConfig::default()).unwrap()
    }

    #[test]
    fn resolves_on_segment_boundaries() {
        let t = table();
        assert_eq!(t.resolve("/v1/posts").unwrap().prefix, "/v1/posts");
        assert_eq!(t.resolve("/v1/posts/123").unwrap().prefix, "/v1/posts");
        assert!(t.resolve("/v1/postscript").is_none());
        assert!(t.resolve("/v2/posts").is_none());
        assert!(t.resolve("/").is_none());
    }

    #[test]
    fn auth_routes_skip_credential_check() {
        let t = table();
        assert!(!t.resolve("/v1/auth/login").unwrap().requires_auth);
        assert!(t.resolve("/v1/posts").unwrap().requires_auth);
        assert!(t.resolve("/v1/media/upload").unwrap().requires_auth);
        assert!(t.resolve("/v1/search").unwrap().requires_auth);
    }

    #[test]
    fn media_preserves_multipart() {
        let t = table();
        assert_eq!(
            t.resolve("/v1/media/upload").unwrap().body_policy,
            BodyPolicy::JsonUnlessMultipart
        );
        assert_eq!(
            t.resolve("/v1/posts").unwrap().body_policy,
            BodyPolicy::ForceJson
        );
    }

    #[test]
    fn rewrite_is_uniform() {
        assert_eq!(RouteTable::rewrite("/v1/posts/123"), "/api/posts/123");
        assert_eq!(RouteTable::rewrite("/v1/auth/login"), "/api/auth/login");
        assert_eq!(RouteTable::rewrite("/healthz"), "/healthz");
    }

    #[test]
    fn only_registration_is_strict() {
        let t = table();
        assert!(t.is_strict("/v1/auth/register"));
        assert!(!t.is_strict("/v1/auth/login"));
        assert!(!t.is_strict("/v1/posts"));
    }

    #[test]
    fn strict_matching_holds_on_segment_boundaries() {
        let t = table();
        assert!(t.is_strict("/v1/auth/register/"));
        assert!(t.is_strict("/v1/auth/register/confirm"));
        assert!(!t.is_strict("/v1/auth/registered"));
    }

    #[test]
    fn bad_backend_url_is_rejected() {
        let backends = BackendsConfig {
            posts_url: "not a url".to_string(),
            ..BackendsConfig::default()
        };
        assert!(RouteTable::from_config(&backends).is_err());
    }
}
