//! Configuration surface for the Skein platform.
//!
//! Configuration merges an optional `skein.toml` file with `SKEIN__*`
//! environment overrides, e.g. `SKEIN__SERVER__PORT=9090` or
//! `SKEIN__AUTH__SECRET=...`. Routes are immutable after startup.

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend base URLs per route.
    #[serde(default)]
    pub backends: BackendsConfig,
    /// Shared-secret material for credential verification.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Counter store / cache store / broker endpoints. When unset, the
    /// in-process backends are used (single-instance mode).
    #[serde(default)]
    pub redis: RedisConfig,
    /// Rate-limit window/threshold pairs per policy tier.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Cache TTL policy per entry kind.
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.upstream_timeout_ms == 0 {
            return Err("server.upstream_timeout_ms must be > 0".into());
        }
        if self.auth.secret.is_empty() {
            return Err("auth.secret must not be empty".into());
        }
        for (tier, policy) in [
            ("global", &self.rate_limit.global),
            ("strict", &self.rate_limit.strict),
        ] {
            if policy.limit == 0 {
                return Err(format!("rate_limit.{tier}.limit must be > 0"));
            }
            if policy.window_secs == 0 {
                return Err(format!("rate_limit.{tier}.window_secs must be > 0"));
            }
        }
        if self.cache.detail_ttl_secs == 0 || self.cache.list_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.server.upstream_timeout_ms as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound timeout applied to every proxied upstream call.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u32,
    /// Trust `X-Forwarded-For` when identifying clients. Leave off unless a
    /// trusted load balancer sets the header; a direct client could otherwise
    /// pick its own rate-limit identity.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_upstream_timeout_ms() -> u32 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            trust_forwarded_for: false,
        }
    }
}

/// Backend base URLs, one per proxied service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_posts_url")]
    pub posts_url: String,
    #[serde(default = "default_media_url")]
    pub media_url: String,
    #[serde(default = "default_search_url")]
    pub search_url: String,
}

fn default_identity_url() -> String {
    "http://localhost:3001".into()
}
fn default_posts_url() -> String {
    "http://localhost:3002".into()
}
fn default_media_url() -> String {
    "http://localhost:3003".into()
}
fn default_search_url() -> String {
    "http://localhost:3004".into()
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            identity_url: default_identity_url(),
            posts_url: default_posts_url(),
            media_url: default_media_url(),
            search_url: default_search_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 shared secret used to verify credentials. Set via
    /// `SKEIN__AUTH__SECRET` in any real deployment.
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    /// Counter-store and cache-store endpoint, e.g. `redis://127.0.0.1:6379`.
    #[serde(default)]
    pub url: Option<String>,
    /// Event broker endpoint. Defaults to `url` when unset.
    #[serde(default)]
    pub broker_url: Option<String>,
}

impl RedisConfig {
    pub fn broker_url(&self) -> Option<&str> {
        self.broker_url.as_deref().or(self.url.as_deref())
    }
}

/// One fixed-window policy tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatePolicyConfig {
    pub limit: u32,
    pub window_secs: u64,
}

impl RatePolicyConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Coarse policy applied to all gateway traffic.
    #[serde(default = "default_global_policy")]
    pub global: RatePolicyConfig,
    /// Stricter policy for sensitive endpoints (e.g. registration).
    #[serde(default = "default_strict_policy")]
    pub strict: RatePolicyConfig,
}

fn default_global_policy() -> RatePolicyConfig {
    // 100 requests per 15 minutes
    RatePolicyConfig {
        limit: 100,
        window_secs: 15 * 60,
    }
}
fn default_strict_policy() -> RatePolicyConfig {
    // 50 requests per 15 minutes
    RatePolicyConfig {
        limit: 50,
        window_secs: 15 * 60,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: default_global_policy(),
            strict: default_strict_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for single-entity detail entries.
    #[serde(default = "default_detail_ttl_secs")]
    pub detail_ttl_secs: u64,
    /// TTL for list entries (short: lists go stale fastest).
    #[serde(default = "default_list_ttl_secs")]
    pub list_ttl_secs: u64,
}

fn default_detail_ttl_secs() -> u64 {
    3600
}
fn default_list_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            detail_ttl_secs: default_detail_ttl_secs(),
            list_ttl_secs: default_list_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_ttl_secs)
    }
    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("skein.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., SKEIN__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("SKEIN")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
