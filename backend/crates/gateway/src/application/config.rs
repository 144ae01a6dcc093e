//! Application Configuration
//!
//! Configuration for the gateway, read from environment variables with
//! defaults for everything except the token secret.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use platform::crypto::{from_base64, random_bytes};
use thiserror::Error;

use crate::domain::route::{PathPattern, Route, RouteFilter, RouteTable};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_AUTH_SERVICE_URL: &str = "http://localhost:8084";
pub const DEFAULT_MOVIE_SERVICE_URL: &str = "http://localhost:8085";
pub const DEFAULT_ACTUATOR_SERVICE_URL: &str = "http://localhost:8086";
pub const SUBSCRIPTION_LOOKUP_PATH: &str = "/api/auth/subscription";
pub const DEFAULT_PUBLIC_ENDPOINTS: &[&str] = &[
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/refresh",
    "/api/auth/subscription/**",
];

pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:3000"];
pub const DEFAULT_CORS_HEADERS: &[&str] = &[
    "Range",
    "Content-Type",
    "Accept",
    "Origin",
    "X-Requested-With",
    "X-User-Id",
    "Authorization",
];
pub const DEFAULT_CORS_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "POST", "PUT", "DELETE"];

const SECRET_LEN: usize = 32;

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set")]
    MissingSecret,

    #[error("JWT_SECRET is not valid base64: {0}")]
    InvalidSecret(String),

    #[error("Invalid bind address {0}")]
    InvalidBindAddr(String),

    #[error("{0} cannot contain `*` while credentials are allowed")]
    WildcardCors(&'static str),
}

/// Token verification settings
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Shared HMAC key (decoded)
    pub secret: Vec<u8>,
    /// Clock skew tolerated on `exp`
    pub leeway: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: random_bytes(SECRET_LEN),
            leeway: Duration::ZERO,
        }
    }
}

/// Quota resolution settings
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Base URL; the user id is appended as a path segment
    pub lookup_url: String,
    pub fetch_timeout: Duration,
    pub cache_ttl: Duration,
    /// TTL of fallback entries, so a recovered lookup is picked up sooner
    pub fallback_ttl: Duration,
    pub cache_max_entries: usize,
    /// Tier applied when the lookup fails
    pub fallback_rpm: u32,
    /// Per-service limits for identities without a user id
    pub service_limits: HashMap<String, u32>,
    pub default_service_rpm: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            lookup_url: format!("{}{}", DEFAULT_AUTH_SERVICE_URL, SUBSCRIPTION_LOOKUP_PATH),
            fetch_timeout: Duration::from_millis(250),
            cache_ttl: Duration::from_secs(300),
            fallback_ttl: Duration::from_secs(60),
            cache_max_entries: 10_000,
            fallback_rpm: 10,
            service_limits: HashMap::from([
                ("auth".to_string(), 100),
                ("movies".to_string(), 100),
            ]),
            default_service_rpm: 5,
        }
    }
}

impl QuotaConfig {
    pub fn service_limit(&self, service: &str) -> u32 {
        self.service_limits
            .get(service)
            .copied()
            .unwrap_or(self.default_service_rpm)
    }
}

/// Admission (token bucket) settings
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub retry_after_secs: u64,
    /// Limits at or below this get the upgrade hint
    pub small_tier_threshold: u32,
    pub bucket_idle_ttl: Duration,
    pub max_buckets: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            retry_after_secs: 60,
            small_tier_threshold: 10,
            bucket_idle_ttl: Duration::from_secs(3600),
            max_buckets: 10_000,
        }
    }
}

/// Upstream addresses
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    pub auth: String,
    pub movies: String,
    pub actuator: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            auth: DEFAULT_AUTH_SERVICE_URL.to_string(),
            movies: DEFAULT_MOVIE_SERVICE_URL.to_string(),
            actuator: DEFAULT_ACTUATOR_SERVICE_URL.to_string(),
        }
    }
}

/// Cross-origin settings
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    pub headers: Vec<String>,
    pub methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: to_strings(DEFAULT_CORS_ORIGINS),
            headers: to_strings(DEFAULT_CORS_HEADERS),
            methods: to_strings(DEFAULT_CORS_METHODS),
        }
    }
}

impl CorsConfig {
    /// Credentialed CORS forbids wildcards, so every entry must be explicit
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lists = [
            ("CORS_ORIGINS", &self.origins),
            ("CORS_HEADERS", &self.headers),
            ("CORS_METHODS", &self.methods),
        ];
        for (name, values) in lists {
            if values.iter().any(|v| v.trim() == "*") {
                return Err(ConfigError::WildcardCors(name));
            }
        }
        Ok(())
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub token: TokenConfig,
    pub quota: QuotaConfig,
    pub admission: AdmissionConfig,
    pub services: ServiceUrls,
    pub public_endpoints: Vec<String>,
    pub upstream_timeout: Duration,
    pub cors: CorsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            token: TokenConfig::default(),
            quota: QuotaConfig::default(),
            admission: AdmissionConfig::default(),
            services: ServiceUrls::default(),
            public_endpoints: to_strings(DEFAULT_PUBLIC_ENDPOINTS),
            upstream_timeout: Duration::from_secs(30),
            cors: CorsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create config for development (random secret, loopback bind)
    pub fn development() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            ..Default::default()
        }
    }

    /// Load from the environment.
    ///
    /// `JWT_SECRET` (base64) is required in release builds; debug builds fall
    /// back to a random secret. Unparseable values fall back to the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = match std::env::var("GATEWAY_BIND_ADDR") {
            Ok(addr) => addr
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()))?,
            Err(_) => defaults.bind_addr,
        };

        let secret = match std::env::var("JWT_SECRET") {
            Ok(encoded) => decode_secret(&encoded)?,
            Err(_) if cfg!(debug_assertions) => {
                tracing::warn!("JWT_SECRET not set, using a random secret (development only)");
                defaults.token.secret.clone()
            }
            Err(_) => return Err(ConfigError::MissingSecret),
        };

        let services = ServiceUrls {
            auth: env_string("AUTH_SERVICE_URL", &defaults.services.auth),
            movies: env_string("MOVIE_SERVICE_URL", &defaults.services.movies),
            actuator: env_string("ACTUATOR_SERVICE_URL", &defaults.services.actuator),
        };

        let lookup_default = format!(
            "{}{}",
            services.auth.trim_end_matches('/'),
            SUBSCRIPTION_LOOKUP_PATH
        );

        let mut service_limits = defaults.quota.service_limits.clone();
        service_limits.insert(
            "auth".to_string(),
            env_parse("RATE_LIMIT_AUTH_RPM", defaults.quota.service_limit("auth")),
        );
        service_limits.insert(
            "movies".to_string(),
            env_parse("RATE_LIMIT_MOVIES_RPM", defaults.quota.service_limit("movies")),
        );

        let quota = QuotaConfig {
            lookup_url: env_string("SUBSCRIPTION_LOOKUP_URL", &lookup_default),
            fetch_timeout: Duration::from_millis(env_parse(
                "QUOTA_FETCH_TIMEOUT_MS",
                defaults.quota.fetch_timeout.as_millis() as u64,
            )),
            cache_ttl: Duration::from_secs(env_parse(
                "QUOTA_CACHE_TTL_SECS",
                defaults.quota.cache_ttl.as_secs(),
            )),
            fallback_ttl: Duration::from_secs(env_parse(
                "QUOTA_FALLBACK_TTL_SECS",
                defaults.quota.fallback_ttl.as_secs(),
            )),
            cache_max_entries: env_parse(
                "QUOTA_CACHE_MAX_ENTRIES",
                defaults.quota.cache_max_entries,
            ),
            fallback_rpm: env_parse("RATE_LIMIT_FALLBACK_RPM", defaults.quota.fallback_rpm),
            service_limits,
            default_service_rpm: env_parse(
                "RATE_LIMIT_DEFAULT_RPM",
                defaults.quota.default_service_rpm,
            ),
        };

        let admission = AdmissionConfig {
            retry_after_secs: env_parse(
                "RATE_LIMIT_RETRY_AFTER_SECS",
                defaults.admission.retry_after_secs,
            ),
            small_tier_threshold: env_parse(
                "RATE_LIMIT_SMALL_TIER_THRESHOLD",
                defaults.admission.small_tier_threshold,
            ),
            bucket_idle_ttl: Duration::from_secs(env_parse(
                "RATE_LIMIT_BUCKET_IDLE_SECS",
                defaults.admission.bucket_idle_ttl.as_secs(),
            )),
            max_buckets: env_parse("RATE_LIMIT_MAX_BUCKETS", defaults.admission.max_buckets),
        };

        let cors = CorsConfig {
            origins: env_list("CORS_ORIGINS", &defaults.cors.origins),
            headers: env_list("CORS_HEADERS", &defaults.cors.headers),
            methods: env_list("CORS_METHODS", &defaults.cors.methods),
        };
        cors.validate()?;

        Ok(Self {
            bind_addr,
            token: TokenConfig {
                secret,
                leeway: Duration::from_secs(env_parse("JWT_LEEWAY_SECS", 0)),
            },
            quota,
            admission,
            services,
            public_endpoints: env_list("GATEWAY_PUBLIC_ENDPOINTS", &defaults.public_endpoints),
            upstream_timeout: Duration::from_secs(env_parse(
                "UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout.as_secs(),
            )),
            cors,
        })
    }

    /// Route table of the deployment, in match order
    pub fn route_table(&self) -> RouteTable {
        let public: Arc<[PathPattern]> = self
            .public_endpoints
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect();

        RouteTable::new(vec![
            Route::new("auth-service", "/api/auth/**", self.services.auth.clone())
                .with_filter(RouteFilter::Authenticate)
                .with_filter(RouteFilter::RateLimit)
                .with_public_paths(public.clone()),
            Route::new("movie-service", "/api/movies/**", self.services.movies.clone())
                .with_filter(RouteFilter::Authenticate)
                .with_filter(RouteFilter::RateLimit)
                .with_public_paths(public),
            Route::new("actuator", "/actuator/**", self.services.actuator.clone()),
        ])
    }
}

fn decode_secret(encoded: &str) -> Result<Vec<u8>, ConfigError> {
    let secret =
        from_base64(encoded.trim()).map_err(|e| ConfigError::InvalidSecret(e.to_string()))?;
    if secret.is_empty() {
        return Err(ConfigError::InvalidSecret("empty key".to_string()));
    }
    Ok(secret)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn env_string(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var, value = %raw, "Unparseable setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_list(var: &str, default: &[String]) -> Vec<String> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect(),
        _ => default.to_vec(),
    }
}
