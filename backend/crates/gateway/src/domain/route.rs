//! Static route table
//!
//! Routes are evaluated in declaration order and the first match wins.

use std::fmt;
use std::sync::Arc;

const WILDCARD_SUFFIX: &str = "/**";
const UNKNOWN_SERVICE: &str = "unknown";

/// Path matcher: an exact path, or everything under a prefix when written `prefix/**`.
///
/// A prefix only matches on a segment boundary, so `/api/auth/**` covers
/// `/api/auth` and `/api/auth/login` but not `/api/authx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        match pattern.strip_suffix(WILDCARD_SUFFIX) {
            Some(base) => PathPattern::Prefix(base.to_string()),
            None => PathPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(base) => path.strip_prefix(base.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with('/') || base.ends_with('/')
            }),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(exact) => f.write_str(exact),
            PathPattern::Prefix(base) => write!(f, "{}{}", base, WILDCARD_SUFFIX),
        }
    }
}

/// Per-route pipeline stage, applied in the order listed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFilter {
    /// Require a valid bearer token unless the path is public
    Authenticate,
    /// Admit through the caller's token bucket
    RateLimit,
}

/// One upstream mapping
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    pattern: PathPattern,
    upstream: String,
    filters: Vec<RouteFilter>,
    public_paths: Arc<[PathPattern]>,
}

impl Route {
    pub fn new(name: impl Into<String>, pattern: &str, upstream: impl Into<String>) -> Self {
        let upstream: String = upstream.into();
        Self {
            name: name.into(),
            pattern: PathPattern::parse(pattern),
            upstream: upstream.trim_end_matches('/').to_string(),
            filters: Vec::new(),
            public_paths: Arc::from(Vec::new()),
        }
    }

    pub fn with_filter(mut self, filter: RouteFilter) -> Self {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
        self
    }

    pub fn with_public_paths(mut self, public_paths: Arc<[PathPattern]>) -> Self {
        self.public_paths = public_paths;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Base URI without a trailing slash
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn filters(&self) -> &[RouteFilter] {
        &self.filters
    }

    pub fn has_filter(&self, filter: RouteFilter) -> bool {
        self.filters.contains(&filter)
    }

    pub fn requires_auth(&self) -> bool {
        self.has_filter(RouteFilter::Authenticate)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }

    /// Path is on this route's allow-list and skips authentication
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p.matches(path))
    }
}

/// Ordered, read-only list of routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// First route whose pattern matches `path`
    pub fn find(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Path can be matched and forwarded verbatim.
///
/// Rejects `.` and `..` segments, including their percent-encoded forms, and
/// encoded or literal separators (`%2f`, `%5c`, `\`) that an upstream could
/// decode into new segments. Matching is done on the raw path, so any of
/// these would let a request match one route and resolve to another path
/// upstream.
pub fn is_canonical_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    if lowered.contains('\\') || lowered.contains("%2f") || lowered.contains("%5c") {
        return false;
    }
    lowered.split('/').all(|segment| {
        let decoded = segment.replace("%2e", ".");
        decoded != "." && decoded != ".."
    })
}

/// Backend service a path belongs to.
///
/// Empty segments are skipped; a leading `api` segment is skipped when
/// another segment follows it (`/api/auth/login` is `auth`,
/// `/actuator/health` is `actuator`).
pub fn service_name(path: &str) -> &str {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("api"), Some(service)) => service,
        (Some(first), _) => first,
        (None, _) => UNKNOWN_SERVICE,
    }
}
