//! Route patterns for payment gating.
//!
//! A pattern is `"[METHODS ]PATH"`:
//!
//! - `"/weather"` - any method, exact path
//! - `"GET /weather"` - `GET` only
//! - `"GET|POST /premium/*"` - either verb, any path under `/premium/`
//! - `"* /files/*"` - explicit any-method form
//!
//! A trailing `*` on the path matches by prefix; every other path must be
//! equal. Patterns are compiled to anchored regexes once, when the route is
//! built.

use h402::proto::PaymentRequirements;
use http::Method;
use regex::Regex;

/// Errors while building a route.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The pattern has no path.
    #[error("route pattern is empty")]
    EmptyPattern,
    /// A verb in the method list is not an HTTP method.
    #[error("invalid HTTP method {0:?} in route pattern")]
    InvalidMethod(String),
    /// The path does not start with `/`.
    #[error("route path must start with '/': {0:?}")]
    InvalidPath(String),
    /// The route lists no way to pay.
    #[error("route {0:?} accepts no payment")]
    NoRequirements(String),
    /// The compiled path did not form a valid regex.
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Methods {
    Any,
    Only(Vec<Method>),
}

impl Methods {
    fn contains(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Only(methods) => methods.contains(method),
        }
    }
}

/// A protected route and the payments it accepts.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pattern: String,
    methods: Methods,
    path: Regex,
    accepts: Vec<PaymentRequirements>,
}

impl RouteConfig {
    /// Compiles `pattern` into a route accepting any of `accepts`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if the pattern does not parse or `accepts` is empty.
    pub fn new(pattern: &str, accepts: Vec<PaymentRequirements>) -> Result<Self, RouteError> {
        let (methods, path) = parse_route_pattern(pattern)?;
        if accepts.is_empty() {
            return Err(RouteError::NoRequirements(pattern.to_owned()));
        }
        Ok(Self {
            pattern: pattern.trim().to_owned(),
            methods,
            path: compile_path(path)?,
            accepts,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Every accepted way to pay, in declaration order.
    #[must_use]
    pub fn accepts(&self) -> &[PaymentRequirements] {
        &self.accepts
    }

    /// Returns `true` if the route covers `method` on `path`.
    #[must_use]
    pub fn matches(&self, path: &str, method: &Method) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.methods.contains(method) && self.path.is_match(path)
    }
}

/// First-match lookup over an ordered list of routes.
#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    routes: Vec<RouteConfig>,
}

impl RouteMatcher {
    /// Creates a matcher that tries `routes` in order.
    #[must_use]
    pub const fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Appends a route, tried after every route already present.
    pub fn push(&mut self, route: RouteConfig) {
        self.routes.push(route);
    }

    /// The route list in declaration order.
    #[must_use]
    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Returns the first route in declaration order that covers the request.
    #[must_use]
    pub fn find_matching_route(&self, path: &str, method: &Method) -> Option<&RouteConfig> {
        self.routes.iter().find(|route| route.matches(path, method))
    }
}

fn parse_route_pattern(pattern: &str) -> Result<(Methods, &str), RouteError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(RouteError::EmptyPattern);
    }
    let (methods, path) = match trimmed.split_once(char::is_whitespace) {
        Some((methods, path)) => (parse_methods(methods)?, path.trim()),
        None => (Methods::Any, trimmed),
    };
    if !path.starts_with('/') {
        return Err(RouteError::InvalidPath(path.to_owned()));
    }
    Ok((methods, path))
}

fn parse_methods(methods: &str) -> Result<Methods, RouteError> {
    if methods == "*" {
        return Ok(Methods::Any);
    }
    methods
        .split(['|', ','])
        .map(|method| {
            Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| RouteError::InvalidMethod(method.to_owned()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Methods::Only)
}

fn compile_path(path: &str) -> Result<Regex, regex::Error> {
    match path.strip_suffix('*') {
        Some(prefix) => Regex::new(&format!("^{}", regex::escape(prefix))),
        None => Regex::new(&format!("^{}$", regex::escape(path))),
    }
}
