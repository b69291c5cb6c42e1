//! Route templates and bucket key resolution.
//!
//! A [`Route`] is a method, a path template such as `/channels/{channel_id}/messages`, and
//! the values of its path parameters. The [`RouteResolver`] turns a route into a
//! [`BucketKey`]: the route's `METHOD+template` identity, plus a canonical
//! `name=value` list of its *major* parameters (the resource identifiers the server
//! partitions its limits by).
//!
//! Two requests to different resources behind the same template get different keys only
//! if the template has major parameters.

use http::Method;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A request's method, path template, and path parameter values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: Arc<str>,
    params: Vec<(Arc<str>, String)>,
}

impl Route {
    /// Create a route for `template` with no parameter values yet.
    pub fn new(method: Method, template: impl Into<Arc<str>>) -> Self {
        Self { method, template: template.into(), params: Vec::new() }
    }

    /// Bind a path parameter. Binding the same name twice keeps the last value.
    pub fn param(mut self, name: impl Into<Arc<str>>, value: impl fmt::Display) -> Self {
        let name = name.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Bound parameters in binding order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_ref(), v.as_str()))
    }

    /// Substitute bound parameters into the template. Unbound `{name}` segments are kept as-is.
    pub fn path(&self) -> String {
        let mut path = self.template.to_string();
        for (name, value) in &self.params {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        path
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.template)
    }
}

/// Identity used to look up a bucket in the registry.
///
/// Cheap to clone; both halves are shared strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    route: Arc<str>,
    major: Option<Arc<str>>,
}

impl BucketKey {
    /// Build a key directly from its parts, bypassing a resolver.
    pub fn new(route: impl Into<Arc<str>>, major: Option<&str>) -> Self {
        Self { route: route.into(), major: major.map(Arc::from) }
    }

    /// The `METHOD+template` half of the key.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The canonical major parameter list, if the route has any.
    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.major {
            Some(major) => write!(f, "{}:{}", self.route, major),
            None => f.write_str(&self.route),
        }
    }
}

/// Default parameters treated as major.
pub const DEFAULT_MAJOR_PARAMETERS: &[&str] =
    &["channel_id", "guild_id", "webhook_id", "webhook_token", "interaction_token"];

/// Derives bucket keys from routes and remembers server-assigned bucket ids per route.
///
/// Both caches are append-only; entries are never removed or replaced.
#[derive(Debug)]
pub struct RouteResolver {
    major: BTreeSet<String>,
    hashes: RwLock<HashMap<(Method, Arc<str>), Arc<str>>>,
    bucket_ids: RwLock<HashMap<Arc<str>, Arc<str>>>,
}

impl RouteResolver {
    pub fn new<I, T>(major_parameters: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            major: major_parameters.into_iter().map(Into::into).collect(),
            hashes: RwLock::new(HashMap::new()),
            bucket_ids: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `name` partitions rate limits.
    pub fn is_major(&self, name: &str) -> bool {
        self.major.contains(name)
    }

    /// Resolve the bucket key for `route`.
    pub fn resolve(&self, route: &Route) -> BucketKey {
        let hash = self.route_hash(route);

        let mut majors: Vec<(&str, &str)> =
            route.params().filter(|(name, _)| self.is_major(name)).collect();
        majors.sort_unstable();
        let major = if majors.is_empty() {
            None
        } else {
            let joined = majors
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            Some(Arc::from(joined))
        };

        BucketKey { route: hash, major }
    }

    /// Server-assigned bucket id learned for this route's template, if any.
    pub fn bucket_id(&self, route: &Route) -> Option<Arc<str>> {
        let hash = self.route_hash(route);
        let ids = self.bucket_ids.read().expect("bucket id cache poisoned");
        ids.get(&hash).cloned()
    }

    /// Remember the server bucket id for the route half of `key`. First write wins.
    pub(crate) fn record_bucket_id(&self, key: &BucketKey, id: &str) {
        {
            let ids = self.bucket_ids.read().expect("bucket id cache poisoned");
            if let Some(known) = ids.get(&key.route) {
                if known.as_ref() != id {
                    debug!(
                        target: "paceline::route",
                        route = %key.route,
                        known = %known,
                        seen = %id,
                        "server reported a different bucket id for a cached route"
                    );
                }
                return;
            }
        }
        let mut ids = self.bucket_ids.write().expect("bucket id cache poisoned");
        ids.entry(key.route.clone()).or_insert_with(|| Arc::from(id));
    }

    fn route_hash(&self, route: &Route) -> Arc<str> {
        let lookup = (route.method.clone(), route.template.clone());
        {
            let hashes = self.hashes.read().expect("route hash cache poisoned");
            if let Some(hash) = hashes.get(&lookup) {
                return hash.clone();
            }
        }
        let mut hashes = self.hashes.write().expect("route hash cache poisoned");
        hashes
            .entry(lookup)
            .or_insert_with(|| Arc::from(format!("{}+{}", route.method, route.template)))
            .clone()
    }
}

impl Default for RouteResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAJOR_PARAMETERS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(channel: u64) -> Route {
        Route::new(Method::GET, "/channels/{channel_id}/messages").param("channel_id", channel)
    }

    #[test]
    fn major_parameters_split_keys() {
        let resolver = RouteResolver::default();
        let a = resolver.resolve(&messages(1));
        let b = resolver.resolve(&messages(2));
        assert_ne!(a, b);
        assert_eq!(a.route(), b.route());
        assert_eq!(a.to_string(), "GET+/channels/{channel_id}/messages:channel_id=1");
    }

    #[test]
    fn minor_parameters_share_a_key() {
        let resolver = RouteResolver::default();
        let route = |user: u64| Route::new(Method::GET, "/users/{user_id}").param("user_id", user);
        let a = resolver.resolve(&route(10));
        let b = resolver.resolve(&route(20));
        assert_eq!(a, b);
        assert_eq!(a.major(), None);
        assert_eq!(a.to_string(), "GET+/users/{user_id}");
    }

    #[test]
    fn major_list_is_canonical_regardless_of_binding_order() {
        let resolver = RouteResolver::default();
        let t = "/webhooks/{webhook_id}/{webhook_token}";
        let a = Route::new(Method::POST, t).param("webhook_id", 7).param("webhook_token", "abc");
        let b = Route::new(Method::POST, t).param("webhook_token", "abc").param("webhook_id", 7);
        assert_eq!(resolver.resolve(&a), resolver.resolve(&b));
        assert_eq!(resolver.resolve(&a).major(), Some("webhook_id=7&webhook_token=abc"));
    }

    #[test]
    fn method_is_part_of_the_key() {
        let resolver = RouteResolver::default();
        let get = Route::new(Method::GET, "/guilds/{guild_id}").param("guild_id", 1);
        let patch = Route::new(Method::PATCH, "/guilds/{guild_id}").param("guild_id", 1);
        assert_ne!(resolver.resolve(&get), resolver.resolve(&patch));
    }

    #[test]
    fn custom_major_set() {
        let resolver = RouteResolver::new(["tenant"]);
        let a = Route::new(Method::GET, "/t/{tenant}/items").param("tenant", "x");
        let b = Route::new(Method::GET, "/t/{tenant}/items").param("tenant", "y");
        assert_ne!(resolver.resolve(&a), resolver.resolve(&b));
        assert!(!resolver.is_major("channel_id"));
    }

    #[test]
    fn bucket_id_cache_keeps_first_value() {
        let resolver = RouteResolver::default();
        let key = resolver.resolve(&messages(1));
        assert!(resolver.bucket_id(&messages(1)).is_none());
        resolver.record_bucket_id(&key, "abcd");
        resolver.record_bucket_id(&key, "efgh");
        assert_eq!(resolver.bucket_id(&messages(99)).as_deref(), Some("abcd"));
    }

    #[test]
    fn path_substitutes_bound_parameters() {
        let route = messages(42).param("channel_id", 43);
        assert_eq!(route.path(), "/channels/43/messages");
        assert_eq!(route.params().count(), 1);
    }
}
