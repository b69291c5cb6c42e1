//! Limiter configuration.
//!
//! Build a validated [`RatelimiterConfig`] with [`RatelimiterConfig::builder`]. The retry
//! budget and the edge detection heuristic stay tunable after construction: they live in an
//! `ArcSwap` so the request path reads them without locking.
//!
//! ```rust
//! use paceline::{EdgeDetection, RatelimiterConfig};
//! use std::time::Duration;
//!
//! let config = RatelimiterConfig::builder()
//!     .max_retries(3)
//!     .cleanup_interval(Duration::from_secs(60))
//!     .major_parameters(["tenant_id"])
//!     .edge_detection(EdgeDetection::Disabled)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_retries(), 3);
//! ```

use crate::headers::EdgeDetection;
use crate::route::DEFAULT_MAJOR_PARAMETERS;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// Retries after a 429 before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 10;

/// How often idle, expired buckets are evicted.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Errors produced when validating limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The sweeper cannot run on a zero interval.
    #[error("cleanup_interval must be > 0")]
    ZeroCleanupInterval,
    /// Parameter names must be non-empty.
    #[error("major parameter names must be non-empty")]
    EmptyMajorParameter,
}

/// Validated limiter configuration.
#[derive(Debug, Clone)]
pub struct RatelimiterConfig {
    max_retries: usize,
    cleanup_interval: Duration,
    major_parameters: Vec<String>,
    edge_detection: EdgeDetection,
}

impl RatelimiterConfig {
    pub fn builder() -> RatelimiterConfigBuilder {
        RatelimiterConfigBuilder::new()
    }

    /// Retries after a 429 before the retry loop returns `RateLimited`.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Path parameter names that partition buckets.
    pub fn major_parameters(&self) -> &[String] {
        &self.major_parameters
    }

    pub fn edge_detection(&self) -> &EdgeDetection {
        &self.edge_detection
    }
}

impl Default for RatelimiterConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            major_parameters: DEFAULT_MAJOR_PARAMETERS.iter().map(|p| p.to_string()).collect(),
            edge_detection: EdgeDetection::default(),
        }
    }
}

/// Builder for [`RatelimiterConfig`].
#[derive(Debug, Clone, Default)]
pub struct RatelimiterConfigBuilder {
    config: RatelimiterConfig,
}

impl RatelimiterConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Replace the major parameter set.
    pub fn major_parameters<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.major_parameters = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn edge_detection(mut self, edge: EdgeDetection) -> Self {
        self.config.edge_detection = edge;
        self
    }

    /// Build the config, validating inputs.
    pub fn build(self) -> Result<RatelimiterConfig, ConfigError> {
        if self.config.cleanup_interval.is_zero() {
            return Err(ConfigError::ZeroCleanupInterval);
        }
        if self.config.major_parameters.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::EmptyMajorParameter);
        }
        Ok(self.config)
    }
}

/// Settings a running limiter can change.
#[derive(Debug, Clone)]
pub(crate) struct Tunables {
    pub(crate) max_retries: usize,
    pub(crate) edge_detection: EdgeDetection,
}

/// Lock-free snapshot/replace cell for [`Tunables`].
#[derive(Debug)]
pub(crate) struct LiveTunables {
    inner: ArcSwap<Tunables>,
}

impl LiveTunables {
    pub(crate) fn new(config: &RatelimiterConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(Tunables {
                max_retries: config.max_retries,
                edge_detection: config.edge_detection.clone(),
            }),
        }
    }

    pub(crate) fn get(&self) -> Arc<Tunables> {
        self.inner.load_full()
    }

    pub(crate) fn update<F>(&self, f: F)
    where
        F: Fn(&mut Tunables),
    {
        self.inner.rcu(|current| {
            let mut next = Tunables::clone(current);
            f(&mut next);
            next
        });
    }
}
