//! Prism - API gateway for the course platform
//!
//! Prism fronts the course, user and enrollment microservices with a single
//! entry point built on Cloudflare's Pingora framework:
//! - Static prefix routing to one fixed upstream per domain
//! - Response caching for GET requests with fixed-TTL lazy expiration
//! - Live operational counters exposed as JSON on `/metrics`
//! - Verbatim proxying of everything else

pub mod cache;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod upstream;

pub use cache::{CacheEntry, CacheStatus, ResponseCache};
pub use config::*;
pub use gateway::{ApiGateway, RequestContext};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use upstream::{UpstreamResolver, UpstreamTarget};
