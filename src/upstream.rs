/// Upstream resolution for the Prism gateway.
///
/// Every inbound path maps to exactly one fixed backend via static
/// prefix/substring rules. There is no load balancing, no retries and no
/// failover: one target per domain, resolved from configuration at startup.
use anyhow::{anyhow, Context, Result};
use http::Uri;
use pingora_core::upstreams::peer::HttpPeer;
use std::sync::Arc;

use crate::config::UpstreamsConfig;

/// A single fixed backend the gateway can forward to
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Domain name of the backend (course, user, enrollment)
    pub name: &'static str,
    /// Resolved `host:port` address
    pub address: String,
    /// Whether to use TLS for connections to this backend
    pub tls: bool,
    /// SNI hostname for TLS connections
    pub sni: String,
}

impl UpstreamTarget {
    /// Parse a base URL (e.g. `http://course-service:8081`) into a target.
    ///
    /// Only `http` and `https` schemes are accepted; the port defaults to
    /// 80/443 when the URL omits it.
    pub fn from_base_url(name: &'static str, base_url: &str) -> Result<Self> {
        let uri: Uri = base_url
            .parse()
            .with_context(|| format!("Invalid base URL for {} backend: {}", name, base_url))?;

        let tls = match uri.scheme_str() {
            Some("http") | None => false,
            Some("https") => true,
            Some(other) => {
                return Err(anyhow!(
                    "Unsupported scheme '{}' in base URL for {} backend: {}",
                    other,
                    name,
                    base_url
                ))
            }
        };

        let host = uri
            .host()
            .ok_or_else(|| anyhow!("Missing host in base URL for {} backend: {}", name, base_url))?;
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self {
            name,
            address: format!("{}:{}", host, port),
            tls,
            sni: host.to_string(),
        })
    }

    /// Convert to an HttpPeer for Pingora, applying the configured timeouts
    pub fn to_http_peer(&self, config: &UpstreamsConfig) -> HttpPeer {
        let mut peer = HttpPeer::new(&self.address, self.tls, self.sni.clone());
        peer.options.connection_timeout = Some(config.connect_timeout);
        peer.options.read_timeout = Some(config.read_timeout);
        peer.options.write_timeout = Some(config.write_timeout);
        peer
    }
}

/// Maps request paths to backends using static prefix rules
pub struct UpstreamResolver {
    course: Arc<UpstreamTarget>,
    user: Arc<UpstreamTarget>,
    enrollment: Arc<UpstreamTarget>,
}

impl UpstreamResolver {
    /// Build the resolver from configuration, parsing each base URL once
    pub fn new(config: &UpstreamsConfig) -> Result<Self> {
        Ok(Self {
            course: Arc::new(UpstreamTarget::from_base_url("course", &config.course_url)?),
            user: Arc::new(UpstreamTarget::from_base_url("user", &config.user_url)?),
            enrollment: Arc::new(UpstreamTarget::from_base_url(
                "enrollment",
                &config.enrollment_url,
            )?),
        })
    }

    /// Resolve a request path to its backend. First match wins:
    /// `/courses` and `/series` prefixes go to the course service, `/users`
    /// without `/enrollments` to the user service, anything containing
    /// `/enrollments` to the enrollment service. Unmatched paths return None.
    pub fn resolve(&self, path: &str) -> Option<Arc<UpstreamTarget>> {
        if path.starts_with("/courses") || path.starts_with("/series") {
            Some(self.course.clone())
        } else if path.starts_with("/users") && !path.contains("/enrollments") {
            Some(self.user.clone())
        } else if path.contains("/enrollments") {
            Some(self.enrollment.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamsConfig;

    fn create_resolver() -> UpstreamResolver {
        UpstreamResolver::new(&UpstreamsConfig::default()).unwrap()
    }

    #[test]
    fn test_course_routes() {
        let resolver = create_resolver();
        assert_eq!(resolver.resolve("/courses").unwrap().name, "course");
        assert_eq!(resolver.resolve("/courses/42").unwrap().name, "course");
        assert_eq!(resolver.resolve("/series").unwrap().name, "course");
        assert_eq!(resolver.resolve("/series/7/items").unwrap().name, "course");
    }

    #[test]
    fn test_user_routes() {
        let resolver = create_resolver();
        assert_eq!(resolver.resolve("/users").unwrap().name, "user");
        assert_eq!(resolver.resolve("/users/42").unwrap().name, "user");
    }

    #[test]
    fn test_enrollment_routes() {
        let resolver = create_resolver();
        // A user path containing /enrollments belongs to the enrollment service
        assert_eq!(
            resolver.resolve("/users/42/enrollments").unwrap().name,
            "enrollment"
        );
        assert_eq!(resolver.resolve("/enrollments").unwrap().name, "enrollment");
        assert_eq!(
            resolver.resolve("/enrollments/13").unwrap().name,
            "enrollment"
        );
    }

    #[test]
    fn test_unknown_routes() {
        let resolver = create_resolver();
        assert!(resolver.resolve("/unknown").is_none());
        assert!(resolver.resolve("/").is_none());
        assert!(resolver.resolve("/health-check").is_none());
    }

    #[test]
    fn test_target_from_base_url() {
        let target = UpstreamTarget::from_base_url("course", "http://course-service:8081").unwrap();
        assert_eq!(target.address, "course-service:8081");
        assert!(!target.tls);
        assert_eq!(target.sni, "course-service");

        let target = UpstreamTarget::from_base_url("user", "https://users.internal").unwrap();
        assert_eq!(target.address, "users.internal:443");
        assert!(target.tls);

        let target = UpstreamTarget::from_base_url("user", "http://10.0.0.5").unwrap();
        assert_eq!(target.address, "10.0.0.5:80");
    }

    #[test]
    fn test_target_rejects_bad_urls() {
        assert!(UpstreamTarget::from_base_url("course", "not a url").is_err());
        assert!(UpstreamTarget::from_base_url("course", "ftp://host:21").is_err());
    }
}
