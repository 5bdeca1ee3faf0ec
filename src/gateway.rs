/// Core gateway implementation using Pingora.
///
/// Every request flows RECEIVED -> RESOLVED -> (CACHE_CHECK | FORWARD) ->
/// RESPONDED. The total-requests counter is bumped on entry, the resolver
/// picks the one backend that owns the path, GET requests consult the
/// response cache, and everything else is proxied verbatim. Successful GET
/// responses are stored back into the cache on the way out.
use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::Method;
use log::{debug, error, info, warn};
use pingora_core::{
    server::{configuration::Opt, Server},
    upstreams::peer::{HttpPeer, Peer},
    Result as PingoraResult,
};
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::{
    cache::{CacheStatus, ResponseCache},
    config::Config,
    metrics::GatewayMetrics,
    upstream::{UpstreamResolver, UpstreamTarget},
};

const SERVICE_NAME: &str = "prism-api-gateway";
const GATEWAY_HEADER: &str = "Prism/1.0";
const X_CACHE_HEADER: &str = "X-Cache";
const X_REQUEST_ID_HEADER: &str = "X-Request-ID";
const X_FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Request context that carries information throughout the request lifecycle
#[derive(Debug)]
pub struct RequestContext {
    /// Request start time
    pub start_time: Instant,
    /// Unique request ID for tracing
    pub request_id: String,
    /// Client IP address
    pub client_ip: SocketAddr,
    /// Backend resolved for this request
    pub target: Option<Arc<UpstreamTarget>>,
    /// Cache key for a GET that missed; present means the response may be stored
    pub cache_key: Option<String>,
    /// Outcome of the cache check, if one happened
    pub cache_status: Option<CacheStatus>,
    /// Status code of the upstream response
    pub upstream_status: Option<u16>,
    /// Content type of the upstream response
    pub upstream_content_type: Option<String>,
    /// Accumulated response body for the cache store step
    pub body_buf: Option<BytesMut>,
    /// Set once the body outgrew the cacheable size cap
    pub body_overflow: bool,
}

impl RequestContext {
    /// Create a new request context with a cheap unique request ID
    pub fn new(client_ip: SocketAddr, request_counter: u64) -> Self {
        let request_id = format!(
            "req-{:016x}-{:08x}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64,
            request_counter
        );

        Self {
            start_time: Instant::now(),
            request_id,
            client_ip,
            target: None,
            cache_key: None,
            cache_status: None,
            upstream_status: None,
            upstream_content_type: None,
            body_buf: None,
            body_overflow: false,
        }
    }

    /// Get request duration
    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

/// The Prism API gateway
#[derive(Clone)]
pub struct ApiGateway {
    /// Configuration
    config: Arc<Config>,
    /// Upstream resolver with the static routing rules
    resolver: Arc<UpstreamResolver>,
    /// Shared response cache
    cache: Arc<ResponseCache>,
    /// Shared metrics registry
    metrics: Arc<GatewayMetrics>,
    /// Request ID counter
    request_counter: Arc<AtomicU64>,
}

impl ApiGateway {
    /// Create a new gateway instance from validated configuration
    pub fn new(config: Arc<Config>) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(UpstreamResolver::new(&config.upstreams)?);
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let metrics = Arc::new(GatewayMetrics::new()?);

        Ok(Self {
            config,
            resolver,
            cache,
            metrics,
            request_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Shared metrics registry handle
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        self.metrics.clone()
    }

    /// Shared response cache handle
    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    /// Start the gateway server (blocks forever)
    pub fn run(&self) -> Result<()> {
        info!("Starting Prism API Gateway");

        let opt = Opt::default();
        let mut server = Server::new(Some(opt))?;
        server.bootstrap();

        let mut proxy_service =
            pingora_proxy::http_proxy_service(&server.configuration, self.clone());
        proxy_service.add_tcp(&self.config.server.listen_addr.to_string());
        info!("HTTP server listening on {}", self.config.server.listen_addr);

        server.add_service(proxy_service);

        // Optional Prometheus exposition on a dedicated listener
        if let Some(metrics_addr) = &self.config.metrics.prometheus_addr {
            let mut metrics_service =
                pingora_core::services::listening::Service::prometheus_http_service();
            metrics_service.add_tcp(&metrics_addr.to_string());
            server.add_service(metrics_service);
            info!("Prometheus metrics listening on {}", metrics_addr);
        }

        info!("Prism API Gateway started, accepting connections");

        server.run_forever();
    }

    /// Whether the current response is eligible for the cache store step
    fn should_store(&self, ctx: &RequestContext) -> bool {
        ctx.cache_key.is_some() && !ctx.body_overflow && ctx.upstream_status == Some(200)
    }
}

/// Write a JSON response and finish the session
async fn respond_json(
    session: &mut Session,
    code: u16,
    body: serde_json::Value,
) -> PingoraResult<()> {
    let bytes = Bytes::from(serde_json::to_vec(&body).unwrap_or_default());

    let mut resp = ResponseHeader::build(code, None)?;
    resp.insert_header("Content-Type", "application/json")?;

    session.write_response_header(Box::new(resp), false).await?;
    session.write_response_body(Some(bytes), true).await?;
    Ok(())
}

/// Serve a cached body verbatim with the hit marker
async fn respond_cached(
    session: &mut Session,
    body: Bytes,
    content_type: Option<&str>,
    request_id: &str,
) -> PingoraResult<()> {
    let mut resp = ResponseHeader::build(200, None)?;
    if let Some(content_type) = content_type {
        resp.insert_header("Content-Type", content_type.to_string())?;
    }
    resp.insert_header(X_CACHE_HEADER, CacheStatus::Hit.as_str())?;
    resp.insert_header("X-Gateway", GATEWAY_HEADER)?;
    resp.insert_header(X_REQUEST_ID_HEADER, request_id)?;

    session.write_response_header(Box::new(resp), false).await?;
    session.write_response_body(Some(body), true).await?;
    Ok(())
}

#[async_trait]
impl ProxyHttp for ApiGateway {
    type CTX = RequestContext;

    /// Create a new request context
    fn new_ctx(&self) -> Self::CTX {
        // The placeholder IP is replaced with the real one in early_request_filter
        let request_counter = self.request_counter.fetch_add(1, Ordering::Relaxed);
        RequestContext::new(SocketAddr::from(([0, 0, 0, 0], 0)), request_counter)
    }

    /// Early request filter - runs before routing
    async fn early_request_filter(
        &self,
        session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> PingoraResult<()> {
        if let Some(client_addr) = session.client_addr() {
            if let Some(inet_addr) = client_addr.as_inet() {
                ctx.client_ip = *inet_addr;
            }
        }

        session
            .req_header_mut()
            .insert_header(X_REQUEST_ID_HEADER, &ctx.request_id)
            .map_err(|e| {
                error!("Failed to add request ID header: {}", e);
                pingora_core::Error::new_str("Failed to add request ID header")
            })?;

        debug!(
            "Processing request {} from {}",
            ctx.request_id, ctx.client_ip
        );

        Ok(())
    }

    /// Request filter - gateway endpoints, routing and cache check
    async fn request_filter(
        &self,
        session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> PingoraResult<bool> {
        let method = session.req_header().method.clone();
        let path = session.req_header().uri.path().to_string();

        // Gateway-owned endpoints, served before the dispatch pipeline
        if method == Method::GET && path == "/health" {
            respond_json(
                session,
                200,
                json!({
                    "status": "healthy",
                    "service": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
            .await?;
            return Ok(true);
        }
        if method == Method::GET && path == "/metrics" {
            let snapshot = self.metrics.snapshot();
            respond_json(session, 200, json!({ "gateway": snapshot })).await?;
            return Ok(true);
        }

        // RECEIVED: count every dispatched request
        self.metrics.record_request();

        // RESOLVED: pick the one backend that owns this path
        let target = match self.resolver.resolve(&path) {
            Some(target) => target,
            None => {
                warn!("No route found for {} {}", method, path);
                respond_json(session, 404, json!({ "error": "Service not found" })).await?;
                return Ok(true);
            }
        };
        debug!(
            "Resolved {} {} to {} backend for request {}",
            method, path, target.name, ctx.request_id
        );
        ctx.target = Some(target);

        // CACHE_CHECK: only GET requests are cache-eligible
        if method == Method::GET {
            let key = self.cache.cache_key(session.req_header());
            let (entry, status) = self.cache.get(&key);
            match entry {
                Some(entry) => {
                    self.metrics.record_cache_hit();
                    ctx.cache_status = Some(status);
                    debug!("Cache hit for {} (request {})", key, ctx.request_id);
                    respond_cached(
                        session,
                        entry.body,
                        entry.content_type.as_deref(),
                        &ctx.request_id,
                    )
                    .await?;
                    return Ok(true);
                }
                None => {
                    self.metrics.record_cache_miss();
                    ctx.cache_status = Some(status);
                    ctx.cache_key = Some(key);
                }
            }
        }

        // FORWARD: continue to upstream selection
        Ok(false)
    }

    /// Select the upstream peer for the request
    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> PingoraResult<Box<HttpPeer>> {
        let target = ctx.target.as_ref().ok_or_else(|| {
            error!("No upstream resolved for request {}", ctx.request_id);
            pingora_core::Error::new_str("No upstream resolved")
        })?;

        let peer = Box::new(target.to_http_peer(&self.config.upstreams));

        info!(
            "Forwarding request {} to {} ({} backend)",
            ctx.request_id, target.address, target.name
        );

        Ok(peer)
    }

    /// Add tracing headers to the upstream request
    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> PingoraResult<()> {
        let client_ip_str = ctx.client_ip.ip().to_string();
        upstream_request
            .insert_header(X_FORWARDED_FOR_HEADER, &client_ip_str)
            .map_err(|e| {
                error!("Failed to add X-Forwarded-For header: {}", e);
                pingora_core::Error::new_str("Failed to add forwarded header")
            })?;

        upstream_request
            .insert_header(X_REQUEST_ID_HEADER, &ctx.request_id)
            .map_err(|e| {
                error!("Failed to add request ID to upstream: {}", e);
                pingora_core::Error::new_str("Failed to add request ID")
            })?;

        Ok(())
    }

    /// Tag cache-checked responses and record what the store step needs
    fn upstream_response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> PingoraResult<()> {
        ctx.upstream_status = Some(upstream_response.status.as_u16());

        if let Some(status) = ctx.cache_status {
            // Only GETs that reached the cache check carry the marker
            upstream_response
                .insert_header(X_CACHE_HEADER, status.as_str())
                .map_err(|e| {
                    error!("Failed to add X-Cache header: {}", e);
                    pingora_core::Error::new_str("Failed to add X-Cache header")
                })?;

            ctx.upstream_content_type = upstream_response
                .headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
        }

        upstream_response
            .insert_header("X-Gateway", GATEWAY_HEADER)
            .map_err(|e| {
                error!("Failed to add gateway header: {}", e);
                pingora_core::Error::new_str("Failed to add gateway header")
            })?;

        upstream_response
            .insert_header(X_REQUEST_ID_HEADER, &ctx.request_id)
            .map_err(|e| {
                error!("Failed to add request ID to response: {}", e);
                pingora_core::Error::new_str("Failed to add request ID")
            })?;

        Ok(())
    }

    /// Accumulate successful GET bodies and warm the cache at end of stream
    fn response_body_filter(
        &self,
        _session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> PingoraResult<Option<std::time::Duration>> {
        if self.should_store(ctx) {
            if let Some(chunk) = body {
                let buffered = ctx.body_buf.as_ref().map(BytesMut::len).unwrap_or(0);
                if !self.cache.is_cacheable_size(buffered + chunk.len()) {
                    ctx.body_overflow = true;
                    ctx.body_buf = None;
                } else if !chunk.is_empty() {
                    ctx.body_buf
                        .get_or_insert_with(BytesMut::new)
                        .extend_from_slice(chunk);
                }
            }

            if end_of_stream && !ctx.body_overflow {
                if let Some(key) = ctx.cache_key.take() {
                    let body = ctx.body_buf.take().unwrap_or_default().freeze();
                    self.cache
                        .set(key, body, ctx.upstream_content_type.take());
                }
            }
        }

        Ok(None)
    }

    /// Handle connection errors
    fn fail_to_connect(
        &self,
        _session: &mut Session,
        peer: &HttpPeer,
        ctx: &mut Self::CTX,
        mut e: Box<pingora_core::Error>,
    ) -> Box<pingora_core::Error> {
        warn!(
            "Failed to connect to upstream {} for request {}: {}",
            peer.address(),
            ctx.request_id,
            e
        );

        self.metrics.record_upstream_error();

        // Single fixed upstream per domain, no retry or failover
        e.set_retry(false);
        e
    }

    /// Record duration and log the request outcome
    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let status_code = session
            .response_written()
            .map(|resp| resp.status.as_u16())
            .unwrap_or(0);

        let duration = ctx.duration();
        self.metrics.record_response(duration);

        let log_level = if status_code >= 500 {
            log::Level::Error
        } else if status_code >= 400 {
            log::Level::Warn
        } else {
            log::Level::Info
        };

        log::log!(
            log_level,
            "Request {} completed: {} {} -> {} ({}ms) [{}]",
            ctx.request_id,
            session.req_header().method,
            session.req_header().uri.path(),
            status_code,
            duration.as_millis(),
            ctx.target
                .as_ref()
                .map(|t| t.address.as_str())
                .unwrap_or("no-upstream")
        );

        if let Some(error) = e {
            error!("Request {} encountered error: {}", ctx.request_id, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_gateway() -> ApiGateway {
        ApiGateway::new(Arc::new(Config::default())).unwrap()
    }

    #[test]
    fn test_request_context_ids_are_unique() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 4000));
        let a = RequestContext::new(addr, 1);
        let b = RequestContext::new(addr, 2);
        assert_ne!(a.request_id, b.request_id);
        assert!(a.request_id.starts_with("req-"));
    }

    #[test]
    fn test_should_store_requires_miss_and_success() {
        let gateway = create_gateway();
        let mut ctx = RequestContext::new(SocketAddr::from(([127, 0, 0, 1], 4000)), 0);

        // No cache check happened (non-GET or unrouted): never store
        assert!(!gateway.should_store(&ctx));

        ctx.cache_key = Some("GET:/courses".to_string());
        ctx.upstream_status = Some(200);
        assert!(gateway.should_store(&ctx));

        // Non-2xx upstream responses are never converted to cache entries
        ctx.upstream_status = Some(404);
        assert!(!gateway.should_store(&ctx));

        // Oversized bodies are dropped from the store step
        ctx.upstream_status = Some(200);
        ctx.body_overflow = true;
        assert!(!gateway.should_store(&ctx));
    }

    #[test]
    fn test_gateway_construction_validates_config() {
        let mut config = Config::default();
        config.upstreams.course_url = "not a url".to_string();
        assert!(ApiGateway::new(Arc::new(config)).is_err());
    }
}
