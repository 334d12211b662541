//! Fixed-window request quota per client.
//!
//! Each client identity gets a counter and a window start. A request is
//! rejected when the counter has already reached the quota for the current
//! window; otherwise it is counted and let through. Both lookup routes draw
//! from the same per-client pool.
//!
//! Clients are identified by their socket peer address. Forwarding headers
//! are client-controlled, so they are only honored when the service is
//! configured to sit behind a trusted reverse proxy.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_governor::key_extractor::{KeyExtractor, PeerIpKeyExtractor, SmartIpKeyExtractor};

use crate::clock::{elapsed_since, Clock};

/// Body message for rejected requests.
pub const RATE_LIMIT_MESSAGE: &str = "Demasiadas peticiones, intenta en un minuto.";

/// Identity used when no client address can be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Windows are pruned once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's current window resets.
    pub reset_after: Duration,
    pub window: Duration,
}

pub trait RateLimiterStore: Send + Sync {
    /// Checks the client's quota and, if admitted, counts the request.
    ///
    /// Check and increment happen under one lock so concurrent requests from
    /// the same client cannot both take the last slot.
    fn check_and_increment(&self, client: &str) -> RateDecision;
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started_at: DateTime<Utc>,
}

pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl RateLimiterStore for FixedWindowLimiter {
    fn check_and_increment(&self, client: &str) -> RateDecision {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() >= PRUNE_THRESHOLD && !windows.contains_key(client) {
            let window = self.window;
            windows.retain(|_, w| elapsed_since(now, w.started_at) < window);
        }

        let entry = windows.entry(client.to_string()).or_insert(RateWindow {
            count: 0,
            started_at: now,
        });

        let mut elapsed = elapsed_since(now, entry.started_at);
        if elapsed >= self.window {
            entry.count = 0;
            entry.started_at = now;
            elapsed = Duration::ZERO;
        }

        let allowed = entry.count < self.max_requests;
        if allowed {
            entry.count += 1;
        }

        RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after: self.window.saturating_sub(elapsed),
            window: self.window,
        }
    }
}

/// Where the client identity used for rate limiting comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientKeySource {
    /// The TCP peer address (`ConnectInfo<SocketAddr>`).
    #[default]
    PeerAddress,
    /// `X-Forwarded-For`, `X-Real-IP`, `Forwarded`, then the peer address.
    ProxyHeaders,
}

impl ClientKeySource {
    pub fn from_trust_proxy_headers(trust: bool) -> Self {
        if trust {
            ClientKeySource::ProxyHeaders
        } else {
            ClientKeySource::PeerAddress
        }
    }

    /// Resolves the client identity, or `"unknown"` when no address is available.
    pub fn client_identity<T>(&self, request: &axum::http::Request<T>) -> String {
        let ip = match self {
            ClientKeySource::PeerAddress => PeerIpKeyExtractor.extract(request),
            ClientKeySource::ProxyHeaders => SmartIpKeyExtractor.extract(request),
        };
        ip.map(|ip| ip.to_string())
            .unwrap_or_else(|_| UNKNOWN_CLIENT.to_string())
    }
}

/// Middleware state: the shared window store plus the identity policy.
#[derive(Clone)]
pub struct RateLimitGate {
    pub limiter: Arc<dyn RateLimiterStore>,
    pub key_source: ClientKeySource,
}

impl RateLimitGate {
    pub fn new(limiter: Arc<dyn RateLimiterStore>, key_source: ClientKeySource) -> Self {
        Self {
            limiter,
            key_source,
        }
    }
}

/// Axum middleware gating the lookup routes.
pub async fn enforce_rate_limit(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Response {
    let client = gate.key_source.client_identity(&request);
    let decision = gate.limiter.check_and_increment(&client);

    if !decision.allowed {
        tracing::warn!(client = %client, "Rate limit exceeded");
        let mut response = rejection_response();
        apply_headers(response.headers_mut(), &decision);
        response.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from(ceil_secs(decision.reset_after)),
        );
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn rejection_response() -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "success": false,
            "message": RATE_LIMIT_MESSAGE,
        })),
    )
        .into_response()
}

/// Writes the standard `RateLimit-*` headers (no legacy `X-RateLimit-*`).
fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let pairs = [
        (
            "ratelimit-policy",
            format!("{};w={}", decision.limit, decision.window.as_secs()),
        ),
        ("ratelimit-limit", decision.limit.to_string()),
        ("ratelimit-remaining", decision.remaining.to_string()),
        ("ratelimit-reset", ceil_secs(decision.reset_after).to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
