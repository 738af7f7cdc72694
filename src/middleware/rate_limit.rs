//! In-memory sliding-window rate limiter for the anonymous auth endpoints.
//! Counters live per process; a multi-instance deployment needs a shared store.
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
            trust_proxy: false,
        }
    }

    /// Keys on the first `X-Forwarded-For` hop instead of the peer address.
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    /// Records a hit for `identifier`; false once the window is full.
    pub async fn check(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        let history = requests
            .entry(identifier.to_string())
            .or_insert_with(Vec::new);

        history.retain(|&timestamp| now.duration_since(timestamp) < self.window);

        if history.len() < self.max_requests {
            history.push(now);
            true
        } else {
            false
        }
    }

    /// Drops identifiers with no hits inside the window (scheduled hourly).
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        requests.retain(|_, history| {
            history.retain(|&timestamp| now.duration_since(timestamp) < self.window);
            !history.is_empty()
        });

        tracing::debug!(
            "Rate limiter cleanup: {} active identifiers",
            requests.len()
        );
        requests.len()
    }
}

/// Peer address, or the first forwarded hop when the proxy is trusted.
pub fn client_ip(peer: &SocketAddr, headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// Per-IP limit for a route, attached with `middleware::from_fn_with_state`.
/// Requires the server to run with `into_make_service_with_connect_info`.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&addr, request.headers(), limiter.trust_proxy);
    let key = format!("{}|{}", request.uri().path(), ip);

    if !limiter.check(&key).await {
        tracing::warn!("Rate limit exceeded for {} on {}", ip, request.uri().path());
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.",
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::{middleware, routing::post, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn blocks_after_limit_per_identifier() {
        let limiter = RateLimiter::new(3, 60);

        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);

        assert!(limiter.check("10.0.0.2").await);
    }

    #[tokio::test]
    async fn cleanup_forgets_expired_windows() {
        let limiter = RateLimiter::new(5, 1);

        limiter.check("ip1").await;
        limiter.check("ip2").await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(limiter.cleanup().await, 0);
        assert!(limiter.requests.read().await.is_empty());
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 9], 40000))
    }

    #[test]
    fn client_ip_ignores_forwarded_headers_unless_trusted() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&peer(), &headers, true), "192.0.2.9");
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&peer(), &headers, false), "192.0.2.9");
        assert_eq!(client_ip(&peer(), &headers, true), "203.0.113.7");
    }

    fn limited_app(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/login", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
            .layer(MockConnectInfo(peer()))
    }

    fn login_from(forwarded: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("x-forwarded-for", forwarded)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn middleware_returns_429_when_exhausted() {
        let app = limited_app(RateLimiter::new(1, 60));

        let first = app.clone().oneshot(login_from("198.51.100.4")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(login_from("198.51.100.4")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_the_limit() {
        let app = limited_app(RateLimiter::new(5, 60));

        let mut passed = 0;
        for i in 0..50 {
            let res = app
                .clone()
                .oneshot(login_from(&format!("198.51.100.{i}")))
                .await
                .unwrap();
            if res.status() == StatusCode::OK {
                passed += 1;
            }
        }
        assert_eq!(passed, 5);
    }

    #[tokio::test]
    async fn trusted_proxy_limits_each_forwarded_client() {
        let app = limited_app(RateLimiter::new(1, 60).trust_proxy(true));

        let a = app.clone().oneshot(login_from("198.51.100.1")).await.unwrap();
        let b = app.clone().oneshot(login_from("198.51.100.2")).await.unwrap();
        let a_again = app.oneshot(login_from("198.51.100.1")).await.unwrap();
        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);
        assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
