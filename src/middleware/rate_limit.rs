use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;

/// Fixed-window request counter backed by redis.  Keys are per client IP and
/// expire with the window, so limits reset without any sweeper.
#[derive(Clone)]
pub struct RateLimiter {
    client: redis::Client,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(redis_url: &str, window: Duration, max_requests: u32) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            window,
            max_requests,
        })
    }

    async fn check(&self, client_ip: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("rate_limit:{client_ip}");

        let count: u32 = redis::cmd("INCR").arg(&key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.window.as_secs())
                .query_async(&mut conn)
                .await?;
        }

        Ok(count <= self.max_requests)
    }
}

fn client_ip(request: &Request) -> String {
    let headers = request.headers();

    if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return ip.to_string();
    }
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&request);

    match limiter.check(&ip).await {
        Ok(true) => Ok(next.run(request).await),
        Ok(false) => Err(AppError::RateLimited),
        // Fail open when redis is down; limiting is best effort.
        Err(err) => {
            tracing::warn!(error = %err, "rate limiter unavailable");
            Ok(next.run(request).await)
        }
    }
}
