//! HTTP middleware: rate limiting, request size limits, CORS and request logging.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use tracing::warn;

use crate::settings::ServerConfig;

/// Rate limiter type
pub type AppRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter, or `None` when the configured budget is 0.
pub fn create_rate_limiter(config: &ServerConfig) -> Option<Arc<AppRateLimiter>> {
    let per_minute = NonZeroU32::new(config.rate_limit_per_minute)?;
    Some(Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(rate_limiter): State<Arc<AppRateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match rate_limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            warn!("Rate limit exceeded for request to {}", request.uri().path());
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}

/// Create CORS layer from server configuration
pub fn create_cors_layer(config: &ServerConfig) -> CorsLayer {
    if !config.enable_cors {
        return CorsLayer::new();
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Create request body size limit layer
pub fn create_body_limit_layer(max_size_mb: usize) -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(max_size_mb * 1024 * 1024)
}

/// Log every error response with its method and path
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        warn!("Server error: {} {} - Status: {}", method, uri, response.status());
    } else if response.status().is_client_error() {
        warn!("Client error: {} {} - Status: {}", method, uri, response.status());
    }

    response
}
