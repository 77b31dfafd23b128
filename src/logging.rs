//! Request and response logging middleware.

use axum::{
    body::{self, Body, Bytes, HttpBody},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

use crate::config::LogOptions;

/// Request bodies that may be larger than this are passed through without being logged.
pub const MAX_LOGGED_BODY: usize = 2 * 1024 * 1024;

fn log_body(bytes: &Bytes) {
    if !bytes.is_empty() {
        info!("{}", String::from_utf8_lossy(bytes));
    }
}

pub async fn log_traffic(
    State(options): State<LogOptions>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    info!("REQUEST {} {path}", request.method());

    if options.request_query {
        if let Some(query) = request.uri().query().filter(|q| !q.is_empty()) {
            info!("?{query}");
        }
    }

    let request = if options.request_body {
        let fits = request
            .body()
            .size_hint()
            .upper()
            .is_some_and(|upper| upper <= MAX_LOGGED_BODY as u64);
        if fits {
            let (parts, body) = request.into_parts();
            match body::to_bytes(body, MAX_LOGGED_BODY).await {
                Ok(bytes) => {
                    log_body(&bytes);
                    Request::from_parts(parts, Body::from(bytes))
                }
                Err(e) => {
                    warn!("Could not read request body for {path}: {e}");
                    Request::from_parts(parts, Body::empty())
                }
            }
        } else {
            warn!("Request body for {path} is too large or unsized, not logging it");
            request
        }
    } else {
        request
    };

    let response = next.run(request).await;
    let status = response.status();
    info!(
        "RESPONSE {} {} {path}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );

    if !options.response_body {
        return response;
    }

    let (parts, body) = response.into_parts();
    match body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            log_body(&bytes);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            warn!("Could not read response body for {path}: {e}");
            Response::from_parts(parts, Body::empty())
        }
    }
}
