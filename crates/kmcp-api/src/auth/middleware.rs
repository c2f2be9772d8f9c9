//! axum middleware applying the authorization gate

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::auth::gate::{is_exempt, AuthGate};
use crate::context::extract_bearer_token;
use crate::error::AuthError;

/// Run the gate for every non-exempt request
///
/// On success the resolved [`CallerIdentity`](crate::context::CallerIdentity)
/// is stored in the request extensions for the [`CallContext`](crate::context::CallContext)
/// extractor.
pub async fn authorize_request(
    State(gate): State<Arc<AuthGate>>,
    mut req: Request,
    next: Next,
) -> Response {
    if is_exempt(req.uri().path()) || !gate.config().enabled {
        return next.run(req).await;
    }

    let token = extract_bearer_token(req.headers()).map(str::to_owned);
    match gate.authorize(token.as_deref()).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => {
            let remote = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            if matches!(e, AuthError::MissingToken) {
                info!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    remote = %remote,
                    reason = e.category(),
                    "Authentication failed"
                );
            } else {
                warn!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    remote = %remote,
                    reason = e.category(),
                    error = %e,
                    "Authentication failed"
                );
            }
            unauthorized(&gate, &e)
        }
    }
}

/// 401 response carrying the gate's challenge
pub fn unauthorized(gate: &AuthGate, error: &AuthError) -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, error.response_body()).into_response();
    match HeaderValue::from_str(&gate.config().challenge()) {
        Ok(value) => {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        Err(e) => warn!(error = %e, "Challenge is not a valid header value"),
    }
    response
}
