//! Operator HTTP API.
//!
//! Two authenticated POST endpoints that forward market calls to the
//! shared sequencer, plus a health probe. Every request is tagged with a
//! UUID correlation id. CORS is permissive.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::any::Any;
use std::net::SocketAddr;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use routes::{AppState, Envelope, Info, RequestId};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    with_middleware(
        Router::new()
            .route("/initializeMarket", post(routes::initialize_market))
            .route("/resolveMarket", post(routes::resolve_market))
            .route("/health", get(routes::health)),
    )
    .with_state(state)
}

/// Panics become bare 500s inside `request_context`, which then wraps
/// them in the envelope with the request id.
fn with_middleware<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(request_context))
        .layer(CorsLayer::permissive())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn is_json(resp: &Response) -> bool {
    resp.headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API address {addr}"))?;
    info!(%addr, "Operator API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Operator API server error")?;

    info!("Operator API stopped");
    Ok(())
}

/// Assign a request id, log the request inside its span and echo the id
/// back in `x-request-id`. Any 500 that is not already an envelope
/// (extractor rejections, caught panics) is replaced by one.
async fn request_context(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!("request", request_id = %request_id, %method, %path);
    async move {
        let started = Instant::now();
        info!("Request started");

        let mut resp = next.run(req).await;
        let status = resp.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR && !is_json(&resp) {
            error!("Unhandled server error");
            resp = internal_error(&request_id);
        }

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            resp.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        info!(
            status = resp.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        resp
    }
    .instrument(span)
    .await
}

fn internal_error(request_id: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Envelope {
            info: Info {
                success: false,
                response: "Internal Server Error".to_string(),
            },
            request_id: request_id.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
