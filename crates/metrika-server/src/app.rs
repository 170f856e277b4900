use crate::state::AppState;
use crate::{api, logging, middleware as mw};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;

pub fn build_http_app(state: AppState) -> Router {
    with_middleware(api::routes(), state)
}

/// Wraps `routes` in the server's middleware stack. Outermost first:
/// request logging, trusted subnet, signature, gzip, panic recovery.
pub fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(mw::gzip_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::signature_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::trusted_subnet_middleware,
        ))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}
