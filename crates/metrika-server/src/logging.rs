use crate::middleware::{buffer_request_body, buffer_response};
use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use metrika_common::codec;
use rand::Rng;
use std::time::Instant;

pub const TRACE_HEADER: &str = "X-Trace-Id";

/// Per-request trace id, stored in request extensions and echoed as the
/// `X-Trace-Id` response header.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// 16 hex chars.
    fn generate() -> Self {
        Self(format!("{:016x}", rand::thread_rng().gen::<u64>()))
    }
}

const MAX_BODY_LOG_CHARS: usize = 200;

/// `(type, name)` addressed by an `/update/..` or `/value/..` path.
fn metric_target(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.trim_start_matches('/').split('/');
    if !matches!(segments.next(), Some("update" | "value")) {
        return None;
    }
    let kind = segments.next().filter(|s| !s.is_empty())?;
    let name = segments.next().filter(|s| !s.is_empty())?;
    Some((kind, name))
}

/// Truncates to at most `max` bytes without splitting a character.
fn truncate_text(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return text.into_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Readable preview of a request body. Agent bodies arrive gzipped, so
/// they are inflated just far enough to fill the preview.
fn body_preview(headers: &HeaderMap, body: &[u8]) -> String {
    let gzipped = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(codec::lists_gzip);
    if !gzipped {
        return truncate_text(body, MAX_BODY_LOG_CHARS);
    }
    match codec::gunzip_prefix(body, MAX_BODY_LOG_CHARS + 4) {
        Ok(inflated) => truncate_text(&inflated, MAX_BODY_LOG_CHARS),
        Err(_) => "<undecodable gzip body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

/// Outermost layer. Assigns the trace id, logs the request line and the
/// addressed metric, buffers POST bodies (oversized ones end here with 413)
/// and logs the outcome. Error bodies are logged; success only by size.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = TraceId::generate();
    req.extensions_mut().insert(trace_id.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let (kind, name) = metric_target(&path).unwrap_or(("-", "-"));
    tracing::info!(
        trace_id = %trace_id.0,
        method = %method,
        path = %path,
        metric_type = kind,
        metric = name,
        "--> request"
    );

    let start = Instant::now();
    let response = if method == Method::POST {
        let (parts, body) = req.into_parts();
        match buffer_request_body(body, &trace_id.0).await {
            Ok(bytes) => {
                tracing::debug!(
                    trace_id = %trace_id.0,
                    size = bytes.len(),
                    body = %body_preview(&parts.headers, &bytes),
                    "request body"
                );
                next.run(Request::from_parts(parts, Body::from(bytes))).await
            }
            Err(rejection) => rejection,
        }
    } else {
        next.run(req).await
    };
    let elapsed = format_elapsed(start.elapsed().as_micros());

    let status = response.status();
    let mut response = if status.is_client_error() || status.is_server_error() {
        match buffer_response(response, &trace_id.0).await {
            Ok((parts, bytes)) => {
                let body = truncate_text(&bytes, MAX_BODY_LOG_CHARS);
                if status.is_server_error() {
                    tracing::error!(trace_id = %trace_id.0, status = status.as_u16(), elapsed = %elapsed, metric = name, body = %body, "<-- response");
                } else {
                    tracing::warn!(trace_id = %trace_id.0, status = status.as_u16(), elapsed = %elapsed, metric = name, body = %body, "<-- response");
                }
                Response::from_parts(parts, Body::from(bytes))
            }
            Err(replacement) => replacement,
        }
    } else {
        tracing::info!(
            trace_id = %trace_id.0,
            status = status.as_u16(),
            elapsed = %elapsed,
            size = ?response.body().size_hint().exact(),
            "<-- response"
        );
        response
    };

    if let Ok(val) = HeaderValue::from_str(&trace_id.0) {
        response.headers_mut().insert(TRACE_HEADER, val);
    }
    response
}
