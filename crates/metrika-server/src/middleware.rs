use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::response::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrika_common::codec::{self, GZIP};
use metrika_common::signature::HASH_HEADER;
use std::net::{IpAddr, SocketAddr};

/// Header a reverse proxy or agent sets to the originating address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Upper bound on request bodies buffered by the middleware stack.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Buffers a request body of at most [`MAX_BODY_BYTES`]. A longer body is
/// answered with 413 and the request goes no further.
pub(crate) async fn buffer_request_body(body: Body, trace_id: &str) -> Result<Bytes, Response> {
    to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        tracing::warn!(
            trace_id,
            limit = MAX_BODY_BYTES,
            error = %e,
            "Request rejected: body too large"
        );
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
    })
}

/// Buffers a response from the inner stack so it can be signed, compressed
/// or logged. A body that fails to stream becomes a bare 500.
pub(crate) async fn buffer_response(
    response: Response,
    trace_id: &str,
) -> Result<(Parts, Bytes), Response> {
    let (parts, body) = response.into_parts();
    match to_bytes(body, usize::MAX).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(e) => {
            tracing::error!(trace_id, error = %e, "Response body could not be read");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response())
        }
    }
}

fn trace_id(req: &Request) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `X-Real-IP` when present, else the socket peer.
fn client_ip(req: &Request) -> Option<IpAddr> {
    if let Some(raw) = header_str(req.headers(), REAL_IP_HEADER) {
        return raw.trim().parse().ok();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Rejects clients outside the configured CIDR with 403. Passes everything
/// through when no subnet is configured.
pub async fn trusted_subnet_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(subnet) = state.trusted_subnet else {
        return next.run(req).await;
    };

    match client_ip(&req) {
        Some(ip) if subnet.contains(ip) => next.run(req).await,
        client => {
            tracing::warn!(
                trace_id = %trace_id(&req),
                client = ?client,
                subnet = %subnet,
                "Request rejected: client outside trusted subnet"
            );
            (StatusCode::FORBIDDEN, "forbidden").into_response()
        }
    }
}

/// Verifies `HashSHA256` over the request body as received and signs the
/// response body as sent.
///
/// Requests without the header are accepted. A header that does not match
/// is answered with 400 and the request never reaches a handler.
pub async fn signature_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(signer) = state.signer.clone() else {
        return next.run(req).await;
    };
    let trace_id = trace_id(&req);

    let (parts, body) = req.into_parts();
    let body = match buffer_request_body(body, &trace_id).await {
        Ok(body) => body,
        Err(rejection) => return rejection,
    };

    if let Some(tag) = header_str(&parts.headers, HASH_HEADER).filter(|t| !t.is_empty()) {
        if !signer.verify(&body, tag) {
            tracing::warn!(trace_id = %trace_id, "Request rejected: hash mismatch");
            return (StatusCode::BAD_REQUEST, "hash mismatch").into_response();
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (mut parts, body) = match buffer_response(response, &trace_id).await {
        Ok(buffered) => buffered,
        Err(replacement) => return replacement,
    };
    match signer.sign(&body) {
        Ok(tag) => {
            if let Ok(value) = HeaderValue::from_str(&tag) {
                parts.headers.insert(HASH_HEADER, value);
            }
        }
        Err(e) => tracing::error!(trace_id = %trace_id, error = %e, "Response signing failed"),
    }
    Response::from_parts(parts, Body::from(body))
}

/// Decodes gzip request bodies, bounded by [`MAX_BODY_BYTES`] after
/// inflation, and compresses responses for clients that list gzip in
/// `Accept-Encoding`.
pub async fn gzip_middleware(req: Request, next: Next) -> Response {
    let accepts_gzip = header_str(req.headers(), header::ACCEPT_ENCODING.as_str())
        .map(codec::lists_gzip)
        .unwrap_or(false);
    let compressed = header_str(req.headers(), header::CONTENT_ENCODING.as_str())
        .map(codec::lists_gzip)
        .unwrap_or(false);

    let trace_id = trace_id(&req);
    let req = if compressed {
        let (mut parts, body) = req.into_parts();
        let body = match buffer_request_body(body, &trace_id).await {
            Ok(body) => body,
            Err(rejection) => return rejection,
        };
        let decoded = match codec::gunzip_prefix(&body, MAX_BODY_BYTES + 1) {
            Ok(decoded) if decoded.len() > MAX_BODY_BYTES => {
                tracing::warn!(trace_id = %trace_id, limit = MAX_BODY_BYTES, "Request rejected: inflated body too large");
                return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
            }
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Request rejected: invalid gzip body");
                return (StatusCode::BAD_REQUEST, "invalid gzip body").into_response();
            }
        };
        parts.headers.remove(header::CONTENT_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);
        Request::from_parts(parts, Body::from(decoded))
    } else {
        req
    };

    let response = next.run(req).await;
    if !accepts_gzip || response.headers().contains_key(header::CONTENT_ENCODING) {
        return response;
    }

    let (mut parts, body) = match buffer_response(response, &trace_id).await {
        Ok(buffered) => buffered,
        Err(replacement) => return replacement,
    };
    if body.is_empty() {
        return Response::from_parts(parts, Body::from(body));
    }
    match codec::gzip(&body) {
        Ok(encoded) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static(GZIP));
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(encoded))
        }
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Response compression failed, sending identity");
            Response::from_parts(parts, Body::from(body))
        }
    }
}
