//! Responses produced by the proxy itself.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

use crate::cache::CachedBody;

/// 403 for a URL or tunnel target on the block list.
pub fn blocked() -> Response<Body> {
    let mut response = Response::new(Body::from("Proxy Blocked"));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// 200 carrying cached content, streamed from disk when it is not held in
/// memory.
pub fn cached(content: CachedBody) -> Response<Body> {
    let length = HeaderValue::from(content.len());
    let mut response = Response::new(content.into_body());
    response.headers_mut().insert(header::CONTENT_LENGTH, length);
    response
}
