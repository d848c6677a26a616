//! Server-sent event framing.

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::Response,
};
use serde_json::json;

/// One `data:` frame carrying already-encoded JSON.
pub fn data_frame(json: &str) -> String {
    format!("data: {json}\n\n")
}

/// The frame that ends a failed stream.
pub fn error_frame(message: &str) -> String {
    data_frame(&json!({ "error": message }).to_string())
}

/// Wrap a frame body with the headers proxies need to pass events through
/// without buffering.
pub fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame_escapes_message() {
        assert_eq!(
            error_frame(r#"bad "quote""#),
            "data: {\"error\":\"bad \\\"quote\\\"\"}\n\n"
        );
    }

    #[test]
    fn test_headers() {
        let resp = build_sse_response(Body::empty());
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");
    }
}
