use axum::http::HeaderMap;

/// Convert headers from reqwest Response to axum HeaderMap
/// Filters out hop-by-hop headers that shouldn't be forwarded
pub fn preserve_response_headers(reqwest_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in reqwest_headers.iter() {
        // Skip hop-by-hop headers that shouldn't be forwarded
        let name_str = name.as_str().to_lowercase();
        if should_forward_header(&name_str) {
            headers.append(name.clone(), value.clone());
        }
    }

    headers
}

/// Determine if a header should be forwarded from backend to client
fn should_forward_header(name: &str) -> bool {
    // List of headers that should NOT be forwarded (hop-by-hop headers)
    !matches!(
        name,
        "connection" |
        "keep-alive" |
        "proxy-authenticate" |
        "proxy-authorization" |
        "te" |
        "trailers" |
        "transfer-encoding" |
        "upgrade" |
        "content-encoding" | // Let axum/hyper handle encoding
        "host" // Should not forward the backend's host header
    )
}

/// Header names for W3C Trace Context (OpenTelemetry) propagation
pub const TRACE_HEADER_NAMES: &[&str] = &["traceparent", "tracestate", "baggage"];

/// Headers correlating a client request with the backend call
pub const REQUEST_ID_HEADER_NAMES: &[&str] = &["x-request-id"];

/// Propagate trace context and request id headers to the backend request
pub fn propagate_request_headers(
    request: reqwest::RequestBuilder,
    headers: Option<&HeaderMap>,
) -> reqwest::RequestBuilder {
    let request = propagate_headers(request, headers, TRACE_HEADER_NAMES);
    propagate_headers(request, headers, REQUEST_ID_HEADER_NAMES)
}

/// Propagate specific headers from incoming request to outgoing reqwest RequestBuilder
///
/// Only headers whose names match the provided list (case-insensitive) are propagated.
pub fn propagate_headers(
    mut request: reqwest::RequestBuilder,
    headers: Option<&HeaderMap>,
    header_names: &[&str],
) -> reqwest::RequestBuilder {
    if let Some(h) = headers {
        for (k, v) in h.iter() {
            if header_names
                .iter()
                .any(|&name| k.as_str().eq_ignore_ascii_case(name))
            {
                request = request.header(k, v);
            }
        }
    }
    request
}
