use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Request ID carried through handlers as an extension.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

const MAX_ID_LEN: usize = 128;

fn incoming_id(headers: &HeaderMap) -> Option<String> {
    ["x-request-id", "x-correlation-id"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|s| !s.is_empty() && s.len() <= MAX_ID_LEN)
        .map(str::to_string)
}

/// Reuses `X-Request-Id` or `X-Correlation-ID` from the caller, otherwise
/// generates a UUID v4. The id is recorded on the request span and echoed
/// back in the `X-Request-Id` response header.
pub async fn request_id_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let id = incoming_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());

    tracing::Span::current().record("request_id", id.as_str());

    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(val) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", val);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_request_id_then_correlation_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-correlation-id", HeaderValue::from_static("corr-1"));
        assert_eq!(incoming_id(&headers).as_deref(), Some("corr-1"));

        headers.insert("x-request-id", HeaderValue::from_static("req-9"));
        assert_eq!(incoming_id(&headers).as_deref(), Some("req-9"));

        headers.insert("x-request-id", HeaderValue::from_static("  "));
        assert_eq!(incoming_id(&headers).as_deref(), Some("corr-1"));
    }

    #[test]
    fn test_absent_id() {
        assert!(incoming_id(&HeaderMap::new()).is_none());
    }
}
