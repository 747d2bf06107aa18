use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Adds OWASP-recommended security headers to every response.
pub async fn security_headers_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    // The docs UI loads its own scripts and styles
    let is_docs = request.uri().path().starts_with("/swagger-ui")
        || request.uri().path().starts_with("/api-docs");

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("0"));
    if !is_docs {
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        );
    }
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    // Quotes and analyses must not be cached by intermediaries
    headers.insert("cache-control", HeaderValue::from_static("no-store"));

    // Only behind TLS termination
    if state.settings.enable_hsts {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, state_with};
    use crate::{build_router, Settings};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_api_responses_carry_csp_without_hsts() {
        let response = app().await.oneshot(get("/api/config")).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers["content-security-policy"], "default-src 'none'; frame-ancestors 'none'");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert!(!headers.contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn test_docs_skip_csp_and_hsts_is_opt_in() {
        let mut settings = Settings::for_testing();
        settings.enable_hsts = true;
        let app = build_router(state_with(settings).await);

        let response = app.oneshot(get("/api-docs/openapi.json")).await.unwrap();
        let headers = response.headers();
        assert!(!headers.contains_key("content-security-policy"));
        assert!(headers["strict-transport-security"].to_str().unwrap().starts_with("max-age="));
    }
}
