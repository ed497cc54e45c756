use axum::{
    extract::Request,
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound for request bodies, `SEITENWERK_MAX_BODY_SIZE` clamped to 1..50 MiB.
pub fn max_body_size() -> usize {
    std::env::var("SEITENWERK_MAX_BODY_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE)
        .clamp(1024 * 1024, 50 * 1024 * 1024)
}

/// Rejects path traversal attempts and oversized bodies before routing.
///
/// Suspicious user agents are only logged.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        tracing::warn!(path = %sanitize_for_logging(uri_path), "Rejected path traversal attempt");
        return AppError::InputError("Path traversal detected in request".into()).into_response();
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        let length = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok());
        let limit = max_body_size();
        if let Some(length) = length.filter(|l| *l > limit) {
            tracing::warn!(length, limit, "Rejected oversized request body");
            return AppError::Http {
                status: 413,
                message: format!("Request body exceeds maximum size of {} bytes", limit),
            }
            .into_response();
        }
    }

    next.run(req).await
}

/// Detects `..` segments, their encoded variants and null bytes.
pub fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") || path.contains("....") {
        return true;
    }

    // single and double encoded dot sequences, encoded null byte
    const ENCODED: &[&str] = &[
        "%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%2e\\", "%2e%5c", "%5c%2e", "%5c%5c", "%00",
    ];
    ENCODED.iter().any(|p| lower.contains(p)) || path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua = ua.to_lowercase();
    ua.contains("scanner")
        || (ua.contains("crawler") && !ua.contains("googlebot") && !ua.contains("bingbot"))
        || ["nikto", "sqlmap", "havij", "acunetix"].iter().any(|s| ua.contains(s))
}

/// Strips control characters, escapes quotes and caps the length at 200 chars.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}
