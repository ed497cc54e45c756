//! Middleware and request helpers.
//!
//! Security headers, request validation, client IP detection and session
//! token extraction. Layered onto the axum router in `main`.

pub mod ip;
pub mod security_headers;
pub mod session;
pub mod validation;
