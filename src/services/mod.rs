//! Collaborator interfaces the core depends on, with the default
//! implementations the binary wires up.
//!
//! - `auth`: session lookup and route requirement checks
//! - `disk`: bucketed file storage for attachments
//! - `schema`: request data validation
//! - `reporter`: out-of-band anomaly reporting

pub mod auth;
pub mod disk;
pub mod reporter;
pub mod schema;
