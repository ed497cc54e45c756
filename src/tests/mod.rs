//! Integration and unit tests for Seitenwerk.
//!
//! ## Test Modules
//!
//! - **support**: shared fixtures (services over a temporary disk, a demo user)
//! - **resolver_tests**: the page state machine, fetch failures and error pages
//! - **navigation_tests**: navigation generations, hydration and live page state
//! - **content_tests**: rich text rendering, attachments and the skeleton
//! - **router_props**: property tests for route priority ordering
//! - **api_tests**: the HTTP surface, end to end through the axum router
//! - **error_tests**: error kinds, statuses and their JSON form
//! - **config_tests**: configuration loading and validation
//! - **db_tests**: user and session storage
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! cargo test resolver_tests
//! ```

pub mod support;

pub mod api_tests;
pub mod navigation_tests;
pub mod resolver_tests;
