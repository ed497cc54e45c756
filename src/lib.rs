//! # Seitenwerk
//!
//! Isomorphic page routing and data resolution for axum, plus a rich text
//! pipeline for Lexical documents.
//!
//! A request is matched against a priority-ordered route table, authorized,
//! handed to the route's controller (which returns a map of deferred data
//! sources), resolved concurrently, merged with any hydrated data, and rendered
//! inside its layout. Failures of any kind end on the matching error page. The
//! same machine runs on the client side through [`navigation::Navigator`],
//! which only fetches what the server payload did not already carry.
//!
//! ## Core Components
//!
//! - [`router`]: path patterns, route table, layouts and the [`router::Registry`]
//! - [`fetcher`]: deferred API calls, data sources and the fetch cache
//! - [`transport`]: in-process and HTTP execution of fetchers
//! - [`resolver`]: the page state machine
//! - [`navigation`]: client navigation generations and live page state
//! - [`content`]: Lexical tree walk, attachments, skeleton, text and HTML output
//! - [`services`]: auth, disk, schema validation and error reporting collaborators
//! - [`config`], [`error`], [`metrics`], [`db`], [`state`]: the ambient stack
//! - [`middleware`], [`routes`]: the HTTP surface

pub mod config;
pub mod content;
pub mod context;
pub mod db;
pub mod demo;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod middleware;
pub mod navigation;
pub mod resolver;
pub mod router;
pub mod routes;
pub mod services;
pub mod state;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;
