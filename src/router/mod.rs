//! Route registration and matching.
//!
//! - `pattern`: path templates with `:name` captures and a trailing `*`
//! - `table`: priority-ordered route table and the application [`Registry`]
//! - `layout`: page shells and their resolution order

pub mod layout;
pub mod pattern;
pub mod table;

pub use layout::{Layout, LayoutChoice, LayoutContext, LayoutRegistry};
pub use pattern::{Params, PathPattern};
pub use table::{
    ApiHandler, Controller, Registry, RegistryBuilder, RenderContext, Renderer, Route, RouteKind, RouteMatch,
    RouteOptions, RouteTable, RouteTarget,
};
