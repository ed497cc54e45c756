use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::layout::{Layout, LayoutChoice, LayoutRegistry};
use super::pattern::{split_path, Params, PathPattern};
use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::services::auth::AuthRequirement;
use crate::types::{PageResponse, PageSetup};

pub struct RenderContext<'a> {
    pub page: &'a PageResponse,
    pub context: &'a RequestContext,
}

pub type Controller = Arc<dyn Fn(&Params, &RequestContext) -> AppResult<PageSetup> + Send + Sync>;
pub type Renderer = Arc<dyn Fn(&RenderContext<'_>) -> AppResult<String> + Send + Sync>;
pub type ApiHandler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, AppResult<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum RouteTarget {
    Page { controller: Option<Controller>, renderer: Renderer },
    Api(ApiHandler),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Page,
    Api,
}

/// Recognized route options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Folder-style id used for layout lookup; derived from the path when unset.
    pub id: Option<String>,
    pub layout: LayoutChoice,
    pub auth: AuthRequirement,
    /// Higher values are tried first.
    pub priority: i32,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn layout(mut self, name: impl Into<String>) -> Self {
        self.layout = LayoutChoice::Named(name.into());
        self
    }

    pub fn no_layout(mut self) -> Self {
        self.layout = LayoutChoice::None;
        self
    }

    pub fn auth(mut self, auth: AuthRequirement) -> Self {
        self.auth = auth;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

pub struct Route {
    pub id: String,
    pub path: String,
    /// Empty means every method.
    pub methods: Vec<Method>,
    pub options: RouteOptions,
    pub target: RouteTarget,
    pattern: PathPattern,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("kind", &self.kind())
            .field("priority", &self.options.priority)
            .finish()
    }
}

impl Route {
    pub fn kind(&self) -> RouteKind {
        match self.target {
            RouteTarget::Page { .. } => RouteKind::Page,
            RouteTarget::Api(_) => RouteKind::Api,
        }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method) || (*method == Method::HEAD && self.methods.contains(&Method::GET))
    }
}

/// `/user/:id` becomes `user/id`, `/` becomes `index`.
fn derive_id(path: &str) -> String {
    let parts: Vec<&str> = split_path(path).into_iter().map(|s| s.trim_start_matches(':')).collect();
    if parts.is_empty() {
        "index".to_string()
    } else {
        parts.join("/")
    }
}

#[derive(Debug)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: Params,
}

/// Routes ordered by descending priority, registration order within a priority.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn register(&mut self, route: Route) {
        // Insert after every route of equal or higher priority to keep the order stable
        let pos = self.routes.partition_point(|r| r.options.priority >= route.options.priority);
        self.routes.insert(pos, Arc::new(route));
    }

    /// First route of `kind` whose pattern and method both match.
    pub fn resolve(&self, method: &Method, path: &str, kind: RouteKind) -> AppResult<RouteMatch> {
        self.routes
            .iter()
            .filter(|r| r.kind() == kind && r.accepts(method))
            .find_map(|r| r.pattern.matches(path).map(|params| RouteMatch { route: r.clone(), params }))
            .ok_or_else(|| AppError::NotFound(format!("No route matches {} {}", method, path)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The route table, layouts and error pages of one application.
///
/// Built once through [`RegistryBuilder`] and read-only afterwards, so it is
/// shared behind an `Arc` without locking.
pub struct Registry {
    routes: RouteTable,
    layouts: LayoutRegistry,
    error_pages: HashMap<u16, Renderer>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn layouts(&self) -> &LayoutRegistry {
        &self.layouts
    }

    pub fn error_page(&self, status: u16) -> Option<Renderer> {
        self.error_pages.get(&status).cloned()
    }

    /// Ends the registry lifecycle.
    pub fn shutdown(self) {
        tracing::info!(
            routes = self.routes.len(),
            layouts = self.layouts.len(),
            error_pages = self.error_pages.len(),
            "Route registry shut down"
        );
    }
}

/// Collects registrations; template errors surface from [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    routes: RouteTable,
    layouts: LayoutRegistry,
    error_pages: HashMap<u16, Renderer>,
    errors: Vec<AppError>,
}

impl RegistryBuilder {
    fn add(&mut self, path: &str, methods: Vec<Method>, options: RouteOptions, target: RouteTarget) {
        match PathPattern::compile(path) {
            Ok(pattern) => {
                let id = options.id.clone().unwrap_or_else(|| derive_id(path));
                self.routes.register(Route { id, path: path.to_string(), methods, options, target, pattern });
            }
            Err(e) => self.errors.push(e),
        }
    }

    /// A page route answering `GET`.
    pub fn page<C, R>(mut self, path: &str, options: RouteOptions, controller: C, renderer: R) -> Self
    where
        C: Fn(&Params, &RequestContext) -> AppResult<PageSetup> + Send + Sync + 'static,
        R: Fn(&RenderContext<'_>) -> AppResult<String> + Send + Sync + 'static,
    {
        let target = RouteTarget::Page { controller: Some(Arc::new(controller)), renderer: Arc::new(renderer) };
        self.add(path, vec![Method::GET], options, target);
        self
    }

    /// A page route without data.
    pub fn view<R>(mut self, path: &str, options: RouteOptions, renderer: R) -> Self
    where
        R: Fn(&RenderContext<'_>) -> AppResult<String> + Send + Sync + 'static,
    {
        let target = RouteTarget::Page { controller: None, renderer: Arc::new(renderer) };
        self.add(path, vec![Method::GET], options, target);
        self
    }

    /// A JSON API route. `method: None` accepts every method.
    pub fn api<F, Fut>(mut self, method: Option<Method>, path: &str, options: RouteOptions, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Value>> + Send + 'static,
    {
        let handler: ApiHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.add(path, method.into_iter().collect(), options, RouteTarget::Api(handler));
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layouts.insert(layout);
        self
    }

    pub fn error_page<R>(mut self, status: u16, renderer: R) -> Self
    where
        R: Fn(&RenderContext<'_>) -> AppResult<String> + Send + Sync + 'static,
    {
        self.error_pages.insert(status, Arc::new(renderer));
        self
    }

    pub fn build(self) -> AppResult<Registry> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(first);
        }
        tracing::info!(routes = self.routes.len(), layouts = self.layouts.len(), "Route registry ready");
        Ok(Registry { routes: self.routes, layouts: self.layouts, error_pages: self.error_pages })
    }
}
