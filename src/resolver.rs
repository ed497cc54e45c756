//! The page resolution state machine.
//!
//! ```text
//! MATCHING -> AUTHORIZING -> CONTROLLER_EXEC -> FETCHING -> MERGING -> RENDERING -> DONE
//!     \____________\_______________\_______________\___________\___________\--> ERROR -> DONE
//! ```
//!
//! Server and client run the same machine. The server starts with an empty
//! hydrated set and blocks on FETCHING; the client passes the data embedded in
//! the server payload, so FETCHING only covers keys the server did not resolve.
//! Errors never escape: every kind is rendered through its error page with the
//! same layout rules as regular routes.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::AppError;
use crate::fetcher::{run_batch, FetcherMap};
use crate::router::{Layout, LayoutChoice, Registry, RenderContext, Renderer, RouteKind, RouteTarget};
use crate::types::{PageResponse, PageSetup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Matching,
    Authorizing,
    ControllerExec,
    Fetching,
    Merging,
    Rendering,
    Error,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Data already present (hydration payload or a previous render). These
    /// keys are not fetched again and win over fresh results.
    pub hydrated: Map<String, Value>,
    /// Lazy keys to load in this pass anyway.
    pub force: HashSet<String>,
}

impl ResolveOptions {
    pub fn hydrated(data: Map<String, Value>) -> Self {
        Self { hydrated: data, force: HashSet::new() }
    }
}

pub struct RenderedPage {
    pub context: RequestContext,
    pub response: PageResponse,
    pub html: String,
    pub phases: Vec<Phase>,
    /// Set when the page is an error page.
    pub error: Option<AppError>,
}

struct PhaseLog {
    request_id: Uuid,
    phases: Vec<Phase>,
}

impl PhaseLog {
    fn new(request_id: Uuid) -> Self {
        Self { request_id, phases: Vec::with_capacity(8) }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(request_id = %self.request_id, ?phase, "resolver phase");
        self.phases.push(phase);
    }
}

/// Result of one fetch batch, in key order.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub values: Vec<(String, Value)>,
    pub lazy: Vec<String>,
    pub failed: Vec<String>,
    /// First failing required key, by key order.
    pub required_error: Option<AppError>,
}

/// Runs every non-lazy entry of `fetchers` not already present in `skip`.
///
/// Each failure is logged once and recorded; siblings always run to completion.
pub async fn fetch_all(
    fetchers: &FetcherMap,
    skip: &Map<String, Value>,
    force: &HashSet<String>,
    ctx: &RequestContext,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    let mut immediate = Vec::new();

    for (key, source) in fetchers.iter() {
        if skip.contains_key(key) {
            continue;
        }
        if source.is_lazy() && !force.contains(key) {
            outcome.lazy.push(key.to_string());
            continue;
        }
        immediate.push((key.to_string(), source.clone()));
    }

    let required: HashSet<String> =
        immediate.iter().filter(|(_, s)| s.is_required()).map(|(k, _)| k.clone()).collect();

    for (key, result) in run_batch(immediate, ctx).await {
        match result {
            Ok(value) => outcome.values.push((key, value)),
            Err(e) => {
                tracing::warn!(request_id = %ctx.id, key = %key, error = %e, "fetcher failed");
                ctx.services.metrics.inc_fetchers_failed();
                if !e.is_expected() {
                    ctx.services.reporter.report(&e, Some(ctx));
                }
                if required.contains(&key) {
                    if outcome.required_error.is_none() {
                        outcome.required_error = Some(e);
                    }
                } else {
                    outcome.failed.push(key);
                }
            }
        }
    }

    outcome
}

/// Fresh values fill the gaps; keys already in `existing` are kept.
pub fn merge_data(existing: &Map<String, Value>, fresh: Vec<(String, Value)>) -> Map<String, Value> {
    let mut data = existing.clone();
    for (k, v) in fresh {
        data.entry(k).or_insert(v);
    }
    data
}

/// Embeds the serialized page as the hydration payload before `</body>`.
pub fn inject_payload(html: &str, page: &PageResponse) -> String {
    let json = match serde_json::to_string(page) {
        Ok(json) => json.replace("</", "<\\/"),
        Err(e) => {
            tracing::warn!("Failed to serialize hydration payload: {}", e);
            return html.to_string();
        }
    };
    let script = format!("<script id=\"__data\" type=\"application/json\">{}</script>", json);
    match html.rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], script, &html[pos..]),
        None => format!("{}{}", html, script),
    }
}

fn default_error_body(page: &PageResponse) -> String {
    let message = page
        .data
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Error");
    format!(
        "<main class=\"error\"><h1>{}</h1><p>{}</p></main>",
        page.status,
        crate::content::html::escape(message)
    )
}

fn error_title(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Authentication required",
        403 => "Access denied",
        404 => "Page not found",
        _ => "Unexpected error",
    }
}

pub struct Resolver {
    registry: Arc<Registry>,
}

type Failure = Box<(RequestContext, AppError)>;

impl Resolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolves `ctx` to a rendered page. Never fails: errors become error pages.
    pub async fn resolve(&self, ctx: RequestContext, opts: ResolveOptions) -> RenderedPage {
        let mut log = PhaseLog::new(ctx.id);
        let metrics = ctx.services.metrics.clone();
        match self.run(ctx, &opts, &mut log).await {
            Ok(page) => {
                metrics.inc_pages_resolved();
                page
            }
            Err(failure) => {
                metrics.inc_pages_failed();
                let (ctx, error) = *failure;
                self.render_error(ctx, error, log)
            }
        }
    }

    /// Renders the error page for a request that failed before resolution
    /// started, e.g. on an unreadable body or a failed session lookup.
    pub fn fail(&self, ctx: RequestContext, error: AppError) -> RenderedPage {
        ctx.services.metrics.inc_pages_failed();
        let log = PhaseLog::new(ctx.id);
        self.render_error(ctx, error, log)
    }

    async fn run(&self, ctx: RequestContext, opts: &ResolveOptions, log: &mut PhaseLog) -> Result<RenderedPage, Failure> {
        log.enter(Phase::Matching);
        let matched = match self.registry.routes().resolve(&ctx.method, &ctx.path, RouteKind::Page) {
            Ok(m) => m,
            Err(e) => return Err(Box::new((ctx, e))),
        };
        let route = matched.route.clone();
        let (controller, renderer) = match &route.target {
            RouteTarget::Page { controller, renderer } => (controller.clone(), renderer.clone()),
            RouteTarget::Api(_) => {
                let e = AppError::anomaly(format!("API route {} reached the page resolver", route.id));
                return Err(Box::new((ctx, e)));
            }
        };

        log.enter(Phase::Authorizing);
        let user = match ctx.services.auth.check(&ctx, &route.options.auth).await {
            Ok(user) => user,
            Err(e) => return Err(Box::new((ctx, e))),
        };
        let ctx = ctx.with_user(user).with_params(matched.params.clone());

        log.enter(Phase::ControllerExec);
        let setup = match &controller {
            Some(controller) => match controller(&matched.params, &ctx) {
                Ok(setup) => setup,
                Err(e) => return Err(Box::new((ctx, e))),
            },
            None => PageSetup::default(),
        };
        let layout = self.registry.layouts().resolve(&route.id, &route.options.layout);
        let mut fetchers = layout
            .as_ref()
            .and_then(|l| l.data_provider.as_ref())
            .map(|provider| provider(&ctx))
            .unwrap_or_default();
        fetchers.extend(setup.fetchers);

        log.enter(Phase::Fetching);
        let outcome = fetch_all(&fetchers, &opts.hydrated, &opts.force, &ctx).await;
        if let Some(e) = outcome.required_error {
            return Err(Box::new((ctx, e)));
        }

        log.enter(Phase::Merging);
        let mut response = PageResponse {
            route: route.id.clone(),
            path: ctx.path.clone(),
            params: ctx.params.clone(),
            status: 200,
            data: merge_data(&opts.hydrated, outcome.values),
            fetchers,
            lazy: outcome.lazy,
            failed: outcome.failed,
            loading: false,
            layout: layout.as_ref().map(|l| l.path.clone()),
            ..Default::default()
        };
        response.apply_meta(setup.meta);

        log.enter(Phase::Rendering);
        let html = match render_page(&renderer, layout.as_deref(), &response, &ctx) {
            Ok(html) => html,
            Err(e) => return Err(Box::new((ctx, e))),
        };

        log.enter(Phase::Done);
        Ok(RenderedPage { context: ctx, response, html, phases: log.phases.clone(), error: None })
    }

    fn render_error(&self, ctx: RequestContext, error: AppError, mut log: PhaseLog) -> RenderedPage {
        log.enter(Phase::Error);
        if error.is_expected() {
            tracing::info!(request_id = %ctx.id, path = %ctx.path, error = %error, "rendering error page");
        } else {
            ctx.services.reporter.report(&error, Some(&ctx));
        }

        let status = error.status().as_u16();
        let route_id = format!("error/{}", status);
        let layout = self.registry.layouts().resolve(&route_id, &LayoutChoice::Auto);

        let mut data = Map::new();
        data.insert("error".to_string(), error.to_json());
        let response = PageResponse {
            route: route_id,
            path: ctx.path.clone(),
            params: ctx.params.clone(),
            status,
            data,
            loading: false,
            title: Some(error_title(status).to_string()),
            layout: layout.as_ref().map(|l| l.path.clone()),
            ..Default::default()
        };

        let html = match self.registry.error_page(status) {
            Some(renderer) => render_page(&renderer, layout.as_deref(), &response, &ctx).unwrap_or_else(|e| {
                tracing::error!(status, "Error page renderer failed: {}", e);
                inject_payload(&default_error_body(&response), &response)
            }),
            None => {
                let body = default_error_body(&response);
                let html = match layout.as_deref() {
                    Some(layout) => layout.render(&response, &body),
                    None => body,
                };
                inject_payload(&html, &response)
            }
        };

        log.enter(Phase::Done);
        RenderedPage { context: ctx, response, html, phases: log.phases, error: Some(error) }
    }
}

fn render_page(
    renderer: &Renderer,
    layout: Option<&Layout>,
    response: &PageResponse,
    ctx: &RequestContext,
) -> Result<String, AppError> {
    let body = renderer(&RenderContext { page: response, context: ctx })?;
    let html = match layout {
        Some(layout) => layout.render(response, &body),
        None => body,
    };
    Ok(inject_payload(&html, response))
}
