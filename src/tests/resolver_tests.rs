#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::Method;
    use serde_json::{json, Map, Value};
    use tempfile::TempDir;

    use crate::context::Services;
    use crate::error::AppError;
    use crate::fetcher::{DataSource, Fetcher, FetcherMap};
    use crate::resolver::{Phase, ResolveOptions, Resolver};
    use crate::router::{layout::ROOT_LAYOUT, Layout, Registry, RouteOptions};
    use crate::services::auth::AuthRequirement;
    use crate::tests::support;
    use crate::types::PageSetup;

    #[derive(Default)]
    struct Calls {
        profile: AtomicUsize,
        comments: AtomicUsize,
    }

    fn registry(calls: Arc<Calls>) -> Registry {
        let profile_calls = calls.clone();
        let comment_calls = calls;
        Registry::builder()
            .layout(
                Layout::new(ROOT_LAYOUT, |ctx| format!("<html><body><div id=\"shell\">{}</div></body></html>", ctx.body))
                    .with_data(|_| FetcherMap::new().with("nav", json!(["layout"])).with("site", json!("Seitenwerk"))),
            )
            .api(Some(Method::GET), "/api/profile", RouteOptions::new(), move |_| {
                let calls = profile_calls.clone();
                async move {
                    calls.profile.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "name": "ada" }))
                }
            })
            .api(Some(Method::GET), "/api/posts", RouteOptions::new(), |_| async {
                Err(AppError::Http { status: 503, message: "posts backend down".into() })
            })
            .api(Some(Method::GET), "/api/comments", RouteOptions::new(), move |_| {
                let calls = comment_calls.clone();
                async move {
                    calls.comments.fetch_add(1, Ordering::SeqCst);
                    Ok(json!([]))
                }
            })
            .page(
                "/dashboard",
                RouteOptions::new(),
                |_, _| {
                    Ok(PageSetup::new()
                        .title("Dashboard")
                        .data("profile", Fetcher::get("/api/profile"))
                        .data("posts", Fetcher::get("/api/posts"))
                        .data("nav", json!(["route"])))
                },
                |r| Ok(format!("<p>{}</p>", r.page.data["profile"]["name"].as_str().unwrap_or("?"))),
            )
            .page(
                "/strict",
                RouteOptions::new(),
                |_, _| Ok(PageSetup::new().data("posts", Fetcher::get("/api/posts").required())),
                |_| Ok("unreachable".into()),
            )
            .page(
                "/thread",
                RouteOptions::new().no_layout(),
                |_, _| {
                    Ok(PageSetup::new()
                        .data("profile", Fetcher::get("/api/profile"))
                        .data("comments", Fetcher::get("/api/comments").lazy()))
                },
                |_| Ok("<p>thread</p>".into()),
            )
            .page(
                "/static",
                RouteOptions::new().no_layout(),
                |_, _| Ok(PageSetup::new()),
                |_| Ok("<p>static</p>".into()),
            )
            .page(
                "/deferred",
                RouteOptions::new().no_layout(),
                |_, _| Ok(PageSetup::new().data("answer", DataSource::deferred(async { Ok(json!(42)) }))),
                |r| Ok(format!("<p>{}</p>", r.page.data["answer"])),
            )
            .view("/admin", RouteOptions::new().auth(AuthRequirement::Role("admin".into())), |_| {
                Ok("<p>admin</p>".into())
            })
            .view("/broken", RouteOptions::new(), |_| Err(AppError::anomaly("template exploded")))
            .error_page(404, |r| Ok(format!("<h1>custom 404</h1><p>{}</p>", r.context.path)))
            .build()
            .unwrap()
    }

    struct Harness {
        _dir: TempDir,
        calls: Arc<Calls>,
        services: Arc<Services>,
        resolver: Resolver,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Calls::default());
        let registry = Arc::new(registry(calls.clone()));
        let services = Arc::new(support::services(registry.clone(), dir.path()));
        Harness { _dir: dir, calls, services, resolver: Resolver::new(registry) }
    }

    #[tokio::test]
    async fn failed_optional_fetcher_keeps_the_page() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/dashboard"), ResolveOptions::default()).await;

        assert!(page.error.is_none());
        assert_eq!(page.response.status, 200);
        assert_eq!(page.response.data["profile"]["name"], "ada");
        assert!(!page.response.data.contains_key("posts"));
        assert_eq!(page.response.failed, vec!["posts".to_string()]);
        assert!(!page.response.loading);
        assert_eq!(page.response.title.as_deref(), Some("Dashboard"));
        assert!(page.html.contains("<div id=\"shell\"><p>ada</p></div>"));

        let m = h.services.metrics.get_snapshot();
        assert_eq!(m.pages_resolved, 1);
        assert_eq!(m.fetchers_failed, 1);
    }

    #[tokio::test]
    async fn layout_data_is_merged_and_route_keys_win() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/dashboard"), ResolveOptions::default()).await;

        assert_eq!(page.response.data["site"], "Seitenwerk");
        assert_eq!(page.response.data["nav"], json!(["route"]));
        assert_eq!(page.response.layout.as_deref(), Some(ROOT_LAYOUT));
    }

    #[tokio::test]
    async fn failed_required_fetcher_renders_its_error_page() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/strict"), ResolveOptions::default()).await;

        assert_eq!(page.response.status, 503);
        assert_eq!(page.response.route, "error/503");
        assert_eq!(page.response.data["error"]["message"], "posts backend down");
        assert!(matches!(page.error, Some(AppError::Http { status: 503, .. })));
        assert!(page.html.contains("posts backend down"));
        assert!(page.html.contains("<div id=\"shell\">"));
        assert_eq!(h.services.metrics.get_snapshot().pages_failed, 1);
    }

    #[tokio::test]
    async fn lazy_fetchers_are_listed_but_not_run() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/thread"), ResolveOptions::default()).await;

        assert_eq!(page.response.lazy, vec!["comments".to_string()]);
        assert!(!page.response.data.contains_key("comments"));
        assert_eq!(h.calls.comments.load(Ordering::SeqCst), 0);
        assert_eq!(h.calls.profile.load(Ordering::SeqCst), 1);
        assert!(page.response.layout.is_none());
        assert!(page.html.starts_with("<p>thread</p>"));
    }

    #[tokio::test]
    async fn forced_lazy_keys_are_loaded() {
        let h = harness();
        let mut opts = ResolveOptions::default();
        opts.force.insert("comments".into());
        let page = h.resolver.resolve(support::get(&h.services, "/thread"), opts).await;

        assert!(page.response.lazy.is_empty());
        assert_eq!(page.response.data["comments"], json!([]));
        assert_eq!(h.calls.comments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hydrated_keys_are_not_fetched_again() {
        let h = harness();
        let mut hydrated = Map::new();
        hydrated.insert("profile".into(), json!({ "name": "from-server" }));
        let page = h
            .resolver
            .resolve(support::get(&h.services, "/thread"), ResolveOptions::hydrated(hydrated))
            .await;

        assert_eq!(page.response.data["profile"]["name"], "from-server");
        assert_eq!(h.calls.profile.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_fetcher_map_finishes_loaded() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/static"), ResolveOptions::default()).await;

        assert!(page.error.is_none());
        assert!(!page.response.loading);
        assert!(page.response.data.is_empty());
        assert_eq!(
            page.phases,
            vec![
                Phase::Matching,
                Phase::Authorizing,
                Phase::ControllerExec,
                Phase::Fetching,
                Phase::Merging,
                Phase::Rendering,
                Phase::Done
            ]
        );
    }

    #[tokio::test]
    async fn deferred_sources_resolve_like_fetchers() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/deferred"), ResolveOptions::default()).await;
        assert_eq!(page.response.data["answer"], 42);
        assert!(page.html.contains("<p>42</p>"));
    }

    #[tokio::test]
    async fn unknown_path_uses_the_registered_404_page() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/nowhere"), ResolveOptions::default()).await;

        assert_eq!(page.response.status, 404);
        assert_eq!(page.response.route, "error/404");
        assert!(page.html.contains("<h1>custom 404</h1><p>/nowhere</p>"));
        assert!(page.html.contains("<script id=\"__data\""));
        assert_eq!(page.phases, vec![Phase::Matching, Phase::Error, Phase::Done]);
    }

    #[tokio::test]
    async fn auth_failures_map_to_401_and_403() {
        let h = harness();

        let page = h.resolver.resolve(support::get(&h.services, "/admin"), ResolveOptions::default()).await;
        assert_eq!(page.response.status, 401);
        assert_eq!(page.response.route, "error/401");
        assert_eq!(page.phases, vec![Phase::Matching, Phase::Authorizing, Phase::Error, Phase::Done]);

        let ctx = support::get(&h.services, "/admin").with_user(Some(support::user("ada", &[])));
        let page = h.resolver.resolve(ctx, ResolveOptions::default()).await;
        assert_eq!(page.response.status, 403);

        let ctx = support::get(&h.services, "/admin").with_user(Some(support::user("grace", &["admin"])));
        let page = h.resolver.resolve(ctx, ResolveOptions::default()).await;
        assert_eq!(page.response.status, 200);
        assert_eq!(page.context.user.as_ref().map(|u| u.name.as_str()), Some("grace"));
    }

    #[tokio::test]
    async fn renderer_anomaly_hides_its_detail() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/broken"), ResolveOptions::default()).await;

        assert_eq!(page.response.status, 500);
        assert_eq!(page.response.data["error"]["code"], "ANOMALY");
        assert!(!page.html.contains("template exploded"));
        assert_eq!(page.phases.last(), Some(&Phase::Done));
        assert!(page.phases.contains(&Phase::Rendering));
    }

    #[tokio::test]
    async fn api_paths_are_not_pages() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/api/profile"), ResolveOptions::default()).await;
        assert_eq!(page.response.status, 404);
        assert_eq!(h.calls.profile.load(Ordering::SeqCst), 0);
        assert_eq!(page.response.data["error"]["code"], Value::from("NOT_FOUND"));
    }
}
