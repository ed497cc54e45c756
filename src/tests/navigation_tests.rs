#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::Method;
    use serde_json::{json, Map, Value};
    use tempfile::TempDir;

    use crate::context::Services;
    use crate::fetcher::Fetcher;
    use crate::navigation::{read_payload, NavigationOutcome, Navigator, PageSession};
    use crate::resolver::{ResolveOptions, Resolver};
    use crate::router::{layout::ROOT_LAYOUT, Layout, Registry, RouteOptions};
    use crate::tests::support;
    use crate::types::PageSetup;

    fn registry(calls: Arc<AtomicUsize>) -> Registry {
        let search_calls = calls.clone();
        Registry::builder()
            .layout(Layout::new(ROOT_LAYOUT, |ctx| format!("<html><body>{}</body></html>", ctx.body)))
            .api(Some(Method::GET), "/api/slow", RouteOptions::new(), |_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(json!("slow"))
            })
            .api(Some(Method::GET), "/api/search", RouteOptions::new(), move |ctx| {
                let calls = search_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let q = ctx.raw_data.get("q").cloned().unwrap_or(Value::Null);
                    Ok(json!({ "q": q }))
                }
            })
            .api(Some(Method::GET), "/api/comments", RouteOptions::new(), |_| async {
                Ok(json!([{ "text": "erster" }]))
            })
            .page(
                "/slow",
                RouteOptions::new(),
                |_, _| Ok(PageSetup::new().data("slow", Fetcher::get("/api/slow"))),
                |_| Ok("slow".into()),
            )
            .page(
                "/search",
                RouteOptions::new(),
                |_, _| {
                    Ok(PageSetup::new()
                        .data("results", Fetcher::get("/api/search").param("q", "a").cached())
                        .data("comments", Fetcher::get("/api/comments").lazy()))
                },
                |r| Ok(format!("<p>{}</p>", r.page.data["results"]["q"])),
            )
            .view("/fast", RouteOptions::new(), |_| Ok("fast".into()))
            .view("/plain", RouteOptions::new().no_layout(), |_| Ok("plain".into()))
            .build()
            .unwrap()
    }

    struct Harness {
        _dir: TempDir,
        calls: Arc<AtomicUsize>,
        services: Arc<Services>,
        resolver: Arc<Resolver>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(registry(calls.clone()));
        let services = Arc::new(support::services(registry.clone(), dir.path()));
        Harness { _dir: dir, calls, services, resolver: Arc::new(Resolver::new(registry)) }
    }

    fn committed(outcome: NavigationOutcome) -> (crate::resolver::RenderedPage, bool) {
        match outcome {
            NavigationOutcome::Committed { page, remount_layout } => (*page, remount_layout),
            NavigationOutcome::Superseded { generation } => panic!("navigation {} was superseded", generation),
        }
    }

    #[tokio::test]
    async fn newer_navigation_supersedes_older_one() {
        let h = harness();
        let nav = Navigator::new(h.resolver.clone());

        let (first, second) = tokio::join!(nav.navigate(support::get(&h.services, "/slow")), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            nav.navigate(support::get(&h.services, "/fast")).await
        });

        assert!(matches!(first, NavigationOutcome::Superseded { generation: 1 }));
        let (page, _) = committed(second);
        assert_eq!(page.response.route, "fast");
        assert_eq!(nav.generation(), 2);
    }

    #[tokio::test]
    async fn layout_is_only_remounted_when_it_changes() {
        let h = harness();
        let nav = Navigator::new(h.resolver.clone());

        let (_, remount) = committed(nav.navigate(support::get(&h.services, "/fast")).await);
        assert!(remount);
        let (_, remount) = committed(nav.navigate(support::get(&h.services, "/search")).await);
        assert!(!remount);
        let (page, remount) = committed(nav.navigate(support::get(&h.services, "/plain")).await);
        assert!(remount);
        assert!(page.response.layout.is_none());
    }

    #[tokio::test]
    async fn hydration_reuses_the_server_payload() {
        let h = harness();
        let server = h.resolver.resolve(support::get(&h.services, "/search"), ResolveOptions::default()).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let payload = read_payload(&server.html).unwrap();
        assert_eq!(payload.data["results"]["q"], "a");
        assert_eq!(payload.lazy, vec!["comments".to_string()]);

        let nav = Navigator::new(h.resolver.clone());
        let (page, _) = committed(nav.hydrate(support::get(&h.services, "/search"), payload).await);
        assert_eq!(page.response.data["results"]["q"], "a");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(page.html, server.html);
    }

    #[tokio::test]
    async fn reload_patches_params_and_bypasses_the_cache() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/search"), ResolveOptions::default()).await;
        let session = PageSession::new(page.context, page.response);

        session.reload(Some(&["results"]), None).await.unwrap();
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);

        let mut params = Map::new();
        params.insert("q".into(), json!("b"));
        session.reload(Some(&["results"]), Some(params)).await.unwrap();
        assert_eq!(session.get("results"), Some(json!({ "q": "b" })));

        let snapshot = session.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.lazy, vec!["comments".to_string()]);
        assert!(!snapshot.data.contains_key("comments"));
    }

    #[tokio::test]
    async fn load_more_runs_pending_lazy_keys_once() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/search"), ResolveOptions::default()).await;
        let session = PageSession::new(page.context, page.response);

        session.load_more(&["comments"]).await.unwrap();
        assert_eq!(session.get("comments"), Some(json!([{ "text": "erster" }])));
        assert!(session.snapshot().lazy.is_empty());

        // Nothing pending any more: neither comments nor results are fetched again
        session.load_more(&["comments", "results"]).await.unwrap();
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_replaces_whole_keys() {
        let h = harness();
        let page = h.resolver.resolve(support::get(&h.services, "/search"), ResolveOptions::default()).await;
        let session = PageSession::new(page.context, page.response);

        let mut partial = Map::new();
        partial.insert("results".into(), json!({ "other": true }));
        session.set(partial);
        assert_eq!(session.get("results"), Some(json!({ "other": true })));
    }
}
