#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::{NamedTempFile, TempDir};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::navigation::read_payload;
    use crate::state::AppState;
    use crate::tests::support::{self, ADMIN_TOKEN, USER_TOKEN};
    use crate::{db, demo, routes};

    async fn memory_pool() -> sqlx::SqlitePool {
        SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap()
    }

    /// Demo application with static tokens and a temporary disk.
    async fn setup_test_app() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(demo::registry().unwrap());
        let services = support::services(registry.clone(), dir.path());
        let state = AppState::with_services(memory_pool().await, AppConfig::default(), registry, services);
        (dir, state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_and_readyz() {
        let (_dir, state) = setup_test_app().await;
        let (status, body) = send(routes::router(state.clone()), get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, body) = send(routes::router(state), get("/readyz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let (_dir, state) = setup_test_app().await;
        let (status, body) = send(routes::router(state), get("/version")).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["name"], "seitenwerk");
    }

    #[tokio::test]
    async fn test_home_page_embeds_payload() {
        let (_dir, state) = setup_test_app().await;
        let (status, body) = send(routes::router(state.clone()), get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<h1>Beiträge</h1>"));
        assert!(body.contains("Hallo Welt"));
        let payload = read_payload(&body).unwrap();
        assert_eq!(payload.route, "index");
        assert_eq!(payload.data["posts"].as_array().map(Vec::len), Some(2));

        let m = state.metrics.get_snapshot();
        assert_eq!(m.pages_resolved, 1);
        assert!(m.fetchers_executed >= 1);
    }

    #[tokio::test]
    async fn test_page_as_json() {
        let (_dir, state) = setup_test_app().await;
        let request = Request::builder()
            .uri("/posts/2")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(routes::router(state), request).await;

        assert_eq!(status, StatusCode::OK);
        let page: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(page["route"], "posts/id");
        assert_eq!(page["params"]["id"], "2");
        assert_eq!(page["data"]["post"]["title"], "Isomorphes Routing");
        assert_eq!(page["lazy"], json!(["comments"]));
        assert!(page.get("fetchers").is_none());
    }

    #[tokio::test]
    async fn test_missing_required_data_renders_404_page() {
        let (_dir, state) = setup_test_app().await;
        let (status, body) = send(routes::router(state), get("/posts/99")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Nicht gefunden"));
        assert_eq!(read_payload(&body).unwrap().route, "error/404");
    }

    #[tokio::test]
    async fn test_unknown_page_is_404() {
        let (_dir, state) = setup_test_app().await;
        let (status, body) = send(routes::router(state), get("/gibt/es/nicht")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("/gibt/es/nicht"));
    }

    #[tokio::test]
    async fn test_api_routes_answer_json() {
        let (_dir, state) = setup_test_app().await;
        let (status, body) = send(routes::router(state.clone()), get("/api/posts/1")).await;
        assert_eq!(status, StatusCode::OK);
        let post: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(post["title"], "Hallo Welt");

        let (status, body) = send(routes::router(state), get("/api/posts/99")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "NOT_FOUND");
        assert_eq!(err["status"], 404);
    }

    #[tokio::test]
    async fn test_role_protected_page() {
        let (_dir, state) = setup_test_app().await;
        let (status, _) = send(routes::router(state.clone()), get("/admin")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let as_user = Request::builder()
            .uri("/admin")
            .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(routes::router(state.clone()), as_user).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let as_admin = Request::builder()
            .uri("/admin")
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(routes::router(state), as_admin).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Hallo grace"));
        assert!(body.contains("<li>Benutzer</li>"));
    }

    #[tokio::test]
    async fn test_guest_page_rejects_sessions() {
        let (_dir, state) = setup_test_app().await;
        let (status, _) = send(routes::router(state.clone()), get("/login")).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder()
            .uri("/login")
            .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(routes::router(state), request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_content_render_endpoint() {
        let (_dir, state) = setup_test_app().await;
        let content = json!({ "root": { "type": "root", "children": [
            { "type": "heading", "tag": "h1", "children": [{ "type": "text", "text": "Über uns" }] },
            { "type": "paragraph", "children": [{ "type": "text", "text": "Hallo" }] }
        ] } });
        let request = Request::builder()
            .method("POST")
            .uri("/api/content/render")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
            .body(Body::from(json!({ "content": content, "format": "text" }).to_string()))
            .unwrap();
        let (status, body) = send(routes::router(state), request).await;

        assert_eq!(status, StatusCode::OK, "{}", body);
        let out: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(out["output"], "Über uns\nHallo");
        assert_eq!(out["skeleton"][0]["anchor"], "ueber-uns");
        assert_eq!(out["attachements"], json!([]));
    }

    #[tokio::test]
    async fn test_uploaded_attachment_is_served() {
        let (_dir, state) = setup_test_app().await;
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRserved";
        let src = format!("data:image/png;base64,{}", STANDARD.encode(png));
        let content = json!({ "root": { "type": "root", "children": [{ "type": "image", "src": src }] } });
        let request = Request::builder()
            .method("POST")
            .uri("/api/content/render")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
            .body(Body::from(json!({ "content": content }).to_string()))
            .unwrap();
        let (status, body) = send(routes::router(state.clone()), request).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let out: Value = serde_json::from_str(&body).unwrap();
        let url = out["attachements"][0].as_str().unwrap().to_string();
        assert!(out["output"].as_str().unwrap().contains(&url));

        let response = routes::router(state.clone()).oneshot(get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], &png[..]);

        let (status, _) = send(routes::router(state), get("/files/data/content/missing.png")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_content_render_validates_input() {
        let (_dir, state) = setup_test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/content/render")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", USER_TOKEN))
            .body(Body::from(json!({ "content": "{}", "format": "pdf" }).to_string()))
            .unwrap();
        let (status, body) = send(routes::router(state.clone()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "INPUT_ERROR_SCHEMA");
        assert!(err["error"]["details"]["fields"]["format"].is_array());

        let anonymous = Request::builder()
            .method("POST")
            .uri("/api/content/render")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "content": "{}" }).to_string()))
            .unwrap();
        let (status, _) = send(routes::router(state), anonymous).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unsupported_body_is_rejected() {
        let (_dir, state) = setup_test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/content/render")
            .header(header::CONTENT_TYPE, "text/csv")
            .body(Body::from("a,b"))
            .unwrap();
        let (status, body) = send(routes::router(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("INPUT_ERROR"));
    }

    #[tokio::test]
    async fn test_unreadable_page_body_renders_error_page() {
        let (_dir, state) = setup_test_app().await;
        let request = |accept: &str| {
            Request::builder()
                .method("POST")
                .uri("/posts/1")
                .header(header::CONTENT_TYPE, "text/csv")
                .header(header::ACCEPT, accept)
                .body(Body::from("a,b"))
                .unwrap()
        };

        let (status, body) = send(routes::router(state.clone()), request("text/html")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("<title>Bad request</title>"));
        let payload = read_payload(&body).unwrap();
        assert_eq!(payload.route, "error/400");
        assert_eq!(payload.data["error"]["code"], "INPUT_ERROR");

        let (status, body) = send(routes::router(state.clone()), request("application/json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let page: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(page["route"], "error/400");
        assert_eq!(state.metrics.get_snapshot().pages_failed, 2);
    }

    #[tokio::test]
    async fn test_failed_session_lookup_renders_error_page() {
        // No schema: every session lookup fails.
        let config = AppConfig::default();
        let cookie = format!("{}=irgendwas", config.auth.cookie_name);
        let state = AppState::new(memory_pool().await, config, Arc::new(demo::registry().unwrap()));
        let with_cookie =
            |uri: &str| Request::builder().uri(uri).header(header::COOKIE, cookie.as_str()).body(Body::empty()).unwrap();

        let (status, body) = send(routes::router(state.clone()), with_cookie("/")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(!body.contains("no such table"));
        assert_eq!(read_payload(&body).unwrap().route, "error/500");

        let (status, body) = send(routes::router(state), with_cookie("/api/posts")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "ANOMALY");
    }

    #[tokio::test]
    async fn test_prometheus_counters() {
        let (_dir, state) = setup_test_app().await;
        send(routes::router(state.clone()), get("/nirgendwo")).await;
        let (status, body) = send(routes::router(state), get("/metrics/prometheus")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("seitenwerk_pages_failed 1"));
        assert!(body.contains("# TYPE seitenwerk_uptime_seconds gauge"));
    }

    #[tokio::test]
    async fn test_session_cookie_authenticates() {
        let temp_db = NamedTempFile::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite://{}?mode=rwc", temp_db.path().display()))
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        let user_id = db::insert_user(&pool, "ada@example.com", "Ada", &["admin"]).await.unwrap();
        let token = db::create_session(&pool, &user_id, 3600).await.unwrap();

        let config = AppConfig::default();
        let cookie = format!("{}={}", config.auth.cookie_name, token);
        let state = AppState::new(pool, config, Arc::new(demo::registry().unwrap()));

        let request = Request::builder()
            .uri("/api/me")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(routes::router(state.clone()), request).await;
        assert_eq!(status, StatusCode::OK);
        let me: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(me["name"], "Ada");
        assert_eq!(me["roles"], json!(["admin"]));

        let (status, _) = send(routes::router(state), get("/api/me")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
