//! The application booted by the `seitenwerk` binary: a small blog with a
//! lazy comment list, an admin area with its own layout and a content
//! rendering endpoint.

use axum::http::Method;
use serde_json::{json, Value};

use crate::content::{html::escape, ContentInput, OutputFormat, RenderOptions};
use crate::context::RequestContext;
use crate::error::{AppError, AppResult, OptionExt};
use crate::fetcher::{Fetcher, FetcherMap};
use crate::router::{layout::ROOT_LAYOUT, Layout, LayoutContext, Params, Registry, RenderContext, RouteOptions};
use crate::services::auth::AuthRequirement;
use crate::services::schema::{Field, Schema};
use crate::types::PageSetup;

fn posts() -> Value {
    json!([
        { "id": 1, "title": "Hallo Welt", "body": "Der erste Beitrag.", "author": "ada" },
        { "id": 2, "title": "Isomorphes Routing", "body": "Server und Client teilen sich eine Route.", "author": "grace" },
    ])
}

fn find_post(id: i64) -> Option<Value> {
    posts().as_array()?.iter().find(|p| p["id"] == id).cloned()
}

fn post_id(ctx: &RequestContext) -> AppResult<i64> {
    ctx.params
        .get("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| AppError::InputError("Post id must be a number".into()))
}

async fn list_posts(_ctx: RequestContext) -> AppResult<Value> {
    Ok(posts())
}

async fn get_post(ctx: RequestContext) -> AppResult<Value> {
    let id = post_id(&ctx)?;
    find_post(id).ok_or_not_found("Post")
}

async fn get_comments(ctx: RequestContext) -> AppResult<Value> {
    let id = post_id(&ctx)?;
    find_post(id).ok_or_not_found("Post")?;
    Ok(json!([{ "author": "linus", "text": format!("Kommentar zu Beitrag {}", id) }]))
}

async fn me(ctx: RequestContext) -> AppResult<Value> {
    let user = ctx.user.ok_or_not_found("User")?;
    Ok(serde_json::to_value(user)?)
}

async fn render_content(ctx: RequestContext) -> AppResult<Value> {
    let input = ctx.validate(
        &Schema::new()
            .field(Field::any("content"))
            .field(Field::any("previous").optional())
            .field(Field::string("format").one_of(&["html", "text"]).default_value("html")),
    )?;

    let mut opts = RenderOptions::default();
    if input.get("format").and_then(Value::as_str) == Some("text") {
        opts.format = OutputFormat::Text;
    }
    if let Some(previous) = input.get("previous") {
        opts.previous = Some(ContentInput::from_value(previous.clone())?);
    }
    let content = ContentInput::from_value(input.get("content").cloned().unwrap_or(Value::Null))?;

    let rendered = ctx.services.content.render(content, opts).await?;
    Ok(serde_json::to_value(rendered)?)
}

fn home(r: &RenderContext<'_>) -> AppResult<String> {
    let items: String = r
        .page
        .data
        .get("posts")
        .and_then(Value::as_array)
        .map(|posts| {
            posts
                .iter()
                .map(|p| {
                    format!(
                        "<li><a href=\"/posts/{}\">{}</a></li>",
                        p["id"],
                        escape(p["title"].as_str().unwrap_or_default())
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(format!("<h1>Beiträge</h1><ul>{}</ul>", items))
}

fn home_controller(_params: &Params, _ctx: &RequestContext) -> AppResult<PageSetup> {
    Ok(PageSetup::new().title("Seitenwerk").data("posts", Fetcher::get("/api/posts").cached()))
}

fn post_controller(params: &Params, _ctx: &RequestContext) -> AppResult<PageSetup> {
    let id = params.get("id").map(String::as_str).unwrap_or_default();
    Ok(PageSetup::new()
        .body_class("post")
        .data("post", Fetcher::get(format!("/api/posts/{}", id)).required())
        .data("comments", Fetcher::get(format!("/api/posts/{}/comments", id)).lazy()))
}

fn post_view(r: &RenderContext<'_>) -> AppResult<String> {
    let post = r.page.data.get("post").ok_or_not_found("Post")?;
    let comments = match r.page.data.get("comments").and_then(Value::as_array) {
        Some(list) => format!("<p>{} Kommentar(e)</p>", list.len()),
        None => "<p class=\"loading\">Kommentare werden geladen</p>".to_string(),
    };
    Ok(format!(
        "<article><h1>{}</h1><p>{}</p></article>{}",
        escape(post["title"].as_str().unwrap_or_default()),
        escape(post["body"].as_str().unwrap_or_default()),
        comments
    ))
}

fn shell(ctx: &LayoutContext<'_>) -> String {
    let title = escape(ctx.page.title.as_deref().unwrap_or("Seitenwerk"));
    let classes: Vec<&str> = ctx.page.body_class.iter().map(String::as_str).collect();
    format!(
        "<!DOCTYPE html><html lang=\"de\"><head><meta charset=\"utf-8\"><title>{}</title></head>\
         <body class=\"{}\"><nav><a href=\"/\">Start</a></nav><main>{}</main></body></html>",
        title,
        escape(&classes.join(" ")),
        ctx.body
    )
}

fn admin_shell(ctx: &LayoutContext<'_>) -> String {
    let nav: String = ctx
        .page
        .data
        .get("admin_nav")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(|i| format!("<li>{}</li>", escape(i))).collect())
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html><html lang=\"de\"><head><meta charset=\"utf-8\"><title>Admin</title></head>\
         <body class=\"admin\"><ul class=\"admin-nav\">{}</ul>{}</body></html>",
        nav, ctx.body
    )
}

pub fn registry() -> AppResult<Registry> {
    Registry::builder()
        .layout(Layout::new(ROOT_LAYOUT, shell))
        .layout(
            Layout::new("admin", admin_shell)
                .with_data(|_| FetcherMap::new().with("admin_nav", json!(["Benutzer", "Einstellungen"]))),
        )
        .page("/", RouteOptions::new(), home_controller, home)
        .page("/posts/:id", RouteOptions::new(), post_controller, post_view)
        .view("/login", RouteOptions::new().auth(AuthRequirement::Guest), |_| {
            Ok("<form method=\"post\" action=\"/api/login\"></form>".to_string())
        })
        .view("/admin", RouteOptions::new().auth(AuthRequirement::Role("admin".into())), |r| {
            let name = r.context.user.as_ref().map(|u| u.name.as_str()).unwrap_or_default();
            Ok(format!("<h1>Hallo {}</h1>", escape(name)))
        })
        .api(Some(Method::GET), "/api/posts", RouteOptions::new(), list_posts)
        .api(Some(Method::GET), "/api/posts/:id", RouteOptions::new(), get_post)
        .api(Some(Method::GET), "/api/posts/:id/comments", RouteOptions::new(), get_comments)
        .api(Some(Method::GET), "/api/me", RouteOptions::new().auth(AuthRequirement::User), me)
        .api(
            Some(Method::POST),
            "/api/content/render",
            RouteOptions::new().auth(AuthRequirement::User),
            render_content,
        )
        .error_page(404, |r| {
            Ok(format!("<h1>Nicht gefunden</h1><p>{}</p>", escape(&r.context.path)))
        })
        .build()
}
