//! Fallback handler that dispatches every non-operational path through the
//! route registry: API routes answer JSON, page routes go through the resolver.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};

use crate::context::{parse_query, RequestContext};
use crate::error::{AppError, AppResult};
use crate::middleware::ip::{extract_ip_from_headers, MaybeRemoteAddr};
use crate::middleware::session::session_token;
use crate::resolver::{RenderedPage, ResolveOptions};
use crate::router::RouteKind;
use crate::state::AppState;
use crate::transport::invoke_api;
use crate::types::User;

pub async fn dispatch(
    State(state): State<AppState>,
    MaybeRemoteAddr(remote): MaybeRemoteAddr,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok()).unwrap_or_default();
    let token = session_token(&headers, &state.config.auth.cookie_name);
    let ctx = RequestContext::new(state.services.clone(), method, target)
        .with_host(host)
        .with_session(token.clone());

    let client_ip = extract_ip_from_headers(&headers, remote.map(|a| a.ip()));
    tracing::debug!(request_id = %ctx.id, method = %ctx.method, path = %ctx.path, %client_ip, "dispatch");

    let registry = state.resolver.registry();
    let is_api = registry.routes().resolve(&ctx.method, &ctx.path, RouteKind::Api).is_ok();

    let ctx = match read_request(&state, token.as_deref(), &headers, &body).await {
        Ok((user, data)) => ctx.with_user(user).with_data(data),
        Err(e) if is_api => return e.into_response(),
        Err(e) => return page_response(&headers, state.resolver.fail(ctx, e)),
    };

    if is_api {
        return match invoke_api(registry, ctx).await {
            Ok(value) => Json(value).into_response(),
            Err(e) => e.into_response(),
        };
    }

    let page = state.resolver.resolve(ctx, ResolveOptions::default()).await;
    page_response(&headers, page)
}

/// Session user and body data of the request.
async fn read_request(
    state: &AppState,
    token: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> AppResult<(Option<User>, Map<String, Value>)> {
    let user = match token {
        Some(token) => state.services.auth.authenticate(token).await?,
        None => None,
    };
    let data = parse_body(headers, body)?;
    Ok((user, data))
}

fn page_response(headers: &HeaderMap, page: RenderedPage) -> Response {
    let status = StatusCode::from_u16(page.response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if wants_json(headers) {
        (status, Json(page.response)).into_response()
    } else {
        (status, Html(page.html)).into_response()
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// JSON objects and urlencoded forms become the context's body data.
fn parse_body(headers: &HeaderMap, body: &[u8]) -> AppResult<Map<String, Value>> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();

    if content_type.starts_with("application/json") {
        match serde_json::from_slice::<Value>(body)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::InputError("Request body must be a JSON object".into())),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let raw = std::str::from_utf8(body).map_err(|_| AppError::InputError("Form body is not UTF-8".into()))?;
        Ok(parse_query(raw).into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    } else {
        Err(AppError::InputError(format!("Unsupported content type: {}", content_type)))
    }
}
