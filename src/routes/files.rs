//! Serves stored attachments under `disk.public_prefix`.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::content::attachments::sniff;
use crate::error::AppResult;
use crate::state::AppState;

pub async fn serve_file(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> AppResult<Response> {
    let bytes = state.services.disk.read_file(&bucket, &path).await?;
    let mime = sniff(&bytes).map(|t| t.mime).unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}
