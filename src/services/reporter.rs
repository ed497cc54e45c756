use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::AppError;

/// Out-of-band channel for failures an operator must look at.
pub trait Reporter: Send + Sync {
    /// Records `error` and returns the id shown to the user for correlation.
    fn report(&self, error: &AppError, ctx: Option<&RequestContext>) -> Uuid;
}

/// Writes reports to the `tracing` pipeline at error level.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, error: &AppError, ctx: Option<&RequestContext>) -> Uuid {
        let error_id = Uuid::new_v4();
        let detail = match error {
            AppError::Anomaly { detail: Some(d), .. } => d.as_str(),
            _ => "",
        };
        match ctx {
            Some(ctx) => tracing::error!(
                error_id = %error_id,
                request_id = %ctx.id,
                path = %ctx.path,
                user = ctx.user.as_ref().map(|u| u.id.as_str()).unwrap_or("-"),
                "{} {}",
                error,
                detail
            ),
            None => tracing::error!(error_id = %error_id, "{} {}", error, detail),
        }
        error_id
    }
}
