pub mod data;
pub mod enroll;
pub mod find;

use axum::Extension;

use crate::error::ApiError;
use crate::isolation::{IsolationError, TenantContext};
use crate::registry::ResourceKind;

/// A missing context means the request bypassed the enforcement chain;
/// fail closed rather than guess.
pub(crate) fn require_context(
    ctx: Option<Extension<TenantContext>>,
) -> Result<TenantContext, ApiError> {
    ctx.map(|Extension(ctx)| ctx)
        .ok_or_else(|| IsolationError::AuthenticationRequired.into())
}

/// Resolve a path parameter against the registry before anything touches
/// query construction.
pub(crate) fn resolve_kind(name: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::parse(name).ok_or_else(|| {
        ApiError::validation_error(format!("unknown resource kind '{}'", name), None)
    })
}
