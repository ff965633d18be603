use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{ViolationOutcome, ViolationRecord};
use crate::isolation::{
    BulkInsertResult, ListOptions, ListResult, OrderSpec, SortDirection, TenantContext,
};
use crate::middleware::{ApiResponse, ApiResult};
use crate::registry::ResourceKind;
use crate::state::AppState;

use super::{require_context, resolve_kind};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Sort column, must be in the kind's sort allowlist
    pub order: Option<String>,
    pub direction: Option<SortDirection>,
}

/// GET /api/data/:kind - scoped list with pagination and ordering.
/// Filtered reads go through POST /api/find/:kind.
pub async fn list_records(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResult> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let opts = ListOptions {
        order: query
            .order
            .map(|column| {
                vec![OrderSpec { column, direction: query.direction.unwrap_or_default() }]
            })
            .unwrap_or_default(),
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };

    let result = state.service.list(&ctx, kind, &opts).await?;
    Ok(ApiResponse::success(result))
}

/// POST /api/data/:kind - create a record under the caller's tenant.
pub async fn create_record(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path(kind): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Value> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let record = state.service.insert(&ctx, kind, &payload).await?;
    note_stamped_owner(&state, &ctx, kind, &payload);
    Ok(ApiResponse::created(record))
}

/// GET /api/data/:kind/:id
pub async fn get_record(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> ApiResult<Value> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let record = state.service.get_by_id(&ctx, kind, id).await?;
    Ok(ApiResponse::success(record))
}

/// PUT /api/data/:kind/:id
pub async fn update_record(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(patch): Json<Value>,
) -> ApiResult<Value> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let record = state.service.update(&ctx, kind, id, &patch).await?;
    Ok(ApiResponse::success(record))
}

/// DELETE /api/data/:kind/:id - soft delete, returns the deleted record.
pub async fn delete_record(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> ApiResult<Value> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let record = state.service.delete(&ctx, kind, id).await?;
    Ok(ApiResponse::success(record))
}

/// POST /api/bulk/:kind - transactional batch insert.
pub async fn bulk_create(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path(kind): Path<String>,
    Json(records): Json<Vec<Value>>,
) -> ApiResult<BulkInsertResult> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let result = state.service.insert_many(&ctx, kind, &records).await?;
    for payload in &records {
        note_stamped_owner(&state, &ctx, kind, payload);
    }
    Ok(ApiResponse::created(result))
}

/// A creation payload naming a foreign owner goes through (the value was
/// stamped at insert), but the attempt still leaves a violation record.
fn note_stamped_owner(state: &AppState, ctx: &TenantContext, kind: ResourceKind, payload: &Value) {
    let claimed = payload
        .get(kind.descriptor().owner_column)
        .and_then(Value::as_str);
    let Some(claimed) = claimed else { return };

    let attempted = Uuid::parse_str(claimed).ok();
    if attempted != Some(ctx.platform_id()) {
        tracing::warn!(
            kind = %kind,
            tenant = %ctx.platform_id(),
            "creation payload carried a foreign owner value, stamped over"
        );
        state.audit.record(ViolationRecord {
            occurred_at: Utc::now(),
            platform_id: ctx.platform_id(),
            attempted_platform_id: attempted,
            attempted_kind: Some(kind.as_str().to_string()),
            attempted_id: None,
            principal: ctx.user_id(),
            outcome: ViolationOutcome::Stamped,
        });
    }
}
