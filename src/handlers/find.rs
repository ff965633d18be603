use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::isolation::{OrderSpec, QueryBuilder, TenantContext};
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

use super::{require_context, resolve_kind};

/// Find body: projection, equality filters, ordering, pagination. Every
/// column named here is allowlist-checked while the chain is built.
#[derive(Debug, Deserialize)]
pub struct FindRequest {
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default, rename = "where")]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub order: Vec<OrderSpec>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FindResult {
    pub records: Vec<Value>,
    pub total: i64,
    pub count: usize,
}

/// POST /api/find/:kind - ad-hoc filtered read through the query builder.
pub async fn find_records(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Path(kind): Path<String>,
    Json(body): Json<FindRequest>,
) -> ApiResult<FindResult> {
    let ctx = require_context(ctx)?;
    let kind = resolve_kind(&kind)?;

    let mut builder = QueryBuilder::from(kind);
    if !body.select.is_empty() {
        builder = builder.select(body.select)?;
    }
    for (column, value) in body.filters {
        builder = builder.filter(column, value)?;
    }
    for spec in body.order {
        builder = builder.order_by(spec.column, spec.direction)?;
    }
    if let Some(limit) = body.limit {
        builder = builder.limit(limit)?;
    }
    if let Some(offset) = body.offset {
        builder = builder.offset(offset)?;
    }

    let query = builder.with_tenant(&ctx);
    let records = query.execute(&state.service).await?;
    let total = query.count(&state.service).await?;

    Ok(ApiResponse::success(FindResult { count: records.len(), records, total }))
}
