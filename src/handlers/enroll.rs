use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::isolation::{BoundaryChecker, TenantContext};
use crate::middleware::{ApiResponse, ApiResult};
use crate::registry::ResourceKind;
use crate::state::AppState;

use super::require_context;

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_id: Uuid,
    pub semester_id: Uuid,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "enrolled".to_string()
}

/// POST /api/enroll - compound write joining a student and a semester.
///
/// Both referenced rows must belong to the caller's tenant before the
/// enrollment is created; a reference that crosses the boundary comes back as
/// 403 rather than a plain miss.
pub async fn create_enrollment(
    State(state): State<AppState>,
    ctx: Option<Extension<TenantContext>>,
    Json(body): Json<EnrollRequest>,
) -> ApiResult<Value> {
    let ctx = require_context(ctx)?;

    let checker = BoundaryChecker::new(&state.service, ctx);
    checker.get_by_id(ResourceKind::Students, body.student_id).await?;
    checker.get_by_id(ResourceKind::Semesters, body.semester_id).await?;

    let record = checker
        .insert(
            ResourceKind::Enrollments,
            &json!({
                "student_id": body.student_id.to_string(),
                "semester_id": body.semester_id.to_string(),
                "status": body.status,
            }),
        )
        .await?;

    Ok(ApiResponse::created(record))
}
