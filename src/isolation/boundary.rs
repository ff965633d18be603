use serde_json::Value;
use uuid::Uuid;

use crate::registry::ResourceKind;

use super::context::TenantContext;
use super::error::IsolationError;
use super::service::IsolationService;

/// Ownership verification for multi-resource flows.
///
/// Constructed once per logical operation with a single tenant context and
/// never reused across requests. Handlers verifying several heterogeneous
/// resources before a compound write (a student and a semester before an
/// enrollment, say) go through this so every denial surfaces as
/// `AccessDenied`, which the HTTP layer maps to 403.
pub struct BoundaryChecker<'a> {
    service: &'a IsolationService,
    context: TenantContext,
}

impl<'a> BoundaryChecker<'a> {
    pub fn new(service: &'a IsolationService, context: TenantContext) -> Self {
        Self { service, context }
    }

    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    /// Fetch a record the tenant must own. Not-found and foreign-owner both
    /// come back as `AccessDenied` naming the kind, never the row.
    pub async fn get_by_id(&self, kind: ResourceKind, id: Uuid) -> Result<Value, IsolationError> {
        match self.service.get_by_id(&self.context, kind, id).await {
            Ok(record) => Ok(record),
            Err(IsolationError::RecordNotFoundOrForbidden) => Err(IsolationError::AccessDenied(
                format!("{} record is not accessible", kind),
            )),
            Err(other) => Err(other),
        }
    }

    /// Insert with the checker's tenant stamped onto the payload.
    pub async fn insert(&self, kind: ResourceKind, payload: &Value) -> Result<Value, IsolationError> {
        self.service.insert(&self.context, kind, payload).await
    }
}
