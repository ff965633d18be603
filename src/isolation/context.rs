use serde::Serialize;
use uuid::Uuid;

/// Authenticated tenant identity for one request.
///
/// Constructed once by the enforcement middleware and passed explicitly into
/// every isolation call. Fields are private so the context cannot be mutated
/// mid-request; there is no way to run a scoped operation without one.
#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    platform_id: Uuid,
    user_id: Uuid,
    role: String,
    platform: String,
}

impl TenantContext {
    pub fn new(platform_id: Uuid, user_id: Uuid, role: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            platform_id,
            user_id,
            role: role.into(),
            platform: platform.into(),
        }
    }

    /// The tenant this request is allowed to touch. Every generated statement
    /// binds this value into its ownership predicate.
    pub fn platform_id(&self) -> Uuid {
        self.platform_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Platform kind claim ("school" or "corporate").
    pub fn platform(&self) -> &str {
        &self.platform
    }
}
