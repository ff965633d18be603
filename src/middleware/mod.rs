pub mod auth;
pub mod enforce_tenant;
pub mod response;

pub use auth::{jwt_auth_middleware, AuthUser};
pub use enforce_tenant::enforce_tenant_middleware;
pub use response::{ApiResponse, ApiResult};
