use thiserror::Error;

/// Tenant-boundary error taxonomy.
///
/// `RecordNotFoundOrForbidden` deliberately collapses "row belongs to another
/// tenant" and "row does not exist" into one kind; both come out of the same
/// single-query code path so responses carry no existence signal.
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Record not found")]
    RecordNotFoundOrForbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Query cannot be tenant-scoped: {0}")]
    UnscopableQuery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for IsolationError {
    fn from(err: sqlx::Error) -> Self {
        IsolationError::Internal(err.to_string())
    }
}

impl From<crate::database::manager::DatabaseError> for IsolationError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        IsolationError::Internal(err.to_string())
    }
}
