pub mod boundary;
pub mod builder;
pub mod context;
pub mod error;
pub mod options;
pub mod plan;
pub mod raw;
pub mod service;

pub use boundary::BoundaryChecker;
pub use builder::{QueryBuilder, TenantQuery};
pub use context::TenantContext;
pub use error::IsolationError;
pub use options::{ListOptions, OrderSpec, SortDirection};
pub use service::{BulkInsertResult, IsolationService, ListResult};
