use crate::audit::AuditSink;
use crate::isolation::IsolationService;

/// Shared per-process application state: the pooled isolation service and
/// the violation audit sink. Cheap to clone; handed to handlers and the
/// enforcement middleware via axum state.
#[derive(Clone)]
pub struct AppState {
    pub service: IsolationService,
    pub audit: AuditSink,
}
