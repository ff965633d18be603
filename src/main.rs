use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use smartattend_api::audit::{AuditSink, PgViolationStore, ViolationStore};
use smartattend_api::config;
use smartattend_api::database::DatabaseManager;
use smartattend_api::handlers::{data, enroll, find};
use smartattend_api::isolation::IsolationService;
use smartattend_api::middleware::{enforce_tenant_middleware, jwt_auth_middleware};
use smartattend_api::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = config::config();
    tracing::info!("Starting SmartAttend API in {:?} mode", config.environment);

    let pool = DatabaseManager::pool().await.expect("database pool");
    let service = IsolationService::new(pool.clone());

    let store: Arc<dyn ViolationStore> = Arc::new(PgViolationStore::new(pool));
    let (audit, _audit_writer) = AuditSink::spawn(store, config.audit.queue_depth);

    let app = app(AppState { service, audit });

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("SmartAttend API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app(state: AppState) -> Router {
    // Auth runs first (outermost), then tenant enforcement, then handlers
    let protected = Router::new()
        .merge(data_routes())
        .merge(find_routes())
        .merge(enroll_routes())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            enforce_tenant_middleware,
        ))
        .layer(axum_middleware::from_fn(jwt_auth_middleware));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(protected)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn data_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/data/:kind",
            get(data::list_records).post(data::create_record),
        )
        .route(
            "/api/data/:kind/:id",
            get(data::get_record)
                .put(data::update_record)
                .delete(data::delete_record),
        )
        .route("/api/bulk/:kind", post(data::bulk_create))
}

fn find_routes() -> Router<AppState> {
    Router::new().route("/api/find/:kind", post(find::find_records))
}

fn enroll_routes() -> Router<AppState> {
    Router::new().route("/api/enroll", post(enroll::create_enrollment))
}

fn cors_layer() -> CorsLayer {
    let security = &config::CONFIG.security;
    if !security.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "SmartAttend API",
            "version": version,
            "description": "Tenant-isolated attendance and identity backend",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "data": "/api/data/:kind[/:id] (protected)",
                "bulk": "/api/bulk/:kind (protected)",
                "find": "/api/find/:kind (protected)",
                "enroll": "/api/enroll (protected)",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let audit = state.audit.stats();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "audit": audit
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string(),
                    "audit": audit
                }
            })),
        ),
    }
}
