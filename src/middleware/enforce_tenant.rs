use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{ViolationOutcome, ViolationRecord};
use crate::config;
use crate::error::ApiError;
use crate::isolation::{IsolationError, TenantContext};
use crate::state::AppState;

use super::auth::AuthUser;

/// Payload/query keys that carry a tenant identifier. The original clients
/// send both spellings.
const TENANT_KEYS: &[&str] = &["platform_id", "platformId"];

/// Derives the request's [`TenantContext`] from the authenticated principal
/// and cross-validates every tenant identifier the caller supplied.
///
/// A request without an `AuthUser` (the JWT layer did not run or failed) is
/// rejected with 401. A tenant identifier in the path, query string, or a
/// non-creation JSON body that differs from the authenticated platform is
/// rejected with 403 and leaves a violation record; it is never silently
/// substituted. POST bodies are exempt: creation payloads get their owner
/// value stamped at insert time instead.
pub async fn enforce_tenant_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or(IsolationError::AuthenticationRequired)?;

    let ctx = TenantContext::new(
        auth_user.platform_id,
        auth_user.user_id,
        auth_user.role,
        auth_user.platform,
    );

    let path = request.uri().path().to_string();

    let mut claimed = Vec::new();
    if let Some(value) = tenant_in_path(&path) {
        claimed.push(value);
    }
    if let Some(query) = request.uri().query() {
        claimed.extend(tenants_in_query(query));
    }

    let request = if scans_body(request.method()) {
        let (parts, body) = request.into_parts();
        let bytes = to_bytes(body, config::CONFIG.query.max_body_bytes)
            .await
            .map_err(|_| ApiError::bad_request("request body too large"))?;
        if let Ok(json) = serde_json::from_slice::<Value>(&bytes) {
            claimed.extend(tenants_in_json(&json));
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    for value in claimed {
        let attempted = Uuid::parse_str(&value).ok();
        if attempted != Some(ctx.platform_id()) {
            tracing::warn!(
                tenant = %ctx.platform_id(),
                principal = %ctx.user_id(),
                path = %path,
                "request carried a foreign tenant identifier, rejecting"
            );
            record_violation(&state, &ctx, attempted, &path);
            return Err(IsolationError::AccessDenied(
                "tenant identifier does not match the authenticated platform".to_string(),
            )
            .into());
        }
    }

    let mut request = request;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Creation payloads (POST) are stamped, not cross-checked, so only mutating
/// methods get their bodies inspected.
fn scans_body(method: &Method) -> bool {
    matches!(*method, Method::PUT | Method::PATCH | Method::DELETE)
}

/// A `/platforms/:id` segment pair anywhere in the path names a tenant.
fn tenant_in_path(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "platforms" {
            return segments.next().map(|s| s.to_string());
        }
    }
    None
}

fn tenants_in_query(query: &str) -> Vec<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| TENANT_KEYS.contains(&key.as_ref()))
        .map(|(_, value)| value.into_owned())
        .collect()
}

fn tenants_in_json(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_tenant_values(value, &mut found);
    found
}

fn collect_tenant_values(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if TENANT_KEYS.contains(&key.as_str()) {
                    match nested {
                        Value::String(s) => found.push(s.clone()),
                        // Non-string scalars cannot equal the authenticated
                        // id, so they are collected and fail the comparison
                        Value::Bool(_) | Value::Number(_) => found.push(nested.to_string()),
                        Value::Null | Value::Object(_) | Value::Array(_) => {}
                    }
                }
                collect_tenant_values(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_tenant_values(item, found);
            }
        }
        _ => {}
    }
}

fn record_violation(state: &AppState, ctx: &TenantContext, attempted: Option<Uuid>, path: &str) {
    let (kind, id) = resource_hint(path);
    state.audit.record(ViolationRecord {
        occurred_at: Utc::now(),
        platform_id: ctx.platform_id(),
        attempted_platform_id: attempted,
        attempted_kind: kind,
        attempted_id: id,
        principal: ctx.user_id(),
        outcome: ViolationOutcome::Denied,
    });
}

/// Best-effort resource naming for the violation record: `/api/data/:kind/:id`
/// style paths carry the attempted kind and id.
fn resource_hint(path: &str) -> (Option<String>, Option<String>) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["api", "data" | "find" | "bulk", kind, rest @ ..] => (
            Some((*kind).to_string()),
            rest.first().map(|s| (*s).to_string()),
        ),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_platform_segment_in_path() {
        assert_eq!(
            tenant_in_path("/api/platforms/7a3e/settings"),
            Some("7a3e".to_string())
        );
        assert_eq!(tenant_in_path("/api/data/students"), None);
        assert_eq!(tenant_in_path("/api/platforms"), None);
    }

    #[test]
    fn finds_tenant_keys_in_query() {
        let found = tenants_in_query("platform_id=11111111-2222-3333-4444-555555555555&limit=5");
        assert_eq!(found, vec!["11111111-2222-3333-4444-555555555555".to_string()]);
        assert!(tenants_in_query("limit=5&offset=0").is_empty());
    }

    #[test]
    fn finds_nested_tenant_values_in_json() {
        let body = json!({
            "notes": "x",
            "platform_id": "aaa",
            "details": {
                "platformId": "bbb",
                "items": [{ "platform_id": "ccc" }]
            }
        });
        let mut found = tenants_in_json(&body);
        found.sort();
        assert_eq!(found, vec!["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn non_string_tenant_values_still_surface() {
        let found = tenants_in_json(&json!({ "platform_id": 42 }));
        assert_eq!(found, vec!["42".to_string()]);
        assert!(tenants_in_json(&json!({ "platform_id": null })).is_empty());
    }

    #[test]
    fn hints_resource_from_data_paths() {
        assert_eq!(
            resource_hint("/api/data/students/abc"),
            (Some("students".to_string()), Some("abc".to_string()))
        );
        assert_eq!(
            resource_hint("/api/find/incidents"),
            (Some("incidents".to_string()), None)
        );
        assert_eq!(resource_hint("/health"), (None, None));
    }

    #[test]
    fn body_scan_covers_mutating_methods_only() {
        assert!(scans_body(&Method::PUT));
        assert!(scans_body(&Method::PATCH));
        assert!(scans_body(&Method::DELETE));
        assert!(!scans_body(&Method::POST));
        assert!(!scans_body(&Method::GET));
    }
}
