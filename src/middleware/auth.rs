use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use uuid::Uuid;

use crate::auth::Claims;
use crate::config;
use crate::error::ApiError;

/// Authenticated user context extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub platform_id: Uuid,
    pub role: String,
    pub platform: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            platform_id: claims.platform_id,
            role: claims.role,
            platform: claims.platform,
        }
    }
}

/// JWT authentication middleware that validates tokens and extracts user context
pub async fn jwt_auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Extract JWT from Authorization header
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;

    // Validate and decode JWT
    let claims = validate_jwt(&token).map_err(ApiError::unauthorized)?;

    // Convert claims to AuthUser and inject into request
    let auth_user = AuthUser::from(claims);
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .or_else(|| headers.get("Authorization"))
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

/// Validate JWT token and extract claims
fn validate_jwt(token: &str) -> Result<Claims, String> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err("JWT secret not configured".to_string());
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::default();

    let token_data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| format!("Invalid JWT token: {}", e))?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::generate_jwt;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_jwt_from_headers(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn round_trips_claims() {
        // Development preset carries a non-empty secret
        let claims = Claims::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "admin".to_string(),
            "school".to_string(),
        );
        let platform_id = claims.platform_id;
        let token = generate_jwt(claims).unwrap();
        let decoded = validate_jwt(&token).unwrap();
        assert_eq!(decoded.platform_id, platform_id);
    }
}
