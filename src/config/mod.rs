use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Limits applied to every scoped list/find query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub max_limit: i64,
    pub default_limit: i64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Bounded depth of the violation queue; enqueue never blocks past this
    pub queue_depth: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("QUERY_MAX_LIMIT") {
            self.query.max_limit = v.parse().unwrap_or(self.query.max_limit);
        }
        if let Ok(v) = env::var("QUERY_DEFAULT_LIMIT") {
            self.query.default_limit = v.parse().unwrap_or(self.query.default_limit);
        }
        if let Ok(v) = env::var("QUERY_MAX_BODY_BYTES") {
            self.query.max_body_bytes = v.parse().unwrap_or(self.query.max_body_bytes);
        }

        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs =
                v.parse().unwrap_or(self.database.acquire_timeout_secs);
        }

        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(v) = env::var("AUDIT_QUEUE_DEPTH") {
            self.audit.queue_depth = v.parse().unwrap_or(self.audit.queue_depth);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            query: QueryConfig {
                max_limit: 1000,
                default_limit: 50,
                max_body_bytes: 10 * 1024 * 1024, // 10MB
            },
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 30,
            },
            security: SecurityConfig {
                jwt_secret: "dev-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                enable_cors: true,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
            audit: AuditConfig { queue_depth: 1024 },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            query: QueryConfig {
                max_limit: 500,
                default_limit: 50,
                max_body_bytes: 5 * 1024 * 1024, // 5MB
            },
            database: DatabaseConfig {
                max_connections: 20,
                acquire_timeout_secs: 10,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                enable_cors: true,
                cors_origins: vec!["https://staging.smartattend.example".to_string()],
            },
            audit: AuditConfig { queue_depth: 4096 },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            query: QueryConfig {
                max_limit: 100,
                default_limit: 25,
                max_body_bytes: 2 * 1024 * 1024, // 2MB
            },
            database: DatabaseConfig {
                max_connections: 50,
                acquire_timeout_secs: 5,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                enable_cors: true,
                cors_origins: vec!["https://app.smartattend.example".to_string()],
            },
            audit: AuditConfig { queue_depth: 8192 },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.query.max_limit, 1000);
        assert!(!config.security.jwt_secret.is_empty());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.query.max_limit, 100);
        // Production never ships a baked-in secret
        assert!(config.security.jwt_secret.is_empty());
        assert!(config.audit.queue_depth >= 4096);
    }
}
