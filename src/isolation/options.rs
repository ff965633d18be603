use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ResourceDescriptor;

use super::error::IsolationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Asc
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Caller-supplied read options for a scoped list.
///
/// Filters are parameterized equality conditions; keys must be in the
/// descriptor's filter allowlist, order columns in the sort allowlist.
/// Validation names the offending column and nothing else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub order: Vec<OrderSpec>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListOptions {
    pub fn validate(&self, desc: &ResourceDescriptor) -> Result<(), IsolationError> {
        for (column, value) in &self.filters {
            if !desc.is_filterable(column) {
                return Err(IsolationError::Validation(format!(
                    "column '{}' is not filterable on {}",
                    column, desc.kind
                )));
            }
            validate_filter_value(column, value)?;
        }
        for spec in &self.order {
            if !desc.is_sortable(&spec.column) {
                return Err(IsolationError::Validation(format!(
                    "column '{}' is not sortable on {}",
                    spec.column, desc.kind
                )));
            }
        }
        if let Some(limit) = self.limit {
            if limit < 0 {
                return Err(IsolationError::Validation("limit must be non-negative".to_string()));
            }
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err(IsolationError::Validation("offset must be non-negative".to_string()));
            }
        }
        Ok(())
    }

    /// Limit actually applied: caller value capped by config, default when absent.
    pub fn effective_limit(&self) -> i64 {
        let cfg = &crate::config::CONFIG.query;
        match self.limit {
            Some(limit) if limit > cfg.max_limit => {
                tracing::warn!("limit {} exceeds max {}, capping", limit, cfg.max_limit);
                cfg.max_limit
            }
            Some(limit) => limit,
            None => cfg.default_limit,
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}

/// Filter values must be scalars so they always bind as a single placeholder.
pub(crate) fn validate_filter_value(column: &str, value: &Value) -> Result<(), IsolationError> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
        Value::Array(_) | Value::Object(_) => Err(IsolationError::Validation(format!(
            "filter on '{}' must be a scalar value",
            column
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{descriptor, ResourceKind};
    use serde_json::json;

    #[test]
    fn rejects_unlisted_filter_column() {
        let desc = descriptor(ResourceKind::Students);
        let mut opts = ListOptions::default();
        opts.filters.insert("platform_id".to_string(), json!("x"));
        let err = opts.validate(desc).unwrap_err();
        assert!(matches!(err, IsolationError::Validation(ref m) if m.contains("platform_id")));
    }

    #[test]
    fn rejects_unlisted_sort_column() {
        let desc = descriptor(ResourceKind::Students);
        let opts = ListOptions {
            order: vec![OrderSpec { column: "email".to_string(), direction: SortDirection::Desc }],
            ..Default::default()
        };
        assert!(opts.validate(desc).is_err());
    }

    #[test]
    fn rejects_non_scalar_filter_value() {
        let desc = descriptor(ResourceKind::Students);
        let mut opts = ListOptions::default();
        opts.filters.insert("email".to_string(), json!({ "$ne": "x" }));
        assert!(opts.validate(desc).is_err());
    }

    #[test]
    fn accepts_allowlisted_options() {
        let desc = descriptor(ResourceKind::Students);
        let mut opts = ListOptions {
            order: vec![OrderSpec { column: "last_name".to_string(), direction: SortDirection::Asc }],
            limit: Some(20),
            offset: Some(0),
            ..Default::default()
        };
        opts.filters.insert("is_active".to_string(), json!(true));
        assert!(opts.validate(desc).is_ok());
    }

    #[test]
    fn caps_limit_at_config_max() {
        let opts = ListOptions { limit: Some(i64::MAX), ..Default::default() };
        assert_eq!(opts.effective_limit(), crate::config::CONFIG.query.max_limit);
    }
}
