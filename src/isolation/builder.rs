use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::registry::{descriptor, ResourceKind};

use super::context::TenantContext;
use super::error::IsolationError;
use super::options::{validate_filter_value, ListOptions, OrderSpec, SortDirection};
use super::plan::{self, StatementPlan};
use super::service::IsolationService;

/// Chainable scoped-read builder, unbound state.
///
/// Every method consumes the builder and returns a new value, so a partially
/// built chain can be cloned and reused as a template across requests.
/// Execution does not exist on this type: the only way to run the query is
/// `with_tenant`, which moves the chain into [`TenantQuery`]. An unscoped
/// execute is unrepresentable rather than merely checked.
///
/// Column arguments are validated against the registry allowlists at chain
/// build time, not at execution.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    kind: ResourceKind,
    select: Vec<String>,
    filters: BTreeMap<String, Value>,
    order: Vec<OrderSpec>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QueryBuilder {
    pub fn from(kind: ResourceKind) -> Self {
        Self {
            kind,
            select: Vec::new(),
            filters: BTreeMap::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn select(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, IsolationError> {
        let desc = descriptor(self.kind);
        for column in columns {
            let column = column.into();
            if !desc.is_selectable(&column) {
                return Err(IsolationError::Validation(format!(
                    "column '{}' is not selectable on {}",
                    column, self.kind
                )));
            }
            self.select.push(column);
        }
        Ok(self)
    }

    /// Parameterized equality condition, ANDed with the ownership predicate
    /// and any other filters at compile time.
    pub fn filter(
        mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, IsolationError> {
        let column = column.into();
        let value = value.into();
        let desc = descriptor(self.kind);
        if !desc.is_filterable(&column) {
            return Err(IsolationError::Validation(format!(
                "column '{}' is not filterable on {}",
                column, self.kind
            )));
        }
        validate_filter_value(&column, &value)?;
        self.filters.insert(column, value);
        Ok(self)
    }

    pub fn order_by(
        mut self,
        column: impl Into<String>,
        direction: SortDirection,
    ) -> Result<Self, IsolationError> {
        let column = column.into();
        if !descriptor(self.kind).is_sortable(&column) {
            return Err(IsolationError::Validation(format!(
                "column '{}' is not sortable on {}",
                column, self.kind
            )));
        }
        self.order.push(OrderSpec { column, direction });
        Ok(self)
    }

    pub fn limit(mut self, limit: i64) -> Result<Self, IsolationError> {
        if limit < 0 {
            return Err(IsolationError::Validation("limit must be non-negative".to_string()));
        }
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn offset(mut self, offset: i64) -> Result<Self, IsolationError> {
        if offset < 0 {
            return Err(IsolationError::Validation("offset must be non-negative".to_string()));
        }
        self.offset = Some(offset);
        Ok(self)
    }

    /// Bind the chain to a tenant. Mandatory before execution; the returned
    /// query must not outlive the request's tenant context semantics (do not
    /// reuse a bound query across tenants - rebind the template instead).
    pub fn with_tenant(self, ctx: &TenantContext) -> TenantQuery {
        TenantQuery { builder: self, tenant: ctx.platform_id() }
    }
}

/// Tenant-bound, executable state of the builder chain.
#[derive(Debug, Clone)]
pub struct TenantQuery {
    builder: QueryBuilder,
    tenant: Uuid,
}

impl TenantQuery {
    fn options(&self) -> ListOptions {
        ListOptions {
            filters: self.builder.filters.clone(),
            order: self.builder.order.clone(),
            limit: self.builder.limit,
            offset: self.builder.offset,
        }
    }

    /// Compile the accumulated chain without running it.
    pub fn to_plan(&self) -> Result<StatementPlan, IsolationError> {
        let desc = descriptor(self.builder.kind);
        let select = if self.builder.select.is_empty() { None } else { Some(self.builder.select.as_slice()) };
        plan::select_plan(desc, self.tenant, select, &self.options())
    }

    pub fn to_count_plan(&self) -> Result<StatementPlan, IsolationError> {
        let desc = descriptor(self.builder.kind);
        plan::count_plan(desc, self.tenant, &self.options())
    }

    pub async fn execute(&self, service: &IsolationService) -> Result<Vec<Value>, IsolationError> {
        service.fetch_rows(self.to_plan()?).await
    }

    pub async fn fetch_one(&self, service: &IsolationService) -> Result<Value, IsolationError> {
        let mut rows = service.fetch_rows(self.to_plan()?).await?;
        if rows.is_empty() {
            return Err(IsolationError::RecordNotFoundOrForbidden);
        }
        Ok(rows.remove(0))
    }

    pub async fn count(&self, service: &IsolationService) -> Result<i64, IsolationError> {
        service.fetch_count(self.to_count_plan()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::plan::BindValue;
    use serde_json::json;

    fn ctx(platform: Uuid) -> TenantContext {
        TenantContext::new(platform, Uuid::new_v4(), "admin", "school")
    }

    #[test]
    fn bound_query_carries_owner_predicate() {
        let tenant = Uuid::new_v4();
        let plan = QueryBuilder::from(ResourceKind::Students)
            .filter("is_active", json!(true))
            .unwrap()
            .order_by("last_name", SortDirection::Asc)
            .unwrap()
            .limit(10)
            .unwrap()
            .with_tenant(&ctx(tenant))
            .to_plan()
            .unwrap();

        assert!(plan.sql.contains("WHERE \"platform_id\" = $1 AND"));
        assert_eq!(plan.params[0], BindValue::Uuid(tenant));
    }

    #[test]
    fn chain_fails_fast_on_unlisted_column() {
        let err = QueryBuilder::from(ResourceKind::Students)
            .filter("platform_id", json!("x"))
            .unwrap_err();
        assert!(matches!(err, IsolationError::Validation(_)));

        let err = QueryBuilder::from(ResourceKind::Students)
            .select(["password_hash"])
            .unwrap_err();
        assert!(matches!(err, IsolationError::Validation(_)));
    }

    #[test]
    fn template_rebinds_per_tenant() {
        let template = QueryBuilder::from(ResourceKind::Incidents)
            .filter("status", json!("open"))
            .unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plan_a = template.clone().with_tenant(&ctx(a)).to_plan().unwrap();
        let plan_b = template.with_tenant(&ctx(b)).to_plan().unwrap();

        assert_eq!(plan_a.sql, plan_b.sql);
        assert_eq!(plan_a.params[0], BindValue::Uuid(a));
        assert_eq!(plan_b.params[0], BindValue::Uuid(b));
    }
}
