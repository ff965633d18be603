use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::registry::{descriptor, ResourceKind};

use super::context::TenantContext;
use super::error::IsolationError;
use super::options::ListOptions;
use super::plan::{self, BindValue, StatementPlan};
use super::raw;

#[derive(Debug, Serialize)]
pub struct ListResult {
    pub records: Vec<Value>,
    pub total: i64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct BulkInsertResult {
    pub inserted_count: usize,
    pub records: Vec<Value>,
}

/// Scoped CRUD primitives. Every operation takes the tenant context as its
/// first argument and resolves the target through the registry; the generated
/// statements all carry the ownership predicate.
#[derive(Clone)]
pub struct IsolationService {
    pool: PgPool,
}

impl IsolationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn list(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        opts: &ListOptions,
    ) -> Result<ListResult, IsolationError> {
        let desc = descriptor(kind);
        let records = self
            .fetch_rows(plan::select_plan(desc, ctx.platform_id(), None, opts)?)
            .await?;
        let total = self.fetch_count(plan::count_plan(desc, ctx.platform_id(), opts)?).await?;
        Ok(ListResult { count: records.len(), records, total })
    }

    pub async fn count(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        opts: &ListOptions,
    ) -> Result<i64, IsolationError> {
        let desc = descriptor(kind);
        self.fetch_count(plan::count_plan(desc, ctx.platform_id(), opts)?).await
    }

    /// Single-query lookup; a foreign-tenant id and a nonexistent id are the
    /// same zero-row outcome and the same error.
    pub async fn get_by_id(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: Uuid,
    ) -> Result<Value, IsolationError> {
        let desc = descriptor(kind);
        self.fetch_optional_row(plan::get_plan(desc, ctx.platform_id(), id))
            .await?
            .ok_or(IsolationError::RecordNotFoundOrForbidden)
    }

    /// Persist a payload with the owner column stamped from the context,
    /// overriding any caller-supplied value.
    pub async fn insert(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        payload: &Value,
    ) -> Result<Value, IsolationError> {
        let desc = descriptor(kind);
        let statement = plan::insert_plan(desc, ctx.platform_id(), payload)?;
        tracing::debug!(kind = %kind, tenant = %ctx.platform_id(), "scoped insert");
        self.fetch_row(statement).await
    }

    pub async fn update(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: Uuid,
        patch: &Value,
    ) -> Result<Value, IsolationError> {
        let desc = descriptor(kind);
        let statement = plan::update_plan(desc, ctx.platform_id(), id, patch)?;
        self.fetch_optional_row(statement)
            .await?
            .ok_or(IsolationError::RecordNotFoundOrForbidden)
    }

    pub async fn delete(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        id: Uuid,
    ) -> Result<Value, IsolationError> {
        let desc = descriptor(kind);
        self.fetch_optional_row(plan::delete_plan(desc, ctx.platform_id(), id))
            .await?
            .ok_or(IsolationError::RecordNotFoundOrForbidden)
    }

    /// Stamp and persist a batch in one transaction. All plans are built
    /// before the transaction starts, so a validation failure in any record
    /// persists nothing; a mid-batch database error rolls everything back.
    pub async fn insert_many(
        &self,
        ctx: &TenantContext,
        kind: ResourceKind,
        records: &[Value],
    ) -> Result<BulkInsertResult, IsolationError> {
        let desc = descriptor(kind);
        let statements = records
            .iter()
            .map(|r| plan::insert_plan(desc, ctx.platform_id(), r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(statements.len());
        for statement in statements {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_value(query, param);
            }
            let row = query.fetch_one(&mut *tx).await?;
            inserted.push(row_json(&row)?);
        }
        tx.commit().await?;

        Ok(BulkInsertResult { inserted_count: inserted.len(), records: inserted })
    }

    /// Run a raw parameterized SELECT after tenant-binding it against the
    /// registry (see [`raw::scope_raw_select`]). Statements that cannot be
    /// bound fail with `UnscopableQuery` before touching the database.
    pub async fn query_with_tenant(
        &self,
        ctx: &TenantContext,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, IsolationError> {
        let scoped = raw::scope_raw_select(ctx.platform_id(), sql, params)?;
        // Uniform JSON row shape regardless of the caller's projection
        let wrapped = StatementPlan {
            sql: format!("SELECT row_to_json(q) AS row FROM ({}) q", scoped.sql),
            params: scoped.params,
        };
        self.fetch_rows(wrapped).await
    }

    pub(crate) async fn fetch_rows(&self, statement: StatementPlan) -> Result<Vec<Value>, IsolationError> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_json).collect()
    }

    pub(crate) async fn fetch_count(&self, statement: StatementPlan) -> Result<i64, IsolationError> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_value(query, param);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get("count")?)
    }

    async fn fetch_row(&self, statement: StatementPlan) -> Result<Value, IsolationError> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_value(query, param);
        }
        let row = query.fetch_one(&self.pool).await?;
        row_json(&row)
    }

    async fn fetch_optional_row(
        &self,
        statement: StatementPlan,
    ) -> Result<Option<Value>, IsolationError> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_value(query, param);
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(row_json).transpose()
    }
}

fn row_json(row: &sqlx::postgres::PgRow) -> Result<Value, IsolationError> {
    Ok(row.try_get::<Value, _>("row")?)
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    value: &'q BindValue,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match value {
        BindValue::Uuid(u) => query.bind(*u),
        BindValue::Text(s) => query.bind(s),
        BindValue::Bool(b) => query.bind(*b),
        BindValue::Int(i) => query.bind(*i),
        BindValue::Float(f) => query.bind(*f),
        BindValue::Json(v) => query.bind(v),
        BindValue::Null => query.bind(None::<String>),
    }
}
