use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::registry::{ResourceDescriptor, SYSTEM_COLUMNS};

use super::error::IsolationError;
use super::options::{validate_filter_value, ListOptions};

/// A typed bind parameter. Values travel to the driver as placeholders only;
/// SQL text never contains caller data.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Json(Value),
    Null,
}

impl From<&Value> for BindValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    BindValue::Float(f)
                } else {
                    BindValue::Text(n.to_string())
                }
            }
            // UUID-shaped strings bind as uuid so id/FK comparisons hit
            // uuid-typed columns without an explicit cast
            Value::String(s) => match Uuid::parse_str(s) {
                Ok(u) => BindValue::Uuid(u),
                Err(_) => BindValue::Text(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => BindValue::Json(value.clone()),
        }
    }
}

/// One executable statement: SQL text with `$n` placeholders plus the bound
/// values in order.
#[derive(Debug, Clone)]
pub struct StatementPlan {
    pub sql: String,
    pub params: Vec<BindValue>,
}

impl StatementPlan {
    fn new() -> Self {
        Self { sql: String::new(), params: Vec::new() }
    }

    fn push(&mut self, value: BindValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

fn quote(ident: &str) -> String {
    // Only registry-listed identifiers reach this point
    format!("\"{}\"", ident)
}

/// Ownership predicate plus soft-delete exclusion and any allowlisted
/// equality filters. The owner clause is always emitted first and everything
/// is combined with AND; there is no code path that produces OR here.
fn scoped_where(
    plan: &mut StatementPlan,
    desc: &ResourceDescriptor,
    tenant: Uuid,
    filters: &BTreeMap<String, Value>,
) -> Result<String, IsolationError> {
    let mut clauses = Vec::with_capacity(filters.len() + 2);
    let owner_param = plan.push(BindValue::Uuid(tenant));
    clauses.push(format!("{} = {}", quote(desc.owner_column), owner_param));
    clauses.push("\"deleted_at\" IS NULL".to_string());

    for (column, value) in filters {
        if !desc.is_filterable(column) {
            return Err(IsolationError::Validation(format!(
                "column '{}' is not filterable on {}",
                column, desc.kind
            )));
        }
        validate_filter_value(column, value)?;
        if value.is_null() {
            clauses.push(format!("{} IS NULL", quote(column)));
        } else {
            let param = plan.push(BindValue::from(value));
            clauses.push(format!("{} = {}", quote(column), param));
        }
    }

    Ok(clauses.join(" AND "))
}

fn select_clause(desc: &ResourceDescriptor, select: Option<&[String]>) -> Result<String, IsolationError> {
    match select {
        None => Ok("*".to_string()),
        Some(columns) if columns.is_empty() => Ok("*".to_string()),
        Some(columns) => {
            for column in columns {
                if !desc.is_selectable(column) {
                    return Err(IsolationError::Validation(format!(
                        "column '{}' is not selectable on {}",
                        column, desc.kind
                    )));
                }
            }
            Ok(columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "))
        }
    }
}

fn order_clause(desc: &ResourceDescriptor, opts: &ListOptions) -> Result<String, IsolationError> {
    if opts.order.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(opts.order.len());
    for spec in &opts.order {
        if !desc.is_sortable(&spec.column) {
            return Err(IsolationError::Validation(format!(
                "column '{}' is not sortable on {}",
                spec.column, desc.kind
            )));
        }
        parts.push(format!("{} {}", quote(&spec.column), spec.direction.to_sql()));
    }
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

/// Scoped list. Rows come back as `row_to_json` so any registered table maps
/// to dynamic records without a per-kind model type.
pub fn select_plan(
    desc: &ResourceDescriptor,
    tenant: Uuid,
    select: Option<&[String]>,
    opts: &ListOptions,
) -> Result<StatementPlan, IsolationError> {
    let mut plan = StatementPlan::new();
    let projection = select_clause(desc, select)?;
    let where_sql = scoped_where(&mut plan, desc, tenant, &opts.filters)?;
    let order_sql = order_clause(desc, opts)?;

    // limit/offset are validated integers, emitted as literals like any
    // pagination clause; caller data never lands in SQL text
    opts.validate(desc)?;
    plan.sql = format!(
        "SELECT row_to_json(t) AS row FROM (SELECT {} FROM {} WHERE {}{} LIMIT {} OFFSET {}) t",
        projection,
        quote(desc.table),
        where_sql,
        order_sql,
        opts.effective_limit(),
        opts.effective_offset(),
    );
    Ok(plan)
}

/// Count scoped identically to [`select_plan`] minus ordering/pagination.
pub fn count_plan(
    desc: &ResourceDescriptor,
    tenant: Uuid,
    opts: &ListOptions,
) -> Result<StatementPlan, IsolationError> {
    let mut plan = StatementPlan::new();
    let where_sql = scoped_where(&mut plan, desc, tenant, &opts.filters)?;
    plan.sql = format!(
        "SELECT COUNT(*) AS count FROM {} WHERE {}",
        quote(desc.table),
        where_sql,
    );
    Ok(plan)
}

/// Single-query lookup: `owner = $1 AND id = $2`. A foreign-tenant row and a
/// missing row take the same path and return the same zero-row result.
pub fn get_plan(desc: &ResourceDescriptor, tenant: Uuid, id: Uuid) -> StatementPlan {
    let mut plan = StatementPlan::new();
    let owner_param = plan.push(BindValue::Uuid(tenant));
    let id_param = plan.push(BindValue::Uuid(id));
    plan.sql = format!(
        "SELECT row_to_json(t) AS row FROM (SELECT * FROM {} WHERE {} = {} AND \"id\" = {} AND \"deleted_at\" IS NULL) t",
        quote(desc.table),
        quote(desc.owner_column),
        owner_param,
        id_param,
    );
    plan
}

enum PayloadMode {
    Insert,
    Update,
}

/// Validate a caller payload against the writable allowlist.
///
/// The owner column is dropped on insert (it gets stamped from the context,
/// whatever the caller sent) and rejected on update; other system columns are
/// rejected in both modes.
fn writable_payload(
    desc: &ResourceDescriptor,
    payload: &Value,
    mode: PayloadMode,
) -> Result<BTreeMap<String, Value>, IsolationError> {
    let object = payload.as_object().ok_or_else(|| {
        IsolationError::Validation("payload must be a JSON object".to_string())
    })?;

    let mut columns = BTreeMap::new();
    for (key, value) in object {
        if key == desc.owner_column {
            match mode {
                // Insert-time stamping is the one sanctioned override point
                PayloadMode::Insert => continue,
                PayloadMode::Update => {
                    return Err(IsolationError::Validation(format!(
                        "column '{}' cannot be modified",
                        desc.owner_column
                    )))
                }
            }
        }
        if SYSTEM_COLUMNS.contains(&key.as_str()) {
            return Err(IsolationError::Validation(format!(
                "column '{}' cannot be set directly",
                key
            )));
        }
        if !desc.is_writable(key) {
            return Err(IsolationError::Validation(format!(
                "column '{}' is not writable on {}",
                key, desc.kind
            )));
        }
        columns.insert(key.clone(), value.clone());
    }

    if columns.is_empty() {
        return Err(IsolationError::Validation("payload has no writable columns".to_string()));
    }
    Ok(columns)
}

/// Insert with the owner column unconditionally stamped from the tenant
/// context as the first column/parameter.
pub fn insert_plan(
    desc: &ResourceDescriptor,
    tenant: Uuid,
    payload: &Value,
) -> Result<StatementPlan, IsolationError> {
    let columns = writable_payload(desc, payload, PayloadMode::Insert)?;

    let mut plan = StatementPlan::new();
    let mut names = vec![quote(desc.owner_column)];
    let mut placeholders = vec![plan.push(BindValue::Uuid(tenant))];
    for (column, value) in &columns {
        names.push(quote(column));
        placeholders.push(plan.push(BindValue::from(value)));
    }

    plan.sql = format!(
        "INSERT INTO {table} ({names}) VALUES ({values}) RETURNING row_to_json({table}.*) AS row",
        table = quote(desc.table),
        names = names.join(", "),
        values = placeholders.join(", "),
    );
    Ok(plan)
}

/// Atomic scoped update: `WHERE owner = $1 AND id = $2`; zero rows matched
/// means not-found-or-forbidden at the call site.
pub fn update_plan(
    desc: &ResourceDescriptor,
    tenant: Uuid,
    id: Uuid,
    patch: &Value,
) -> Result<StatementPlan, IsolationError> {
    let columns = writable_payload(desc, patch, PayloadMode::Update)?;

    let mut plan = StatementPlan::new();
    let owner_param = plan.push(BindValue::Uuid(tenant));
    let id_param = plan.push(BindValue::Uuid(id));

    let mut assignments = Vec::with_capacity(columns.len() + 1);
    for (column, value) in &columns {
        let param = plan.push(BindValue::from(value));
        assignments.push(format!("{} = {}", quote(column), param));
    }
    assignments.push("\"updated_at\" = now()".to_string());

    plan.sql = format!(
        "UPDATE {table} SET {sets} WHERE {owner} = {op} AND \"id\" = {ip} AND \"deleted_at\" IS NULL RETURNING row_to_json({table}.*) AS row",
        table = quote(desc.table),
        sets = assignments.join(", "),
        owner = quote(desc.owner_column),
        op = owner_param,
        ip = id_param,
    );
    Ok(plan)
}

/// Soft delete under the same ownership-scoped WHERE clause as update.
pub fn delete_plan(desc: &ResourceDescriptor, tenant: Uuid, id: Uuid) -> StatementPlan {
    let mut plan = StatementPlan::new();
    let owner_param = plan.push(BindValue::Uuid(tenant));
    let id_param = plan.push(BindValue::Uuid(id));
    plan.sql = format!(
        "UPDATE {table} SET \"deleted_at\" = now(), \"updated_at\" = now() WHERE {owner} = {op} AND \"id\" = {ip} AND \"deleted_at\" IS NULL RETURNING row_to_json({table}.*) AS row",
        table = quote(desc.table),
        owner = quote(desc.owner_column),
        op = owner_param,
        ip = id_param,
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{descriptor, ResourceKind};
    use serde_json::json;

    fn tenant() -> Uuid {
        Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap()
    }

    #[test]
    fn select_binds_owner_first() {
        let desc = descriptor(ResourceKind::Students);
        let mut opts = ListOptions::default();
        opts.filters.insert("is_active".to_string(), json!(true));
        let plan = select_plan(desc, tenant(), None, &opts).unwrap();

        assert!(plan.sql.contains("WHERE \"platform_id\" = $1 AND"));
        assert_eq!(plan.params[0], BindValue::Uuid(tenant()));
        assert_eq!(plan.params[1], BindValue::Bool(true));
        assert!(!plan.sql.contains(" OR "));
    }

    #[test]
    fn count_scopes_identically() {
        let desc = descriptor(ResourceKind::Students);
        let mut opts = ListOptions::default();
        opts.filters.insert("last_name".to_string(), json!("Diaz"));
        let select = select_plan(desc, tenant(), None, &opts).unwrap();
        let count = count_plan(desc, tenant(), &opts).unwrap();

        assert!(count.sql.contains("WHERE \"platform_id\" = $1 AND"));
        assert_eq!(select.params, count.params);
    }

    #[test]
    fn get_conflates_owner_and_id_in_one_query() {
        let desc = descriptor(ResourceKind::Students);
        let id = Uuid::new_v4();
        let plan = get_plan(desc, tenant(), id);
        assert!(plan
            .sql
            .contains("WHERE \"platform_id\" = $1 AND \"id\" = $2 AND \"deleted_at\" IS NULL"));
        assert_eq!(plan.params, vec![BindValue::Uuid(tenant()), BindValue::Uuid(id)]);
    }

    #[test]
    fn insert_stamps_owner_from_context() {
        let desc = descriptor(ResourceKind::Students);
        let other_tenant = Uuid::new_v4();
        let payload = json!({
            "student_code": "X1",
            "first_name": "Ana",
            "platform_id": other_tenant.to_string(),
        });
        let plan = insert_plan(desc, tenant(), &payload).unwrap();

        // Owner column appears exactly once, bound to the context tenant
        assert_eq!(plan.sql.matches("\"platform_id\"").count(), 1);
        assert_eq!(plan.params[0], BindValue::Uuid(tenant()));
        assert!(!plan.params.contains(&BindValue::Uuid(other_tenant)));
    }

    #[test]
    fn insert_rejects_system_columns() {
        let desc = descriptor(ResourceKind::Students);
        let err = insert_plan(desc, tenant(), &json!({ "id": "abc", "first_name": "Ana" }))
            .unwrap_err();
        assert!(matches!(err, IsolationError::Validation(ref m) if m.contains("'id'")));
    }

    #[test]
    fn insert_rejects_unknown_columns() {
        let desc = descriptor(ResourceKind::Students);
        let err = insert_plan(desc, tenant(), &json!({ "favorite_color": "red" })).unwrap_err();
        assert!(matches!(err, IsolationError::Validation(ref m) if m.contains("favorite_color")));
    }

    #[test]
    fn update_rejects_owner_column() {
        let desc = descriptor(ResourceKind::Students);
        let err = update_plan(
            desc,
            tenant(),
            Uuid::new_v4(),
            &json!({ "platform_id": Uuid::new_v4().to_string() }),
        )
        .unwrap_err();
        assert!(matches!(err, IsolationError::Validation(ref m) if m.contains("cannot be modified")));
    }

    #[test]
    fn update_and_delete_scope_by_owner_and_id() {
        let desc = descriptor(ResourceKind::Incidents);
        let id = Uuid::new_v4();
        let update = update_plan(desc, tenant(), id, &json!({ "status": "resolved" })).unwrap();
        let delete = delete_plan(desc, tenant(), id);

        for plan in [&update, &delete] {
            assert!(plan.sql.contains("WHERE \"platform_id\" = $1 AND \"id\" = $2"));
            assert_eq!(plan.params[0], BindValue::Uuid(tenant()));
            assert_eq!(plan.params[1], BindValue::Uuid(id));
        }
    }

    #[test]
    fn uuid_shaped_strings_bind_as_uuid() {
        let person = Uuid::new_v4();
        assert_eq!(BindValue::from(&json!(person.to_string())), BindValue::Uuid(person));
        assert_eq!(
            BindValue::from(&json!("plain text")),
            BindValue::Text("plain text".to_string())
        );
    }
}
