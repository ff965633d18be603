use serde_json::Value;
use uuid::Uuid;

use crate::registry;

use super::error::IsolationError;
use super::plan::{BindValue, StatementPlan};

/// Clauses that may follow the WHERE expression in a single-table SELECT.
const TAIL_KEYWORDS: &[&str] = &["GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "FOR"];

/// Tenant-bind a raw parameterized SELECT.
///
/// The statement's single FROM target must resolve to a registered table;
/// the ownership predicate is then injected against that table (or its
/// alias) as an additional bound parameter. Anything that cannot be scoped
/// unambiguously fails closed with `UnscopableQuery`: multiple FROM targets,
/// joins, set operations, subqueries, string literals, comments, or
/// statement separators.
pub fn scope_raw_select(
    tenant: Uuid,
    sql: &str,
    params: Vec<Value>,
) -> Result<StatementPlan, IsolationError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(IsolationError::UnscopableQuery("empty statement".to_string()));
    }

    // Values belong in bound parameters; literals, comments and separators
    // in the SQL text are grounds for rejection, not inspection.
    for fragment in [";", "'", "--", "/*", "*/"] {
        if sql.contains(fragment) {
            return Err(IsolationError::UnscopableQuery(format!(
                "statement contains forbidden fragment '{}'",
                fragment
            )));
        }
    }

    let tokens = word_tokens(sql);
    match tokens.first() {
        Some(t) if t.word == "SELECT" => {}
        _ => {
            return Err(IsolationError::UnscopableQuery(
                "only SELECT statements can be tenant-scoped".to_string(),
            ))
        }
    }

    for token in &tokens {
        match token.word.as_str() {
            "JOIN" | "UNION" | "INTERSECT" | "EXCEPT" | "INTO" => {
                return Err(IsolationError::UnscopableQuery(format!(
                    "{} is not supported in scoped raw queries",
                    token.word
                )))
            }
            _ => {}
        }
    }
    if tokens.iter().filter(|t| t.word == "SELECT").count() > 1 {
        return Err(IsolationError::UnscopableQuery(
            "subqueries cannot be tenant-scoped".to_string(),
        ));
    }

    let from_tokens: Vec<&Token> = tokens.iter().filter(|t| t.word == "FROM").collect();
    let from = match from_tokens.as_slice() {
        [single] => *single,
        [] => {
            return Err(IsolationError::UnscopableQuery(
                "statement has no FROM target".to_string(),
            ))
        }
        _ => {
            return Err(IsolationError::UnscopableQuery(
                "statement has multiple FROM targets".to_string(),
            ))
        }
    };

    let (table, table_end) = parse_identifier(sql, from.end).ok_or_else(|| {
        IsolationError::UnscopableQuery("cannot determine FROM target".to_string())
    })?;
    let desc = registry::descriptor_for_table(&table).ok_or_else(|| {
        IsolationError::UnscopableQuery(format!("table '{}' is not registered", table))
    })?;
    let (alias, _) = parse_alias(sql, table_end);
    let qualifier = alias.unwrap_or_else(|| table.clone());

    let mut out_params: Vec<BindValue> = params.iter().map(BindValue::from).collect();
    out_params.push(BindValue::Uuid(tenant));
    let predicate = format!(
        "\"{}\".\"{}\" = ${}",
        qualifier,
        desc.owner_column,
        out_params.len()
    );

    let where_token = tokens.iter().find(|t| t.word == "WHERE");
    let rewritten = match where_token {
        Some(w) => {
            let tail = tokens
                .iter()
                .filter(|t| t.start > w.end && TAIL_KEYWORDS.contains(&t.word.as_str()))
                .map(|t| t.start)
                .min()
                .unwrap_or(sql.len());
            let expr = sql[w.end..tail].trim();
            if expr.is_empty() {
                return Err(IsolationError::UnscopableQuery("empty WHERE clause".to_string()));
            }
            format!(
                "{}WHERE {} AND ({}) {}",
                &sql[..w.start],
                predicate,
                expr,
                &sql[tail..]
            )
        }
        None => {
            let tail = tokens
                .iter()
                .filter(|t| t.start > table_end && TAIL_KEYWORDS.contains(&t.word.as_str()))
                .map(|t| t.start)
                .min()
                .unwrap_or(sql.len());
            format!(
                "{} WHERE {} {}",
                sql[..tail].trim_end(),
                predicate,
                &sql[tail..]
            )
        }
    };

    Ok(StatementPlan { sql: rewritten.trim_end().to_string(), params: out_params })
}

struct Token {
    start: usize,
    end: usize,
    word: String,
}

/// Bare-word tokens with byte offsets, skipping quoted identifiers.
fn word_tokens(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut in_quotes = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '"' {
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if in_quotes {
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token { start, end: i, word: sql[start..i].to_ascii_uppercase() });
        } else {
            i += 1;
        }
    }
    tokens
}

/// Parse a bare or quoted identifier starting at `pos` (whitespace skipped).
/// Returns the unquoted name and the byte offset just past it.
fn parse_identifier(sql: &str, pos: usize) -> Option<(String, usize)> {
    let bytes = sql.as_bytes();
    let mut i = pos;
    while i < bytes.len() && (bytes[i] as char).is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    if bytes[i] as char == '"' {
        let start = i + 1;
        let mut j = start;
        while j < bytes.len() && bytes[j] as char != '"' {
            j += 1;
        }
        if j >= bytes.len() || j == start {
            return None;
        }
        return Some((sql[start..j].to_string(), j + 1));
    }
    let start = i;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphanumeric() || c == '_' {
            i += 1;
        } else {
            break;
        }
    }
    if i == start {
        return None;
    }
    Some((sql[start..i].to_string(), i))
}

/// Optional `alias` or `AS alias` following the FROM target.
fn parse_alias(sql: &str, pos: usize) -> (Option<String>, usize) {
    match parse_identifier(sql, pos) {
        Some((word, end)) => {
            let upper = word.to_ascii_uppercase();
            if upper == "AS" {
                match parse_identifier(sql, end) {
                    Some((alias, alias_end)) => (Some(alias), alias_end),
                    None => (None, pos),
                }
            } else if TAIL_KEYWORDS.contains(&upper.as_str()) || upper == "WHERE" {
                (None, pos)
            } else {
                (Some(word), end)
            }
        }
        None => (None, pos),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> Uuid {
        Uuid::parse_str("99999999-8888-7777-6666-555555555555").unwrap()
    }

    #[test]
    fn appends_predicate_when_no_where() {
        let plan = scope_raw_select(tenant(), "SELECT status FROM attendance_records", vec![]).unwrap();
        assert_eq!(
            plan.sql,
            "SELECT status FROM attendance_records WHERE \"attendance_records\".\"platform_id\" = $1"
        );
        assert_eq!(plan.params, vec![BindValue::Uuid(tenant())]);
    }

    #[test]
    fn wraps_existing_where_in_parens() {
        let plan = scope_raw_select(
            tenant(),
            "SELECT * FROM students WHERE is_active = $1 ORDER BY last_name",
            vec![json!(true)],
        )
        .unwrap();
        assert!(plan.sql.contains("WHERE \"students\".\"platform_id\" = $2 AND (is_active = $1)"));
        assert!(plan.sql.ends_with("ORDER BY last_name"));
        assert_eq!(plan.params, vec![BindValue::Bool(true), BindValue::Uuid(tenant())]);
    }

    #[test]
    fn binds_against_alias() {
        let plan =
            scope_raw_select(tenant(), "SELECT s.email FROM students s WHERE s.is_active = $1", vec![json!(true)])
                .unwrap();
        assert!(plan.sql.contains("\"s\".\"platform_id\" = $2"));
    }

    #[test]
    fn handles_as_alias_and_quoted_table() {
        let plan = scope_raw_select(tenant(), "SELECT a.status FROM \"attendance_records\" AS a", vec![]).unwrap();
        assert!(plan.sql.contains("\"a\".\"platform_id\" = $1"));
    }

    #[test]
    fn rejects_unregistered_table() {
        let err = scope_raw_select(tenant(), "SELECT * FROM platform_settings", vec![]).unwrap_err();
        assert!(matches!(err, IsolationError::UnscopableQuery(ref m) if m.contains("platform_settings")));
    }

    #[test]
    fn rejects_joins_and_subqueries() {
        for sql in [
            "SELECT * FROM students JOIN enrollments ON true",
            "SELECT * FROM students WHERE id IN (SELECT student_id FROM enrollments)",
            "SELECT * FROM students UNION SELECT * FROM employees",
        ] {
            assert!(matches!(
                scope_raw_select(tenant(), sql, vec![]),
                Err(IsolationError::UnscopableQuery(_))
            ));
        }
    }

    #[test]
    fn rejects_literals_comments_and_separators() {
        for sql in [
            "SELECT * FROM students WHERE email = 'x@y'",
            "SELECT * FROM students; DELETE FROM students",
            "SELECT * FROM students -- comment",
            "SELECT * FROM students /* comment */",
        ] {
            assert!(matches!(
                scope_raw_select(tenant(), sql, vec![]),
                Err(IsolationError::UnscopableQuery(_))
            ));
        }
    }

    #[test]
    fn rejects_non_select() {
        let err = scope_raw_select(tenant(), "DELETE FROM students", vec![]).unwrap_err();
        assert!(matches!(err, IsolationError::UnscopableQuery(_)));
    }
}
