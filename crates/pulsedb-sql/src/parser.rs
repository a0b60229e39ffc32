//! SQL parser for PulseDB queries
//!
//! sqlparser-rs does the heavy lifting. The non-standard time-window
//! clauses (`ASOF '-1h'`, `UNTIL '-5m'`, `RESOLUTION '5m'`) are stripped by
//! a small token pre-pass before the statement reaches the real parser,
//! the same way special commands are special-cased ahead of the dialect
//! parser elsewhere in this codebase's lineage.

use std::sync::Arc;
use std::time::Duration;

use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, GroupByExpr, Select, SelectItem, SetExpr,
    Statement, TableFactor, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use pulsedb_core::{Timestamp, Value};

use crate::error::SqlError;
use crate::expr::{AggExpr, CmpOp, Field, GroupBy, Predicate, SubQueryResults};
use crate::Result;
use crate::types::{OrderBy, Query, SubQuery};

/// Supplies a table's declared fields so bare identifiers in a projection
/// can resolve to their defining expressions.
pub type FieldSource = Arc<dyn Fn(&str) -> Option<Vec<Field>> + Send + Sync>;

/// A field source that resolves nothing; bare identifiers fall back to
/// pass-through sums.
pub fn empty_field_source() -> FieldSource {
    Arc::new(|_| None)
}

/// Parse one SELECT statement into a [`Query`].
pub fn parse(sql: &str, field_source: &FieldSource) -> Result<Query> {
    let clauses = extract_time_clauses(sql)?;

    let dialect = GenericDialect {};
    let ast = Parser::parse_sql(&dialect, &clauses.sql)
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    if ast.len() != 1 {
        return Err(SqlError::Parse(format!(
            "expected exactly one statement, got {}",
            ast.len()
        )));
    }

    let query = match &ast[0] {
        Statement::Query(query) => query,
        other => {
            return Err(SqlError::Unsupported(format!(
                "only SELECT statements are supported, got: {other}"
            )))
        }
    };

    let select = match &*query.body {
        SetExpr::Select(select) => select,
        _ => {
            return Err(SqlError::Unsupported(
                "only plain SELECT queries are supported".to_string(),
            ))
        }
    };

    let (from, from_subquery) = lower_from(select)?;
    let (group_by, group_by_all) = lower_group_by(select)?;
    let (fields, has_specific_fields) =
        lower_projection(select, &from, &group_by, field_source)?;

    let mut sub_queries = Vec::new();
    let (where_clause, where_sql) = match &select.selection {
        Some(selection) => (
            Some(lower_predicate(selection, &mut sub_queries)?),
            selection.to_string(),
        ),
        None => (None, String::new()),
    };

    let order_by = query
        .order_by
        .iter()
        .map(|ob| OrderBy {
            name: canonical_name(&ob.expr),
            descending: ob.asc == Some(false),
        })
        .collect();

    let limit = match &query.limit {
        Some(expr) => literal_usize(expr)?,
        None => 0,
    };
    let offset = match &query.offset {
        Some(o) => literal_usize(&o.value)?,
        None => 0,
    };

    let (as_of, as_of_offset) = clauses.as_of.map(TimeSpec::split).unwrap_or_default();
    let (until, until_offset) = clauses.until.map(TimeSpec::split).unwrap_or_default();

    Ok(Query {
        sql: sql.to_string(),
        from,
        from_subquery,
        fields,
        has_specific_fields,
        group_by,
        group_by_all,
        where_clause,
        where_sql,
        sub_queries,
        as_of,
        until,
        as_of_offset,
        until_offset,
        resolution: clauses.resolution.unwrap_or(Duration::ZERO),
        order_by,
        offset,
        limit,
    })
}

// ---------------------------------------------------------------------------
// FROM / GROUP BY / projection lowering
// ---------------------------------------------------------------------------

fn lower_from(select: &Select) -> Result<(String, Option<String>)> {
    if select.from.len() != 1 {
        return Err(SqlError::Unsupported(
            "exactly one FROM source is required".to_string(),
        ));
    }
    let table = &select.from[0];
    if !table.joins.is_empty() {
        return Err(SqlError::Unsupported("JOIN is not supported".to_string()));
    }
    match &table.relation {
        TableFactor::Table { name, .. } => {
            Ok((name.to_string().trim().to_lowercase(), None))
        }
        TableFactor::Derived { lateral, subquery, .. } => {
            if *lateral {
                return Err(SqlError::NestedFromSubquery);
            }
            // The derived source must itself be a flat, unflattenable SELECT.
            if !matches!(&*subquery.body, SetExpr::Select(_)) {
                return Err(SqlError::NestedFromSubquery);
            }
            Ok((String::new(), Some(subquery.to_string())))
        }
        _ => Err(SqlError::NestedFromSubquery),
    }
}

fn lower_group_by(select: &Select) -> Result<(Vec<GroupBy>, bool)> {
    match &select.group_by {
        GroupByExpr::All => Ok((Vec::new(), true)),
        GroupByExpr::Expressions(exprs) => {
            if exprs.is_empty() {
                return Ok((Vec::new(), true));
            }
            let mut group_by = Vec::with_capacity(exprs.len());
            for expr in exprs {
                match expr {
                    Expr::Identifier(ident) => {
                        group_by.push(GroupBy::new(ident.value.to_lowercase()));
                    }
                    other => {
                        return Err(SqlError::Unsupported(format!(
                            "GROUP BY supports dimension names only, got: {other}"
                        )))
                    }
                }
            }
            Ok((group_by, false))
        }
    }
}

fn lower_projection(
    select: &Select,
    from: &str,
    group_by: &[GroupBy],
    field_source: &FieldSource,
) -> Result<(Vec<Field>, bool)> {
    let table_fields = (field_source)(from);
    let mut fields = Vec::new();
    let mut has_specific_fields = false;

    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {}
            SelectItem::UnnamedExpr(expr) => {
                has_specific_fields = true;
                if let Some(field) = lower_field(expr, None, group_by, table_fields.as_deref())? {
                    fields.push(field);
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                has_specific_fields = true;
                let name = alias.value.to_lowercase();
                if let Some(field) =
                    lower_field(expr, Some(name), group_by, table_fields.as_deref())?
                {
                    fields.push(field);
                }
            }
        }
    }
    Ok((fields, has_specific_fields))
}

/// Lower one projection expression. Bare identifiers naming a GROUP BY
/// dimension are not fields; they surface through the row key.
fn lower_field(
    expr: &Expr,
    alias: Option<String>,
    group_by: &[GroupBy],
    table_fields: Option<&[Field]>,
) -> Result<Option<Field>> {
    match expr {
        Expr::Identifier(ident) => {
            let name = ident.value.to_lowercase();
            if group_by.iter().any(|g| g.name == name) {
                return Ok(None);
            }
            let field = table_fields
                .and_then(|fs| fs.iter().find(|f| f.name == name))
                .map(|f| Field::new(alias.clone().unwrap_or_else(|| name.clone()), f.expr.clone()))
                .unwrap_or_else(|| {
                    Field::new(alias.unwrap_or_else(|| name.clone()), AggExpr::Sum(name))
                });
            Ok(Some(field))
        }
        Expr::Function(func) => {
            let agg = lower_aggregate(func)?;
            let name = alias.unwrap_or_else(|| canonical_name(expr));
            Ok(Some(Field::new(name, agg)))
        }
        other => Err(SqlError::Unsupported(format!(
            "unsupported projection expression: {other}"
        ))),
    }
}

fn lower_aggregate(func: &sqlparser::ast::Function) -> Result<AggExpr> {
    let fname = func.name.to_string().to_lowercase();
    let arg = match func.args.as_slice() {
        [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => "*".to_string(),
        [FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Identifier(ident)))] => {
            ident.value.to_lowercase()
        }
        _ => {
            return Err(SqlError::Unsupported(format!(
                "aggregate arguments must be a single column or *: {func}"
            )))
        }
    };
    match fname.as_str() {
        "sum" => Ok(AggExpr::Sum(arg)),
        "count" => Ok(AggExpr::Count(arg)),
        "min" => Ok(AggExpr::Min(arg)),
        "max" => Ok(AggExpr::Max(arg)),
        "avg" => Ok(AggExpr::Avg(arg)),
        other => Err(SqlError::Unsupported(format!("unknown aggregate: {other}"))),
    }
}

/// Canonical ORDER BY / field label, e.g. `SUM(x)` -> `sum(x)`.
fn canonical_name(expr: &Expr) -> String {
    expr.to_string().to_lowercase().replace(' ', "")
}

// ---------------------------------------------------------------------------
// WHERE lowering
// ---------------------------------------------------------------------------

fn lower_predicate(expr: &Expr, sub_queries: &mut Vec<SubQuery>) -> Result<Predicate> {
    match expr {
        Expr::Nested(inner) => lower_predicate(inner, sub_queries),
        Expr::UnaryOp { op: UnaryOperator::Not, expr } => {
            Ok(Predicate::Not(Box::new(lower_predicate(expr, sub_queries)?)))
        }
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => Ok(Predicate::And(
            Box::new(lower_predicate(left, sub_queries)?),
            Box::new(lower_predicate(right, sub_queries)?),
        )),
        Expr::BinaryOp { left, op: BinaryOperator::Or, right } => Ok(Predicate::Or(
            Box::new(lower_predicate(left, sub_queries)?),
            Box::new(lower_predicate(right, sub_queries)?),
        )),
        Expr::BinaryOp { left, op, right } => lower_cmp(left, op, right),
        Expr::InSubquery { expr, subquery, negated } => {
            let dim = match &**expr {
                Expr::Identifier(ident) => ident.value.to_lowercase(),
                other => {
                    return Err(SqlError::Unsupported(format!(
                        "IN requires a dimension name on the left, got: {other}"
                    )))
                }
            };
            let results = SubQueryResults::new();
            sub_queries.push(SubQuery {
                dim: dim.clone(),
                sql: subquery.to_string(),
                results: results.clone(),
            });
            let pred = Predicate::In { dim, results };
            Ok(if *negated { Predicate::Not(Box::new(pred)) } else { pred })
        }
        other => Err(SqlError::Unsupported(format!(
            "unsupported WHERE expression: {other}"
        ))),
    }
}

fn lower_cmp(left: &Expr, op: &BinaryOperator, right: &Expr) -> Result<Predicate> {
    let cmp_op = match op {
        BinaryOperator::Eq => CmpOp::Eq,
        BinaryOperator::NotEq => CmpOp::Ne,
        BinaryOperator::Lt => CmpOp::Lt,
        BinaryOperator::LtEq => CmpOp::Le,
        BinaryOperator::Gt => CmpOp::Gt,
        BinaryOperator::GtEq => CmpOp::Ge,
        other => {
            return Err(SqlError::Unsupported(format!(
                "unsupported comparison operator: {other}"
            )))
        }
    };
    match (left, right) {
        (Expr::Identifier(ident), Expr::Value(value)) => Ok(Predicate::Cmp {
            dim: ident.value.to_lowercase(),
            op: cmp_op,
            value: literal_value(value)?,
        }),
        (Expr::Value(value), Expr::Identifier(ident)) => Ok(Predicate::Cmp {
            dim: ident.value.to_lowercase(),
            op: mirror(cmp_op),
            value: literal_value(value)?,
        }),
        _ => Err(SqlError::Unsupported(format!(
            "comparisons must be between a dimension and a literal: {left} {op} {right}"
        ))),
    }
}

fn mirror(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::Le => CmpOp::Ge,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::Ge => CmpOp::Le,
        other => other,
    }
}

fn literal_value(value: &SqlValue) -> Result<Value> {
    match value {
        SqlValue::Number(raw, _) => {
            if raw.contains('.') || raw.contains('e') || raw.contains('E') {
                raw.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| SqlError::Parse(format!("bad number literal: {raw}")))
            } else {
                raw.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| SqlError::Parse(format!("bad number literal: {raw}")))
            }
        }
        SqlValue::SingleQuotedString(s) => Ok(Value::Str(s.clone())),
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        other => Err(SqlError::Unsupported(format!("unsupported literal: {other}"))),
    }
}

fn literal_usize(expr: &Expr) -> Result<usize> {
    match expr {
        Expr::Value(SqlValue::Number(raw, _)) => raw
            .parse::<usize>()
            .map_err(|_| SqlError::Parse(format!("bad count literal: {raw}"))),
        other => Err(SqlError::Unsupported(format!(
            "LIMIT/OFFSET must be integer literals: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// ASOF / UNTIL / RESOLUTION pre-pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeSpec {
    /// Signed nanosecond offset relative to the table's "now".
    Offset(i64),
    Absolute(Timestamp),
}

impl TimeSpec {
    fn split(self) -> (Timestamp, i64) {
        match self {
            TimeSpec::Offset(nanos) => (Timestamp::ZERO, nanos),
            TimeSpec::Absolute(ts) => (ts, 0),
        }
    }
}

#[derive(Debug, Default)]
struct TimeClauses {
    sql: String,
    as_of: Option<TimeSpec>,
    until: Option<TimeSpec>,
    resolution: Option<Duration>,
}

/// Strip `ASOF` / `UNTIL` / `RESOLUTION` clauses from the top level of the
/// statement. The clauses are only recognized at paren depth zero; inside a
/// sub-select they are rejected rather than silently reattributed.
fn extract_time_clauses(sql: &str) -> Result<TimeClauses> {
    let mut clauses = TimeClauses::default();
    let mut kept: Vec<String> = Vec::new();
    let mut depth = 0i32;

    let tokens = tokenize(sql);
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        let upper = token.to_uppercase();
        let is_clause = matches!(upper.as_str(), "ASOF" | "UNTIL" | "RESOLUTION");
        if is_clause {
            if depth != 0 {
                return Err(SqlError::Unsupported(format!(
                    "{upper} is only supported on the top-level query"
                )));
            }
            let arg = tokens
                .get(i + 1)
                .ok_or_else(|| SqlError::Parse(format!("{upper} requires an argument")))?;
            let arg = arg.trim_end_matches(';').trim_matches('\'');
            match upper.as_str() {
                "ASOF" => clauses.as_of = Some(parse_time_spec(arg)?),
                "UNTIL" => clauses.until = Some(parse_time_spec(arg)?),
                _ => clauses.resolution = Some(parse_duration(arg)?),
            }
            i += 2;
            continue;
        }
        if !token.starts_with('\'') {
            for c in token.chars() {
                match c {
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    _ => {}
                }
            }
        }
        kept.push(token.clone());
        i += 1;
    }
    clauses.sql = kept.join(" ");
    Ok(clauses)
}

/// Split on whitespace, keeping single-quoted strings (with their quotes)
/// as one token.
fn tokenize(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in sql.chars() {
        if in_quote {
            current.push(c);
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => {
                current.push(c);
                in_quote = true;
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_time_spec(raw: &str) -> Result<TimeSpec> {
    if let Some(rest) = raw.strip_prefix('-') {
        let d = parse_duration(rest)?;
        return Ok(TimeSpec::Offset(-(d.as_nanos() as i64)));
    }
    if let Some(rest) = raw.strip_prefix('+') {
        let d = parse_duration(rest)?;
        return Ok(TimeSpec::Offset(d.as_nanos() as i64));
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| SqlError::Parse(format!("bad time literal '{raw}': {e}")))?;
    let nanos = parsed
        .timestamp_nanos_opt()
        .ok_or_else(|| SqlError::Parse(format!("time out of range: {raw}")))?;
    Ok(TimeSpec::Absolute(Timestamp::from_nanos(nanos as u64)))
}

/// Parse compound durations like `1h30m` or `15s`.
fn parse_duration(raw: &str) -> Result<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let mut unit = c.to_string();
        if let Some(&next) = chars.peek() {
            if !next.is_ascii_digit() {
                unit.push(next);
                chars.next();
            }
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| SqlError::Parse(format!("bad duration: {raw}")))?;
        digits.clear();
        let part = match unit.as_str() {
            "ns" => Duration::from_nanos(n),
            "us" => Duration::from_micros(n),
            "ms" => Duration::from_millis(n),
            "s" => Duration::from_secs(n),
            "m" => Duration::from_secs(n * 60),
            "h" => Duration::from_secs(n * 3600),
            "d" => Duration::from_secs(n * 86_400),
            "w" => Duration::from_secs(n * 604_800),
            other => return Err(SqlError::Parse(format!("bad duration unit: {other}"))),
        };
        total += part;
    }
    if !digits.is_empty() {
        return Err(SqlError::Parse(format!("duration missing unit: {raw}")));
    }
    if total.is_zero() {
        return Err(SqlError::Parse(format!("empty duration: {raw}")));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_simple(sql: &str) -> Query {
        parse(sql, &empty_field_source()).unwrap()
    }

    #[test]
    fn test_simple_select() {
        let q = parse_simple("SELECT SUM(x) FROM t");
        assert_eq!(q.from, "t");
        assert!(q.from_subquery.is_none());
        assert_eq!(q.fields, vec![Field::new("sum(x)", AggExpr::Sum("x".to_string()))]);
        assert!(q.has_specific_fields);
        assert!(q.group_by_all);
        assert!(q.where_clause.is_none());
        assert_eq!(q.limit, 0);
        assert_eq!(q.offset, 0);
    }

    #[test]
    fn test_select_star() {
        let q = parse_simple("SELECT * FROM t");
        assert!(!q.has_specific_fields);
        assert!(q.fields.is_empty());
        assert!(q.group_by_all);
    }

    #[test]
    fn test_aliases_and_aggregates() {
        let q = parse_simple("SELECT SUM(x) AS total, COUNT(*), AVG(y) FROM t");
        assert_eq!(q.fields.len(), 3);
        assert_eq!(q.fields[0], Field::new("total", AggExpr::Sum("x".to_string())));
        assert_eq!(q.fields[1], Field::new("count(*)", AggExpr::Count("*".to_string())));
        assert_eq!(q.fields[2], Field::new("avg(y)", AggExpr::Avg("y".to_string())));
    }

    #[test]
    fn test_group_by_dims_are_not_fields() {
        let q = parse_simple("SELECT d, SUM(x) FROM t GROUP BY d");
        assert!(!q.group_by_all);
        assert_eq!(q.group_by, vec![GroupBy::new("d")]);
        assert_eq!(q.fields, vec![Field::new("sum(x)", AggExpr::Sum("x".to_string()))]);
    }

    #[test]
    fn test_bare_ident_resolves_through_field_source() {
        let source: FieldSource = Arc::new(|table| {
            (table == "t").then(|| vec![Field::new("x", AggExpr::Max("raw_x".to_string()))])
        });
        let q = parse("SELECT x FROM t", &source).unwrap();
        assert_eq!(q.fields, vec![Field::new("x", AggExpr::Max("raw_x".to_string()))]);
    }

    #[test]
    fn test_bare_ident_defaults_to_sum() {
        let q = parse_simple("SELECT a FROM t");
        assert_eq!(q.fields, vec![Field::new("a", AggExpr::Sum("a".to_string()))]);
    }

    #[test]
    fn test_where_comparisons() {
        let q = parse_simple("SELECT SUM(x) FROM t WHERE y > 0 AND host = 'web-1'");
        assert_eq!(q.where_sql, "y > 0 AND host = 'web-1'");
        let p = q.where_clause.unwrap();
        match p {
            Predicate::And(l, r) => {
                assert!(matches!(
                    *l,
                    Predicate::Cmp { ref dim, op: CmpOp::Gt, value: Value::Int(0) } if dim == "y"
                ));
                assert!(matches!(
                    *r,
                    Predicate::Cmp { ref dim, op: CmpOp::Eq, value: Value::Str(_) } if dim == "host"
                ));
            }
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn test_where_reversed_operands() {
        let q = parse_simple("SELECT SUM(x) FROM t WHERE 0 < y");
        assert!(matches!(
            q.where_clause.unwrap(),
            Predicate::Cmp { ref dim, op: CmpOp::Gt, value: Value::Int(0) } if dim == "y"
        ));
    }

    #[test]
    fn test_in_subquery() {
        let q = parse_simple("SELECT SUM(x) FROM t WHERE d IN (SELECT d FROM u GROUP BY d)");
        assert_eq!(q.sub_queries.len(), 1);
        assert_eq!(q.sub_queries[0].dim, "d");
        assert!(q.sub_queries[0].sql.to_lowercase().contains("from u"));
        assert!(matches!(q.where_clause.unwrap(), Predicate::In { .. }));
    }

    #[test]
    fn test_from_subquery() {
        let q = parse_simple("SELECT a FROM (SELECT SUM(x) AS a FROM t)");
        assert_eq!(q.from, "");
        let inner = q.from_subquery.unwrap();
        assert!(inner.to_lowercase().starts_with("select"));
        // The inner statement must itself be parseable.
        let inner_q = parse_simple(&inner);
        assert_eq!(inner_q.from, "t");
        assert_eq!(inner_q.fields, vec![Field::new("a", AggExpr::Sum("x".to_string()))]);
    }

    #[test]
    fn test_order_limit_offset() {
        let q = parse_simple("SELECT d, SUM(x) FROM t GROUP BY d ORDER BY SUM(x) DESC OFFSET 1 LIMIT 1");
        assert_eq!(
            q.order_by,
            vec![OrderBy { name: "sum(x)".to_string(), descending: true }]
        );
        assert_eq!(q.offset, 1);
        assert_eq!(q.limit, 1);
    }

    #[test]
    fn test_time_clauses() {
        let q = parse_simple("SELECT SUM(x) FROM t ASOF '-1h' UNTIL '-5m' RESOLUTION '5m'");
        assert_eq!(q.as_of_offset, -3_600_000_000_000);
        assert_eq!(q.until_offset, -300_000_000_000);
        assert_eq!(q.resolution, Duration::from_secs(300));
        assert!(q.as_of.is_zero());
        assert!(q.until.is_zero());
    }

    #[test]
    fn test_absolute_asof() {
        let q = parse_simple("SELECT SUM(x) FROM t ASOF '2026-01-02T00:00:00Z'");
        assert_eq!(q.as_of_offset, 0);
        assert!(!q.as_of.is_zero());
    }

    #[test]
    fn test_time_clause_inside_subquery_is_rejected() {
        let err =
            parse("SELECT a FROM (SELECT SUM(x) AS a FROM t ASOF '-1h')", &empty_field_source())
                .unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
    }

    #[test]
    fn test_join_is_unsupported() {
        let err = parse("SELECT SUM(x) FROM a JOIN b ON a.d = b.d", &empty_field_source())
            .unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
    }

    #[test]
    fn test_parse_error_surfaces() {
        let err = parse("SELECT FROM WHERE", &empty_field_source()).unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("abc").is_err());
    }
}
