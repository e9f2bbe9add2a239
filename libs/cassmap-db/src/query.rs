//! CQL text and bind values for the statements a mapper issues.

use std::fmt::Write as _;

use crate::codec::{self, Value};
use crate::error::{MapperError, Result};
use crate::metadata::EntityMetadata;

/// Double-quote an identifier, doubling embedded quotes.
#[must_use]
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Query text plus encoded bind values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub cql: String,
    pub params: Vec<Option<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Eq(Value),
    In(Vec<Value>),
}

impl From<Value> for Criterion {
    fn from(v: Value) -> Self {
        Self::Eq(v)
    }
}

impl From<Vec<Value>> for Criterion {
    fn from(v: Vec<Value>) -> Self {
        Self::In(v)
    }
}

/// Equality filters keyed by field or column name, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    items: Vec<(String, Criterion)>,
}

impl Criteria {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn equals(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.items.push((name.into(), Criterion::Eq(value.into())));
        self
    }

    #[must_use]
    pub fn is_in<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.items.push((name.into(), Criterion::In(values)));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, C: Into<Criterion>> FromIterator<(K, C)> for Criteria {
    fn from_iter<T: IntoIterator<Item = (K, C)>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().map(|(k, c)| (k.into(), c.into())).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Ordering, paging and filtering for `load_where`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub order: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    /// Rows skipped on the client; CQL has no OFFSET.
    pub offset: usize,
    pub allow_filtering: bool,
}

impl LoadOptions {
    #[must_use]
    pub fn order_by(mut self, name: impl Into<String>, direction: Direction) -> Self {
        self.order.push((name.into(), direction));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn allow_filtering(mut self) -> Self {
        self.allow_filtering = true;
        self
    }
}

fn encode(meta: &EntityMetadata, idx: usize, value: &Value) -> Result<Option<Vec<u8>>> {
    let f = meta.field(idx);
    codec::pack(value, f.ty).map_err(|e| MapperError::codec(&f.column, e))
}

/// `"a" = ? AND "b" = ?` over the leading key columns.
fn key_clause(meta: &EntityMetadata, key: &[Value], params: &mut Vec<Option<Vec<u8>>>) -> Result<String> {
    if key.len() < meta.partition_key().len() || key.len() > meta.key_len() {
        return Err(MapperError::InvalidLoad(format!(
            "expected between {} and {} key values for {}, got {}",
            meta.partition_key().len(),
            meta.key_len(),
            meta.name(),
            key.len()
        )));
    }
    let mut parts = Vec::with_capacity(key.len());
    for (idx, value) in meta.key_indexes().zip(key) {
        let column = &meta.field(idx).column;
        if value.is_null() {
            return Err(MapperError::MissingKey(column.clone()));
        }
        params.push(encode(meta, idx, value)?);
        parts.push(format!("{} = ?", quote(column)));
    }
    Ok(parts.join(" AND "))
}

fn criteria_clause(
    meta: &EntityMetadata,
    criteria: &Criteria,
    params: &mut Vec<Option<Vec<u8>>>,
) -> Result<Option<String>> {
    let mut parts = Vec::new();
    for (name, criterion) in criteria.iter() {
        let idx = meta.require(name)?;
        let column = quote(&meta.field(idx).column);
        match criterion {
            Criterion::Eq(v) => {
                params.push(encode(meta, idx, v)?);
                parts.push(format!("{column} = ?"));
            }
            Criterion::In(values) if values.is_empty() => {}
            Criterion::In(values) => {
                for v in values {
                    params.push(encode(meta, idx, v)?);
                }
                let marks = vec!["?"; values.len()].join(", ");
                parts.push(format!("{column} IN ({marks})"));
            }
        }
    }
    Ok((!parts.is_empty()).then(|| parts.join(" AND ")))
}

/// Point lookup by full key or a key prefix covering the partition key.
///
/// # Errors
/// Returns `InvalidLoad` for a wrong key arity and `MissingKey` for null parts.
pub fn select_by_key(meta: &EntityMetadata, key: &[Value]) -> Result<Statement> {
    let mut params = Vec::with_capacity(key.len());
    let clause = key_clause(meta, key, &mut params)?;
    Ok(Statement {
        cql: format!("SELECT * FROM {} WHERE {clause}", quote(meta.table())),
        params,
    })
}

/// Filtered select. Empty criteria selects every row.
///
/// # Errors
/// Returns `UnknownField` for criteria or order names that are not mapped.
pub fn select_where(meta: &EntityMetadata, criteria: &Criteria, opts: &LoadOptions) -> Result<Statement> {
    let mut params = Vec::new();
    let mut cql = format!("SELECT * FROM {}", quote(meta.table()));
    if let Some(clause) = criteria_clause(meta, criteria, &mut params)? {
        cql.push_str(" WHERE ");
        cql.push_str(&clause);
    }
    if !opts.order.is_empty() {
        let mut order = Vec::with_capacity(opts.order.len());
        for (name, dir) in &opts.order {
            let column = quote(&meta.field(meta.require(name)?).column);
            let dir = match dir {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            order.push(format!("{column} {dir}"));
        }
        cql.push_str(" ORDER BY ");
        cql.push_str(&order.join(", "));
    }
    if let Some(limit) = opts.limit {
        write!(cql, " LIMIT {}", limit.saturating_add(opts.offset)).map_err(anyhow::Error::from)?;
    }
    if opts.allow_filtering {
        cql.push_str(" ALLOW FILTERING");
    }
    Ok(Statement { cql, params })
}

/// # Errors
/// Returns `InvalidCriteria` when no usable criterion remains.
pub fn delete_where(meta: &EntityMetadata, criteria: &Criteria) -> Result<Statement> {
    let mut params = Vec::new();
    let clause = criteria_clause(meta, criteria, &mut params)?.ok_or_else(|| {
        MapperError::InvalidCriteria(format!("refusing to delete every row of {}", meta.table()))
    })?;
    Ok(Statement {
        cql: format!("DELETE FROM {} WHERE {clause}", quote(meta.table())),
        params,
    })
}

/// # Errors
/// Returns `MissingKey` for null key parts.
pub fn delete_by_key(meta: &EntityMetadata, key: &[Value]) -> Result<Statement> {
    let mut params = Vec::with_capacity(key.len());
    let clause = key_clause(meta, key, &mut params)?;
    Ok(Statement {
        cql: format!("DELETE FROM {} WHERE {clause}", quote(meta.table())),
        params,
    })
}

/// `INSERT` of the given (field index, value) pairs.
///
/// # Errors
/// Returns a codec error when a value does not fit its column.
pub fn upsert(meta: &EntityMetadata, values: &[(usize, &Value)]) -> Result<Statement> {
    let mut columns = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len());
    for (idx, value) in values {
        columns.push(quote(&meta.field(*idx).column));
        params.push(encode(meta, *idx, value)?);
    }
    let marks = vec!["?"; values.len()].join(", ");
    Ok(Statement {
        cql: format!(
            "INSERT INTO {} ({}) VALUES ({marks})",
            quote(meta.table()),
            columns.join(", ")
        ),
        params,
    })
}

/// `UPDATE t SET "c" = "c" + ? WHERE ...`, or `-` when `subtract` is set.
///
/// # Errors
/// Returns `MissingKey` for null key parts.
pub fn counter_update(
    meta: &EntityMetadata,
    idx: usize,
    amount: i64,
    subtract: bool,
    key: &[Value],
) -> Result<Statement> {
    let column = quote(&meta.field(idx).column);
    let op = if subtract { '-' } else { '+' };
    let mut params = vec![encode(meta, idx, &Value::Counter(amount))?];
    let clause = key_clause(meta, key, &mut params)?;
    Ok(Statement {
        cql: format!(
            "UPDATE {} SET {column} = {column} {op} ? WHERE {clause}",
            quote(meta.table())
        ),
        params,
    })
}

/// `CREATE TABLE IF NOT EXISTS` from the declared columns and key split.
#[must_use]
pub fn create_table(meta: &EntityMetadata) -> String {
    let mut defs: Vec<String> = meta
        .fields()
        .iter()
        .map(|f| {
            let mut d = format!("{} {}", quote(&f.column), f.ty.cql_name());
            if f.is_static {
                d.push_str(" static");
            }
            d
        })
        .collect();
    let partition: Vec<String> = meta
        .partition_key()
        .iter()
        .map(|i| quote(&meta.field(*i).column))
        .collect();
    let mut key = format!("({})", partition.join(", "));
    for i in meta.clustering_key() {
        key.push_str(", ");
        key.push_str(&quote(&meta.field(*i).column));
    }
    defs.push(format!("PRIMARY KEY ({key})"));
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(meta.table()),
        defs.join(", ")
    )
}

#[must_use]
pub fn create_index(meta: &EntityMetadata, name: &str, column: &str) -> String {
    format!("CREATE INDEX {} ON {} ({})", quote(name), quote(meta.table()), quote(column))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::codec::{ColumnType, pack_i64};
    use crate::metadata::{EntityDefinition, FieldDefinition};

    fn meta() -> EntityMetadata {
        EntityMetadata::new(
            "Event",
            EntityDefinition::new("events")
                .field("tenant", ColumnType::Varchar)
                .field("seq", ColumnType::BigInt)
                .field("body", ColumnType::Varchar)
                .field_def(FieldDefinition::new("owner", ColumnType::Varchar).static_column())
                .partition_key(["tenant"])
                .clustering_key(["seq"]),
        )
        .unwrap()
    }

    fn counters() -> EntityMetadata {
        EntityMetadata::new(
            "Hits",
            EntityDefinition::new("hits").field("id", ColumnType::Varchar).field("views", ColumnType::Counter),
        )
        .unwrap()
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote("users"), "\"users\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn point_lookup_zips_clustering_columns() {
        let s = select_by_key(&meta(), &["acme".into(), Value::BigInt(7)]).unwrap();
        assert_eq!(s.cql, "SELECT * FROM \"events\" WHERE \"tenant\" = ? AND \"seq\" = ?");
        assert_eq!(s.params, vec![Some(b"acme".to_vec()), Some(pack_i64(7).to_vec())]);

        let prefix = select_by_key(&meta(), &["acme".into()]).unwrap();
        assert_eq!(prefix.cql, "SELECT * FROM \"events\" WHERE \"tenant\" = ?");
    }

    #[test]
    fn point_lookup_rejects_bad_keys() {
        assert!(matches!(select_by_key(&meta(), &[]), Err(MapperError::InvalidLoad(_))));
        assert!(matches!(select_by_key(&meta(), &[Value::Null]), Err(MapperError::MissingKey(_))));
    }

    #[test]
    fn filtered_select_with_in_order_limit() {
        let criteria = Criteria::new()
            .equals("tenant", "acme")
            .is_in("seq", [1i64, 2, 3])
            .is_in("body", Vec::<Value>::new());
        let opts = LoadOptions::default()
            .order_by("seq", Direction::Desc)
            .limit(10)
            .offset(5)
            .allow_filtering();
        let s = select_where(&meta(), &criteria, &opts).unwrap();
        assert_eq!(
            s.cql,
            "SELECT * FROM \"events\" WHERE \"tenant\" = ? AND \"seq\" IN (?, ?, ?) \
             ORDER BY \"seq\" DESC LIMIT 15 ALLOW FILTERING"
        );
        assert_eq!(s.params.len(), 4);
    }

    #[test]
    fn empty_criteria_selects_all() {
        let s = select_where(&meta(), &Criteria::new(), &LoadOptions::default()).unwrap();
        assert_eq!(s.cql, "SELECT * FROM \"events\"");
        assert!(s.params.is_empty());
    }

    #[test]
    fn unknown_criteria_field() {
        let err = select_where(&meta(), &Criteria::new().equals("nope", 1), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, MapperError::UnknownField { .. }));
    }

    #[test]
    fn delete_where_refuses_empty_criteria() {
        assert!(matches!(delete_where(&meta(), &Criteria::new()), Err(MapperError::InvalidCriteria(_))));
        let only_empty_in = Criteria::new().is_in("seq", Vec::<Value>::new());
        assert!(delete_where(&meta(), &only_empty_in).is_err());
        let s = delete_where(&meta(), &Criteria::new().equals("tenant", "acme")).unwrap();
        assert_eq!(s.cql, "DELETE FROM \"events\" WHERE \"tenant\" = ?");
    }

    #[test]
    fn upsert_lists_columns() {
        let m = meta();
        let tenant = Value::from("acme");
        let seq = Value::BigInt(1);
        let body = Value::Null;
        let s = upsert(&m, &[(0, &tenant), (1, &seq), (2, &body)]).unwrap();
        assert_eq!(s.cql, "INSERT INTO \"events\" (\"tenant\", \"seq\", \"body\") VALUES (?, ?, ?)");
        assert_eq!(s.params[2], None);
    }

    #[test]
    fn counter_updates() {
        let m = counters();
        let inc = counter_update(&m, 1, 5, false, &["page".into()]).unwrap();
        assert_eq!(inc.cql, "UPDATE \"hits\" SET \"views\" = \"views\" + ? WHERE \"id\" = ?");
        assert_eq!(inc.params[0], Some(pack_i64(5).to_vec()));
        let dec = counter_update(&m, 1, 50, true, &["page".into()]).unwrap();
        assert!(dec.cql.contains("\"views\" - ?"));
    }

    #[test]
    fn ddl() {
        assert_eq!(
            create_table(&meta()),
            "CREATE TABLE IF NOT EXISTS \"events\" (\"tenant\" varchar, \"seq\" bigint, \
             \"body\" varchar, \"owner\" varchar static, PRIMARY KEY ((\"tenant\"), \"seq\"))"
        );
        assert_eq!(
            create_table(&counters()),
            "CREATE TABLE IF NOT EXISTS \"hits\" (\"id\" varchar, \"views\" counter, PRIMARY KEY ((\"id\")))"
        );
        assert_eq!(
            create_index(&meta(), "events_body_idx", "body"),
            "CREATE INDEX \"events_body_idx\" ON \"events\" (\"body\")"
        );
    }
}
