//! Entity metadata: field/column mapping, key layout, wire types and
//! secondary-index requests for one mapped table.
//!
//! Definitions come from configuration (serde) or are built in code, and
//! are validated once into an [`EntityMetadata`] whose lookup tables map
//! field and column names to positions in a record's value vector.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::ColumnType;
use crate::error::{MapperError, Result};

/// Secondary index request on a field: `true` for the default name, or an explicit name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexRequest {
    Flag(bool),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    /// Defaults to the snake_case form of `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(rename = "type", default = "default_type")]
    pub ty: ColumnType,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexRequest>,
}

fn default_type() -> ColumnType {
    ColumnType::Varchar
}

impl FieldDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            column: None,
            ty,
            is_static: false,
            index: None,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index = Some(IndexRequest::Flag(true));
        self
    }

    #[must_use]
    pub fn index_named(mut self, name: impl Into<String>) -> Self {
        self.index = Some(IndexRequest::Named(name.into()));
        self
    }

    #[must_use]
    pub fn static_column(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// Field names stamped on create/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFields {
    #[serde(default = "default_created")]
    pub created: String,
    #[serde(default = "default_updated")]
    pub updated: String,
}

fn default_created() -> String {
    "created_at".to_owned()
}

fn default_updated() -> String {
    "updated_at".to_owned()
}

impl Default for TimestampFields {
    fn default() -> Self {
        Self {
            created: default_created(),
            updated: default_updated(),
        }
    }
}

/// Unvalidated entity description, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub table: String,
    pub fields: Vec<FieldDefinition>,
    /// Field or column names. Defaults to `id` when that field exists.
    #[serde(default)]
    pub partition_key: Vec<String>,
    #[serde(default)]
    pub clustering_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<TimestampFields>,
}

impl EntityDefinition {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.fields.push(FieldDefinition::new(name, ty));
        self
    }

    #[must_use]
    pub fn field_def(mut self, def: FieldDefinition) -> Self {
        self.fields.push(def);
        self
    }

    #[must_use]
    pub fn partition_key<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_key = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn clustering_key<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clustering_key = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Stamp `created_at`/`updated_at`.
    #[must_use]
    pub fn timestamps(mut self) -> Self {
        self.timestamps = Some(TimestampFields::default());
        self
    }
}

/// A validated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub column: String,
    pub ty: ColumnType,
    pub is_static: bool,
    /// Resolved secondary index name.
    pub index: Option<String>,
}

/// Validated metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    name: String,
    table: String,
    fields: Vec<FieldMeta>,
    partition_key: Vec<usize>,
    clustering_key: Vec<usize>,
    created_at: Option<usize>,
    updated_at: Option<usize>,
    by_field: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
    counter: bool,
}

/// `createdAt` -> `created_at`, `HTTPStatus` -> `http_status`.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(char::is_ascii_lowercase),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

fn invalid(entity: &str, message: impl std::fmt::Display) -> MapperError {
    MapperError::InvalidMetadata(format!("{entity}: {message}"))
}

impl EntityMetadata {
    /// Validate `def` under the entity name `name`.
    ///
    /// # Errors
    /// Returns `MapperError::InvalidMetadata` describing the first problem found.
    pub fn new(name: impl Into<String>, def: EntityDefinition) -> Result<Self> {
        let name = name.into();
        if def.table.trim().is_empty() {
            return Err(invalid(&name, "table name is empty"));
        }
        if def.fields.is_empty() {
            return Err(invalid(&name, "no fields declared"));
        }

        let mut fields = Vec::with_capacity(def.fields.len());
        let mut by_field = HashMap::new();
        let mut by_column = HashMap::new();
        for (i, f) in def.fields.into_iter().enumerate() {
            let column = f.column.clone().unwrap_or_else(|| snake_case(&f.name));
            if by_field.insert(f.name.clone(), i).is_some() {
                return Err(invalid(&name, format!("field '{}' declared twice", f.name)));
            }
            if by_column.insert(column.clone(), i).is_some() {
                return Err(invalid(&name, format!("column '{column}' mapped twice")));
            }
            let index = match f.index {
                None | Some(IndexRequest::Flag(false)) => None,
                Some(IndexRequest::Flag(true)) => Some(format!("{}_{column}_idx", def.table)),
                Some(IndexRequest::Named(n)) => Some(n),
            };
            fields.push(FieldMeta {
                name: f.name,
                column,
                ty: f.ty,
                is_static: f.is_static,
                index,
            });
        }

        let resolve = |key: &str| by_field.get(key).or_else(|| by_column.get(key)).copied();

        let mut partition_names = def.partition_key;
        if partition_names.is_empty() && by_field.contains_key("id") {
            partition_names.push("id".to_owned());
        }
        if partition_names.is_empty() {
            return Err(invalid(&name, "no partition key declared"));
        }
        let mut partition_key = Vec::with_capacity(partition_names.len());
        for key in &partition_names {
            let idx = resolve(key)
                .ok_or_else(|| invalid(&name, format!("partition key '{key}' is not a mapped field")))?;
            if !partition_key.contains(&idx) {
                partition_key.push(idx);
            }
        }
        let mut clustering_key = Vec::new();
        for key in &def.clustering_key {
            let idx = resolve(key)
                .ok_or_else(|| invalid(&name, format!("clustering key '{key}' is not a mapped field")))?;
            if !partition_key.contains(&idx) && !clustering_key.contains(&idx) {
                clustering_key.push(idx);
            }
        }

        let is_key = |i: usize| partition_key.contains(&i) || clustering_key.contains(&i);
        for (i, f) in fields.iter().enumerate() {
            if is_key(i) && f.is_static {
                return Err(invalid(&name, format!("key column '{}' cannot be static", f.column)));
            }
            if is_key(i) && f.ty.is_counter() {
                return Err(invalid(&name, format!("key column '{}' cannot be a counter", f.column)));
            }
        }
        let value_fields: Vec<&FieldMeta> =
            fields.iter().enumerate().filter(|(i, _)| !is_key(*i)).map(|(_, f)| f).collect();
        let counter = value_fields.iter().any(|f| f.ty.is_counter());
        if counter {
            if let Some(f) = value_fields.iter().find(|f| !f.ty.is_counter()) {
                return Err(invalid(
                    &name,
                    format!("counter tables may only hold counter columns, '{}' is {}", f.column, f.ty),
                ));
            }
        }

        let (mut created_at, mut updated_at) = (None, None);
        if let Some(ts) = def.timestamps {
            if counter {
                return Err(invalid(&name, "counter tables cannot carry timestamps"));
            }
            for (slot, field) in [(&mut created_at, &ts.created), (&mut updated_at, &ts.updated)] {
                let idx = resolve(field)
                    .ok_or_else(|| invalid(&name, format!("timestamp field '{field}' is not mapped")))?;
                if fields[idx].ty != ColumnType::Timestamp {
                    return Err(invalid(&name, format!("timestamp field '{field}' must be a timestamp")));
                }
                *slot = Some(idx);
            }
        }

        Ok(Self {
            name,
            table: def.table,
            fields,
            partition_key,
            clustering_key,
            created_at,
            updated_at,
            by_field,
            by_column,
            counter,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, idx: usize) -> &FieldMeta {
        &self.fields[idx]
    }

    #[must_use]
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.by_field.get(field).copied()
    }

    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.by_column.get(column).copied()
    }

    /// Field name first, then column name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.field_index(name).or_else(|| self.column_index(name))
    }

    /// # Errors
    /// Returns `MapperError::UnknownField` when `name` is neither a field nor a column.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.resolve(name).ok_or_else(|| MapperError::UnknownField {
            entity: self.name.clone(),
            field: name.to_owned(),
        })
    }

    #[must_use]
    pub fn column_for_field(&self, field: &str) -> Option<&str> {
        self.field_index(field).map(|i| self.fields[i].column.as_str())
    }

    #[must_use]
    pub fn field_for_column(&self, column: &str) -> Option<&str> {
        self.column_index(column).map(|i| self.fields[i].name.as_str())
    }

    #[must_use]
    pub fn partition_key(&self) -> &[usize] {
        &self.partition_key
    }

    #[must_use]
    pub fn clustering_key(&self) -> &[usize] {
        &self.clustering_key
    }

    /// Primary key: partition columns then clustering columns.
    pub fn key_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.partition_key.iter().chain(&self.clustering_key).copied()
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        self.partition_key.len() + self.clustering_key.len()
    }

    #[must_use]
    pub fn is_key(&self, idx: usize) -> bool {
        self.partition_key.contains(&idx) || self.clustering_key.contains(&idx)
    }

    /// True when the value columns are counters.
    #[must_use]
    pub fn is_counter(&self) -> bool {
        self.counter
    }

    #[must_use]
    pub fn created_at(&self) -> Option<usize> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<usize> {
        self.updated_at
    }

    /// (index name, column) pairs to create alongside the table.
    pub fn index_requests(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.index.as_deref().map(|n| (n, f.column.as_str())))
    }
}
