//! Mapped records: typed field values, the persisted snapshot used for
//! change tracking, and record identifiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::ser::SerializeMap;

use crate::codec::{self, Value};
use crate::error::{MapperError, Result};
use crate::metadata::EntityMetadata;
use crate::transport::Row;

/// One field's transition in a save.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub from: Value,
    pub to: Value,
}

/// Field name to change, in field-name order.
pub type Delta = BTreeMap<String, Change>;

/// Record identifier: a scalar for single-column keys, positional or named
/// values for composite keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Id {
    Scalar(Value),
    Composite(Vec<Value>),
    /// Field or column name to value.
    Named(BTreeMap<String, Value>),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Composite(vs) => {
                let parts: Vec<String> = vs.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Named(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<Value> for Id {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<uuid::Uuid> for Id {
    fn from(v: uuid::Uuid) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<Vec<Value>> for Id {
    fn from(v: Vec<Value>) -> Self {
        Self::Composite(v)
    }
}

impl From<BTreeMap<String, Value>> for Id {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Named(v)
    }
}

impl Id {
    /// Named identifier from (field, value) pairs.
    #[must_use]
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Key values in primary-key order. A named id may stop early, which
    /// selects by a key prefix.
    ///
    /// # Errors
    /// Returns `InvalidLoad` for null, empty or unmappable identifiers.
    pub fn key_values(&self, meta: &EntityMetadata) -> Result<Vec<Value>> {
        let values = match self {
            Self::Scalar(v) => vec![v.clone()],
            Self::Composite(vs) => vs.clone(),
            Self::Named(map) => {
                let mut by_index = BTreeMap::new();
                for (name, v) in map {
                    let idx = meta.resolve(name).filter(|i| meta.is_key(*i)).ok_or_else(|| {
                        MapperError::InvalidLoad(format!("'{name}' is not a key of {}", meta.name()))
                    })?;
                    by_index.insert(idx, v.clone());
                }
                let mut out = Vec::with_capacity(by_index.len());
                for idx in meta.key_indexes() {
                    match by_index.remove(&idx) {
                        Some(v) => out.push(v),
                        None => break,
                    }
                }
                if !by_index.is_empty() {
                    return Err(MapperError::InvalidLoad(format!(
                        "key values for {} must form a prefix of the primary key",
                        meta.name()
                    )));
                }
                out
            }
        };
        if values.is_empty() || values.iter().any(Value::is_null) {
            return Err(MapperError::InvalidLoad(format!(
                "null or empty id for {}",
                meta.name()
            )));
        }
        if values.len() < meta.partition_key().len() || values.len() > meta.key_len() {
            return Err(MapperError::InvalidLoad(format!(
                "{} key values given for {}, which needs {} to {}",
                values.len(),
                meta.name(),
                meta.partition_key().len(),
                meta.key_len()
            )));
        }
        Ok(values)
    }
}

/// An instance of a mapped entity.
#[derive(Debug, Clone)]
pub struct Record {
    meta: Arc<EntityMetadata>,
    values: Vec<Value>,
    persisted: Vec<Value>,
    exists: bool,
    saved_changes: Delta,
}

impl Record {
    /// Empty, non-existing record.
    #[must_use]
    pub fn new(meta: Arc<EntityMetadata>) -> Self {
        let n = meta.fields().len();
        Self {
            meta,
            values: vec![Value::Null; n],
            persisted: vec![Value::Null; n],
            exists: false,
            saved_changes: Delta::new(),
        }
    }

    #[must_use]
    pub fn meta(&self) -> &Arc<EntityMetadata> {
        &self.meta
    }

    /// True once a load or save confirmed backing storage.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Value by field or column name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.meta.resolve(name).map(|i| &self.values[i])
    }

    /// Value at field position `idx`, `None` past the last field.
    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Set a field, coercing to its declared type.
    ///
    /// # Errors
    /// Returns `UnknownField` or a codec type mismatch.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.meta.require(name)?;
        self.set_index(idx, value.into())
    }

    pub(crate) fn set_index(&mut self, idx: usize, value: Value) -> Result<()> {
        let f = self.meta.field(idx);
        self.values[idx] = value.coerce(f.ty).map_err(|e| MapperError::codec(&f.column, e))?;
        Ok(())
    }

    /// Builder-style [`Record::set`].
    ///
    /// # Errors
    /// Same as [`Record::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Identifier: scalar for a single key column, named by field otherwise.
    #[must_use]
    pub fn id(&self) -> Id {
        let keys: Vec<usize> = self.meta.key_indexes().collect();
        if let [only] = keys.as_slice() {
            return Id::Scalar(self.values[*only].clone());
        }
        Id::Named(
            keys.iter()
                .map(|i| (self.meta.field(*i).name.clone(), self.values[*i].clone()))
                .collect(),
        )
    }

    /// Full primary key in key order.
    ///
    /// # Errors
    /// Returns `MissingKey` naming the first null key column.
    pub fn key_values(&self) -> Result<Vec<Value>> {
        self.meta
            .key_indexes()
            .map(|i| {
                let v = &self.values[i];
                if v.is_null() {
                    Err(MapperError::MissingKey(self.meta.field(i).column.clone()))
                } else {
                    Ok(v.clone())
                }
            })
            .collect()
    }

    /// Fields whose value differs from the persisted snapshot.
    #[must_use]
    pub fn changes(&self) -> Delta {
        self.values
            .iter()
            .zip(&self.persisted)
            .enumerate()
            .filter(|(_, (now, before))| now != before)
            .map(|(i, (now, before))| {
                (
                    self.meta.field(i).name.clone(),
                    Change {
                        from: before.clone(),
                        to: now.clone(),
                    },
                )
            })
            .collect()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.values != self.persisted
    }

    /// Delta written by the last successful save.
    #[must_use]
    pub fn saved_changes(&self) -> &Delta {
        &self.saved_changes
    }

    /// Field name to value.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.meta
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect()
    }

    /// Indexes of fields that changed since the snapshot.
    pub(crate) fn changed_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.values.len()).filter(|i| self.values[*i] != self.persisted[*i])
    }

    /// Replace all values from a result row and mark existing.
    ///
    /// # Errors
    /// Returns a codec error naming the column that failed to decode.
    pub(crate) fn hydrate(&mut self, row: Row) -> Result<()> {
        let mut values = vec![Value::Null; self.values.len()];
        for (column, cell) in row {
            let Some(idx) = self.meta.column_index(&column) else {
                tracing::trace!(table = self.meta.table(), column = %column, "Ignoring unmapped column");
                continue;
            };
            let ty = self.meta.field(idx).ty;
            values[idx] = codec::unpack(cell.as_deref(), ty).map_err(|e| MapperError::codec(&column, e))?;
        }
        self.persisted.clone_from(&values);
        self.values = values;
        self.exists = true;
        Ok(())
    }

    pub(crate) fn mark_saved(&mut self, delta: Delta) {
        self.persisted.clone_from(&self.values);
        self.exists = true;
        self.saved_changes = delta;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.persisted.fill(Value::Null);
        self.exists = false;
    }

    /// Apply a counter adjustment already written to the store.
    pub(crate) fn apply_counter(&mut self, idx: usize, amount: i64) -> i64 {
        let next = self.values[idx].as_i64().unwrap_or(0).wrapping_add(amount);
        self.values[idx] = Value::Counter(next);
        self.persisted[idx] = Value::Counter(next);
        self.exists = true;
        next
    }

    /// Fresh copy of every field value, not yet persisted.
    pub(crate) fn detached_copy(&self) -> Self {
        let mut copy = Self::new(self.meta.clone());
        copy.values.clone_from(&self.values);
        copy
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (f, v) in self.meta.fields().iter().zip(&self.values) {
            map.serialize_entry(&f.name, v)?;
        }
        map.end()
    }
}
