//! Record mapper: loads, saves and deletes [`Record`]s of one entity through
//! a [`StorageDriver`].

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::codec::Value;
use crate::driver::{CounterStore, StorageDriver};
use crate::error::{MapperError, Result};
use crate::metadata::EntityMetadata;
use crate::query::{Criteria, LoadOptions};
use crate::record::{Delta, Id, Record};
use crate::schema::SchemaReport;

/// Callbacks around a save, run after automatic timestamps are stamped.
pub trait RecordHooks: Send + Sync {
    /// Before the first save of a record.
    ///
    /// # Errors
    /// An error aborts the save.
    fn pre_create(&self, _record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Before saving a record that already exists.
    ///
    /// # Errors
    /// An error aborts the save.
    fn pre_update(&self, _record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Last check before writing.
    ///
    /// # Errors
    /// Usually `MapperError::Validation`; aborts the save.
    fn validate(&self, _record: &Record) -> Result<()> {
        Ok(())
    }
}

pub struct Mapper<D> {
    driver: D,
    meta: Arc<EntityMetadata>,
    hooks: Option<Arc<dyn RecordHooks>>,
}

impl<D: StorageDriver> Mapper<D> {
    #[must_use]
    pub fn new(driver: D, meta: Arc<EntityMetadata>) -> Self {
        Self {
            driver,
            meta,
            hooks: None,
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn RecordHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn meta(&self) -> &Arc<EntityMetadata> {
        &self.meta
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    #[must_use]
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Empty record of this entity.
    #[must_use]
    pub fn new_record(&self) -> Record {
        Record::new(self.meta.clone())
    }

    /// # Errors
    /// Returns `InvalidLoad` for a null or malformed id and `NotFound` when
    /// no row matches.
    pub fn load(&mut self, id: impl Into<Id>) -> Result<Record> {
        let id = id.into();
        self.try_load(&id)?.ok_or_else(|| {
            MapperError::NotFound(format!("No object found in {} for id {id}", self.meta.table()))
        })
    }

    /// Like [`Mapper::load`], but a missing row yields a new record holding
    /// the given key.
    ///
    /// # Errors
    /// Returns `InvalidLoad` for a null or malformed id.
    pub fn load_or_new(&mut self, id: impl Into<Id>) -> Result<Record> {
        let id = id.into();
        if let Some(record) = self.try_load(&id)? {
            return Ok(record);
        }
        let key = id.key_values(&self.meta)?;
        let mut record = self.new_record();
        for (idx, value) in self.meta.key_indexes().zip(key) {
            record.set_index(idx, value)?;
        }
        Ok(record)
    }

    fn try_load(&mut self, id: &Id) -> Result<Option<Record>> {
        let key = id.key_values(&self.meta)?;
        let Some(row) = self.driver.load(&self.meta, &key)? else {
            return Ok(None);
        };
        let mut record = self.new_record();
        record.hydrate(row)?;
        Ok(Some(record))
    }

    /// Records matching `criteria`. The offset is applied here, after the
    /// store returned `limit + offset` rows.
    ///
    /// # Errors
    /// Returns `UnknownField` for unmapped criteria, or store failures.
    pub fn load_where(&mut self, criteria: &Criteria, opts: &LoadOptions) -> Result<Vec<Record>> {
        let rows = self.driver.load_where(&self.meta, criteria, opts)?;
        let take = opts.limit.unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(opts.offset)
            .take(take)
            .map(|row| {
                let mut record = self.new_record();
                record.hydrate(row)?;
                Ok(record)
            })
            .collect()
    }

    /// # Errors
    /// Returns `InvalidCriteria` when `criteria` selects nothing specific.
    pub fn delete_where(&mut self, criteria: &Criteria) -> Result<()> {
        self.driver.delete_where(&self.meta, criteria)
    }

    /// Write the fields that changed since the last load or save, plus the
    /// key. Returns the saved changes; an unchanged existing record is not
    /// written and yields an empty delta.
    ///
    /// # Errors
    /// Returns `UnsupportedOperation` for counter entities, `MissingKey`,
    /// hook failures, or store failures.
    pub fn save(&mut self, record: &mut Record) -> Result<Delta> {
        self.check_entity(record)?;
        if self.meta.is_counter() {
            return Err(MapperError::UnsupportedOperation(format!(
                "{} is a counter entity; use increment or decrement",
                self.meta.name()
            )));
        }
        if record.exists() && !record.is_dirty() {
            debug!(entity = self.meta.name(), "Nothing to save");
            return Ok(Delta::new());
        }

        let creating = !record.exists();
        self.stamp(record, creating)?;
        if let Some(hooks) = &self.hooks {
            if creating {
                hooks.pre_create(record)?;
            } else {
                hooks.pre_update(record)?;
            }
            hooks.validate(record)?;
        }
        record.key_values()?;

        let delta = record.changes();
        let changed: Vec<usize> = record.changed_indexes().collect();
        let values: Vec<(usize, &Value)> = (0..self.meta.fields().len())
            .filter(|i| self.meta.is_key(*i) || changed.contains(i))
            .filter_map(|i| record.value(i).map(|v| (i, v)))
            .collect();
        self.driver.save(&self.meta, &values)?;
        debug!(entity = self.meta.name(), fields = delta.len(), created = creating, "Saved record");
        record.mark_saved(delta.clone());
        Ok(delta)
    }

    fn stamp(&self, record: &mut Record, creating: bool) -> Result<()> {
        let now = Value::Timestamp(Utc::now().timestamp_millis());
        if creating {
            if let Some(idx) = self.meta.created_at() {
                if record.value(idx).is_none_or(Value::is_null) {
                    record.set_index(idx, now.clone())?;
                }
            }
        }
        if let Some(idx) = self.meta.updated_at() {
            record.set_index(idx, now)?;
        }
        Ok(())
    }

    /// Save a copy of `record` under `new_id`, leaving `record` untouched.
    /// Automatic timestamps start fresh on the copy.
    ///
    /// # Errors
    /// Returns `InvalidLoad` unless `new_id` names the full key, plus any
    /// [`Mapper::save`] failure.
    pub fn save_as_new(&mut self, record: &Record, new_id: impl Into<Id>) -> Result<Record> {
        self.check_entity(record)?;
        let key = new_id.into().key_values(&self.meta)?;
        if key.len() != self.meta.key_len() {
            return Err(MapperError::InvalidLoad(format!(
                "save_as_new needs the full key of {}",
                self.meta.name()
            )));
        }
        let mut copy = record.detached_copy();
        for (idx, value) in self.meta.key_indexes().zip(key) {
            copy.set_index(idx, value)?;
        }
        for idx in [self.meta.created_at(), self.meta.updated_at()].into_iter().flatten() {
            copy.set_index(idx, Value::Null)?;
        }
        self.save(&mut copy)?;
        Ok(copy)
    }

    /// Re-read `record` from the store, discarding local changes.
    ///
    /// # Errors
    /// Returns `MissingKey`, or `NotFound` when the row is gone.
    pub fn reload(&mut self, record: &mut Record) -> Result<()> {
        self.check_entity(record)?;
        let key = record.key_values()?;
        let row = self.driver.load(&self.meta, &key)?.ok_or_else(|| {
            MapperError::NotFound(format!(
                "No object found in {} for id {}",
                self.meta.table(),
                record.id()
            ))
        })?;
        record.hydrate(row)
    }

    /// # Errors
    /// Returns `MissingKey` or store failures.
    pub fn delete(&mut self, record: &mut Record) -> Result<()> {
        self.check_entity(record)?;
        let key = record.key_values()?;
        self.driver.delete(&self.meta, &key)?;
        debug!(entity = self.meta.name(), id = %record.id(), "Deleted record");
        record.mark_deleted();
        Ok(())
    }

    /// # Errors
    /// Returns store failures.
    pub fn ensure_schema(&mut self) -> Result<SchemaReport> {
        self.driver.ensure_schema(&self.meta)
    }

    fn check_entity(&self, record: &Record) -> Result<()> {
        let other = record.meta();
        if Arc::ptr_eq(other, &self.meta) || (other.name() == self.meta.name() && other.table() == self.meta.table()) {
            return Ok(());
        }
        Err(MapperError::InvalidMetadata(format!(
            "record of {} handed to the {} mapper",
            other.name(),
            self.meta.name()
        )))
    }
}

impl<D: CounterStore> Mapper<D> {
    /// Add `by` to a counter column and return the new local value.
    ///
    /// # Errors
    /// Returns `UnsupportedOperation` for non-counter fields, `MissingKey`,
    /// or store failures.
    pub fn increment(&mut self, record: &mut Record, field: &str, by: i64) -> Result<i64> {
        let (idx, key) = self.counter_target(record, field)?;
        self.driver.increment(&self.meta, idx, by, &key)?;
        Ok(record.apply_counter(idx, by))
    }

    /// Subtract `by` from a counter column and return the new local value.
    ///
    /// # Errors
    /// Same as [`Mapper::increment`].
    pub fn decrement(&mut self, record: &mut Record, field: &str, by: i64) -> Result<i64> {
        let (idx, key) = self.counter_target(record, field)?;
        self.driver.decrement(&self.meta, idx, by, &key)?;
        Ok(record.apply_counter(idx, by.wrapping_neg()))
    }

    fn counter_target(&self, record: &Record, field: &str) -> Result<(usize, Vec<Value>)> {
        self.check_entity(record)?;
        let idx = self.meta.require(field)?;
        if !self.meta.field(idx).ty.is_counter() {
            return Err(MapperError::UnsupportedOperation(format!(
                "{field} on {} is not a counter column",
                self.meta.name()
            )));
        }
        Ok((idx, record.key_values()?))
    }
}
