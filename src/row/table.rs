//! Named tables over a store
//!
//! `TableDb` hands out `Table` handles; a table turns typed records into
//! entities under its key prefix and back. The first write to a table
//! records its name in the reserved `__tables` table.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entity::Entity;
use crate::error::{Result, StoreError};
use crate::queue::{page_callback, PageSignal};
use crate::store::ScalableStore;

use super::codec::{decode, encode, entity_key, KeyedRecord};
use super::value::FieldValue;

/// Name of the table registry
pub const REGISTRY_TABLE: &str = "__tables";

/// Registry row: one per table that has been written to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableEntry {
    pub name: String,
}

impl KeyedRecord for TableEntry {
    const KEY_FIELD: Option<&'static str> = Some("Key");

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![("Key", self.name.clone().into())]
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        match name {
            "Key" => self.name = value.try_into()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Table-driven database over a store
pub struct TableDb<St: ScalableStore> {
    store: St,
    registered: Mutex<HashSet<String>>,
}

impl<St: ScalableStore> TableDb<St> {
    pub fn new(store: St) -> Self {
        Self {
            store,
            registered: Mutex::new(HashSet::new()),
        }
    }

    /// Handle to a table (cheap; nothing is written until the first upsert)
    pub fn table(&self, name: impl Into<String>) -> Table<'_, St> {
        Table {
            db: self,
            name: name.into(),
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Record `name` in the registry once per process
    fn ensure_registered(&self, name: &str) -> Result<()> {
        if name == REGISTRY_TABLE || self.registered.lock().contains(name) {
            return Ok(());
        }

        let entry = encode(
            REGISTRY_TABLE,
            &TableEntry {
                name: name.to_string(),
            },
        )?;
        self.store.upsert(vec![entry])?;
        self.registered.lock().insert(name.to_string());
        tracing::debug!(table = name, "registered table");
        Ok(())
    }
}

/// A named table of typed records
pub struct Table<'a, St: ScalableStore> {
    db: &'a TableDb<St>,
    name: String,
}

impl<'a, St: ScalableStore> Table<'a, St> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace records
    ///
    /// Encoding errors surface before anything is submitted.
    pub fn upsert<T: KeyedRecord>(&self, rows: &[T]) -> Result<()> {
        let entities = rows
            .iter()
            .map(|row| encode(&self.name, row))
            .collect::<Result<Vec<Entity>>>()?;
        self.db.ensure_registered(&self.name)?;
        self.db.store.upsert(entities)
    }

    /// Look records up by key, page by page
    ///
    /// `callback` receives each page's decoded records. Keys that do not
    /// exist are never delivered. A decode failure stops delivery to the
    /// callback and is returned once the lookup completes.
    pub fn retrieve_with<T, F>(&self, keys: &[FieldValue], callback: F) -> Result<()>
    where
        T: KeyedRecord + 'static,
        F: FnMut(Vec<T>) -> PageSignal + Send + 'static,
    {
        let entities = self.lookup_entities(keys)?;
        let table = self.name.clone();
        let state = Arc::new(Mutex::new((callback, None::<StoreError>)));

        let shared = Arc::clone(&state);
        let cb = page_callback(move |page: &[Entity]| {
            let mut guard = shared.lock();
            let (callback, failure) = &mut *guard;
            if failure.is_some() {
                return PageSignal::Satisfied;
            }
            match decode::<T>(&table, page) {
                Ok(records) => callback(records),
                Err(e) => {
                    *failure = Some(e);
                    PageSignal::Satisfied
                }
            }
        });

        self.db.store.retrieve(entities, cb)?;

        let failure = state.lock().1.take();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Look records up by key; missing keys are left out
    pub fn retrieve<T>(&self, keys: &[FieldValue]) -> Result<Vec<T>>
    where
        T: KeyedRecord + Send + 'static,
    {
        let found = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&found);
        self.retrieve_with(keys, move |records: Vec<T>| {
            sink.lock().extend(records);
            PageSignal::Satisfied
        })?;

        let mut found = found.lock();
        Ok(std::mem::take(&mut *found))
    }

    /// Look up a single record
    pub fn get<T>(&self, key: impl Into<FieldValue>) -> Result<T>
    where
        T: KeyedRecord + Send + 'static,
    {
        let key: FieldValue = key.into();
        self.retrieve(&[key])?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    /// True once this table has been recorded in the registry
    pub fn is_registered(&self) -> Result<bool> {
        let registry = self.db.table(REGISTRY_TABLE);
        let entries: Vec<TableEntry> = registry.retrieve(&[FieldValue::from(self.name.as_str())])?;
        Ok(!entries.is_empty())
    }

    fn lookup_entities(&self, keys: &[FieldValue]) -> Result<Vec<Entity>> {
        keys.iter()
            .map(|key| entity_key(&self.name, key).map(Entity::key_only))
            .collect()
    }
}
