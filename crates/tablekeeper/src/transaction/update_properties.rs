use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use super::Transaction;
use crate::{error::ValidationError, spec::PropertyValue, update::TableUpdate};

/// Sets and removes table properties. A key may not be both set and removed.
#[derive(Debug)]
pub struct UpdateProperties<'t> {
    transaction: &'t mut Transaction,
    updates: HashMap<String, String>,
    removals: HashSet<String>,
}

impl<'t> UpdateProperties<'t> {
    pub(crate) fn new(transaction: &'t mut Transaction) -> Self {
        Self {
            transaction,
            updates: HashMap::new(),
            removals: HashSet::new(),
        }
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Result<&mut Self, ValidationError> {
        let key = key.into();
        if self.removals.contains(&key) {
            return Err(conflict(&key));
        }
        let value = value.into().into_property_string(&key)?;
        self.updates.insert(key, value);
        Ok(self)
    }

    pub fn remove(&mut self, key: impl Into<String>) -> Result<&mut Self, ValidationError> {
        let key = key.into();
        if self.updates.contains_key(&key) {
            return Err(conflict(&key));
        }
        self.removals.insert(key);
        Ok(self)
    }

    pub fn commit(self) -> Result<(), ValidationError> {
        let mut updates = Vec::with_capacity(2);
        if !self.updates.is_empty() {
            updates.push(TableUpdate::SetProperties {
                updates: self.updates,
            });
        }
        if !self.removals.is_empty() {
            updates.push(TableUpdate::RemoveProperties {
                removals: self.removals.into_iter().sorted().collect(),
            });
        }
        self.transaction.stage(updates, vec![])
    }
}

fn conflict(key: &str) -> ValidationError {
    ValidationError::for_key(
        format!("Cannot set and remove property `{key}` in the same update"),
        key,
    )
}
