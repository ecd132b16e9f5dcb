//! Name to server-id index for one collection

use std::collections::HashMap;

/// Maps declared names to server-assigned ids.
///
/// Built once per collection per run and kept current as resources are
/// created, so a name is never created twice in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping<Id> {
    entries: HashMap<String, Id>,
}

impl<Id> Default for ResourceMapping<Id> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<Id: Clone> ResourceMapping<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index observed records. When two records share a name the first one
    /// wins.
    pub fn from_items<T>(
        items: impl IntoIterator<Item = T>,
        name: impl Fn(&T) -> &str,
        id: impl Fn(&T) -> Id,
    ) -> Self {
        let mut mapping = Self::new();
        for item in items {
            let key = name(&item);
            if mapping.entries.contains_key(key) {
                log::warn!("Duplicate name '{key}' in observed collection, keeping the first");
                continue;
            }
            mapping.entries.insert(key.to_string(), id(&item));
        }
        mapping
    }

    pub fn get(&self, name: &str) -> Option<&Id> {
        self.entries.get(name)
    }

    /// Record an id, returning the previous one for that name.
    pub fn insert(&mut self, name: impl Into<String>, id: Id) -> Option<Id> {
        self.entries.insert(name.into(), id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
