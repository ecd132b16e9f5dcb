//! Store trait and convergence-by-overwrite upsert
//!
//! A Store is a remote collection that can create a record from a declared
//! specification or overwrite an existing record with one.

use crate::mapping::ResourceMapping;
use crate::types::ApplyResult;
use std::fmt;

/// Remote collection of named resources
///
/// # Example
///
/// ```ignore
/// use declarative::{ResourceMapping, Store, upsert};
///
/// struct Providers<'a> { client: &'a Client }
///
/// impl Store for Providers<'_> {
///     type Id = u64;
///     type Spec = ProviderSpec;
///     type Error = ApiError;
///
///     fn kind(&self) -> &'static str { "provider" }
///
///     fn create(&self, spec: &ProviderSpec) -> Result<u64, ApiError> {
///         Ok(self.client.create_provider(spec)?.pk)
///     }
///
///     fn update(&self, id: &u64, spec: &ProviderSpec) -> Result<(), ApiError> {
///         self.client.update_provider(*id, spec).map(|_| ())
///     }
/// }
///
/// let mut mapping = ResourceMapping::from_items(observed, |p| &p.name, |p| p.pk);
/// let outcome = upsert(&Providers { client: &client }, "grafana-proxy", &spec, &mut mapping)?;
/// ```
pub trait Store {
    /// Server-assigned identifier
    type Id: Clone + fmt::Display;
    /// Full declared configuration
    type Spec;
    type Error: fmt::Display;

    /// Resource kind, used in log lines
    fn kind(&self) -> &'static str;

    /// Create a record and return its new id
    fn create(&self, spec: &Self::Spec) -> Result<Self::Id, Self::Error>;

    /// Overwrite the record at `id` with the full declared configuration
    fn update(&self, id: &Self::Id, spec: &Self::Spec) -> Result<(), Self::Error>;
}

/// Outcome of a successful upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<Id> {
    pub id: Id,
    /// `Created` or `Updated`
    pub result: ApplyResult,
}

/// Converge one named resource by overwrite.
///
/// If `name` is in `mapping` the existing record is updated unconditionally
/// with the full specification and its id returned. Otherwise the record is
/// created and the new id is inserted into `mapping`, so a second upsert of
/// the same name in one run targets the same record.
pub fn upsert<S: Store>(
    store: &S,
    name: &str,
    spec: &S::Spec,
    mapping: &mut ResourceMapping<S::Id>,
) -> Result<Upserted<S::Id>, S::Error> {
    if let Some(id) = mapping.get(name).cloned() {
        log::debug!("Updating {} {name} ({id})", store.kind());
        store.update(&id, spec)?;
        return Ok(Upserted {
            id,
            result: ApplyResult::Updated,
        });
    }

    log::debug!("Creating {} {name}", store.kind());
    let id = store.create(spec)?;
    mapping.insert(name, id.clone());
    Ok(Upserted {
        id,
        result: ApplyResult::Created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemoryStore {
        records: RefCell<Vec<(u64, String)>>,
        fail_create: bool,
    }

    impl Store for MemoryStore {
        type Id = u64;
        type Spec = String;
        type Error = String;

        fn kind(&self) -> &'static str {
            "record"
        }

        fn create(&self, spec: &String) -> Result<u64, String> {
            if self.fail_create {
                return Err("HTTP 500".to_string());
            }
            let mut records = self.records.borrow_mut();
            let id = records.len() as u64 + 1;
            records.push((id, spec.clone()));
            Ok(id)
        }

        fn update(&self, id: &u64, spec: &String) -> Result<(), String> {
            let mut records = self.records.borrow_mut();
            let record = records
                .iter_mut()
                .find(|(pk, _)| pk == id)
                .ok_or_else(|| "not found".to_string())?;
            record.1 = spec.clone();
            Ok(())
        }
    }

    #[test]
    fn test_creates_when_absent() {
        let store = MemoryStore::default();
        let mut mapping = ResourceMapping::new();

        let outcome = upsert(&store, "grafana", &"v1".to_string(), &mut mapping).unwrap();
        assert_eq!(outcome.result, ApplyResult::Created);
        assert_eq!(mapping.get("grafana"), Some(&outcome.id));
    }

    #[test]
    fn test_repeat_upsert_targets_same_id() {
        let store = MemoryStore::default();
        let mut mapping = ResourceMapping::new();

        let first = upsert(&store, "grafana", &"v1".to_string(), &mut mapping).unwrap();
        let second = upsert(&store, "grafana", &"v2".to_string(), &mut mapping).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.result, ApplyResult::Updated);
        assert_eq!(store.records.borrow().len(), 1);
        assert_eq!(store.records.borrow()[0].1, "v2");
    }

    #[test]
    fn test_existing_name_is_overwritten() {
        let store = MemoryStore::default();
        store.records.borrow_mut().push((1, "stale".to_string()));
        let mut mapping = ResourceMapping::new();
        mapping.insert("grafana", 1);

        let outcome = upsert(&store, "grafana", &"fresh".to_string(), &mut mapping).unwrap();
        assert_eq!(outcome.id, 1);
        assert_eq!(store.records.borrow()[0].1, "fresh");
    }

    #[test]
    fn test_failed_create_leaves_mapping_untouched() {
        let store = MemoryStore {
            fail_create: true,
            ..Default::default()
        };
        let mut mapping = ResourceMapping::new();

        assert!(upsert(&store, "grafana", &"v1".to_string(), &mut mapping).is_err());
        assert!(mapping.is_empty());
    }
}
