//! Fixture registry.
//!
//! Registration happens once through a [`RegistryBuilder`], possibly from
//! several threads. [`RegistryBuilder::build`] freezes the definitions into a
//! [`FixtureRegistry`] that is only ever read afterwards.

use crate::error::HarnessError;
use crate::fixture::{Fixture, FixtureName};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    fixtures: Mutex<IndexMap<FixtureName, Arc<Fixture>>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fixture definition. A name may only be registered once.
    pub fn register(&self, fixture: Fixture) -> Result<(), HarnessError> {
        let mut fixtures = self.fixtures.lock();
        if fixtures.contains_key(&fixture.name) {
            return Err(HarnessError::DuplicateFixture(fixture.name));
        }
        tracing::trace!(fixture = %fixture.name, statements = fixture.statements.len(), "registered fixture");
        fixtures.insert(fixture.name.clone(), Arc::new(fixture));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fixtures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn build(self) -> FixtureRegistry {
        FixtureRegistry {
            fixtures: self.fixtures.into_inner(),
        }
    }
}

/// Immutable name -> definition map
#[derive(Debug, Default)]
pub struct FixtureRegistry {
    fixtures: IndexMap<FixtureName, Arc<Fixture>>,
}

impl FixtureRegistry {
    pub fn lookup(&self, name: &str) -> Result<Arc<Fixture>, HarnessError> {
        self.fixtures
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownFixture {
                name: FixtureName::new(name),
                required_by: None,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fixtures.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &FixtureName> {
        self.fixtures.keys()
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_fails() {
        let builder = RegistryBuilder::new();
        builder.register(Fixture::new("base")).unwrap();
        let err = builder.register(Fixture::new("base")).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateFixture(name) if name.as_str() == "base"));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = RegistryBuilder::new().build();
        assert!(matches!(
            registry.lookup("nope"),
            Err(HarnessError::UnknownFixture { required_by: None, .. })
        ));
    }

    #[test]
    fn test_names_keep_registration_order() {
        let builder = RegistryBuilder::new();
        for name in ["zeta", "alpha", "mid"] {
            builder.register(Fixture::new(name)).unwrap();
        }
        let registry = builder.build();
        let names: Vec<_> = registry.names().map(FixtureName::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_register_from_threads() {
        let builder = Arc::new(RegistryBuilder::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let builder = Arc::clone(&builder);
                std::thread::spawn(move || builder.register(Fixture::new(format!("f{i}"))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        let registry = Arc::try_unwrap(builder).unwrap().build();
        assert_eq!(registry.len(), 8);
    }
}
