//! Dependency resolution.
//!
//! Depth-first post-order walk over declared dependencies. Every fixture is
//! emitted once, after all of its dependencies, with ties broken by the order
//! in which dependencies were declared.

use crate::error::HarnessError;
use crate::fixture::{Fixture, FixtureName};
use crate::registry::FixtureRegistry;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

pub struct Resolver<'a> {
    registry: &'a FixtureRegistry,
    marks: HashMap<FixtureName, Mark>,
    /// Current DFS path, used to name the cycle
    path: Vec<FixtureName>,
    order: Vec<Arc<Fixture>>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a FixtureRegistry) -> Self {
        Self {
            registry,
            marks: HashMap::new(),
            path: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Add `name` and everything it transitively needs to the order
    pub fn visit(&mut self, name: &FixtureName) -> Result<(), HarnessError> {
        self.visit_from(name, None)
    }

    fn visit_from(
        &mut self,
        name: &FixtureName,
        required_by: Option<&FixtureName>,
    ) -> Result<(), HarnessError> {
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = self.path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = self.path[start..].to_vec();
                cycle.push(name.clone());
                return Err(HarnessError::DependencyCycle { cycle });
            }
            None => {}
        }

        let fixture = self
            .registry
            .lookup(name.as_str())
            .map_err(|_| HarnessError::UnknownFixture {
                name: name.clone(),
                required_by: required_by.cloned(),
            })?;

        self.marks.insert(name.clone(), Mark::InProgress);
        self.path.push(name.clone());
        for dependency in &fixture.dependencies {
            self.visit_from(dependency, Some(name))?;
        }
        self.path.pop();
        self.marks.insert(name.clone(), Mark::Done);
        self.order.push(fixture);
        Ok(())
    }

    pub fn finish(self) -> Vec<Arc<Fixture>> {
        self.order
    }
}

/// Execution order for one requested fixture, the fixture itself last
pub fn resolve(registry: &FixtureRegistry, name: &str) -> Result<Vec<Arc<Fixture>>, HarnessError> {
    resolve_all(registry, [FixtureName::new(name)].iter())
}

/// Merged execution order for several requested fixtures sharing one session
pub fn resolve_all<'n>(
    registry: &FixtureRegistry,
    names: impl IntoIterator<Item = &'n FixtureName>,
) -> Result<Vec<Arc<Fixture>>, HarnessError> {
    let mut resolver = Resolver::new(registry);
    for name in names {
        resolver.visit(name)?;
    }
    Ok(resolver.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;

    fn registry(fixtures: Vec<Fixture>) -> FixtureRegistry {
        let builder = RegistryBuilder::new();
        for fixture in fixtures {
            builder.register(fixture).unwrap();
        }
        builder.build()
    }

    fn names(order: &[Arc<Fixture>]) -> Vec<&str> {
        order.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_dependencies_before_dependents() {
        let registry = registry(vec![
            Fixture::new("child").depends_on("base"),
            Fixture::new("base"),
        ]);
        let order = resolve(&registry, "child").unwrap();
        assert_eq!(names(&order), vec!["base", "child"]);
    }

    #[test]
    fn test_diamond_runs_shared_dependency_once() {
        let registry = registry(vec![
            Fixture::new("setup"),
            Fixture::new("left").depends_on("setup"),
            Fixture::new("right").depends_on("setup"),
            Fixture::new("top").depends_on("left").depends_on("right"),
        ]);
        let order = resolve(&registry, "top").unwrap();
        assert_eq!(names(&order), vec!["setup", "left", "right", "top"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let registry = registry(vec![
            Fixture::new("a"),
            Fixture::new("b"),
            Fixture::new("top").depends_on("b").depends_on("a"),
        ]);
        let order = resolve(&registry, "top").unwrap();
        assert_eq!(names(&order), vec!["b", "a", "top"]);
    }

    #[test]
    fn test_two_cycle_is_reported() {
        let registry = registry(vec![
            Fixture::new("a").depends_on("b"),
            Fixture::new("b").depends_on("a"),
        ]);
        let err = resolve(&registry, "a").unwrap_err();
        let HarnessError::DependencyCycle { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        let cycle: Vec<_> = cycle.iter().map(FixtureName::as_str).collect();
        assert_eq!(cycle, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let registry = registry(vec![Fixture::new("a").depends_on("a")]);
        assert!(matches!(
            resolve(&registry, "a"),
            Err(HarnessError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_missing_dependency_names_parent() {
        let registry = registry(vec![Fixture::new("child").depends_on("ghost")]);
        let err = resolve(&registry, "child").unwrap_err();
        assert!(matches!(
            err,
            HarnessError::UnknownFixture { name, required_by: Some(parent) }
                if name.as_str() == "ghost" && parent.as_str() == "child"
        ));
    }

    #[test]
    fn test_resolve_all_merges_requests() {
        let registry = registry(vec![
            Fixture::new("setup"),
            Fixture::new("x").depends_on("setup"),
            Fixture::new("y").depends_on("setup"),
        ]);
        let requested = [FixtureName::new("y"), FixtureName::new("x")];
        let order = resolve_all(&registry, requested.iter()).unwrap();
        assert_eq!(names(&order), vec!["setup", "y", "x"]);
    }
}
