//! Terminology lookups for `:in`, `:not-in`, `:above` and `:below`.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// A coded concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Concept {
    /// The code system URL.
    pub system: String,
    /// The code.
    pub code: String,
}

impl Concept {
    /// Creates a concept.
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
        }
    }
}

/// Value set expansion and subsumption used by token modifiers.
pub trait TerminologyService: Send + Sync {
    /// Expands a value set, or `None` if the value set is unknown.
    fn expand(&self, value_set_url: &str) -> Option<Vec<Concept>>;

    /// The concept and every concept that subsumes it.
    fn ancestors_and_self(&self, system: &str, code: &str) -> Vec<Concept>;

    /// The concept and every concept it subsumes.
    fn descendants_and_self(&self, system: &str, code: &str) -> Vec<Concept>;

    /// Whether codes in the system are case sensitive.
    fn is_case_sensitive(&self, _system: &str) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct TerminologyData {
    value_sets: HashMap<String, Vec<Concept>>,
    // child -> parents
    parents: HashMap<Concept, Vec<Concept>>,
    case_insensitive: HashSet<String>,
}

/// In-memory [`TerminologyService`] backed by explicit value sets and
/// is-a relationships.
#[derive(Debug, Default)]
pub struct InMemoryTerminology {
    data: RwLock<TerminologyData>,
}

impl InMemoryTerminology {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value set expansion.
    pub fn add_value_set(&self, url: impl Into<String>, concepts: Vec<Concept>) {
        self.data.write().value_sets.insert(url.into(), concepts);
    }

    /// Records that `child` is-a `parent` within `system`.
    pub fn add_is_a(&self, system: &str, child: &str, parent: &str) {
        self.data
            .write()
            .parents
            .entry(Concept::new(system, child))
            .or_default()
            .push(Concept::new(system, parent));
    }

    /// Marks a code system as case insensitive.
    pub fn set_case_insensitive(&self, system: impl Into<String>) {
        self.data.write().case_insensitive.insert(system.into());
    }

    fn closure<F>(start: Concept, next: F) -> Vec<Concept>
    where
        F: Fn(&Concept) -> Vec<Concept>,
    {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(concept) = stack.pop() {
            if seen.insert(concept.clone()) {
                stack.extend(next(&concept));
            }
        }
        let mut result: Vec<Concept> = seen.into_iter().collect();
        result.sort();
        result
    }
}

impl TerminologyService for InMemoryTerminology {
    fn expand(&self, value_set_url: &str) -> Option<Vec<Concept>> {
        self.data.read().value_sets.get(value_set_url).cloned()
    }

    fn ancestors_and_self(&self, system: &str, code: &str) -> Vec<Concept> {
        let data = self.data.read();
        Self::closure(Concept::new(system, code), |c| {
            data.parents.get(c).cloned().unwrap_or_default()
        })
    }

    fn descendants_and_self(&self, system: &str, code: &str) -> Vec<Concept> {
        let data = self.data.read();
        Self::closure(Concept::new(system, code), |c| {
            data.parents
                .iter()
                .filter(|(_, parents)| parents.contains(c))
                .map(|(child, _)| child.clone())
                .collect()
        })
    }

    fn is_case_sensitive(&self, system: &str) -> bool {
        !self.data.read().case_insensitive.contains(system)
    }
}
