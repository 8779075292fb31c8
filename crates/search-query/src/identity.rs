//! Identity lookups.
//!
//! The physical schema stores integer surrogate keys in place of parameter
//! names, code systems, (system, code) token pairs, canonical URLs and
//! resource type names. The compiler resolves names through an
//! [`IdentityCache`]; a missing entry is reported as `None`, never as a
//! sentinel id.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{NameKind, UnresolvedNameError};

/// Read-only name to surrogate id lookups used while compiling.
///
/// Implementations must support concurrent reads; the compiler never writes.
pub trait IdentityCache: Send + Sync {
    /// Id of a search parameter name.
    fn parameter_name_id(&self, name: &str) -> Option<i64>;

    /// Id of a code system. Reference parameters use the target resource
    /// type name as their code system.
    fn code_system_id(&self, system: &str) -> Option<i64>;

    /// Surrogate id of a (system, code) pair.
    fn common_token_value_id(&self, system: &str, code: &str) -> Option<i64>;

    /// Surrogate ids of a code across every system it appears in.
    fn common_token_value_ids(&self, code: &str) -> Vec<i64>;

    /// Id of a canonical URL.
    fn canonical_id(&self, url: &str) -> Option<i64>;

    /// Id of a resource type.
    fn resource_type_id(&self, resource_type: &str) -> Option<i64>;

    /// Every resource type name the store knows about.
    fn resource_type_names(&self) -> Vec<String>;

    /// Like [`parameter_name_id`](Self::parameter_name_id), as a `Result`.
    fn require_parameter_name(&self, name: &str) -> Result<i64, UnresolvedNameError> {
        self.parameter_name_id(name)
            .ok_or_else(|| UnresolvedNameError::new(NameKind::ParameterName, name))
    }

    /// Like [`code_system_id`](Self::code_system_id), as a `Result`.
    fn require_code_system(&self, system: &str) -> Result<i64, UnresolvedNameError> {
        self.code_system_id(system)
            .ok_or_else(|| UnresolvedNameError::new(NameKind::CodeSystem, system))
    }

    /// Like [`common_token_value_id`](Self::common_token_value_id), as a `Result`.
    fn require_common_token_value(
        &self,
        system: &str,
        code: &str,
    ) -> Result<i64, UnresolvedNameError> {
        self.common_token_value_id(system, code).ok_or_else(|| {
            UnresolvedNameError::new(NameKind::CommonTokenValue, format!("{}|{}", system, code))
        })
    }

    /// Like [`canonical_id`](Self::canonical_id), as a `Result`.
    fn require_canonical(&self, url: &str) -> Result<i64, UnresolvedNameError> {
        self.canonical_id(url)
            .ok_or_else(|| UnresolvedNameError::new(NameKind::Canonical, url))
    }

    /// Like [`resource_type_id`](Self::resource_type_id), as a `Result`.
    fn require_resource_type(&self, resource_type: &str) -> Result<i64, UnresolvedNameError> {
        self.resource_type_id(resource_type)
            .ok_or_else(|| UnresolvedNameError::new(NameKind::ResourceType, resource_type))
    }
}

#[derive(Debug, Default)]
struct IdentityMaps {
    next_id: i64,
    parameter_names: HashMap<String, i64>,
    code_systems: HashMap<String, i64>,
    common_token_values: HashMap<(i64, String), i64>,
    canonicals: HashMap<String, i64>,
    resource_types: HashMap<String, i64>,
}

impl IdentityMaps {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn intern(map: &mut HashMap<String, i64>, next: &mut i64, name: &str) -> i64 {
        if let Some(id) = map.get(name) {
            return *id;
        }
        *next += 1;
        map.insert(name.to_string(), *next);
        *next
    }
}

/// Thread-safe in-memory [`IdentityCache`].
///
/// Ids are assigned on first use by the `intern_*` methods, which is how a
/// loader or a test fixture populates the cache.
#[derive(Debug, Default)]
pub struct InMemoryIdentityCache {
    maps: RwLock<IdentityMaps>,
}

impl InMemoryIdentityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of a parameter name, assigning one if needed.
    pub fn intern_parameter_name(&self, name: &str) -> i64 {
        let mut maps = self.maps.write();
        let maps = &mut *maps;
        IdentityMaps::intern(&mut maps.parameter_names, &mut maps.next_id, name)
    }

    /// Returns the id of a code system, assigning one if needed.
    pub fn intern_code_system(&self, system: &str) -> i64 {
        let mut maps = self.maps.write();
        let maps = &mut *maps;
        IdentityMaps::intern(&mut maps.code_systems, &mut maps.next_id, system)
    }

    /// Returns the surrogate id of a (system, code) pair, assigning one if needed.
    pub fn intern_common_token_value(&self, system: &str, code: &str) -> i64 {
        let system_id = self.intern_code_system(system);
        let mut maps = self.maps.write();
        let key = (system_id, code.to_string());
        if let Some(id) = maps.common_token_values.get(&key) {
            return *id;
        }
        let id = maps.allocate();
        maps.common_token_values.insert(key, id);
        id
    }

    /// Returns the id of a canonical URL, assigning one if needed.
    pub fn intern_canonical(&self, url: &str) -> i64 {
        let mut maps = self.maps.write();
        let maps = &mut *maps;
        IdentityMaps::intern(&mut maps.canonicals, &mut maps.next_id, url)
    }

    /// Returns the id of a resource type, assigning one if needed.
    ///
    /// The type name is also registered as a code system so that references
    /// to it can be resolved.
    pub fn intern_resource_type(&self, resource_type: &str) -> i64 {
        self.intern_code_system(resource_type);
        let mut maps = self.maps.write();
        let maps = &mut *maps;
        IdentityMaps::intern(&mut maps.resource_types, &mut maps.next_id, resource_type)
    }
}

impl IdentityCache for InMemoryIdentityCache {
    fn parameter_name_id(&self, name: &str) -> Option<i64> {
        self.maps.read().parameter_names.get(name).copied()
    }

    fn code_system_id(&self, system: &str) -> Option<i64> {
        self.maps.read().code_systems.get(system).copied()
    }

    fn common_token_value_id(&self, system: &str, code: &str) -> Option<i64> {
        let maps = self.maps.read();
        let system_id = maps.code_systems.get(system)?;
        maps.common_token_values
            .get(&(*system_id, code.to_string()))
            .copied()
    }

    fn common_token_value_ids(&self, code: &str) -> Vec<i64> {
        let maps = self.maps.read();
        let mut ids: Vec<i64> = maps
            .common_token_values
            .iter()
            .filter(|((_, c), _)| c == code)
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn canonical_id(&self, url: &str) -> Option<i64> {
        self.maps.read().canonicals.get(url).copied()
    }

    fn resource_type_id(&self, resource_type: &str) -> Option<i64> {
        self.maps.read().resource_types.get(resource_type).copied()
    }

    fn resource_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.maps.read().resource_types.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let cache = InMemoryIdentityCache::new();
        let a = cache.intern_parameter_name("code");
        let b = cache.intern_parameter_name("code");
        assert_eq!(a, b);
        assert_eq!(cache.parameter_name_id("code"), Some(a));
        assert_eq!(cache.parameter_name_id("status"), None);
    }

    #[test]
    fn test_common_token_values_by_code() {
        let cache = InMemoryIdentityCache::new();
        let snomed = cache.intern_common_token_value("http://snomed.info/sct", "1234");
        let local = cache.intern_common_token_value("http://example.org", "1234");
        cache.intern_common_token_value("http://example.org", "5678");

        assert_eq!(
            cache.common_token_value_id("http://snomed.info/sct", "1234"),
            Some(snomed)
        );
        assert_eq!(cache.common_token_value_id("http://unknown", "1234"), None);

        let mut expected = vec![snomed, local];
        expected.sort_unstable();
        assert_eq!(cache.common_token_value_ids("1234"), expected);
        assert!(cache.common_token_value_ids("0000").is_empty());
    }

    #[test]
    fn test_resource_type_is_also_code_system() {
        let cache = InMemoryIdentityCache::new();
        cache.intern_resource_type("Patient");
        cache.intern_resource_type("Observation");

        assert!(cache.code_system_id("Patient").is_some());
        assert_eq!(
            cache.resource_type_names(),
            vec!["Observation".to_string(), "Patient".to_string()]
        );
    }

    #[test]
    fn test_require_reports_kind() {
        let cache = InMemoryIdentityCache::new();
        let err = cache.require_code_system("http://loinc.org").unwrap_err();
        assert_eq!(err.kind, NameKind::CodeSystem);
        assert_eq!(err.name, "http://loinc.org");
    }
}
