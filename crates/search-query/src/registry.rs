//! Search parameter registry.
//!
//! The registry holds the definitions the request parser needs: each
//! parameter's type, the resource types it applies to, the targets of
//! reference parameters and the components of composites. Definitions are
//! indexed by both (resource_type, code) and canonical URL.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::SearchParamType;

/// Base types whose parameters apply to every resource type.
const ABSTRACT_BASES: [&str; 2] = ["DomainResource", "Resource"];

/// Status of a SearchParameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterStatus {
    /// Active - can be used in searches.
    #[default]
    Active,
    /// Draft - informational, not yet active.
    Draft,
    /// Retired - disabled, not usable.
    Retired,
}

impl SearchParameterStatus {
    /// Parse from FHIR status string.
    pub fn from_fhir_status(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(SearchParameterStatus::Active),
            "draft" => Some(SearchParameterStatus::Draft),
            "retired" => Some(SearchParameterStatus::Retired),
            _ => None,
        }
    }

    /// Returns true if this status allows the parameter to be used in searches.
    pub fn is_usable(&self) -> bool {
        *self == SearchParameterStatus::Active
    }
}

/// Component of a composite search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeComponentDef {
    /// Definition URL of the component parameter.
    pub definition: String,
}

/// The parts of a SearchParameter definition that drive query compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL (unique identifier).
    pub url: String,

    /// Parameter code (the URL param name, e.g., "name", "identifier").
    pub code: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    #[serde(default)]
    pub target: Vec<String>,

    /// Components (for composite parameters), in value order.
    #[serde(default)]
    pub component: Vec<CompositeComponentDef>,

    /// Current status.
    #[serde(default)]
    pub status: SearchParameterStatus,
}

impl SearchParameterDefinition {
    /// Creates a new SearchParameter definition.
    pub fn new(url: impl Into<String>, code: impl Into<String>, param_type: SearchParamType) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            param_type,
            base: Vec::new(),
            target: Vec::new(),
            component: Vec::new(),
            status: SearchParameterStatus::Active,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets target types for reference parameters.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the component definition URLs of a composite.
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.component = components
            .into_iter()
            .map(|definition| CompositeComponentDef {
                definition: definition.into(),
            })
            .collect();
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: SearchParameterStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns whether this parameter applies to the given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || ABSTRACT_BASES.contains(&b.as_str()))
    }

    /// Returns true for parameters that can be followed in a chain.
    pub fn is_chainable(&self) -> bool {
        matches!(
            self.param_type,
            SearchParamType::Reference | SearchParamType::Canonical
        )
    }
}

/// In-memory registry of SearchParameter definitions.
#[derive(Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, param_code).
    params_by_type: HashMap<String, HashMap<String, Arc<SearchParameterDefinition>>>,

    /// Parameters indexed by canonical URL.
    params_by_url: HashMap<String, Arc<SearchParameterDefinition>>,
}

impl SearchParameterRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the parameters shared by every resource
    /// type: `_id`, `_lastUpdated`, `_tag`, `_security` and `_profile`.
    pub fn with_common_parameters() -> Self {
        let mut registry = Self::new();
        for (code, param_type) in [
            ("_id", SearchParamType::Id),
            ("_lastUpdated", SearchParamType::LastUpdated),
            ("_tag", SearchParamType::Token),
            ("_security", SearchParamType::Token),
            ("_profile", SearchParamType::Canonical),
        ] {
            let url = format!(
                "http://hl7.org/fhir/SearchParameter/Resource-{}",
                code.trim_start_matches('_')
            );
            registry.register_internal(
                SearchParameterDefinition::new(url, code, param_type).with_base(["Resource"]),
            );
        }
        registry
    }

    /// Returns the number of registered parameters.
    pub fn len(&self) -> usize {
        self.params_by_url.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.params_by_url.is_empty()
    }

    /// Gets the usable parameter `code` of a resource type, falling back to
    /// parameters defined on the abstract base types.
    pub fn get_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        std::iter::once(resource_type)
            .chain(ABSTRACT_BASES)
            .filter_map(|t| self.params_by_type.get(t))
            .filter_map(|params| params.get(code))
            .find(|p| p.status.is_usable())
            .cloned()
    }

    /// Finds a usable parameter by code on any resource type.
    ///
    /// Abstract base types win; otherwise the first type in name order.
    pub fn find_by_code(&self, code: &str) -> Option<Arc<SearchParameterDefinition>> {
        if let Some(param) = self.get_param(ABSTRACT_BASES[1], code) {
            return Some(param);
        }
        let mut types: Vec<&String> = self.params_by_type.keys().collect();
        types.sort();
        types
            .into_iter()
            .filter_map(|t| self.params_by_type.get(t)?.get(code))
            .find(|p| p.status.is_usable())
            .cloned()
    }

    /// Gets a parameter by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_url.get(url).cloned()
    }

    /// Resolves the component definitions of a composite, in order.
    pub fn components(
        &self,
        param: &SearchParameterDefinition,
    ) -> Result<Vec<Arc<SearchParameterDefinition>>, RegistryError> {
        param
            .component
            .iter()
            .map(|c| {
                self.get_by_url(&c.definition)
                    .ok_or_else(|| RegistryError::NotFound {
                        identifier: c.definition.clone(),
                    })
            })
            .collect()
    }

    /// Gets all active parameters for a resource type.
    pub fn get_active_params(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        self.params_by_type
            .get(resource_type)
            .map(|params| {
                params
                    .values()
                    .filter(|p| p.status.is_usable())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Registers a new parameter.
    pub fn register(&mut self, param: SearchParameterDefinition) -> Result<(), RegistryError> {
        if self.params_by_url.contains_key(&param.url) {
            return Err(RegistryError::DuplicateUrl { url: param.url });
        }
        if param.param_type == SearchParamType::Composite && param.component.is_empty() {
            return Err(RegistryError::EmptyComposite { url: param.url });
        }

        tracing::debug!(url = %param.url, code = %param.code, "Registered search parameter");
        self.register_internal(param);
        Ok(())
    }

    /// Internal registration without duplicate checking.
    fn register_internal(&mut self, param: SearchParameterDefinition) {
        let param = Arc::new(param);

        self.params_by_url
            .insert(param.url.clone(), Arc::clone(&param));

        for base in &param.base {
            self.params_by_type
                .entry(base.clone())
                .or_default()
                .insert(param.code.clone(), Arc::clone(&param));
        }
    }

    /// Updates a parameter's status.
    pub fn update_status(
        &mut self,
        url: &str,
        status: SearchParameterStatus,
    ) -> Result<(), RegistryError> {
        let old_param = self
            .params_by_url
            .get(url)
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })?;

        let mut new_def = (**old_param).clone();
        new_def.status = status;
        self.register_internal(new_def);
        Ok(())
    }

    /// Removes a parameter from the registry.
    pub fn unregister(&mut self, url: &str) -> Result<(), RegistryError> {
        let param = self
            .params_by_url
            .remove(url)
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })?;

        for base in &param.base {
            if let Some(type_params) = self.params_by_type.get_mut(base) {
                type_params.remove(&param.code);
                if type_params.is_empty() {
                    self.params_by_type.remove(base);
                }
            }
        }
        Ok(())
    }

    /// Returns all concrete resource types that have registered parameters.
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .params_by_type
            .keys()
            .filter(|t| !ABSTRACT_BASES.contains(&t.as_str()))
            .cloned()
            .collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("params_count", &self.params_by_url.len())
            .field(
                "resource_types",
                &self.params_by_type.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient_name() -> SearchParameterDefinition {
        SearchParameterDefinition::new(
            "http://hl7.org/fhir/SearchParameter/Patient-name",
            "name",
            SearchParamType::String,
        )
        .with_base(["Patient"])
    }

    #[test]
    fn test_search_parameter_status() {
        assert!(SearchParameterStatus::Active.is_usable());
        assert!(!SearchParameterStatus::Draft.is_usable());
        assert!(!SearchParameterStatus::Retired.is_usable());
        assert_eq!(
            SearchParameterStatus::from_fhir_status("retired"),
            Some(SearchParameterStatus::Retired)
        );
    }

    #[test]
    fn test_search_parameter_definition() {
        let def = patient_name();
        assert!(def.applies_to("Patient"));
        assert!(!def.applies_to("Observation"));
        assert!(!def.is_chainable());
    }

    #[test]
    fn test_common_parameters_apply_everywhere() {
        let registry = SearchParameterRegistry::with_common_parameters();
        let id = registry.get_param("Observation", "_id").unwrap();
        assert_eq!(id.param_type, SearchParamType::Id);
        assert_eq!(
            registry.find_by_code("_profile").unwrap().param_type,
            SearchParamType::Canonical
        );
        assert!(registry.resource_types().is_empty());
    }

    #[test]
    fn test_registry_operations() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(patient_name()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get_param("Patient", "name").is_some());
        assert_eq!(registry.resource_types(), vec!["Patient".to_string()]);

        let url = "http://hl7.org/fhir/SearchParameter/Patient-name";
        registry
            .update_status(url, SearchParameterStatus::Retired)
            .unwrap();
        assert!(registry.get_param("Patient", "name").is_none());
        assert!(registry.get_active_params("Patient").is_empty());

        registry.unregister(url).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unregister(url),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_empty_composite() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(patient_name()).unwrap();
        assert!(matches!(
            registry.register(patient_name()),
            Err(RegistryError::DuplicateUrl { .. })
        ));

        let composite = SearchParameterDefinition::new(
            "http://example.org/sp/combo",
            "combo",
            SearchParamType::Composite,
        )
        .with_base(["Observation"]);
        assert!(matches!(
            registry.register(composite),
            Err(RegistryError::EmptyComposite { .. })
        ));
    }

    #[test]
    fn test_components_resolve_in_order() {
        let mut registry = SearchParameterRegistry::new();
        let code = SearchParameterDefinition::new(
            "http://example.org/sp/code",
            "code",
            SearchParamType::Token,
        )
        .with_base(["Observation"]);
        let value = SearchParameterDefinition::new(
            "http://example.org/sp/value",
            "value-quantity",
            SearchParamType::Quantity,
        )
        .with_base(["Observation"]);
        let combo = SearchParameterDefinition::new(
            "http://example.org/sp/combo",
            "code-value-quantity",
            SearchParamType::Composite,
        )
        .with_base(["Observation"])
        .with_components(["http://example.org/sp/code", "http://example.org/sp/value"]);
        registry.register(code).unwrap();
        registry.register(value).unwrap();
        registry.register(combo.clone()).unwrap();

        let components = registry.components(&combo).unwrap();
        let codes: Vec<&str> = components.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["code", "value-quantity"]);
    }
}
