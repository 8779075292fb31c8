//! Runs searches end to end against a [`FixtureStore`].

use helios_search_query::builder::SearchQueryBuilder;
use helios_search_query::config::SearchQueryConfig;
use helios_search_query::parser::SearchRequestParser;
use helios_search_query::registry::{SearchParameterDefinition, SearchParameterRegistry};
use helios_search_query::renderer::SqlQueryRenderer;
use helios_search_query::sql::{Select, SqlFragment};
use helios_search_query::terminology::InMemoryTerminology;
use helios_search_query::tree::QueryTree;
use helios_search_query::types::{SearchParamType, SearchRequest};

use super::fixtures::FixtureStore;

/// Installs a test subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The search parameters the fixtures index.
pub fn fixture_registry() -> SearchParameterRegistry {
    let mut registry = SearchParameterRegistry::with_common_parameters();
    let definitions: [(&str, &str, SearchParamType, &[&str]); 14] = [
        ("Patient", "name", SearchParamType::String, &[]),
        ("Patient", "family", SearchParamType::String, &[]),
        ("Patient", "identifier", SearchParamType::Token, &[]),
        ("Patient", "birthdate", SearchParamType::Date, &[]),
        ("Observation", "code", SearchParamType::Token, &[]),
        ("Observation", "value-quantity", SearchParamType::Quantity, &[]),
        ("Observation", "identifier", SearchParamType::Token, &[]),
        ("Observation", "patient", SearchParamType::Reference, &["Patient"]),
        ("Observation", "subject", SearchParamType::Reference, &["Patient", "Group"]),
        ("Condition", "code", SearchParamType::Token, &[]),
        ("Condition", "status", SearchParamType::Token, &[]),
        ("RiskAssessment", "probability", SearchParamType::Number, &[]),
        ("Location", "near", SearchParamType::Special, &[]),
        ("QuestionnaireResponse", "questionnaire", SearchParamType::Canonical, &[]),
    ];
    for (base, code, param_type, targets) in definitions {
        let definition =
            SearchParameterDefinition::new(format!("sp:{}-{}", base, code), code, param_type)
                .with_base([base])
                .with_targets(targets.iter().copied());
        registry
            .register(definition)
            .expect("Failed to register fixture parameter");
    }

    let code_value_quantity = SearchParameterDefinition::new(
        "sp:Observation-code-value-quantity",
        "code-value-quantity",
        SearchParamType::Composite,
    )
    .with_base(["Observation"])
    .with_components(["sp:Observation-code", "sp:Observation-value-quantity"]);
    registry
        .register(code_value_quantity)
        .expect("Failed to register fixture composite");
    registry
}

/// A fixture store with the registry and configuration searches run with.
pub struct SearchHarness {
    /// The database.
    pub store: FixtureStore,
    /// Parameter definitions.
    pub registry: SearchParameterRegistry,
    /// Compilation settings.
    pub config: SearchQueryConfig,
    /// Value sets and is-a relationships for token modifiers.
    pub terminology: InMemoryTerminology,
}

impl SearchHarness {
    /// An empty store with the fixture registry and default settings.
    pub fn new() -> Self {
        init_tracing();
        Self {
            store: FixtureStore::new(),
            registry: fixture_registry(),
            config: SearchQueryConfig::default(),
            terminology: InMemoryTerminology::new(),
        }
    }

    /// Replaces the settings.
    pub fn with_config(mut self, config: SearchQueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Parses raw query pairs.
    pub fn request(&self, resource_type: Option<&str>, pairs: &[(&str, &str)]) -> SearchRequest {
        SearchRequestParser::new(&self.registry, &self.config)
            .parse(resource_type, pairs.iter().copied())
            .expect("Failed to parse request")
    }

    /// Plans the page query of a request.
    pub fn plan(&self, resource_type: Option<&str>, pairs: &[(&str, &str)]) -> QueryTree {
        let request = self.request(resource_type, pairs);
        self.builder().build(&request).expect("Failed to plan query")
    }

    /// Plans the count query of a request.
    pub fn plan_count(&self, resource_type: Option<&str>, pairs: &[(&str, &str)]) -> QueryTree {
        let request = self.request(resource_type, pairs);
        self.builder()
            .build_count(&request)
            .expect("Failed to plan count")
    }

    /// Compiles a tree without rendering it.
    pub fn compile(&self, tree: &QueryTree) -> Select {
        tree.compile(&self.renderer()).expect("Failed to compile query")
    }

    /// Renders a tree.
    pub fn render(&self, tree: &QueryTree) -> SqlFragment {
        self.renderer().render(tree).expect("Failed to render query")
    }

    /// Logical ids of the page a search returns, in order.
    pub fn search(&self, resource_type: Option<&str>, pairs: &[(&str, &str)]) -> Vec<String> {
        let tree = self.plan(resource_type, pairs);
        self.store.logical_ids(&self.render(&tree))
    }

    /// Total matches of a search.
    pub fn count(&self, resource_type: Option<&str>, pairs: &[(&str, &str)]) -> i64 {
        let tree = self.plan_count(resource_type, pairs);
        self.store.count(&self.render(&tree))
    }

    /// Logical ids of a search, sorted for set comparison.
    pub fn search_set(&self, resource_type: Option<&str>, pairs: &[(&str, &str)]) -> Vec<String> {
        let mut ids = self.search(resource_type, pairs);
        ids.sort();
        ids
    }

    /// A planner over this harness.
    pub fn builder(&self) -> SearchQueryBuilder<'_> {
        SearchQueryBuilder::new(&self.config, self.store.identity(), &self.registry)
    }

    /// A renderer over this harness.
    pub fn renderer(&self) -> SqlQueryRenderer<'_> {
        SqlQueryRenderer::new(self.store.identity(), &self.config)
            .with_terminology(&self.terminology)
    }
}

impl Default for SearchHarness {
    fn default() -> Self {
        Self::new()
    }
}
