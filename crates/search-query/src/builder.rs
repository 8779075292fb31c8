//! Query planning.
//!
//! [`SearchQueryBuilder`] decides which [`QueryTree`] answers a
//! [`SearchRequest`]: a data, sort or count query for a type-level search,
//! and for a whole-system search either a filter over the global table or a
//! union of per-type members.

use crate::compiler::{PROFILE, SECURITY, TAG, consolidate_date_clauses};
use crate::config::SearchQueryConfig;
use crate::error::{QueryResult, RequestError};
use crate::extensions::SearchExtension;
use crate::identity::IdentityCache;
use crate::registry::SearchParameterRegistry;
use crate::renderer::schema;
use crate::tree::{
    CountQuery, DataQuery, IncludeQuery, QueryFilters, QueryTree, SortQuery,
    WholeCollectionDataQuery, WholeCollectionFilterQuery, WholeCollectionUnionQuery,
};
use crate::types::{
    ChainDirection, IncludeDirective, Pagination, ParameterClause, SearchParamType, SearchRequest,
    SortDirective, SortKey,
};

/// Parameters indexed for every resource in the global tables.
const GLOBAL_PARAMETERS: [&str; 5] = ["_id", "_lastUpdated", TAG, SECURITY, PROFILE];

/// Abstract types never searched as union members.
const ABSTRACT_TYPES: [&str; 2] = [schema::WHOLE_SYSTEM, "DomainResource"];

/// Plans query trees for search requests.
///
/// # Example
///
/// ```
/// use helios_search_query::builder::SearchQueryBuilder;
/// use helios_search_query::config::SearchQueryConfig;
/// use helios_search_query::identity::InMemoryIdentityCache;
/// use helios_search_query::registry::SearchParameterRegistry;
/// use helios_search_query::tree::QueryTree;
/// use helios_search_query::types::SearchRequest;
///
/// let config = SearchQueryConfig::default();
/// let identity = InMemoryIdentityCache::new();
/// let registry = SearchParameterRegistry::with_common_parameters();
/// let builder = SearchQueryBuilder::new(&config, &identity, &registry);
///
/// let tree = builder.build(&SearchRequest::new("Patient").with_count(0)).unwrap();
/// assert!(matches!(tree, QueryTree::Count(_)));
/// ```
pub struct SearchQueryBuilder<'a> {
    config: &'a SearchQueryConfig,
    identity: &'a dyn IdentityCache,
    registry: &'a SearchParameterRegistry,
}

impl<'a> SearchQueryBuilder<'a> {
    /// Creates a builder.
    pub fn new(
        config: &'a SearchQueryConfig,
        identity: &'a dyn IdentityCache,
        registry: &'a SearchParameterRegistry,
    ) -> Self {
        Self {
            config,
            identity,
            registry,
        }
    }

    /// The tree returning the requested page, or the count when `_count=0`.
    pub fn build(&self, request: &SearchRequest) -> QueryResult<QueryTree> {
        let page = self.pagination(request);
        let tree = match &request.resource_type {
            None => self.whole_system(request, page)?,
            Some(resource_type) => {
                let filters = self.filters(&request.clauses);
                match page {
                    None => QueryTree::Count(CountQuery {
                        resource_type: resource_type.clone(),
                        filters,
                    }),
                    Some(page) => {
                        let sort = self.sort_keys(resource_type, &request.sort)?;
                        if sort.iter().all(SortKey::is_entity_column) {
                            QueryTree::Data(DataQuery {
                                resource_type: resource_type.clone(),
                                filters,
                                sort,
                                page,
                            })
                        } else {
                            QueryTree::Sort(SortQuery {
                                resource_type: resource_type.clone(),
                                filters,
                                sort,
                                page,
                            })
                        }
                    }
                }
            }
        };
        tracing::debug!(
            kind = tree.kind(),
            resource_type = %tree.resource_type(),
            "Planned search query"
        );
        Ok(tree)
    }

    /// The tree counting every match, regardless of paging.
    pub fn build_count(&self, request: &SearchRequest) -> QueryResult<QueryTree> {
        match &request.resource_type {
            Some(resource_type) => Ok(QueryTree::Count(CountQuery {
                resource_type: resource_type.clone(),
                filters: self.filters(&request.clauses),
            })),
            None => self.whole_system(request, None),
        }
    }

    /// One include tree per `_include` / `_revinclude` directive, restricted
    /// to the matched page.
    pub fn build_includes(
        &self,
        request: &SearchRequest,
        logical_resource_ids: &[i64],
    ) -> Vec<QueryTree> {
        request
            .includes
            .iter()
            .map(|directive| self.build_include(directive, logical_resource_ids))
            .collect()
    }

    /// The tree for one include directive.
    pub fn build_include(
        &self,
        directive: &IncludeDirective,
        logical_resource_ids: &[i64],
    ) -> QueryTree {
        QueryTree::Include(IncludeQuery {
            directive: directive.clone(),
            logical_resource_ids: logical_resource_ids.to_vec(),
        })
    }

    /// The tree fetching resources of one type found by a whole-system search.
    pub fn build_whole_system_data(
        &self,
        resource_type: &str,
        logical_resource_ids: &[i64],
    ) -> QueryTree {
        QueryTree::WholeCollectionData(WholeCollectionDataQuery {
            resource_type: resource_type.to_string(),
            logical_resource_ids: logical_resource_ids.to_vec(),
        })
    }

    /// The paging window, `None` meaning count only.
    pub fn pagination(&self, request: &SearchRequest) -> Option<Pagination> {
        let requested = request.count.unwrap_or(self.config.default_page_size);
        if requested == 0 {
            return None;
        }
        let size = if requested > self.config.max_page_size {
            tracing::warn!(
                requested,
                max = self.config.max_page_size,
                "Clamping page size"
            );
            self.config.max_page_size
        } else {
            requested
        };
        Some(Pagination::for_page(request.page.unwrap_or(1), size))
    }

    /// Orders, consolidates and splits the clauses of one query level.
    ///
    /// `_id` and `_lastUpdated` go first, same-code date clauses merge, and
    /// unchained position clauses become location extensions.
    pub fn filters(&self, clauses: &[ParameterClause]) -> QueryFilters {
        let (mut ordered, rest): (Vec<ParameterClause>, Vec<ParameterClause>) = clauses
            .iter()
            .cloned()
            .partition(|c| c.is_entity_column() && !c.is_chained());
        ordered.extend(rest);

        let mut filters = QueryFilters::default();
        for clause in consolidate_date_clauses(ordered) {
            let lift = clause.param_type == SearchParamType::Special
                && !clause.is_chained()
                && clause.modifier.is_none();
            match lift.then(|| SearchExtension::location(&clause)) {
                Some(Ok(extension)) => filters.extensions.push(extension),
                // malformed values are reported when the clause compiles
                _ => filters.clauses.push(clause),
            }
        }
        filters
    }

    /// Resolves sort directives against the parameter types.
    pub fn sort_keys(
        &self,
        resource_type: &str,
        directives: &[SortDirective],
    ) -> QueryResult<Vec<SortKey>> {
        directives
            .iter()
            .map(|directive| -> QueryResult<SortKey> {
                let param_type = match directive.parameter.as_str() {
                    "_id" => SearchParamType::Id,
                    "_lastUpdated" => SearchParamType::LastUpdated,
                    code => {
                        let def = if resource_type == schema::WHOLE_SYSTEM {
                            self.registry.find_by_code(code)
                        } else {
                            self.registry.get_param(resource_type, code)
                        };
                        def.map(|d| d.param_type).ok_or_else(|| RequestError::InvalidSort {
                            parameter: code.to_string(),
                            message: format!("not a search parameter of {}", resource_type),
                        })?
                    }
                };
                Ok(SortKey::new(
                    directive.parameter.clone(),
                    param_type,
                    directive.direction,
                ))
            })
            .collect()
    }

    fn whole_system(
        &self,
        request: &SearchRequest,
        page: Option<Pagination>,
    ) -> QueryResult<QueryTree> {
        let sort = self.sort_keys(schema::WHOLE_SYSTEM, &request.sort)?;
        let global = request
            .clauses
            .iter()
            .all(|c| !c.is_chained() && GLOBAL_PARAMETERS.contains(&c.code.as_str()));

        if global {
            let mut filters = self.filters(&request.clauses);
            if !request.resource_types.is_empty() {
                filters
                    .extensions
                    .push(SearchExtension::resource_types(&request.resource_types));
            }
            return Ok(match page {
                None => QueryTree::Count(CountQuery {
                    resource_type: schema::WHOLE_SYSTEM.to_string(),
                    filters,
                }),
                Some(page) => QueryTree::WholeCollectionFilter(WholeCollectionFilterQuery {
                    resource_type: schema::WHOLE_SYSTEM.to_string(),
                    filters,
                    sort,
                    page: Some(page),
                }),
            });
        }

        let members = self
            .member_types(request)
            .into_iter()
            .filter(|resource_type| self.defines_all(resource_type, &request.clauses))
            .map(|resource_type| {
                QueryTree::WholeCollectionFilter(WholeCollectionFilterQuery::member(
                    resource_type,
                    self.filters(&request.clauses),
                ))
            })
            .collect();

        Ok(QueryTree::WholeCollectionUnion(WholeCollectionUnionQuery {
            members,
            count_only: page.is_none(),
            sort,
            page,
        }))
    }

    /// The `_type` list, or every concrete type the store knows.
    fn member_types(&self, request: &SearchRequest) -> Vec<String> {
        let mut types = if request.resource_types.is_empty() {
            self.identity.resource_type_names()
        } else {
            request.resource_types.clone()
        };
        types.retain(|t| !ABSTRACT_TYPES.contains(&t.as_str()));
        types.sort();
        types.dedup();
        types
    }

    fn defines_all(&self, resource_type: &str, clauses: &[ParameterClause]) -> bool {
        let missing = clauses.iter().find(|clause| {
            let code = match clause.chain.as_ref().and_then(|c| c.hops().first()) {
                Some(hop) if hop.direction == ChainDirection::Reverse => return false,
                Some(hop) => &hop.reference_param,
                None => &clause.code,
            };
            self.registry.get_param(resource_type, code).is_none()
        });
        match missing {
            Some(clause) => {
                tracing::warn!(
                    resource_type = %resource_type,
                    parameter = %clause.code,
                    "Skipping resource type without the search parameter"
                );
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityCache;
    use crate::registry::SearchParameterDefinition;
    use crate::types::{Chain, ChainHop, DateBound, IncludeType, ParameterValue, SortDirection};

    fn registry() -> SearchParameterRegistry {
        let mut registry = SearchParameterRegistry::with_common_parameters();
        for (base, code, param_type) in [
            ("Patient", "name", SearchParamType::String),
            ("Practitioner", "name", SearchParamType::String),
            ("Patient", "birthdate", SearchParamType::Date),
            ("Location", "near", SearchParamType::Special),
        ] {
            let url = format!("sp:{}-{}", base, code);
            let def = SearchParameterDefinition::new(url, code, param_type).with_base([base]);
            registry.register(def).unwrap();
        }
        registry
    }

    fn identity() -> InMemoryIdentityCache {
        let identity = InMemoryIdentityCache::new();
        for t in ["Patient", "Practitioner", "Observation", "Resource"] {
            identity.intern_resource_type(t);
        }
        identity
    }

    #[test]
    fn test_plan_by_sort_and_count() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let request =
            SearchRequest::new("Patient").with_sort(SortDirective::parse("-_lastUpdated"));
        let data = builder.build(&request).unwrap();
        assert!(matches!(data, QueryTree::Data(ref q) if q.page == Pagination::new(0, 10)));

        let request = SearchRequest::new("Patient").with_sort(SortDirective::parse("birthdate"));
        let sort = builder.build(&request).unwrap();
        match sort {
            QueryTree::Sort(q) => {
                assert_eq!(q.sort[0].param_type, SearchParamType::Date);
                assert_eq!(q.sort[0].direction, SortDirection::Ascending);
            }
            other => panic!("unexpected tree {:?}", other),
        }

        let count = builder.build(&SearchRequest::new("Patient").with_count(0)).unwrap();
        assert!(matches!(count, QueryTree::Count(_)));

        let request = SearchRequest::new("Patient").with_sort(SortDirective::parse("shoe"));
        assert!(builder.build(&request).is_err());
    }

    #[test]
    fn test_page_size_is_clamped() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);
        let request = SearchRequest::new("Patient").with_count(5000).with_page(2);
        assert_eq!(builder.pagination(&request), Some(Pagination::new(1000, 1000)));
    }

    #[test]
    fn test_entity_clauses_first_and_location_lifted() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let near = ParameterClause::new("near", SearchParamType::Special)
            .with_value(ParameterValue::text("42|-83|5|km"));
        let id = ParameterClause::new("_id", SearchParamType::Id)
            .with_value(ParameterValue::text("a"));
        let filters = builder.filters(&[ParameterClause::string("name", "x"), near, id]);

        let codes: Vec<&str> = filters.clauses.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["_id", "name"]);
        assert_eq!(filters.extensions.len(), 1);
    }

    #[test]
    fn test_date_clauses_are_consolidated() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let date = |raw: &str| {
            ParameterClause::new("birthdate", SearchParamType::Date).with_value(
                ParameterValue::Date {
                    bound: DateBound::parse(raw).unwrap(),
                },
            )
        };
        let filters = builder.filters(&[date("ge1970"), date("lt1980")]);
        assert_eq!(filters.clauses.len(), 1);
        assert!(matches!(
            filters.clauses[0].values[0],
            ParameterValue::DateRange { .. }
        ));
    }

    #[test]
    fn test_whole_system_global_filter() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let request = SearchRequest::whole_system()
            .with_types(["Patient"])
            .with_clause(ParameterClause::token("_tag", Some("urn:s"), "c"));
        match builder.build(&request).unwrap() {
            QueryTree::WholeCollectionFilter(q) => {
                assert_eq!(q.resource_type, schema::WHOLE_SYSTEM);
                assert_eq!(
                    q.filters.extensions,
                    vec![SearchExtension::resource_types(["Patient"])]
                );
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_whole_system_union_skips_types_without_parameter() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let request =
            SearchRequest::whole_system().with_clause(ParameterClause::string("name", "x"));
        match builder.build(&request).unwrap() {
            QueryTree::WholeCollectionUnion(q) => {
                let types: Vec<&str> = q.members.iter().map(QueryTree::resource_type).collect();
                assert_eq!(types, vec!["Patient", "Practitioner"]);
                assert!(!q.count_only);
            }
            other => panic!("unexpected tree {:?}", other),
        }

        let counted = builder.build_count(&request).unwrap();
        assert!(matches!(counted, QueryTree::WholeCollectionUnion(ref q) if q.count_only));
    }

    #[test]
    fn test_reverse_chain_does_not_restrict_members() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let chain = Chain::new(vec![ChainHop::reverse("Observation", "subject")]).unwrap();
        let clause = ParameterClause::token("code", None, "x").with_chain(chain);
        assert!(builder.defines_all("Practitioner", &[clause]));
    }

    #[test]
    fn test_includes_follow_the_page() {
        let (config, identity, registry) = (SearchQueryConfig::default(), identity(), registry());
        let builder = SearchQueryBuilder::new(&config, &identity, &registry);

        let directive =
            IncludeDirective::parse(IncludeType::Include, "Observation:subject:Patient", false)
                .unwrap();
        let request = SearchRequest::new("Observation").with_include(directive);
        let trees = builder.build_includes(&request, &[4, 5]);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].resource_type(), "Patient");
    }
}
