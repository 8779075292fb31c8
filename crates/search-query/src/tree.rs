//! The query tree.
//!
//! A [`QueryTree`] is one complete statement waiting to be compiled. Every
//! variant runs the same strictly sequential pipeline against a
//! [`SearchQueryRenderer`]:
//!
//! ```text
//! root -> parameter scopes -> extensions -> finish (sort, page, data join)
//! ```
//!
//! The stages a variant runs, and their order, are fixed per variant; no
//! stage ever returns to an earlier one.

use crate::compiler::compile_parameter;
use crate::context::QueryContext;
use crate::error::{QueryResult, RequestError};
use crate::extensions::SearchExtension;
use crate::renderer::SearchQueryRenderer;
use crate::renderer::schema;
use crate::types::{IncludeDirective, IncludeType, Pagination, ParameterClause, SortKey};

/// The filters of one query level: parameter clauses, then extensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    /// Parameter clauses, ANDed, compiled in order.
    pub clauses: Vec<ParameterClause>,
    /// Non-parameter filters, attached after every clause.
    pub extensions: Vec<SearchExtension>,
}

impl QueryFilters {
    /// Creates filters from clauses.
    pub fn new(clauses: Vec<ParameterClause>) -> Self {
        Self {
            clauses,
            extensions: Vec::new(),
        }
    }

    /// Adds an extension.
    pub fn with_extension(mut self, extension: SearchExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Number of clauses and extensions.
    pub fn len(&self) -> usize {
        self.clauses.len() + self.extensions.len()
    }

    /// Returns true when nothing filters the rows.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.extensions.is_empty()
    }

    fn attach<R: SearchQueryRenderer>(
        &self,
        renderer: &R,
        mut ctx: QueryContext<R::Builder>,
    ) -> QueryResult<QueryContext<R::Builder>> {
        for clause in &self.clauses {
            ctx = compile_parameter(renderer, ctx, clause)?;
        }
        for extension in &self.extensions {
            ctx = renderer.attach_extension(ctx, extension)?;
        }
        Ok(ctx)
    }
}

/// Matching resources of one type, sorted only by entity columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuery {
    /// The resource type searched.
    pub resource_type: String,
    /// Filters.
    pub filters: QueryFilters,
    /// `_id` / `_lastUpdated` sort keys.
    pub sort: Vec<SortKey>,
    /// The page returned.
    pub page: Pagination,
}

/// The number of matching resources of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    /// The resource type searched, or [`schema::WHOLE_SYSTEM`].
    pub resource_type: String,
    /// Filters.
    pub filters: QueryFilters,
}

/// Matching resources of one type ordered by indexed parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct SortQuery {
    /// The resource type searched.
    pub resource_type: String,
    /// Filters.
    pub filters: QueryFilters,
    /// Sort keys in priority order.
    pub sort: Vec<SortKey>,
    /// The page returned.
    pub page: Pagination,
}

/// Resources pulled in by `_include` or `_revinclude` for a page of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeQuery {
    /// The directive followed.
    pub directive: IncludeDirective,
    /// Logical resource ids of the matched page.
    pub logical_resource_ids: Vec<i64>,
}

impl IncludeQuery {
    /// The type of the included resources.
    pub fn root_type(&self) -> QueryResult<&str> {
        match self.directive.include_type {
            IncludeType::Revinclude => Ok(&self.directive.source_type),
            IncludeType::Include => self.directive.target_type.as_deref().ok_or_else(|| {
                let value = format!(
                    "{}:{}",
                    self.directive.source_type, self.directive.search_param
                );
                RequestError::InvalidInclude { value }.into()
            }),
        }
    }
}

/// `(type, id)` rows of a whole-system search.
///
/// With [`schema::WHOLE_SYSTEM`] as the resource type this filters the
/// global table; with a concrete type it is one member of a union.
#[derive(Debug, Clone, PartialEq)]
pub struct WholeCollectionFilterQuery {
    /// The table family filtered.
    pub resource_type: String,
    /// Filters.
    pub filters: QueryFilters,
    /// `_id` / `_lastUpdated` sort keys.
    pub sort: Vec<SortKey>,
    /// The page returned. Union members have none.
    pub page: Option<Pagination>,
}

impl WholeCollectionFilterQuery {
    /// A union member for one resource type.
    pub fn member(resource_type: impl Into<String>, filters: QueryFilters) -> Self {
        Self {
            resource_type: resource_type.into(),
            filters,
            sort: Vec::new(),
            page: None,
        }
    }
}

/// Resource rows of one type found by a whole-system search.
#[derive(Debug, Clone, PartialEq)]
pub struct WholeCollectionDataQuery {
    /// The resource type fetched.
    pub resource_type: String,
    /// Logical resource ids returned by the filter stage.
    pub logical_resource_ids: Vec<i64>,
}

/// Independently compiled members combined with `UNION ALL`.
///
/// Members are expected to project the whole-system row shape, which
/// [`WholeCollectionFilterQuery::member`] does. Sort and paging apply once,
/// outside the union.
#[derive(Debug, Clone, PartialEq)]
pub struct WholeCollectionUnionQuery {
    /// Member queries, one per resource type.
    pub members: Vec<QueryTree>,
    /// Count the combined rows instead of returning them.
    pub count_only: bool,
    /// `_id` / `_lastUpdated` sort keys.
    pub sort: Vec<SortKey>,
    /// The page returned, ignored when counting.
    pub page: Option<Pagination>,
}

/// A complete query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTree {
    /// Matching resources, entity-column order.
    Data(DataQuery),
    /// Matching resource count.
    Count(CountQuery),
    /// Matching resources, parameter-value order.
    Sort(SortQuery),
    /// Included resources.
    Include(IncludeQuery),
    /// Whole-system `(type, id)` rows.
    WholeCollectionFilter(WholeCollectionFilterQuery),
    /// Whole-system resource rows for one type.
    WholeCollectionData(WholeCollectionDataQuery),
    /// Whole-system union of per-type members.
    WholeCollectionUnion(WholeCollectionUnionQuery),
}

impl QueryTree {
    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryTree::Data(_) => "data",
            QueryTree::Count(_) => "count",
            QueryTree::Sort(_) => "sort",
            QueryTree::Include(_) => "include",
            QueryTree::WholeCollectionFilter(_) => "whole-collection-filter",
            QueryTree::WholeCollectionData(_) => "whole-collection-data",
            QueryTree::WholeCollectionUnion(_) => "whole-collection-union",
        }
    }

    /// The resource type the statement is rooted on.
    pub fn resource_type(&self) -> &str {
        match self {
            QueryTree::Data(q) => &q.resource_type,
            QueryTree::Count(q) => &q.resource_type,
            QueryTree::Sort(q) => &q.resource_type,
            QueryTree::Include(q) => q.root_type().unwrap_or_default(),
            QueryTree::WholeCollectionFilter(q) => &q.resource_type,
            QueryTree::WholeCollectionData(q) => &q.resource_type,
            QueryTree::WholeCollectionUnion(_) => schema::WHOLE_SYSTEM,
        }
    }

    fn parameter_count(&self) -> usize {
        match self {
            QueryTree::Data(q) => q.filters.len(),
            QueryTree::Count(q) => q.filters.len(),
            QueryTree::Sort(q) => q.filters.len(),
            QueryTree::WholeCollectionFilter(q) => q.filters.len(),
            QueryTree::WholeCollectionUnion(q) => {
                q.members.iter().map(QueryTree::parameter_count).sum()
            }
            QueryTree::Include(_) | QueryTree::WholeCollectionData(_) => 0,
        }
    }

    /// Compiles the tree into the renderer's query representation.
    pub fn compile<R: SearchQueryRenderer>(&self, renderer: &R) -> QueryResult<R::Builder> {
        tracing::debug!(
            kind = self.kind(),
            resource_type = %self.resource_type(),
            parameters = self.parameter_count(),
            "Compiling query tree"
        );
        Ok(self.build(renderer)?.into_builder())
    }

    fn build<R: SearchQueryRenderer>(
        &self,
        renderer: &R,
    ) -> QueryResult<QueryContext<R::Builder>> {
        match self {
            QueryTree::Data(q) => {
                let ctx = renderer.data_root(&q.resource_type)?;
                let ctx = q.filters.attach(renderer, ctx)?;
                let ctx = attach_entity_sort(renderer, ctx, &q.sort)?;
                let ctx = renderer.attach_pagination(ctx, q.page);
                renderer.join_to_data_table(ctx)
            }
            QueryTree::Count(q) => {
                let ctx = renderer.count_root(&q.resource_type)?;
                q.filters.attach(renderer, ctx)
            }
            QueryTree::Sort(q) => {
                let ctx = renderer.sort_root(&q.resource_type)?;
                let mut ctx = q.filters.attach(renderer, ctx)?;
                for key in &q.sort {
                    ctx = renderer.attach_sort(ctx, key)?;
                }
                let ctx = renderer.attach_pagination(ctx, q.page);
                renderer.join_to_data_table(ctx)
            }
            QueryTree::Include(q) => {
                let ctx = renderer.include_root(q.root_type()?)?;
                let ctx = renderer.attach_inclusion(ctx, &q.directive, &q.logical_resource_ids)?;
                renderer.join_to_data_table(ctx)
            }
            QueryTree::WholeCollectionFilter(q) => {
                let ctx = renderer.whole_collection_filter_root(&q.resource_type)?;
                let ctx = q.filters.attach(renderer, ctx)?;
                let ctx = attach_entity_sort(renderer, ctx, &q.sort)?;
                Ok(match q.page {
                    Some(page) => renderer.attach_pagination(ctx, page),
                    None => ctx,
                })
            }
            QueryTree::WholeCollectionData(q) => {
                let ctx = renderer
                    .whole_collection_data_root(&q.resource_type, &q.logical_resource_ids)?;
                renderer.join_to_data_table(ctx)
            }
            QueryTree::WholeCollectionUnion(q) => {
                // each member owns its alias space
                let members = q
                    .members
                    .iter()
                    .map(|member| member.build(renderer))
                    .collect::<QueryResult<Vec<_>>>()?;
                let ctx = renderer.union_all(members, q.count_only)?;
                if q.count_only {
                    return Ok(ctx);
                }
                let ctx = attach_entity_sort(renderer, ctx, &q.sort)?;
                Ok(match q.page {
                    Some(page) => renderer.attach_pagination(ctx, page),
                    None => ctx,
                })
            }
        }
    }
}

/// Sort keys for statements that are not grouped per resource.
fn attach_entity_sort<R: SearchQueryRenderer>(
    renderer: &R,
    mut ctx: QueryContext<R::Builder>,
    keys: &[SortKey],
) -> QueryResult<QueryContext<R::Builder>> {
    for key in keys {
        if !key.is_entity_column() {
            return Err(RequestError::InvalidSort {
                parameter: key.parameter.clone(),
                message: "only _id and _lastUpdated can sort this query".to_string(),
            }
            .into());
        }
        ctx = renderer.attach_sort(ctx, key)?;
    }
    Ok(ctx)
}
