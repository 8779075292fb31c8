//! Search request level types: sorting, includes, paging and the request itself.

use serde::{Deserialize, Serialize};

use super::params::{ParameterClause, SearchParamType};

/// Include directive for _include and _revinclude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// The type of include.
    pub include_type: IncludeType,

    /// The resource type holding the reference.
    pub source_type: String,

    /// The reference search parameter to follow.
    pub search_param: String,

    /// Optional target resource type filter.
    pub target_type: Option<String>,

    /// Whether to iterate (follow includes of included resources).
    pub iterate: bool,
}

impl IncludeDirective {
    /// Parses `Source:param[:Target]`.
    pub fn parse(include_type: IncludeType, value: &str, iterate: bool) -> Option<Self> {
        let mut parts = value.split(':');
        let source_type = parts.next().filter(|s| !s.is_empty())?;
        let search_param = parts.next().filter(|s| !s.is_empty())?;
        let target_type = parts.next().map(String::from);
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            include_type,
            source_type: source_type.to_string(),
            search_param: search_param.to_string(),
            target_type,
            iterate,
        })
    }
}

/// Type of include operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeType {
    /// Forward include (_include).
    Include,
    /// Reverse include (_revinclude).
    Revinclude,
}

/// Sort direction for _sort parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A sort directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The parameter to sort by.
    pub parameter: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses a sort parameter value (e.g., "-date" for descending).
    pub fn parse(s: &str) -> Self {
        if let Some(stripped) = s.strip_prefix('-') {
            Self {
                parameter: stripped.to_string(),
                direction: SortDirection::Descending,
            }
        } else {
            Self {
                parameter: s.to_string(),
                direction: SortDirection::Ascending,
            }
        }
    }

    /// Returns true for keys sorted directly off the entity row.
    pub fn is_entity_column(&self) -> bool {
        matches!(self.parameter.as_str(), "_id" | "_lastUpdated")
    }
}

/// A sort directive resolved against the parameter's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// The parameter sorted by.
    pub parameter: String,
    /// Its type, which picks the index table.
    pub param_type: SearchParamType,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortKey {
    /// Creates a sort key.
    pub fn new(
        parameter: impl Into<String>,
        param_type: SearchParamType,
        direction: SortDirection,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            param_type,
            direction,
        }
    }

    /// Returns true for keys sorted directly off the entity row.
    pub fn is_entity_column(&self) -> bool {
        matches!(
            self.param_type,
            SearchParamType::Id | SearchParamType::LastUpdated
        )
    }
}

/// Offset/limit paging window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Rows to skip.
    pub offset: u64,
    /// Rows to return.
    pub limit: u64,
}

impl Pagination {
    /// Creates a window.
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// The window for a 1-based page number.
    pub fn for_page(page_number: u32, page_size: u32) -> Self {
        let page = u64::from(page_number.max(1));
        let size = u64::from(page_size);
        Self {
            offset: (page - 1) * size,
            limit: size,
        }
    }
}

/// A parsed search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The resource type searched, `None` for a whole-system search.
    pub resource_type: Option<String>,

    /// `_type` restriction for whole-system searches.
    pub resource_types: Vec<String>,

    /// Filter clauses, ANDed.
    pub clauses: Vec<ParameterClause>,

    /// Include directives.
    pub includes: Vec<IncludeDirective>,

    /// Sort directives.
    pub sort: Vec<SortDirective>,

    /// `_count`.
    pub count: Option<u32>,

    /// `_page`, 1-based.
    pub page: Option<u32>,
}

impl SearchRequest {
    /// Creates a request for one resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Default::default()
        }
    }

    /// Creates a whole-system request.
    pub fn whole_system() -> Self {
        Self::default()
    }

    /// Adds a clause.
    pub fn with_clause(mut self, clause: ParameterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Adds an include directive.
    pub fn with_include(mut self, include: IncludeDirective) -> Self {
        self.includes.push(include);
        self
    }

    /// Adds a sort directive.
    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort.push(sort);
        self
    }

    /// Sets the count limit.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Restricts a whole-system search to the given types.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true for searches without a resource type.
    pub fn is_whole_system(&self) -> bool {
        self.resource_type.is_none()
    }
}
