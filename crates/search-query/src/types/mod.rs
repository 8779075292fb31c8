//! Value and parameter model.
//!
//! - [`ParameterClause`] - one filter clause, optionally reached through a [`Chain`]
//! - [`ParameterValue`] - one OR-branch of a clause's values
//! - [`SearchRequest`] - the full request: clauses, sort, includes and paging
//!
//! # Examples
//!
//! ```
//! use helios_search_query::types::{
//!     Chain, ChainHop, ParameterClause, SearchModifier, SearchRequest, SortDirective,
//! };
//!
//! // Observation?patient:Patient.name:contains=Jones&_sort=-date
//! let chain = Chain::new(vec![ChainHop::forward("patient", "Patient")]).unwrap();
//! let request = SearchRequest::new("Observation")
//!     .with_clause(
//!         ParameterClause::string("name", "Jones")
//!             .with_modifier(SearchModifier::Contains)
//!             .with_chain(chain),
//!     )
//!     .with_sort(SortDirective::parse("-date"));
//!
//! assert_eq!(request.clauses.len(), 1);
//! assert!(request.clauses[0].is_chained());
//! ```

mod date;
mod params;
mod request;

pub use date::{DateBound, DatePrecision, DateValue};

pub use params::{
    Chain, ChainDirection, ChainHop, DEFAULT_TOKEN_SYSTEM, ParameterClause, ParameterValue,
    SearchModifier, SearchParamType, SearchPrefix,
};

pub(crate) use params::split_escaped;

pub use request::{
    IncludeDirective, IncludeType, Pagination, SearchRequest, SortDirection, SortDirective,
    SortKey,
};
