//! The renderer contract.
//!
//! The query tree and the parameter compiler never build physical queries
//! themselves. They drive a [`SearchQueryRenderer`], which owns the table and
//! column naming policy and knows how to express each filter in its target
//! representation. [`SqlQueryRenderer`] is the relational implementation.
//!
//! Every operation consumes the [`QueryContext`] it is given and returns the
//! context the caller continues with. Operations never touch any other
//! context, and produce the same output for the same input.

pub mod schema;
mod sql;

pub use sql::SqlQueryRenderer;

use crate::compiler;
use crate::config::SearchQueryConfig;
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::extensions::SearchExtension;
use crate::types::{ChainHop, IncludeDirective, Pagination, ParameterClause, SortKey};

/// Builds physical queries on behalf of the query tree and the compiler.
pub trait SearchQueryRenderer {
    /// The in-progress query representation.
    type Builder;

    /// Compilation settings.
    fn config(&self) -> &SearchQueryConfig;

    // ---- roots ----

    /// Counts matching resources of one type.
    fn count_root(&self, resource_type: &str) -> QueryResult<QueryContext<Self::Builder>>;

    /// Selects matching resources of one type.
    fn data_root(&self, resource_type: &str) -> QueryResult<QueryContext<Self::Builder>>;

    /// Selects matching resources grouped by id, ready for sort keys that
    /// need an index table.
    fn sort_root(&self, resource_type: &str) -> QueryResult<QueryContext<Self::Builder>>;

    /// Selects candidate resources for an include.
    fn include_root(&self, resource_type: &str) -> QueryResult<QueryContext<Self::Builder>>;

    /// Selects `(type, id)` rows for a whole-system search. `resource_type`
    /// is either one concrete type (a union member) or
    /// [`schema::WHOLE_SYSTEM`] for the global table.
    fn whole_collection_filter_root(
        &self,
        resource_type: &str,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Selects the rows of one type found by a whole-system search.
    fn whole_collection_data_root(
        &self,
        resource_type: &str,
        logical_resource_ids: &[i64],
    ) -> QueryResult<QueryContext<Self::Builder>>;

    // ---- scopes ----

    /// Opens the correlated scope one top-level parameter is compiled into.
    fn parameter_base_scope(
        &self,
        parent: &QueryContext<Self::Builder>,
    ) -> QueryContext<Self::Builder>;

    /// Attaches a finished parameter scope to its parent.
    fn close_parameter_scope(
        &self,
        parent: QueryContext<Self::Builder>,
        scope: QueryContext<Self::Builder>,
    ) -> QueryContext<Self::Builder>;

    // ---- per-type filters ----

    /// `_id`.
    fn attach_id(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// `_lastUpdated`.
    fn attach_last_updated(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// String and uri parameters.
    fn attach_string(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Token parameters.
    fn attach_token(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// `_tag` and `_security`.
    fn attach_tag(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// `_profile`.
    fn attach_profile(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Number parameters.
    fn attach_number(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Quantity parameters.
    fn attach_quantity(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Date parameters.
    fn attach_date(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Reference parameters.
    fn attach_reference(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Position parameters (`near`).
    fn attach_location(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Composite parameters.
    fn attach_composite(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// `:missing` on any parameter type.
    fn attach_missing(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
        missing: bool,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// `_include` / `_revinclude` restricted to the matched resources.
    fn attach_inclusion(
        &self,
        ctx: QueryContext<Self::Builder>,
        directive: &IncludeDirective,
        logical_resource_ids: &[i64],
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// A non-parameter filter.
    fn attach_extension(
        &self,
        ctx: QueryContext<Self::Builder>,
        extension: &SearchExtension,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    // ---- chains ----

    /// Follows a reference held by the current resource.
    fn attach_chain_hop(
        &self,
        ctx: QueryContext<Self::Builder>,
        hop: &ChainHop,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Follows references pointing at the current resource.
    fn attach_reverse_chain_hop(
        &self,
        ctx: QueryContext<Self::Builder>,
        hop: &ChainHop,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Compiles the terminal clause of a chain against the last hop.
    fn attach_terminal_filter(
        &self,
        ctx: QueryContext<Self::Builder>,
        clause: &ParameterClause,
    ) -> QueryResult<QueryContext<Self::Builder>>
    where
        Self: Sized,
    {
        compiler::compile_clause(self, ctx, clause)
    }

    // ---- finishing ----

    /// Adds one sort key.
    fn attach_sort(
        &self,
        ctx: QueryContext<Self::Builder>,
        key: &SortKey,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Limits the rows returned.
    fn attach_pagination(
        &self,
        ctx: QueryContext<Self::Builder>,
        page: Pagination,
    ) -> QueryContext<Self::Builder>;

    /// Joins the matched ids to the versioned data table.
    fn join_to_data_table(
        &self,
        ctx: QueryContext<Self::Builder>,
    ) -> QueryResult<QueryContext<Self::Builder>>;

    /// Combines independently compiled members. With `count_only` the
    /// result counts the combined rows.
    fn union_all(
        &self,
        members: Vec<QueryContext<Self::Builder>>,
        count_only: bool,
    ) -> QueryResult<QueryContext<Self::Builder>>;
}
