//! Relational renderer.
//!
//! [`SqlQueryRenderer`] builds [`Select`] statements against the
//! entity + parameter table schema described in [`schema`](super::schema).
//! Each top-level parameter becomes one correlated `EXISTS` block; within
//! the block, positive filters are INNER JOINs of the index table and
//! negated filters are `NOT EXISTS` subqueries, so a resource without any
//! value satisfies a negation.

mod chain;
mod finish;
pub(crate) mod handlers;

use crate::config::SearchQueryConfig;
use crate::context::{AliasAllocator, QueryContext};
use crate::error::{QueryResult, UnresolvedNameError};
use crate::extensions::SearchExtension;
use crate::identity::IdentityCache;
use crate::renderer::SearchQueryRenderer;
use crate::renderer::schema::{self, ParamTable};
use crate::sql::{Expr, JoinKind, Select, SqlFragment, SqlParam, TableRef};
use crate::terminology::TerminologyService;
use crate::tree::QueryTree;
use crate::types::{ChainHop, IncludeDirective, Pagination, ParameterClause, SortKey};

use handlers::{
    CompositeHandler, DateHandler, EntityHandler, IndexFilter, LocationHandler, MetaHandler,
    NumberHandler, QuantityHandler, ReferenceHandler, StringHandler, TokenHandler,
};

pub(crate) type Ctx = QueryContext<Select>;

/// Name lookups available to the handlers.
#[derive(Clone, Copy)]
pub(crate) struct Lookups<'a> {
    pub identity: &'a dyn IdentityCache,
    pub terminology: Option<&'a dyn TerminologyService>,
    pub config: &'a SearchQueryConfig,
}

impl<'a> Lookups<'a> {
    /// Logs a failed lookup and drops it.
    pub fn resolved(&self, result: Result<i64, UnresolvedNameError>) -> Option<i64> {
        match result {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::debug!(kind = %err.kind, name = %err.name, "Unresolved identity lookup");
                None
            }
        }
    }

    pub fn parameter_name(&self, name: &str) -> Option<i64> {
        self.resolved(self.identity.require_parameter_name(name))
    }

    pub fn code_system(&self, system: &str) -> Option<i64> {
        self.resolved(self.identity.require_code_system(system))
    }

    pub fn common_token_value(&self, system: &str, code: &str) -> Option<i64> {
        self.resolved(self.identity.require_common_token_value(system, code))
    }

    pub fn canonical(&self, url: &str) -> Option<i64> {
        self.resolved(self.identity.require_canonical(url))
    }

    pub fn resource_type(&self, resource_type: &str) -> Option<i64> {
        self.resolved(self.identity.require_resource_type(resource_type))
    }

    /// Whether codes of `system` compare case sensitively.
    pub fn is_case_sensitive(&self, system: &str) -> bool {
        self.terminology
            .map(|t| t.is_case_sensitive(system))
            .unwrap_or(true)
    }
}

/// `column = id`, or `false` when the id could not be resolved.
pub(crate) fn id_equals(column: Expr, id: Option<i64>) -> Expr {
    match id {
        Some(id) => column.equals(Expr::integer(id)),
        None => Expr::Bool(false),
    }
}

/// `column IN (ids)`, `false` for an empty list.
pub(crate) fn id_in(column: Expr, ids: impl IntoIterator<Item = i64>) -> Expr {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    column.in_list(ids.into_iter().map(Expr::integer).collect())
}

/// How a positive filter is added to the current statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// INNER JOIN on the current builder.
    Join,
    /// `EXISTS` subquery, for statements whose row count must not change.
    Exists,
}

/// The relational [`SearchQueryRenderer`].
///
/// # Example
///
/// ```
/// use helios_search_query::config::SearchQueryConfig;
/// use helios_search_query::identity::InMemoryIdentityCache;
/// use helios_search_query::renderer::{SearchQueryRenderer, SqlQueryRenderer};
///
/// let identity = InMemoryIdentityCache::new();
/// let config = SearchQueryConfig::default();
/// let renderer = SqlQueryRenderer::new(&identity, &config);
///
/// let root = renderer.count_root("Patient").unwrap();
/// let sql = root.into_builder().render().sql;
/// assert!(sql.starts_with("SELECT COUNT(*) FROM Patient_LOGICAL_RESOURCES LR0"));
/// ```
pub struct SqlQueryRenderer<'a> {
    lookups: Lookups<'a>,
}

impl<'a> SqlQueryRenderer<'a> {
    /// Creates a renderer without terminology support.
    pub fn new(identity: &'a dyn IdentityCache, config: &'a SearchQueryConfig) -> Self {
        Self {
            lookups: Lookups {
                identity,
                terminology: None,
                config,
            },
        }
    }

    /// Enables `:in`, `:not-in`, `:above` and `:below` on tokens.
    pub fn with_terminology(mut self, terminology: &'a dyn TerminologyService) -> Self {
        self.lookups.terminology = Some(terminology);
        self
    }

    /// Compiles a query tree and renders the statement.
    pub fn render(&self, tree: &QueryTree) -> QueryResult<SqlFragment> {
        let select = tree.compile(self)?;
        let fragment = select.render();
        tracing::trace!(
            sql = %fragment.sql,
            params = fragment.params.len(),
            "Rendered search query"
        );
        Ok(fragment)
    }

    pub(crate) fn lookups(&self) -> &Lookups<'a> {
        &self.lookups
    }

    pub(crate) fn parameter_name_predicate(
        &self,
        alias: &str,
        table: ParamTable,
        parameter: &str,
    ) -> Expr {
        if !table.has_parameter_name() {
            return Expr::Bool(true);
        }
        id_equals(
            Expr::col(alias, schema::PARAMETER_NAME_ID),
            self.lookups.parameter_name(parameter),
        )
    }

    pub(crate) fn correlation(alias: &str, entity_alias: &str) -> Expr {
        Expr::col(alias, schema::LOGICAL_RESOURCE_ID)
            .equals(Expr::col(entity_alias, schema::LOGICAL_RESOURCE_ID))
    }

    /// Attaches an index table filter to the current entity.
    fn attach_filter<F>(&self, mut ctx: Ctx, placement: Placement, build: F) -> QueryResult<Ctx>
    where
        F: FnOnce(&str) -> QueryResult<IndexFilter>,
    {
        let alias = ctx.aliases().parameter();
        let filter = build(&alias)?;
        let table = filter.physical_table(&alias);
        let table_name = schema::parameter_table(ctx.entity_type(), table);
        let correlation = Self::correlation(&alias, ctx.entity_alias());
        let parameter = self.parameter_name_predicate(&alias, table, &filter.parameter);

        if filter.negated {
            let inner = Expr::and([parameter, filter.predicate]);
            if inner.is_false() {
                // nothing can be present, so nothing is excluded
                return Ok(ctx);
            }
            let present =
                Select::from_table(table_name, &alias).with_filter(Expr::and([correlation, inner]));
            ctx.builder_mut().add_filter(Expr::not_exists(present));
            return Ok(ctx);
        }

        let condition = Expr::and([correlation, parameter, filter.predicate]);
        match placement {
            Placement::Join => {
                ctx.builder_mut().add_join(
                    JoinKind::Inner,
                    TableRef::table(table_name, &alias),
                    condition,
                );
                Ok(ctx.with_param_alias(alias))
            }
            Placement::Exists => {
                let present = Select::from_table(table_name, &alias).with_filter(condition);
                ctx.builder_mut().add_filter(Expr::exists(present));
                Ok(ctx)
            }
        }
    }

    /// The logical resources of one type, not deleted.
    pub(crate) fn entity_select(&self, resource_type: &str, alias: &str) -> Select {
        Select::from_table(schema::logical_resources(resource_type), alias).with_filter(
            Expr::col(alias, schema::IS_DELETED).equals(Expr::literal(schema::NOT_DELETED)),
        )
    }

    /// A root selecting the id triple every later stage relies on.
    fn id_root(&self, resource_type: &str) -> Ctx {
        let aliases = AliasAllocator::new();
        let alias = aliases.entity();
        let mut select = self.entity_select(resource_type, &alias);
        for column in [
            schema::LOGICAL_RESOURCE_ID,
            schema::LOGICAL_ID,
            schema::CURRENT_RESOURCE_ID,
        ] {
            select.add_column(Expr::col(&alias, column), Some(column.to_string()));
        }
        QueryContext::new(select, alias, resource_type, aliases)
    }
}

impl SearchQueryRenderer for SqlQueryRenderer<'_> {
    type Builder = Select;

    fn config(&self) -> &SearchQueryConfig {
        self.lookups.config
    }

    fn count_root(&self, resource_type: &str) -> QueryResult<Ctx> {
        let aliases = AliasAllocator::new();
        let alias = aliases.entity();
        let select = self
            .entity_select(resource_type, &alias)
            .with_column(Expr::count_star());
        Ok(QueryContext::new(select, alias, resource_type, aliases))
    }

    fn data_root(&self, resource_type: &str) -> QueryResult<Ctx> {
        Ok(self.id_root(resource_type))
    }

    fn sort_root(&self, resource_type: &str) -> QueryResult<Ctx> {
        let mut ctx = self.id_root(resource_type);
        let alias = ctx.entity_alias().to_string();
        for column in [
            schema::LOGICAL_RESOURCE_ID,
            schema::LOGICAL_ID,
            schema::CURRENT_RESOURCE_ID,
        ] {
            ctx.builder_mut().add_group_by(Expr::col(&alias, column));
        }
        Ok(ctx)
    }

    fn include_root(&self, resource_type: &str) -> QueryResult<Ctx> {
        Ok(self.id_root(resource_type))
    }

    fn whole_collection_filter_root(&self, resource_type: &str) -> QueryResult<Ctx> {
        let aliases = AliasAllocator::new();
        let alias = aliases.entity();
        let mut select = self.entity_select(resource_type, &alias);

        let type_column = if resource_type == schema::WHOLE_SYSTEM {
            Expr::col(&alias, schema::RESOURCE_TYPE_ID)
        } else {
            match self.lookups.resource_type(resource_type) {
                Some(id) => Expr::integer(id),
                None => {
                    select.add_filter(Expr::Bool(false));
                    Expr::param(SqlParam::Null)
                }
            }
        };
        select.add_column(type_column, Some(schema::RESOURCE_TYPE_ID.to_string()));
        for column in [
            schema::LOGICAL_RESOURCE_ID,
            schema::LOGICAL_ID,
            schema::LAST_UPDATED,
        ] {
            select.add_column(Expr::col(&alias, column), Some(column.to_string()));
        }
        Ok(QueryContext::new(select, alias, resource_type, aliases))
    }

    fn whole_collection_data_root(
        &self,
        resource_type: &str,
        logical_resource_ids: &[i64],
    ) -> QueryResult<Ctx> {
        let mut ctx = self.id_root(resource_type);
        let column = Expr::col(ctx.entity_alias(), schema::LOGICAL_RESOURCE_ID);
        ctx.builder_mut()
            .add_filter(id_in(column, logical_resource_ids.iter().copied()));
        Ok(ctx)
    }

    fn parameter_base_scope(&self, parent: &Ctx) -> Ctx {
        let alias = parent.aliases().entity();
        let select = self
            .entity_select(parent.entity_type(), &alias)
            .with_filter(Self::correlation(&alias, parent.entity_alias()));
        parent.scope(select, alias)
    }

    fn close_parameter_scope(&self, mut parent: Ctx, scope: Ctx) -> Ctx {
        parent
            .builder_mut()
            .add_filter(Expr::exists(scope.into_builder()));
        parent
    }

    fn attach_id(&self, mut ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        let predicate = EntityHandler::id_predicate(
            &self.lookups,
            ctx.entity_alias(),
            ctx.entity_type(),
            clause,
        )?;
        ctx.builder_mut().add_filter(predicate);
        Ok(ctx)
    }

    fn attach_last_updated(&self, mut ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        let predicate = EntityHandler::last_updated_predicate(ctx.entity_alias(), clause)?;
        ctx.builder_mut().add_filter(predicate);
        Ok(ctx)
    }

    fn attach_string(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            StringHandler::build(alias, clause)
        })
    }

    fn attach_token(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            TokenHandler::build(&self.lookups, alias, clause)
        })
    }

    fn attach_tag(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            MetaHandler::build_tag(&self.lookups, alias, clause)
        })
    }

    fn attach_profile(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            MetaHandler::build_profile(&self.lookups, alias, clause)
        })
    }

    fn attach_number(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            NumberHandler::build(alias, clause)
        })
    }

    fn attach_quantity(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            QuantityHandler::build(&self.lookups, alias, clause)
        })
    }

    fn attach_date(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| DateHandler::build(alias, clause))
    }

    fn attach_reference(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            ReferenceHandler::build(&self.lookups, alias, clause)
        })
    }

    fn attach_location(&self, ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        self.attach_filter(ctx, Placement::Join, |alias| {
            LocationHandler::build(alias, clause)
        })
    }

    fn attach_composite(&self, mut ctx: Ctx, clause: &ParameterClause) -> QueryResult<Ctx> {
        let condition = CompositeHandler::build(self, &mut ctx, clause)?;
        if let Some(condition) = condition {
            ctx.builder_mut().add_filter(condition);
        }
        Ok(ctx)
    }

    fn attach_missing(
        &self,
        mut ctx: Ctx,
        clause: &ParameterClause,
        missing: bool,
    ) -> QueryResult<Ctx> {
        let (table, parameter) = handlers::missing_target(clause)?;
        let alias = ctx.aliases().parameter();
        let table_name = schema::parameter_table(ctx.entity_type(), table);
        let present = Select::from_table(table_name, &alias).with_filter(Expr::and([
            Self::correlation(&alias, ctx.entity_alias()),
            self.parameter_name_predicate(&alias, table, &parameter),
        ]));

        let predicate = if present.filters.iter().any(Expr::is_false) {
            // no row can exist for an unknown parameter
            Expr::Bool(missing)
        } else if missing {
            Expr::not_exists(present)
        } else {
            Expr::exists(present)
        };
        ctx.builder_mut().add_filter(predicate);
        Ok(ctx)
    }

    fn attach_inclusion(
        &self,
        ctx: Ctx,
        directive: &IncludeDirective,
        logical_resource_ids: &[i64],
    ) -> QueryResult<Ctx> {
        finish::attach_inclusion(self, ctx, directive, logical_resource_ids)
    }

    fn attach_extension(&self, mut ctx: Ctx, extension: &SearchExtension) -> QueryResult<Ctx> {
        match extension {
            SearchExtension::Location { parameter, boxes } => {
                self.attach_filter(ctx, Placement::Exists, |alias| {
                    Ok(LocationHandler::boxes_filter(alias, parameter, boxes))
                })
            }
            SearchExtension::ResourceTypes { resource_types } => {
                let ids = resource_types
                    .iter()
                    .filter_map(|t| self.lookups.resource_type(t));
                let column = Expr::col(ctx.entity_alias(), schema::RESOURCE_TYPE_ID);
                ctx.builder_mut().add_filter(id_in(column, ids));
                Ok(ctx)
            }
        }
    }

    fn attach_chain_hop(&self, ctx: Ctx, hop: &ChainHop) -> QueryResult<Ctx> {
        Ok(chain::forward_hop(self, ctx, hop))
    }

    fn attach_reverse_chain_hop(&self, ctx: Ctx, hop: &ChainHop) -> QueryResult<Ctx> {
        Ok(chain::reverse_hop(self, ctx, hop))
    }

    fn attach_sort(&self, ctx: Ctx, key: &SortKey) -> QueryResult<Ctx> {
        finish::attach_sort(self, ctx, key)
    }

    fn attach_pagination(&self, ctx: Ctx, page: Pagination) -> Ctx {
        finish::attach_pagination(ctx, page)
    }

    fn join_to_data_table(&self, ctx: Ctx) -> QueryResult<Ctx> {
        Ok(finish::join_to_data_table(ctx))
    }

    fn union_all(&self, members: Vec<Ctx>, count_only: bool) -> QueryResult<Ctx> {
        finish::union_all(self, members, count_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityCache;
    use crate::types::{SearchModifier, SearchParamType};

    fn identity() -> InMemoryIdentityCache {
        let identity = InMemoryIdentityCache::new();
        identity.intern_resource_type("Patient");
        identity.intern_parameter_name("name");
        identity.intern_parameter_name("status");
        identity.intern_common_token_value("http://hl7.org/fhir/status", "active");
        identity
    }

    #[test]
    fn test_data_root_projects_ids() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);
        let sql = renderer.data_root("Patient").unwrap().into_builder().render().sql;
        assert_eq!(
            sql,
            "SELECT LR0.LOGICAL_RESOURCE_ID AS LOGICAL_RESOURCE_ID, LR0.LOGICAL_ID AS LOGICAL_ID, \
             LR0.CURRENT_RESOURCE_ID AS CURRENT_RESOURCE_ID FROM Patient_LOGICAL_RESOURCES LR0 \
             WHERE LR0.IS_DELETED = 'N'"
        );
    }

    #[test]
    fn test_parameter_scope_is_correlated_exists() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let root = renderer.data_root("Patient").unwrap();
        let scope = renderer.parameter_base_scope(&root);
        assert_eq!(scope.entity_alias(), "LR1");
        let scope = renderer
            .attach_string(scope, &ParameterClause::string("name", "Jo"))
            .unwrap();
        assert_eq!(scope.param_alias(), Some("P2"));
        let root = renderer.close_parameter_scope(root, scope);

        let sql = root.into_builder().render().sql;
        assert!(sql.contains("EXISTS (SELECT 1 FROM Patient_LOGICAL_RESOURCES LR1"));
        assert!(sql.contains("LR1.LOGICAL_RESOURCE_ID = LR0.LOGICAL_RESOURCE_ID"));
        assert!(sql.contains("INNER JOIN Patient_STR_VALUES P2 ON P2.LOGICAL_RESOURCE_ID = LR1.LOGICAL_RESOURCE_ID"));
        assert!(sql.contains("P2.STR_VALUE_LCASE LIKE"));
    }

    #[test]
    fn test_negated_token_is_not_exists() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let root = renderer.data_root("Patient").unwrap();
        let clause = ParameterClause::token("status", Some("http://hl7.org/fhir/status"), "active")
            .with_modifier(SearchModifier::Not);
        let scope = renderer.parameter_base_scope(&root);
        let scope = renderer.attach_token(scope, &clause).unwrap();
        let sql = scope.into_builder().render().sql;

        assert!(sql.contains("NOT EXISTS (SELECT 1 FROM Patient_RESOURCE_TOKEN_REFS P2"));
        assert!(!sql.contains("INNER JOIN"));
    }

    #[test]
    fn test_negated_unknown_code_matches_everything() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let root = renderer.data_root("Patient").unwrap();
        let clause = ParameterClause::token("status", Some("http://unknown"), "x")
            .with_modifier(SearchModifier::Not);
        let scope = renderer.parameter_base_scope(&root);
        let scope = renderer.attach_token(scope, &clause).unwrap();
        let sql = scope.into_builder().render().sql;
        assert!(!sql.contains("NOT EXISTS"));
    }

    #[test]
    fn test_missing_unknown_parameter_is_constant() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let root = renderer.data_root("Patient").unwrap();
        let clause = ParameterClause::missing("birthdate", SearchParamType::Date, true);
        let ctx = renderer.attach_missing(root, &clause, true).unwrap();
        assert!(ctx.builder().filters.iter().all(|f| !f.is_false()));

        let root = renderer.data_root("Patient").unwrap();
        let ctx = renderer.attach_missing(root, &clause, false).unwrap();
        assert!(ctx.builder().filters.iter().any(Expr::is_false));
    }

    #[test]
    fn test_missing_known_parameter_uses_exists() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let root = renderer.data_root("Patient").unwrap();
        let clause = ParameterClause::missing("status", SearchParamType::Token, false);
        let ctx = renderer.attach_missing(root, &clause, false).unwrap();
        let sql = ctx.into_builder().render().sql;
        assert!(sql.contains("AND EXISTS (SELECT 1 FROM Patient_RESOURCE_TOKEN_REFS P1"));
    }

    #[test]
    fn test_whole_collection_member_binds_type_id() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let member = renderer.whole_collection_filter_root("Patient").unwrap();
        let fragment = member.into_builder().render();
        assert!(fragment.sql.starts_with("SELECT ?1 AS RESOURCE_TYPE_ID, LR0.LOGICAL_RESOURCE_ID"));
        assert_eq!(
            fragment.params[0],
            SqlParam::Integer(identity.resource_type_id("Patient").unwrap())
        );

        let global = renderer
            .whole_collection_filter_root(schema::WHOLE_SYSTEM)
            .unwrap();
        let sql = global.into_builder().render().sql;
        assert!(sql.contains("LR0.RESOURCE_TYPE_ID AS RESOURCE_TYPE_ID"));
        assert!(sql.contains("FROM LOGICAL_RESOURCES LR0"));
    }
}
