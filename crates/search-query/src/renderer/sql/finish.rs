//! Final statement stages: sort keys, paging, the data table join, the
//! whole-system union and include filters.

use crate::compiler::canonical_url_parameter;
use crate::context::{AliasAllocator, QueryContext};
use crate::error::{QueryResult, RequestError};
use crate::renderer::SearchQueryRenderer;
use crate::renderer::schema::{self, ParamTable};
use crate::sql::{Expr, JoinKind, OrderBy, Select, TableRef};
use crate::types::{
    IncludeDirective, IncludeType, Pagination, SearchParamType, SortDirection, SortKey,
};

use super::chain::version_predicate;
use super::{Ctx, SqlQueryRenderer, id_equals, id_in};

/// Prefix of the exported sort columns.
const SORT_COLUMN: &str = "SORT";

/// Columns projected from the resource table by the data join.
const DATA_COLUMNS: [&str; 6] = [
    schema::RESOURCE_ID,
    schema::LOGICAL_RESOURCE_ID,
    schema::VERSION_ID,
    schema::LAST_UPDATED,
    schema::IS_DELETED,
    schema::DATA,
];

/// Columns of every whole-system union row.
const UNION_COLUMNS: [&str; 4] = [
    schema::RESOURCE_TYPE_ID,
    schema::LOGICAL_RESOURCE_ID,
    schema::LOGICAL_ID,
    schema::LAST_UPDATED,
];

fn sort_table(key: &SortKey) -> Option<ParamTable> {
    match key.param_type {
        SearchParamType::Token | SearchParamType::Reference => Some(ParamTable::TokenValues),
        other => ParamTable::for_type(other),
    }
}

/// Adds one sort key.
///
/// The key is exported as `SORT{n}` so that an outer statement can re-apply
/// the order. On grouped statements the value is aggregated per resource:
/// the smallest value ascending, the largest descending.
pub(crate) fn attach_sort(
    renderer: &SqlQueryRenderer<'_>,
    mut ctx: Ctx,
    key: &SortKey,
) -> QueryResult<Ctx> {
    let entity_alias = ctx.entity_alias().to_string();
    let descending = key.direction == SortDirection::Descending;
    let invalid = |message: &str| RequestError::InvalidSort {
        parameter: key.parameter.clone(),
        message: message.to_string(),
    };

    let value = if key.is_entity_column() {
        let column = if key.param_type == SearchParamType::LastUpdated {
            schema::LAST_UPDATED
        } else {
            schema::LOGICAL_ID
        };
        Expr::col(&entity_alias, column)
    } else {
        let table = sort_table(key).ok_or_else(|| invalid("parameter type cannot be sorted"))?;
        let column = match table {
            ParamTable::Dates if descending => schema::DATE_END,
            _ => table
                .sort_column()
                .ok_or_else(|| invalid("parameter type cannot be sorted"))?,
        };
        let parameter = if key.param_type == SearchParamType::Canonical {
            canonical_url_parameter(&key.parameter)
        } else {
            key.parameter.clone()
        };

        let alias = ctx.aliases().parameter();
        let condition = Expr::and([
            SqlQueryRenderer::correlation(&alias, &entity_alias),
            renderer.parameter_name_predicate(&alias, table, &parameter),
        ]);
        let table_name = schema::parameter_table(ctx.entity_type(), table);
        ctx.builder_mut().add_join(
            JoinKind::LeftOuter,
            TableRef::table(table_name, &alias),
            condition,
        );
        Expr::col(&alias, column)
    };

    let builder = ctx.builder_mut();
    let value = if builder.group_by.is_empty() {
        value
    } else {
        Expr::function(if descending { "MAX" } else { "MIN" }, vec![value])
    };
    let position = builder
        .columns
        .iter()
        .filter(|c| {
            c.alias
                .as_deref()
                .is_some_and(|a| a.starts_with(SORT_COLUMN))
        })
        .count();
    builder.add_column(value.clone(), Some(format!("{}{}", SORT_COLUMN, position)));
    builder.add_order_by(if descending {
        OrderBy::desc(value)
    } else {
        OrderBy::asc(value)
    });

    tracing::trace!(parameter = %key.parameter, position, descending, "Sort key attached");
    Ok(ctx)
}

/// Adds the id tiebreak and the offset/limit window.
pub(crate) fn attach_pagination(mut ctx: Ctx, page: Pagination) -> Ctx {
    let alias = ctx.entity_alias().to_string();
    let tiebreak: Vec<Expr> = if ctx.entity_type() == schema::WHOLE_SYSTEM {
        vec![
            Expr::col(&alias, schema::RESOURCE_TYPE_ID),
            Expr::col(&alias, schema::LOGICAL_RESOURCE_ID),
        ]
    } else {
        vec![Expr::col(&alias, schema::LOGICAL_RESOURCE_ID)]
    };

    let builder = ctx.builder_mut();
    for expr in tiebreak {
        if !builder.order_by.iter().any(|o| o.expr == expr) {
            builder.add_order_by(OrderBy::asc(expr));
        }
    }
    builder.set_window(page.offset, page.limit);
    ctx
}

/// Wraps the id statement as a derived table and joins the current resource
/// version, re-applying the inner order.
pub(crate) fn join_to_data_table(mut ctx: Ctx) -> Ctx {
    let aliases = ctx.aliases().clone();
    let ids_alias = aliases.entity();
    let data_alias = aliases.with_prefix("R");
    let inner = std::mem::take(ctx.builder_mut());

    let mut outer = Select::new();
    for column in DATA_COLUMNS {
        outer.add_column(Expr::col(&data_alias, column), None);
    }
    outer.add_column(Expr::col(&ids_alias, schema::LOGICAL_ID), None);

    // inner order terms are visible through their exported names, sort
    // columns first
    for order in &inner.order_by {
        let exported = inner.columns.iter().rev().find_map(|item| match (&item.alias, &item.expr) {
            (Some(alias), expr) if *expr == order.expr => Some(alias.clone()),
            _ => None,
        });
        if let Some(name) = exported {
            outer.add_order_by(OrderBy {
                expr: Expr::col(&ids_alias, &name),
                ..order.clone()
            });
        }
    }
    let tiebreak = Expr::col(&ids_alias, schema::LOGICAL_RESOURCE_ID);
    if !outer.order_by.iter().any(|o| o.expr == tiebreak) {
        outer.add_order_by(OrderBy::asc(tiebreak));
    }

    outer.add_join(
        JoinKind::Inner,
        TableRef::table(schema::resources(ctx.entity_type()), &data_alias),
        Expr::col(&ids_alias, schema::CURRENT_RESOURCE_ID)
            .equals(Expr::col(&data_alias, schema::RESOURCE_ID)),
    );
    outer.from = Some(TableRef::subquery(inner, &ids_alias));

    ctx.with_builder(outer).with_entity_alias(ids_alias)
}

/// Combines per-type member statements into one whole-system statement.
pub(crate) fn union_all(
    renderer: &SqlQueryRenderer<'_>,
    members: Vec<Ctx>,
    count_only: bool,
) -> QueryResult<Ctx> {
    if members.is_empty() {
        let mut ctx = if count_only {
            renderer.count_root(schema::WHOLE_SYSTEM)?
        } else {
            renderer.whole_collection_filter_root(schema::WHOLE_SYSTEM)?
        };
        ctx.builder_mut().add_filter(Expr::Bool(false));
        return Ok(ctx);
    }

    let aliases = AliasAllocator::new();
    let alias = aliases.with_prefix("U");
    let member_count = members.len();
    let members: Vec<Select> = members.into_iter().map(QueryContext::into_builder).collect();

    let mut select = Select::new().with_from(TableRef::UnionAll {
        members,
        alias: alias.clone(),
    });
    if count_only {
        select.add_column(Expr::count_star(), None);
    } else {
        for column in UNION_COLUMNS {
            select.add_column(Expr::col(&alias, column), None);
        }
    }

    tracing::debug!(members = member_count, count_only, "Whole-system union");
    Ok(QueryContext::new(select, alias, schema::WHOLE_SYSTEM, aliases))
}

/// Limits an include root to resources linked to the matched page.
///
/// `_include`: the root is the target type and must be referenced by one of
/// the matched sources. `_revinclude`: the root is the source type and must
/// reference one of the matched targets.
pub(crate) fn attach_inclusion(
    renderer: &SqlQueryRenderer<'_>,
    mut ctx: Ctx,
    directive: &IncludeDirective,
    logical_resource_ids: &[i64],
) -> QueryResult<Ctx> {
    let target_type = directive
        .target_type
        .as_deref()
        .ok_or_else(|| RequestError::InvalidInclude {
            value: format!("{}:{}", directive.source_type, directive.search_param),
        })?;

    let root_alias = ctx.entity_alias().to_string();
    let reference_alias = ctx.aliases().parameter();
    let reference_table = TableRef::table(
        schema::parameter_table(&directive.source_type, ParamTable::TokenValues),
        &reference_alias,
    );
    let reference_row = Expr::and([
        renderer.parameter_name_predicate(
            &reference_alias,
            ParamTable::TokenValues,
            &directive.search_param,
        ),
        id_equals(
            Expr::col(&reference_alias, schema::CODE_SYSTEM_ID),
            renderer.lookups().code_system(target_type),
        ),
    ]);
    let ids = logical_resource_ids.iter().copied();

    let linked = match directive.include_type {
        IncludeType::Include => {
            let mut select = Select::new().with_from(reference_table);
            select.add_filter(Expr::and([
                reference_row,
                Expr::col(&reference_alias, schema::TOKEN_VALUE)
                    .equals(Expr::col(&root_alias, schema::LOGICAL_ID)),
                id_in(Expr::col(&reference_alias, schema::LOGICAL_RESOURCE_ID), ids),
                version_predicate(renderer, &reference_alias, &root_alias),
            ]));
            select
        }
        IncludeType::Revinclude => {
            let target_alias = ctx.aliases().entity();
            let mut select = Select::new().with_from(reference_table);
            select.add_join(
                JoinKind::Inner,
                TableRef::table(schema::logical_resources(target_type), &target_alias),
                Expr::and([
                    Expr::col(&target_alias, schema::LOGICAL_ID)
                        .equals(Expr::col(&reference_alias, schema::TOKEN_VALUE)),
                    id_in(Expr::col(&target_alias, schema::LOGICAL_RESOURCE_ID), ids),
                    version_predicate(renderer, &reference_alias, &target_alias),
                ]),
            );
            select.add_filter(Expr::and([
                SqlQueryRenderer::correlation(&reference_alias, &root_alias),
                reference_row,
            ]));
            select
        }
    };

    ctx.builder_mut().add_filter(Expr::exists(linked));
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchQueryConfig;
    use crate::identity::InMemoryIdentityCache;

    fn identity() -> InMemoryIdentityCache {
        let identity = InMemoryIdentityCache::new();
        for t in ["Patient", "Observation"] {
            identity.intern_resource_type(t);
        }
        for p in ["birthdate", "family", "subject", "code"] {
            identity.intern_parameter_name(p);
        }
        identity
    }

    #[test]
    fn test_entity_sort_then_page() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let ctx = renderer.data_root("Patient").unwrap();
        let key = SortKey::new("_lastUpdated", SearchParamType::LastUpdated, SortDirection::Descending);
        let ctx = attach_sort(&renderer, ctx, &key).unwrap();
        let ctx = attach_pagination(ctx, Pagination::new(20, 10));
        let sql = ctx.into_builder().render().sql;

        assert!(sql.contains("LR0.LAST_UPDATED AS SORT0"));
        assert!(sql.ends_with(
            "ORDER BY LR0.LAST_UPDATED DESC NULLS LAST, LR0.LOGICAL_RESOURCE_ID ASC NULLS LAST LIMIT 10 OFFSET 20"
        ));
    }

    #[test]
    fn test_parameter_sort_on_grouped_root_aggregates() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let ctx = renderer.sort_root("Patient").unwrap();
        let asc = SortKey::new("family", SearchParamType::String, SortDirection::Ascending);
        let desc = SortKey::new("birthdate", SearchParamType::Date, SortDirection::Descending);
        let ctx = attach_sort(&renderer, ctx, &asc).unwrap();
        let ctx = attach_sort(&renderer, ctx, &desc).unwrap();
        let sql = ctx.into_builder().render().sql;

        assert!(sql.contains("MIN(P1.STR_VALUE) AS SORT0"));
        assert!(sql.contains("MAX(P2.DATE_END) AS SORT1"));
        assert!(sql.contains("LEFT OUTER JOIN Patient_STR_VALUES P1 ON P1.LOGICAL_RESOURCE_ID = LR0.LOGICAL_RESOURCE_ID"));
        assert!(sql.contains("GROUP BY LR0.LOGICAL_RESOURCE_ID"));
    }

    #[test]
    fn test_unsortable_type_is_rejected() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let ctx = renderer.sort_root("Patient").unwrap();
        let key = SortKey::new("combo", SearchParamType::Composite, SortDirection::Ascending);
        assert!(matches!(
            attach_sort(&renderer, ctx, &key),
            Err(crate::error::QueryError::Request(RequestError::InvalidSort { .. }))
        ));
    }

    #[test]
    fn test_data_join_reapplies_order() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let ctx = renderer.data_root("Patient").unwrap();
        let key = SortKey::new("_id", SearchParamType::Id, SortDirection::Ascending);
        let ctx = attach_sort(&renderer, ctx, &key).unwrap();
        let ctx = attach_pagination(ctx, Pagination::new(0, 10));
        let ctx = join_to_data_table(ctx);
        assert_eq!(ctx.entity_alias(), "LR1");

        let sql = ctx.into_builder().render().sql;
        assert!(sql.starts_with(
            "SELECT R2.RESOURCE_ID, R2.LOGICAL_RESOURCE_ID, R2.VERSION_ID, R2.LAST_UPDATED, \
             R2.IS_DELETED, R2.DATA, LR1.LOGICAL_ID FROM (SELECT"
        ));
        assert!(sql.contains(
            ") LR1 INNER JOIN Patient_RESOURCES R2 ON LR1.CURRENT_RESOURCE_ID = R2.RESOURCE_ID"
        ));
        assert!(sql.ends_with(
            "ORDER BY LR1.SORT0 ASC NULLS LAST, LR1.LOGICAL_RESOURCE_ID ASC NULLS LAST"
        ));
    }

    #[test]
    fn test_union_of_members() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let members = vec![
            renderer.whole_collection_filter_root("Patient").unwrap(),
            renderer.whole_collection_filter_root("Observation").unwrap(),
        ];
        let ctx = union_all(&renderer, members, false).unwrap();
        assert_eq!(ctx.entity_type(), schema::WHOLE_SYSTEM);
        let ctx = attach_pagination(ctx, Pagination::new(0, 5));
        let sql = ctx.into_builder().render().sql;
        assert!(sql.starts_with("SELECT U0.RESOURCE_TYPE_ID, U0.LOGICAL_RESOURCE_ID"));
        assert!(sql.contains(" UNION ALL "));
        assert!(sql.contains("ORDER BY U0.RESOURCE_TYPE_ID ASC NULLS LAST, U0.LOGICAL_RESOURCE_ID ASC NULLS LAST"));

        let counted = union_all(&renderer, Vec::new(), true).unwrap();
        let sql = counted.into_builder().render().sql;
        assert!(sql.starts_with("SELECT COUNT(*) FROM LOGICAL_RESOURCES LR0"));
        assert!(sql.contains("1 = 0"));
    }

    #[test]
    fn test_include_and_revinclude() {
        let identity = identity();
        let config = SearchQueryConfig::default();
        let renderer = SqlQueryRenderer::new(&identity, &config);

        let include =
            IncludeDirective::parse(IncludeType::Include, "Observation:subject:Patient", false)
                .unwrap();
        let ctx = renderer.include_root("Patient").unwrap();
        let sql = attach_inclusion(&renderer, ctx, &include, &[7, 8])
            .unwrap()
            .into_builder()
            .render()
            .sql;
        assert!(sql.contains("EXISTS (SELECT 1 FROM Observation_TOKEN_VALUES_V P1 WHERE"));
        assert!(sql.contains("P1.TOKEN_VALUE = LR0.LOGICAL_ID"));
        assert!(sql.contains("P1.LOGICAL_RESOURCE_ID IN (?"));

        let revinclude =
            IncludeDirective::parse(IncludeType::Revinclude, "Observation:subject:Patient", false)
                .unwrap();
        let ctx = renderer.include_root("Observation").unwrap();
        let sql = attach_inclusion(&renderer, ctx, &revinclude, &[3])
            .unwrap()
            .into_builder()
            .render()
            .sql;
        assert!(sql.contains(
            "INNER JOIN Patient_LOGICAL_RESOURCES LR2 ON LR2.LOGICAL_ID = P1.TOKEN_VALUE"
        ));
        assert!(sql.contains("P1.LOGICAL_RESOURCE_ID = LR0.LOGICAL_RESOURCE_ID"));

        let untargeted =
            IncludeDirective::parse(IncludeType::Include, "Observation:subject", false).unwrap();
        let ctx = renderer.include_root("Patient").unwrap();
        assert!(attach_inclusion(&renderer, ctx, &untargeted, &[1]).is_err());
    }
}
