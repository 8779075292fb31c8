//! Composite parameter filters.
//!
//! Components of one composite value are index rows sharing a
//! `COMPOSITE_ID` on the same resource. The first component is correlated to
//! the entity and every later one to the component before it.

use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema;
use crate::renderer::sql::{Ctx, SqlQueryRenderer};
use crate::sql::{Expr, JoinKind, Select, TableRef};
use crate::types::{ParameterClause, ParameterValue};

use super::component_filter;

/// One joined component row.
struct ComponentJoin {
    table: TableRef,
    condition: Expr,
}

/// Handles composite parameters.
pub(crate) struct CompositeHandler;

impl CompositeHandler {
    /// A single value is joined onto the current statement and `None` is
    /// returned. Several values become one `EXISTS` per value and the ORed
    /// condition is returned for the caller to attach.
    pub fn build(
        renderer: &SqlQueryRenderer<'_>,
        ctx: &mut Ctx,
        clause: &ParameterClause,
    ) -> QueryResult<Option<Expr>> {
        if let [value] = clause.values.as_slice() {
            let joins = Self::component_joins(renderer, ctx, clause, value)?;
            for join in joins {
                ctx.builder_mut()
                    .add_join(JoinKind::Inner, join.table, join.condition);
            }
            return Ok(None);
        }

        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let mut joins = Self::component_joins(renderer, ctx, clause, value)?.into_iter();
            let Some(first) = joins.next() else {
                continue;
            };
            let mut select = Select::new().with_from(first.table).with_filter(first.condition);
            for join in joins {
                select.add_join(JoinKind::Inner, join.table, join.condition);
            }
            branches.push(Expr::exists(select));
        }
        Ok(Some(Expr::or(branches)))
    }

    fn component_joins(
        renderer: &SqlQueryRenderer<'_>,
        ctx: &Ctx,
        clause: &ParameterClause,
        value: &ParameterValue,
    ) -> QueryResult<Vec<ComponentJoin>> {
        let ParameterValue::Composite { components } = value else {
            return Err(ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            }
            .into());
        };

        let mut joins = Vec::with_capacity(components.len());
        let mut previous: Option<String> = None;
        for component in components {
            let alias = ctx.aliases().parameter();
            let filter = component_filter(renderer.lookups(), &alias, component)?;
            let table = filter.physical_table(&alias);

            let link = match &previous {
                None => SqlQueryRenderer::correlation(&alias, ctx.entity_alias()),
                Some(prev) => Expr::and([
                    Expr::col(&alias, schema::LOGICAL_RESOURCE_ID)
                        .equals(Expr::col(prev, schema::LOGICAL_RESOURCE_ID)),
                    Expr::col(&alias, schema::COMPOSITE_ID)
                        .equals(Expr::col(prev, schema::COMPOSITE_ID)),
                ]),
            };
            let condition = Expr::and([
                link,
                renderer.parameter_name_predicate(&alias, table, &filter.parameter),
                filter.predicate,
            ]);
            joins.push(ComponentJoin {
                table: TableRef::table(schema::parameter_table(ctx.entity_type(), table), &alias),
                condition,
            });
            previous = Some(alias);
        }
        Ok(joins)
    }
}
