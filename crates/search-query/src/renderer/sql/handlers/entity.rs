//! `_id` and `_lastUpdated`, compared on the logical resource row itself.

use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema;
use crate::renderer::sql::{Lookups, id_in};
use crate::sql::Expr;
use crate::types::ParameterClause;

use super::date;

/// Handles the entity column parameters.
pub(crate) struct EntityHandler;

impl EntityHandler {
    /// `LOGICAL_ID IN (values)`.
    ///
    /// Across the whole system a logical id is only unique per type, so the
    /// rows are also limited to the known resource types when configured.
    pub fn id_predicate(
        lookups: &Lookups<'_>,
        entity_alias: &str,
        entity_type: &str,
        clause: &ParameterClause,
    ) -> QueryResult<Expr> {
        let mut ids = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let id = value.as_text().ok_or_else(|| ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            })?;
            ids.push(Expr::string(id));
        }

        let mut terms = vec![Expr::col(entity_alias, schema::LOGICAL_ID).in_list(ids)];
        if entity_type == schema::WHOLE_SYSTEM && lookups.config.restrict_whole_system_id_by_type {
            let type_ids: Vec<i64> = lookups
                .identity
                .resource_type_names()
                .iter()
                .filter_map(|t| lookups.identity.resource_type_id(t))
                .collect();
            if !type_ids.is_empty() {
                terms.push(id_in(
                    Expr::col(entity_alias, schema::RESOURCE_TYPE_ID),
                    type_ids,
                ));
            }
        }
        Ok(Expr::and(terms))
    }

    /// The date rules with both range ends on `LAST_UPDATED`.
    pub fn last_updated_predicate(
        entity_alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<Expr> {
        let column = Expr::col(entity_alias, schema::LAST_UPDATED);
        Ok(date::values_predicate(clause, &column, &column)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchQueryConfig;
    use crate::identity::InMemoryIdentityCache;
    use crate::types::{ParameterValue, SearchParamType};

    fn id_clause(ids: &[&str]) -> ParameterClause {
        ParameterClause::new("_id", SearchParamType::Id)
            .with_values(ids.iter().map(|id| ParameterValue::text(*id)).collect())
    }

    #[test]
    fn test_id_list() {
        let identity = InMemoryIdentityCache::new();
        let config = SearchQueryConfig::default();
        let lookups = Lookups {
            identity: &identity,
            terminology: None,
            config: &config,
        };

        let expr = EntityHandler::id_predicate(&lookups, "LR0", "Patient", &id_clause(&["a", "b"]))
            .unwrap();
        assert_eq!(expr.to_fragment().sql, "LR0.LOGICAL_ID IN (?1, ?2)");
    }

    #[test]
    fn test_whole_system_id_restricted_by_type() {
        let identity = InMemoryIdentityCache::new();
        identity.intern_resource_type("Patient");
        identity.intern_resource_type("Observation");
        let config = SearchQueryConfig::default();
        let lookups = Lookups {
            identity: &identity,
            terminology: None,
            config: &config,
        };

        let expr =
            EntityHandler::id_predicate(&lookups, "LR0", schema::WHOLE_SYSTEM, &id_clause(&["a"]))
                .unwrap();
        assert_eq!(
            expr.to_fragment().sql,
            "LR0.LOGICAL_ID = ?1 AND LR0.RESOURCE_TYPE_ID IN (?2, ?3)"
        );

        let config = SearchQueryConfig {
            restrict_whole_system_id_by_type: false,
            ..SearchQueryConfig::default()
        };
        let lookups = Lookups {
            config: &config,
            ..lookups
        };
        let expr =
            EntityHandler::id_predicate(&lookups, "LR0", schema::WHOLE_SYSTEM, &id_clause(&["a"]))
                .unwrap();
        assert_eq!(expr.to_fragment().sql, "LR0.LOGICAL_ID = ?1");
    }

    #[test]
    fn test_last_updated_uses_single_column() {
        let clause = ParameterClause::new("_lastUpdated", SearchParamType::LastUpdated).with_value(
            ParameterValue::parse(SearchParamType::LastUpdated, "_lastUpdated", "ge2024-01-01")
                .unwrap(),
        );
        let expr = EntityHandler::last_updated_predicate("LR0", &clause).unwrap();
        assert_eq!(expr.to_fragment().sql, "LR0.LAST_UPDATED >= ?1");
    }
}
