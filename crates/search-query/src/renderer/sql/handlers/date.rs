//! Date parameter filters.
//!
//! Both sides are ranges. The indexed row covers `[DATE_START, DATE_END]`
//! and the search value covers `[lower, upper]`; prefixes compare the two.

use chrono::{DateTime, Utc};

use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema::{self, ParamTable};
use crate::sql::{CompareOp, Expr, SqlParam};
use crate::types::{DateBound, ParameterClause, ParameterValue, SearchPrefix};

use super::IndexFilter;

/// Handles date parameters.
pub(crate) struct DateHandler;

impl DateHandler {
    pub fn build(alias: &str, clause: &ParameterClause) -> QueryResult<IndexFilter> {
        let predicate = values_predicate(
            clause,
            &Expr::col(alias, schema::DATE_START),
            &Expr::col(alias, schema::DATE_END),
        )?;
        Ok(IndexFilter::new(
            ParamTable::Dates,
            clause.code.clone(),
            predicate,
        ))
    }
}

/// The clause's date values over a `[start, end]` column pair, ORed.
pub(crate) fn values_predicate(
    clause: &ParameterClause,
    start: &Expr,
    end: &Expr,
) -> Result<Expr, ParameterError> {
    let mut branches = Vec::with_capacity(clause.values.len());
    for value in &clause.values {
        let branch = match value {
            ParameterValue::Date { bound } => bound_predicate(start, end, bound),
            ParameterValue::DateRange { bounds } => {
                Expr::and(bounds.iter().map(|b| bound_predicate(start, end, b)))
            }
            _ => {
                return Err(ParameterError::ValueShapeMismatch {
                    parameter: clause.code.clone(),
                    param_type: clause.param_type.to_string(),
                });
            }
        };
        branches.push(branch);
    }
    Ok(Expr::or(branches))
}

/// One prefixed comparison of the stored range against the value range.
pub(crate) fn bound_predicate(start: &Expr, end: &Expr, bound: &DateBound) -> Expr {
    let lower = bound.value.lower;
    let upper = bound.value.upper;
    let cmp = |column: &Expr, op: CompareOp, instant: DateTime<Utc>| {
        column
            .clone()
            .compare(op, Expr::param(SqlParam::timestamp(instant)))
    };

    match bound.prefix {
        SearchPrefix::Eq => Expr::and([
            cmp(start, CompareOp::Ge, lower),
            cmp(end, CompareOp::Le, upper),
        ]),
        SearchPrefix::Ne => Expr::or([
            cmp(start, CompareOp::Lt, lower),
            cmp(end, CompareOp::Gt, upper),
        ]),
        SearchPrefix::Lt => cmp(start, CompareOp::Lt, lower),
        SearchPrefix::Le => cmp(start, CompareOp::Le, upper),
        SearchPrefix::Gt => cmp(end, CompareOp::Gt, upper),
        SearchPrefix::Ge => cmp(end, CompareOp::Ge, lower),
        SearchPrefix::Sa => cmp(start, CompareOp::Gt, upper),
        SearchPrefix::Eb => cmp(end, CompareOp::Lt, lower),
        SearchPrefix::Ap => {
            let span = bound.value.span();
            let lower = lower.checked_sub_signed(span).unwrap_or(lower);
            let upper = upper.checked_add_signed(span).unwrap_or(upper);
            Expr::and([
                cmp(start, CompareOp::Le, upper),
                cmp(end, CompareOp::Ge, lower),
            ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DateValue, SearchParamType};

    fn date(raw: &str) -> ParameterClause {
        ParameterClause::new("birthdate", SearchParamType::Date)
            .with_value(ParameterValue::parse(SearchParamType::Date, "birthdate", raw).unwrap())
    }

    fn sql(clause: &ParameterClause) -> String {
        DateHandler::build("P1", clause)
            .unwrap()
            .predicate
            .to_fragment()
            .sql
    }

    #[test]
    fn test_eq_is_contained_in_value_range() {
        let fragment = DateHandler::build("P1", &date("2024-01-15"))
            .unwrap()
            .predicate
            .to_fragment();
        assert_eq!(fragment.sql, "P1.DATE_START >= ?1 AND P1.DATE_END <= ?2");

        let value = DateValue::parse("2024-01-15").unwrap();
        assert_eq!(
            fragment.params,
            vec![
                SqlParam::timestamp(value.lower),
                SqlParam::timestamp(value.upper)
            ]
        );
    }

    #[test]
    fn test_prefix_columns() {
        assert_eq!(sql(&date("lt2024")), "P1.DATE_START < ?1");
        assert_eq!(sql(&date("le2024")), "P1.DATE_START <= ?1");
        assert_eq!(sql(&date("gt2024")), "P1.DATE_END > ?1");
        assert_eq!(sql(&date("ge2024")), "P1.DATE_END >= ?1");
        assert_eq!(sql(&date("sa2024")), "P1.DATE_START > ?1");
        assert_eq!(sql(&date("eb2024")), "P1.DATE_END < ?1");
        assert_eq!(sql(&date("ne2024")), "P1.DATE_START < ?1 OR P1.DATE_END > ?2");
    }

    #[test]
    fn test_approximate_widens_by_span() {
        let fragment = DateHandler::build("P1", &date("ap2024-01-15"))
            .unwrap()
            .predicate
            .to_fragment();
        assert_eq!(fragment.sql, "P1.DATE_START <= ?1 AND P1.DATE_END >= ?2");

        let value = DateValue::parse("2024-01-15").unwrap();
        assert_eq!(
            fragment.params[1],
            SqlParam::timestamp(value.lower - value.span())
        );
    }

    #[test]
    fn test_range_value_is_conjunction() {
        let clause = ParameterClause::new("birthdate", SearchParamType::Date).with_value(
            ParameterValue::DateRange {
                bounds: vec![
                    DateBound::parse("ge2020").unwrap(),
                    DateBound::parse("lt2021").unwrap(),
                ],
            },
        );
        assert_eq!(sql(&clause), "P1.DATE_END >= ?1 AND P1.DATE_START < ?2");
    }

    #[test]
    fn test_rejects_text_value() {
        let clause = ParameterClause::new("birthdate", SearchParamType::Date)
            .with_value(ParameterValue::text("2024"));
        assert!(DateHandler::build("P1", &clause).is_err());
    }
}
