//! Number and quantity parameter filters.
//!
//! An `eq` value is an implicit range from its precision: `100` matches
//! `[99.5, 100.5)` and `100.0` matches `[99.95, 100.05)`.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema::{self, ParamTable};
use crate::renderer::sql::{Lookups, id_equals};
use crate::sql::{CompareOp, Expr, SqlParam};
use crate::types::{ParameterClause, ParameterValue, SearchPrefix};

use super::IndexFilter;

/// Relative margin of `ap` comparisons.
const APPROXIMATE_FRACTION: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Smallest `ap` margin, so `ap0` is not an exact match.
const APPROXIMATE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Handles number parameters.
pub(crate) struct NumberHandler;

impl NumberHandler {
    pub fn build(alias: &str, clause: &ParameterClause) -> QueryResult<IndexFilter> {
        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let ParameterValue::Number { prefix, value } = value else {
                return Err(shape_mismatch(clause).into());
            };
            branches.push(ordered_predicate(
                clause,
                Expr::col(alias, schema::NUMBER_VALUE),
                *prefix,
                *value,
            )?);
        }
        Ok(IndexFilter::new(
            ParamTable::Numbers,
            clause.code.clone(),
            Expr::or(branches),
        ))
    }
}

/// Handles quantity parameters: the number rules on `QUANTITY_VALUE`, plus
/// the unit code and system when given.
pub(crate) struct QuantityHandler;

impl QuantityHandler {
    pub fn build(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<IndexFilter> {
        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let ParameterValue::Quantity {
                prefix,
                value,
                system,
                code,
            } = value
            else {
                return Err(shape_mismatch(clause).into());
            };

            let mut terms = vec![ordered_predicate(
                clause,
                Expr::col(alias, schema::QUANTITY_VALUE),
                *prefix,
                *value,
            )?];
            if let Some(code) = code {
                terms.push(Expr::col(alias, schema::CODE).equals(Expr::string(code.as_str())));
            }
            if let Some(system) = system {
                terms.push(id_equals(
                    Expr::col(alias, schema::CODE_SYSTEM_ID),
                    lookups.code_system(system),
                ));
            }
            branches.push(Expr::and(terms));
        }
        Ok(IndexFilter::new(
            ParamTable::Quantities,
            clause.code.clone(),
            Expr::or(branches),
        ))
    }
}

fn shape_mismatch(clause: &ParameterClause) -> ParameterError {
    ParameterError::ValueShapeMismatch {
        parameter: clause.code.clone(),
        param_type: clause.param_type.to_string(),
    }
}

/// The comparison of one prefixed decimal against a numeric column.
fn ordered_predicate(
    clause: &ParameterClause,
    column: Expr,
    prefix: SearchPrefix,
    value: Decimal,
) -> Result<Expr, ParameterError> {
    let out_of_range = || ParameterError::InvalidValue {
        parameter: clause.code.clone(),
        value: value.to_string(),
        message: "number out of range".to_string(),
    };

    let bind = |d: Decimal| -> Result<Expr, ParameterError> {
        d.to_f64()
            .map(|f| Expr::param(SqlParam::Float(f)))
            .ok_or_else(out_of_range)
    };

    let compare = |op: CompareOp, d: Decimal| -> Result<Expr, ParameterError> {
        Ok(column.clone().compare(op, bind(d)?))
    };

    Ok(match prefix {
        SearchPrefix::Eq => {
            let (low, high) = implicit_range(value).ok_or_else(out_of_range)?;
            Expr::and([compare(CompareOp::Ge, low)?, compare(CompareOp::Lt, high)?])
        }
        SearchPrefix::Ne => {
            let (low, high) = implicit_range(value).ok_or_else(out_of_range)?;
            Expr::or([compare(CompareOp::Lt, low)?, compare(CompareOp::Ge, high)?])
        }
        SearchPrefix::Gt | SearchPrefix::Sa => compare(CompareOp::Gt, value)?,
        SearchPrefix::Lt | SearchPrefix::Eb => compare(CompareOp::Lt, value)?,
        SearchPrefix::Ge => compare(CompareOp::Ge, value)?,
        SearchPrefix::Le => compare(CompareOp::Le, value)?,
        SearchPrefix::Ap => {
            let margin = (value.abs() * APPROXIMATE_FRACTION).max(APPROXIMATE_FLOOR);
            let low = value.checked_sub(margin).ok_or_else(out_of_range)?;
            let high = value.checked_add(margin).ok_or_else(out_of_range)?;
            Expr::and([compare(CompareOp::Ge, low)?, compare(CompareOp::Le, high)?])
        }
    })
}

/// `[value - half, value + half)` where half is five units one digit past
/// the stated precision. `None` when a bound leaves the decimal range.
fn implicit_range(value: Decimal) -> Option<(Decimal, Decimal)> {
    let half = Decimal::new(5, value.scale().min(27) + 1);
    Some((value.checked_sub(half)?, value.checked_add(half)?))
}
