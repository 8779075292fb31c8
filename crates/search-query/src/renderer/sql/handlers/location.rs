//! Position filters over the latitude/longitude index.

use crate::error::{ParameterError, QueryResult};
use crate::location::{BoundingBox, bounding_areas};
use crate::renderer::schema::{self, ParamTable};
use crate::sql::{CompareOp, Expr, SqlParam};
use crate::types::{ParameterClause, ParameterValue};

use super::IndexFilter;

/// Handles `near` style special parameters.
pub(crate) struct LocationHandler;

impl LocationHandler {
    pub fn build(alias: &str, clause: &ParameterClause) -> QueryResult<IndexFilter> {
        if clause.values.iter().any(|v| v.as_text().is_none()) {
            return Err(ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            }
            .into());
        }
        let boxes = bounding_areas(clause.values.iter().filter_map(ParameterValue::as_text))?;
        Ok(Self::boxes_filter(alias, &clause.code, &boxes))
    }

    /// A position inside any of the boxes.
    pub fn boxes_filter(alias: &str, parameter: &str, boxes: &[BoundingBox]) -> IndexFilter {
        let between = |column: &str, min: f64, max: f64| {
            let column = Expr::col(alias, column);
            Expr::and([
                column
                    .clone()
                    .compare(CompareOp::Ge, Expr::param(SqlParam::Float(min))),
                column.compare(CompareOp::Le, Expr::param(SqlParam::Float(max))),
            ])
        };

        let predicate = Expr::or(boxes.iter().map(|b| {
            Expr::and([
                between(schema::LATITUDE_VALUE, b.min_latitude, b.max_latitude),
                between(schema::LONGITUDE_VALUE, b.min_longitude, b.max_longitude),
            ])
        }));
        IndexFilter::new(ParamTable::LatLng, parameter, predicate)
    }
}
