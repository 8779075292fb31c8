//! Filters that are not parameter clauses.
//!
//! Extensions are attached after every parameter scope has been closed and
//! constrain the root entity directly.

use serde::{Deserialize, Serialize};

use crate::error::LocationError;
use crate::location::{BoundingBox, bounding_areas};
use crate::types::{ParameterClause, ParameterValue};

/// A non-parameter filter attached to a query root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SearchExtension {
    /// The resource has a position inside one of the boxes.
    Location {
        /// The indexed position parameter.
        parameter: String,
        /// Bounding boxes, ORed.
        boxes: Vec<BoundingBox>,
    },
    /// Whole-system rows restricted to the given resource types.
    ResourceTypes {
        /// Type names, ORed.
        resource_types: Vec<String>,
    },
}

impl SearchExtension {
    /// Builds a location extension from a `near` clause.
    pub fn location(clause: &ParameterClause) -> Result<Self, LocationError> {
        let boxes = bounding_areas(clause.values.iter().filter_map(ParameterValue::as_text))?;
        Ok(SearchExtension::Location {
            parameter: clause.code.clone(),
            boxes,
        })
    }

    /// Builds a resource type restriction.
    pub fn resource_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SearchExtension::ResourceTypes {
            resource_types: types.into_iter().map(Into::into).collect(),
        }
    }
}
