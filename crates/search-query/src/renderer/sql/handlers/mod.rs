//! Parameter-specific filter builders.
//!
//! Each handler turns the values of one clause into a predicate over a
//! parameter table alias. The renderer decides how the predicate is attached
//! (join, `EXISTS` or `NOT EXISTS`).

mod composite;
mod date;
mod entity;
mod location;
mod meta;
mod number;
mod reference;
mod string;
mod token;

pub(crate) use composite::CompositeHandler;
pub(crate) use date::DateHandler;
pub(crate) use entity::EntityHandler;
pub(crate) use location::LocationHandler;
pub(crate) use meta::MetaHandler;
pub(crate) use number::{NumberHandler, QuantityHandler};
pub(crate) use reference::ReferenceHandler;
pub(crate) use string::StringHandler;
pub(crate) use token::TokenHandler;

use crate::compiler::{self, PROFILE, SECURITY, TAG};
use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema::{self, ParamTable};
use crate::sql::Expr;
use crate::types::{ParameterClause, SearchParamType};

use super::Lookups;

/// A predicate over one parameter table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexFilter {
    /// Table family the rows live in.
    pub table: ParamTable,
    /// The indexed parameter name the rows are stored under.
    pub parameter: String,
    /// Value predicate over the table alias.
    pub predicate: Expr,
    /// Compiled as absence of matching rows.
    pub negated: bool,
}

impl IndexFilter {
    pub fn new(table: ParamTable, parameter: impl Into<String>, predicate: Expr) -> Self {
        Self {
            table,
            parameter: parameter.into(),
            predicate,
            negated: false,
        }
    }

    pub fn with_negation(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }

    /// The table actually joined.
    ///
    /// Token rows are keyed by surrogate id; the view exposing the raw value
    /// and code system is only used when the predicate reads those columns.
    pub fn physical_table(&self, alias: &str) -> ParamTable {
        if self.table == ParamTable::TokenRefs
            && (self.predicate.references(alias, schema::TOKEN_VALUE)
                || self.predicate.references(alias, schema::CODE_SYSTEM_ID))
        {
            ParamTable::TokenValues
        } else {
            self.table
        }
    }
}

/// Builds the filter of a composite component.
pub(crate) fn component_filter(
    lookups: &Lookups<'_>,
    alias: &str,
    component: &ParameterClause,
) -> QueryResult<IndexFilter> {
    compiler::validate_clause(component)?;

    let filter = match component.param_type {
        SearchParamType::String | SearchParamType::Uri => StringHandler::build(alias, component)?,
        SearchParamType::Token => TokenHandler::build(lookups, alias, component)?,
        SearchParamType::Number => NumberHandler::build(alias, component)?,
        SearchParamType::Quantity => QuantityHandler::build(lookups, alias, component)?,
        SearchParamType::Date => DateHandler::build(alias, component)?,
        SearchParamType::Reference => ReferenceHandler::build(lookups, alias, component)?,
        SearchParamType::Special => LocationHandler::build(alias, component)?,
        SearchParamType::Composite => {
            return Err(ParameterError::NestedComposite {
                parameter: component.code.clone(),
            }
            .into());
        }
        SearchParamType::Canonical | SearchParamType::Id | SearchParamType::LastUpdated => {
            return Err(ParameterError::NotSupportedHere {
                parameter: component.code.clone(),
                message: format!(
                    "{} parameters cannot be composite components",
                    component.param_type
                ),
            }
            .into());
        }
    };

    if filter.negated {
        return Err(ParameterError::NotSupportedHere {
            parameter: component.code.clone(),
            message: "negated modifiers cannot be used on composite components".to_string(),
        }
        .into());
    }
    Ok(filter)
}

/// The table and indexed parameter name probed by `:missing`.
pub(crate) fn missing_target(
    clause: &ParameterClause,
) -> Result<(ParamTable, String), ParameterError> {
    let target = match (clause.param_type, clause.code.as_str()) {
        (SearchParamType::Canonical, PROFILE) => Some((ParamTable::Profiles, clause.code.clone())),
        (SearchParamType::Canonical, code) => Some((
            ParamTable::Strings,
            compiler::canonical_url_parameter(code),
        )),
        (SearchParamType::Token, TAG) => Some((ParamTable::Tags, clause.code.clone())),
        (SearchParamType::Token, SECURITY) => Some((ParamTable::Security, clause.code.clone())),
        (param_type, code) => ParamTable::for_type(param_type).map(|t| (t, code.to_string())),
    };

    target.ok_or_else(|| ParameterError::UnsupportedModifier {
        parameter: clause.code.clone(),
        param_type: clause.param_type.to_string(),
        modifier: "missing".to_string(),
    })
}
