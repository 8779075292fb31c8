//! Reference parameter filters.
//!
//! References are indexed as token rows whose code system is the target
//! resource type and whose code is the target logical id, so a typed value
//! resolves to a single surrogate id.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema::{self, ParamTable};
use crate::renderer::sql::{Lookups, id_equals, id_in};
use crate::sql::Expr;
use crate::types::{DEFAULT_TOKEN_SYSTEM, ParameterClause, SearchModifier};

use super::IndexFilter;
use super::token::{code_predicate, token_parts};

/// Suffix of the parameter holding `Reference.identifier` for `:identifier`.
pub(crate) const IDENTIFIER_SUFFIX: &str = "_identifier";

/// `[base/]Type/id[/_history/version]`
static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<base>.+)/)?(?P<type>[A-Z][A-Za-z]+)/(?P<id>[A-Za-z0-9\-\.]{1,64})(?:/_history/(?P<version>[^/]+))?$",
    )
    .expect("Invalid reference regex")
});

/// A parsed reference value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedReference {
    resource_type: Option<String>,
    id: String,
    version: Option<String>,
}

/// Handles reference parameters.
pub(crate) struct ReferenceHandler;

impl ReferenceHandler {
    pub fn build(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<IndexFilter> {
        if clause.modifier == Some(SearchModifier::Identifier) {
            return Self::build_identifier(lookups, alias, clause);
        }

        let modifier_type = match &clause.modifier {
            Some(SearchModifier::Type(resource_type)) => Some(resource_type.as_str()),
            _ => None,
        };

        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let text = value.as_text().ok_or_else(|| ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            })?;
            let mut reference = parse_reference(text);
            if reference.resource_type.is_none() {
                reference.resource_type = modifier_type.map(String::from);
            }
            branches.push(Self::reference_predicate(lookups, alias, clause, text, reference)?);
        }

        Ok(IndexFilter::new(
            ParamTable::TokenRefs,
            clause.code.clone(),
            Expr::or(branches),
        ))
    }

    fn reference_predicate(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
        raw: &str,
        reference: ParsedReference,
    ) -> QueryResult<Expr> {
        let token_id = Expr::col(alias, schema::COMMON_TOKEN_VALUE_ID);

        let Some(resource_type) = reference.resource_type else {
            // any local type, or an external reference stored verbatim
            let mut ids: Vec<i64> = lookups
                .identity
                .resource_type_names()
                .iter()
                .filter_map(|t| lookups.identity.common_token_value_id(t, &reference.id))
                .collect();
            ids.extend(
                lookups
                    .identity
                    .common_token_value_id(DEFAULT_TOKEN_SYSTEM, raw),
            );
            return Ok(id_in(token_id, ids));
        };

        let mut terms = vec![id_equals(
            token_id,
            lookups.common_token_value(&resource_type, &reference.id),
        )];
        if let Some(version) = reference.version {
            let version: i64 = version.parse().map_err(|_| ParameterError::InvalidValue {
                parameter: clause.code.clone(),
                value: raw.to_string(),
                message: format!("invalid version '{}'", version),
            })?;
            terms.push(Expr::col(alias, schema::REF_VERSION_ID).equals(Expr::integer(version)));
        }
        Ok(Expr::and(terms))
    }

    fn build_identifier(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<IndexFilter> {
        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let (system, code) = token_parts(clause, value)?;
            branches.push(code_predicate(
                lookups,
                alias,
                system.as_deref(),
                code.as_deref(),
            ));
        }
        Ok(IndexFilter::new(
            ParamTable::TokenRefs,
            format!("{}{}", clause.code, IDENTIFIER_SUFFIX),
            Expr::or(branches),
        ))
    }
}

/// Splits `[base/]Type/id[/_history/version]`. Anything else is an id
/// without a type.
fn parse_reference(value: &str) -> ParsedReference {
    match REFERENCE_PATTERN.captures(value) {
        Some(caps) => ParsedReference {
            resource_type: caps.name("type").map(|m| m.as_str().to_string()),
            id: caps
                .name("id")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            version: caps.name("version").map(|m| m.as_str().to_string()),
        },
        None => ParsedReference {
            resource_type: None,
            id: value.to_string(),
            version: None,
        },
    }
}
