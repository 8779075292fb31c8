//! Token parameter filters.
//!
//! Equality is resolved to `COMMON_TOKEN_VALUE_ID` surrogate ids whenever
//! possible, so the filter can read the narrow token reference table. Only
//! `:text`, system-only values and terminology expansions compare the raw
//! `TOKEN_VALUE` / `CODE_SYSTEM_ID` columns.

use std::collections::BTreeMap;

use crate::error::{ParameterError, QueryResult};
use crate::normalize::{LIKE_ESCAPE, normalize_string, starts_with_pattern};
use crate::renderer::schema::{self, ParamTable};
use crate::renderer::sql::{Lookups, id_equals, id_in};
use crate::sql::Expr;
use crate::terminology::Concept;
use crate::types::{
    DEFAULT_TOKEN_SYSTEM, ParameterClause, ParameterValue, SearchModifier, split_escaped,
};

use super::IndexFilter;

/// Suffix of the parameter holding display text for `:text`.
pub(crate) const TEXT_SUFFIX: &str = "_text";

/// Handles token parameters.
pub(crate) struct TokenHandler;

impl TokenHandler {
    /// Builds the filter for a token clause. Values are ORed; `:not` and
    /// `:not-in` produce a negated filter over the same predicate.
    pub fn build(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<IndexFilter> {
        let negated = clause
            .modifier
            .as_ref()
            .map(SearchModifier::is_negation)
            .unwrap_or(false);

        let mut parameter = clause.code.clone();
        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let (system, code) = token_parts(clause, value)?;
            let branch = match &clause.modifier {
                Some(SearchModifier::Text) => {
                    parameter = format!("{}{}", clause.code, TEXT_SUFFIX);
                    let text = code.or(system).unwrap_or_default();
                    Expr::col(alias, schema::TOKEN_VALUE)
                        .like(starts_with_pattern(&normalize_string(&text)), LIKE_ESCAPE)
                }
                Some(SearchModifier::In | SearchModifier::NotIn) => {
                    let url = match (&system, &code) {
                        (Some(system), Some(code)) => format!("{}|{}", system, code),
                        (None, Some(code)) => code.clone(),
                        (Some(system), None) => system.clone(),
                        (None, None) => String::new(),
                    };
                    let concepts = Self::expand(lookups, clause, &url)?;
                    concepts_predicate(lookups, alias, concepts)
                }
                Some(modifier @ (SearchModifier::Above | SearchModifier::Below)) => {
                    let concepts =
                        Self::subsumption(lookups, clause, modifier, system.as_deref(), code)?;
                    concepts_predicate(lookups, alias, concepts)
                }
                _ => code_predicate(lookups, alias, system.as_deref(), code.as_deref()),
            };
            branches.push(branch);
        }

        Ok(
            IndexFilter::new(ParamTable::TokenRefs, parameter, Expr::or(branches))
                .with_negation(negated),
        )
    }

    fn expand(
        lookups: &Lookups<'_>,
        clause: &ParameterClause,
        url: &str,
    ) -> QueryResult<Vec<Concept>> {
        let terminology = lookups
            .terminology
            .ok_or_else(|| ParameterError::TerminologyUnavailable {
                parameter: clause.code.clone(),
                modifier: clause
                    .modifier
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            })?;

        // versioned value set urls fall back to the unversioned expansion
        let expansion = terminology.expand(url).or_else(|| {
            url.rsplit_once('|')
                .and_then(|(unversioned, _)| terminology.expand(unversioned))
        });
        match expansion {
            Some(concepts) => Ok(concepts),
            None => {
                tracing::debug!(parameter = %clause.code, value_set = %url, "Unknown value set");
                Ok(Vec::new())
            }
        }
    }

    fn subsumption(
        lookups: &Lookups<'_>,
        clause: &ParameterClause,
        modifier: &SearchModifier,
        system: Option<&str>,
        code: Option<String>,
    ) -> QueryResult<Vec<Concept>> {
        let terminology = lookups
            .terminology
            .ok_or_else(|| ParameterError::TerminologyUnavailable {
                parameter: clause.code.clone(),
                modifier: modifier.to_string(),
            })?;

        let (Some(system), Some(code)) = (system, code) else {
            return Err(ParameterError::InvalidValue {
                parameter: clause.code.clone(),
                value: String::new(),
                message: format!(":{} requires a system|code value", modifier),
            }
            .into());
        };

        Ok(match modifier {
            SearchModifier::Above => terminology.ancestors_and_self(system, &code),
            _ => terminology.descendants_and_self(system, &code),
        })
    }
}

/// Splits a token value into its system and code.
pub(crate) fn token_parts(
    clause: &ParameterClause,
    value: &ParameterValue,
) -> Result<(Option<String>, Option<String>), ParameterError> {
    match value {
        ParameterValue::Token { system, code } => Ok((system.clone(), code.clone())),
        ParameterValue::Text { value } => {
            let mut parts = split_escaped(value, '|');
            Ok(match parts.len() {
                1 => (None, parts.pop()),
                2 => {
                    let code = parts.pop().filter(|c| !c.is_empty());
                    (parts.pop(), code)
                }
                _ => {
                    return Err(ParameterError::InvalidValue {
                        parameter: clause.code.clone(),
                        value: value.clone(),
                        message: "expected [system|]code".to_string(),
                    });
                }
            })
        }
        _ => Err(ParameterError::ValueShapeMismatch {
            parameter: clause.code.clone(),
            param_type: clause.param_type.to_string(),
        }),
    }
}

/// Equality on a `[system|]code` pair.
///
/// - `system|code` resolves to one surrogate id
/// - `code` resolves to the ids of the code in every system
/// - `|code` uses the default system
/// - `system|` compares the code system only
pub(crate) fn code_predicate(
    lookups: &Lookups<'_>,
    alias: &str,
    system: Option<&str>,
    code: Option<&str>,
) -> Expr {
    let token_id = Expr::col(alias, schema::COMMON_TOKEN_VALUE_ID);
    let system = match (system, code) {
        (Some(""), Some(_)) => Some(DEFAULT_TOKEN_SYSTEM),
        (Some("*"), _) | (Some(""), None) => None,
        (system, _) => system,
    };

    match (system, code) {
        (Some(system), Some(code)) => {
            let code = if lookups.is_case_sensitive(system) {
                code.to_string()
            } else {
                normalize_string(code)
            };
            id_equals(token_id, lookups.common_token_value(system, &code))
        }
        (None, Some(code)) => {
            let mut ids = lookups.identity.common_token_value_ids(code);
            let normalized = normalize_string(code);
            if normalized != code {
                ids.extend(lookups.identity.common_token_value_ids(&normalized));
            }
            if ids.is_empty() {
                tracing::debug!(code = %code, "Code is not known in any system");
            }
            id_in(token_id, ids)
        }
        (Some(system), None) => id_equals(
            Expr::col(alias, schema::CODE_SYSTEM_ID),
            lookups.code_system(system),
        ),
        (None, None) => Expr::Bool(false),
    }
}

/// `TOKEN_VALUE IN (codes) AND CODE_SYSTEM_ID = id`, ORed per system.
fn concepts_predicate(lookups: &Lookups<'_>, alias: &str, concepts: Vec<Concept>) -> Expr {
    let mut by_system: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for concept in concepts {
        by_system.entry(concept.system).or_default().push(concept.code);
    }

    Expr::or(by_system.into_iter().map(|(system, mut codes)| {
        codes.sort();
        codes.dedup();
        Expr::and([
            Expr::col(alias, schema::TOKEN_VALUE)
                .in_list(codes.into_iter().map(Expr::string).collect()),
            id_equals(
                Expr::col(alias, schema::CODE_SYSTEM_ID),
                lookups.code_system(&system),
            ),
        ])
    }))
}
