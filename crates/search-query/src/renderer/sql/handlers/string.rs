//! String and uri parameter filters.

use crate::error::{ParameterError, QueryResult};
use crate::normalize::{
    LIKE_ESCAPE, contains_pattern, escape_like, normalize_string, starts_with_pattern,
};
use crate::renderer::schema::{self, ParamTable};
use crate::sql::Expr;
use crate::types::{ParameterClause, SearchModifier, SearchParamType};

use super::IndexFilter;

/// Handles string and uri parameters.
pub(crate) struct StringHandler;

impl StringHandler {
    /// Builds the filter for a string or uri clause. Values are ORed.
    ///
    /// - string: normalized starts-with on `STR_VALUE_LCASE`
    /// - string `:exact`: raw equality on `STR_VALUE`
    /// - string `:contains`: normalized substring on `STR_VALUE_LCASE`
    /// - uri: raw equality, `:below` adds path descendants, `:above` path ancestors
    pub fn build(alias: &str, clause: &ParameterClause) -> QueryResult<IndexFilter> {
        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let text = value.as_text().ok_or_else(|| ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            })?;
            let branch = if clause.param_type == SearchParamType::Uri {
                Self::uri_predicate(alias, clause.modifier.as_ref(), text)
            } else {
                Self::string_predicate(alias, clause.modifier.as_ref(), text)
            };
            branches.push(branch);
        }

        Ok(IndexFilter::new(
            ParamTable::Strings,
            clause.code.clone(),
            Expr::or(branches),
        ))
    }

    fn string_predicate(alias: &str, modifier: Option<&SearchModifier>, text: &str) -> Expr {
        match modifier {
            Some(SearchModifier::Exact) => {
                Expr::col(alias, schema::STR_VALUE).equals(Expr::string(text))
            }
            Some(SearchModifier::Contains) => Expr::col(alias, schema::STR_VALUE_LCASE)
                .like(contains_pattern(&normalize_string(text)), LIKE_ESCAPE),
            _ => Expr::col(alias, schema::STR_VALUE_LCASE)
                .like(starts_with_pattern(&normalize_string(text)), LIKE_ESCAPE),
        }
    }

    fn uri_predicate(alias: &str, modifier: Option<&SearchModifier>, text: &str) -> Expr {
        let column = Expr::col(alias, schema::STR_VALUE);
        match modifier {
            Some(SearchModifier::Below) => {
                let base = text.trim_end_matches('/');
                Expr::or([
                    column.clone().equals(Expr::string(base)),
                    column.like(format!("{}/%", escape_like(base)), LIKE_ESCAPE),
                ])
            }
            Some(SearchModifier::Above) => column.in_list(
                uri_ancestors(text)
                    .into_iter()
                    .map(Expr::string)
                    .collect(),
            ),
            _ => column.equals(Expr::string(text)),
        }
    }
}

/// The uri itself followed by every shorter path above it, stopping at the
/// authority.
///
/// `http://acme.org/fhir/ValueSet/1` yields itself, `.../fhir/ValueSet`,
/// `.../fhir` and `http://acme.org`.
pub(crate) fn uri_ancestors(uri: &str) -> Vec<String> {
    let trimmed = uri.trim_end_matches('/');
    let path_start = trimmed
        .find("://")
        .map(|scheme_end| {
            trimmed[scheme_end + 3..]
                .find('/')
                .map(|p| scheme_end + 3 + p)
                .unwrap_or(trimmed.len())
        })
        .unwrap_or(0);

    let mut ancestors = vec![trimmed.to_string()];
    let mut current = trimmed;
    while let Some(pos) = current.rfind('/') {
        if pos < path_start || pos == 0 {
            break;
        }
        current = &current[..pos];
        ancestors.push(current.to_string());
    }
    ancestors
}
