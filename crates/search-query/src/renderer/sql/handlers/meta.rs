//! `_tag`, `_security` and `_profile`.
//!
//! The meta tables are keyed by resource only: tags and security labels hold
//! a surrogate token id, profiles a canonical id with version and fragment.

use crate::compiler::SECURITY;
use crate::error::{ParameterError, QueryResult};
use crate::renderer::schema::{self, ParamTable};
use crate::renderer::sql::{Lookups, id_equals};
use crate::sql::{CompareOp, Expr};
use crate::types::{ParameterClause, SearchModifier, split_escaped};

use super::IndexFilter;
use super::token::{code_predicate, token_parts};

/// A profile value split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProfileValue {
    url: String,
    version: Option<String>,
    fragment: Option<String>,
}

impl ProfileValue {
    /// Parses `url[|version]`, where either part may end in `#fragment`.
    fn parse(raw: &str) -> Self {
        let mut parts = split_escaped(raw, '|').into_iter();
        let url = parts.next().unwrap_or_default();
        let version = parts.next().filter(|v| !v.is_empty());

        let (url, url_fragment) = split_fragment(&url);
        let (version, version_fragment) = match version.as_deref().map(split_fragment) {
            Some((v, f)) => (Some(v).filter(|v| !v.is_empty()), f),
            None => (None, None),
        };
        Self {
            url,
            version,
            fragment: version_fragment.or(url_fragment),
        }
    }
}

fn split_fragment(value: &str) -> (String, Option<String>) {
    match value.split_once('#') {
        Some((head, fragment)) => (head.to_string(), Some(fragment.to_string())),
        None => (value.to_string(), None),
    }
}

/// Handles the resource meta parameters.
pub(crate) struct MetaHandler;

impl MetaHandler {
    /// `_tag` and `_security`, with optional `:not`.
    pub fn build_tag(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<IndexFilter> {
        let negated = match &clause.modifier {
            None => false,
            Some(SearchModifier::Not) => true,
            Some(other) => {
                return Err(ParameterError::UnsupportedModifier {
                    parameter: clause.code.clone(),
                    param_type: clause.param_type.to_string(),
                    modifier: other.to_string(),
                }
                .into());
            }
        };

        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let (system, code) = token_parts(clause, value)?;
            if code.is_none() {
                return Err(ParameterError::NotSupportedHere {
                    parameter: clause.code.clone(),
                    message: "a system without a code".to_string(),
                }
                .into());
            }
            branches.push(code_predicate(
                lookups,
                alias,
                system.as_deref(),
                code.as_deref(),
            ));
        }

        let table = if clause.code == SECURITY {
            ParamTable::Security
        } else {
            ParamTable::Tags
        };
        Ok(IndexFilter::new(table, clause.code.clone(), Expr::or(branches)).with_negation(negated))
    }

    /// `_profile`, matching canonical url, then version and fragment when
    /// given. `:above` and `:below` compare versions as ranges.
    pub fn build_profile(
        lookups: &Lookups<'_>,
        alias: &str,
        clause: &ParameterClause,
    ) -> QueryResult<IndexFilter> {
        let mut branches = Vec::with_capacity(clause.values.len());
        for value in &clause.values {
            let raw = value.as_text().ok_or_else(|| ParameterError::ValueShapeMismatch {
                parameter: clause.code.clone(),
                param_type: clause.param_type.to_string(),
            })?;
            let profile = ProfileValue::parse(raw);

            let mut terms = vec![id_equals(
                Expr::col(alias, schema::CANONICAL_ID),
                lookups.canonical(&profile.url),
            )];
            if let Some(version) = profile.version {
                let op = match clause.modifier {
                    Some(SearchModifier::Above) => CompareOp::Ge,
                    Some(SearchModifier::Below) => CompareOp::Lt,
                    _ => CompareOp::Eq,
                };
                terms.push(Expr::col(alias, schema::VERSION).compare(op, Expr::string(version)));
            }
            if let Some(fragment) = profile.fragment {
                terms.push(Expr::col(alias, schema::FRAGMENT).equals(Expr::string(fragment)));
            }
            branches.push(Expr::and(terms));
        }

        Ok(IndexFilter::new(
            ParamTable::Profiles,
            clause.code.clone(),
            Expr::or(branches),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{PROFILE, TAG};
    use crate::config::SearchQueryConfig;
    use crate::identity::InMemoryIdentityCache;
    use crate::types::{ParameterValue, SearchParamType};

    const PROFILE_URL: &str = "http://acme.org/StructureDefinition/vitals";

    fn profile(raw: &str) -> ParameterClause {
        ParameterClause::new(PROFILE, SearchParamType::Canonical)
            .with_value(ParameterValue::text(raw))
    }

    #[test]
    fn test_parse_profile_value() {
        assert_eq!(
            ProfileValue::parse("http://a/b|1.0#frag"),
            ProfileValue {
                url: "http://a/b".to_string(),
                version: Some("1.0".to_string()),
                fragment: Some("frag".to_string()),
            }
        );
        assert_eq!(
            ProfileValue::parse("http://a/b#frag"),
            ProfileValue {
                url: "http://a/b".to_string(),
                version: None,
                fragment: Some("frag".to_string()),
            }
        );
    }

    #[test]
    fn test_profile_predicates() {
        let identity = InMemoryIdentityCache::new();
        identity.intern_canonical(PROFILE_URL);
        let config = SearchQueryConfig::default();
        let lookups = Lookups {
            identity: &identity,
            terminology: None,
            config: &config,
        };

        let filter = MetaHandler::build_profile(&lookups, "P1", &profile(PROFILE_URL)).unwrap();
        assert_eq!(filter.table, ParamTable::Profiles);
        assert_eq!(filter.predicate.to_fragment().sql, "P1.CANONICAL_ID = ?1");

        let below = profile(&format!("{}|2.0", PROFILE_URL)).with_modifier(SearchModifier::Below);
        let filter = MetaHandler::build_profile(&lookups, "P1", &below).unwrap();
        assert_eq!(
            filter.predicate.to_fragment().sql,
            "P1.CANONICAL_ID = ?1 AND P1.VERSION < ?2"
        );

        let unknown = MetaHandler::build_profile(&lookups, "P1", &profile("http://other")).unwrap();
        assert!(unknown.predicate.is_false());
    }

    #[test]
    fn test_tag_and_security_tables() {
        let identity = InMemoryIdentityCache::new();
        identity.intern_common_token_value("http://acme.org/tags", "vip");
        let config = SearchQueryConfig::default();
        let lookups = Lookups {
            identity: &identity,
            terminology: None,
            config: &config,
        };

        let tag = ParameterClause::token(TAG, Some("http://acme.org/tags"), "vip");
        let filter = MetaHandler::build_tag(&lookups, "P1", &tag).unwrap();
        assert_eq!(filter.table, ParamTable::Tags);
        assert_eq!(
            filter.predicate.to_fragment().sql,
            "P1.COMMON_TOKEN_VALUE_ID = ?1"
        );

        let security = ParameterClause::token(SECURITY, None, "vip").with_modifier(SearchModifier::Not);
        let filter = MetaHandler::build_tag(&lookups, "P1", &security).unwrap();
        assert_eq!(filter.table, ParamTable::Security);
        assert!(filter.negated);
    }

    #[test]
    fn test_tag_without_code_is_rejected() {
        let identity = InMemoryIdentityCache::new();
        let config = SearchQueryConfig::default();
        let lookups = Lookups {
            identity: &identity,
            terminology: None,
            config: &config,
        };
        let tag = ParameterClause::new(TAG, SearchParamType::Token).with_value(ParameterValue::Token {
            system: Some("http://acme.org/tags".to_string()),
            code: None,
        });
        assert!(MetaHandler::build_tag(&lookups, "P1", &tag).is_err());
    }
}
