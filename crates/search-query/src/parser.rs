//! Request parsing.
//!
//! Turns raw query pairs into a [`SearchRequest`], resolving every parameter
//! name against a [`SearchParameterRegistry`]:
//!
//! - modifiers (`name:exact`) and value prefixes (`date=ge2020`)
//! - comma separated values, ORed, with `\,` as a literal comma
//! - forward chains (`subject:Patient.name`) and reverse chains
//!   (`_has:Observation:patient:code`), mixed and nested
//! - composite values (`code-value-quantity=http://loinc.org|8480-6$gt140`)
//! - the result parameters `_sort`, `_count`, `_page`, `_include`,
//!   `_revinclude` and `_type`

use crate::config::SearchQueryConfig;
use crate::error::{ChainError, ParameterError, QueryResult, RequestError};
use crate::registry::{SearchParameterDefinition, SearchParameterRegistry};
use crate::renderer::schema;
use crate::types::{
    Chain, ChainHop, IncludeDirective, IncludeType, ParameterClause, ParameterValue,
    SearchModifier, SearchParamType, SearchRequest, SortDirective,
};

use std::sync::Arc;

/// Result parameters accepted but not used by query compilation.
const IGNORED_PARAMETERS: [&str; 6] = [
    "_total",
    "_summary",
    "_elements",
    "_format",
    "_pretty",
    "_contained",
];

const REVERSE_CHAIN_PREFIX: &str = "_has:";

/// Parses raw search query pairs.
///
/// # Example
///
/// ```
/// use helios_search_query::config::SearchQueryConfig;
/// use helios_search_query::parser::SearchRequestParser;
/// use helios_search_query::registry::{SearchParameterDefinition, SearchParameterRegistry};
/// use helios_search_query::types::SearchParamType;
///
/// let mut registry = SearchParameterRegistry::with_common_parameters();
/// registry
///     .register(
///         SearchParameterDefinition::new("http://example.org/Patient-name", "name", SearchParamType::String)
///             .with_base(["Patient"]),
///     )
///     .unwrap();
/// let config = SearchQueryConfig::default();
/// let parser = SearchRequestParser::new(&registry, &config);
///
/// let request = parser
///     .parse(Some("Patient"), [("name:contains", "smi"), ("_count", "20")])
///     .unwrap();
/// assert_eq!(request.clauses.len(), 1);
/// assert_eq!(request.count, Some(20));
/// ```
pub struct SearchRequestParser<'a> {
    registry: &'a SearchParameterRegistry,
    config: &'a SearchQueryConfig,
}

impl<'a> SearchRequestParser<'a> {
    /// Creates a parser.
    pub fn new(registry: &'a SearchParameterRegistry, config: &'a SearchQueryConfig) -> Self {
        Self { registry, config }
    }

    /// Parses the pairs of a type-level (`Some(type)`) or whole-system
    /// (`None`) search.
    pub fn parse<I, K, V>(
        &self,
        resource_type: Option<&str>,
        pairs: I,
    ) -> QueryResult<SearchRequest>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = match resource_type {
            Some(t) => SearchRequest::new(t),
            None => SearchRequest::whole_system(),
        };
        let base_type = resource_type.unwrap_or(schema::WHOLE_SYSTEM);

        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            match name {
                "_count" => request.count = Some(parse_paging(name, value, 0)?),
                "_page" => request.page = Some(parse_paging(name, value, 1)?),
                "_sort" => request.sort.extend(
                    value
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(SortDirective::parse),
                ),
                "_type" => request.resource_types.extend(
                    value
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                ),
                _ if is_include(name, "_include") => {
                    request.includes.push(parse_include(IncludeType::Include, name, value)?)
                }
                _ if is_include(name, "_revinclude") => {
                    request.includes.push(parse_include(IncludeType::Revinclude, name, value)?)
                }
                _ if IGNORED_PARAMETERS.contains(&name) => {
                    tracing::debug!(parameter = %name, "Ignoring result parameter");
                }
                _ => {
                    if let Some(clause) = self.parse_clause(base_type, name, value)? {
                        request.clauses.push(clause);
                    }
                }
            }
        }
        Ok(request)
    }

    /// Parses one filter parameter, walking its chain. Returns `None` for
    /// parameters that are dropped.
    pub fn parse_clause(
        &self,
        resource_type: &str,
        name: &str,
        value: &str,
    ) -> QueryResult<Option<ParameterClause>> {
        if value.is_empty() {
            tracing::debug!(parameter = %name, "Ignoring parameter without a value");
            return Ok(None);
        }

        let mut hops = Vec::new();
        let mut current = resource_type.to_string();
        let mut rest = name;

        loop {
            if let Some(expression) = rest.strip_prefix(REVERSE_CHAIN_PREFIX) {
                let mut parts = expression.splitn(3, ':');
                let (Some(source), Some(reference), Some(remainder)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(RequestError::InvalidReverseChain {
                        expression: name.to_string(),
                    }
                    .into());
                };
                if source.is_empty() || reference.is_empty() || remainder.is_empty() {
                    return Err(RequestError::InvalidReverseChain {
                        expression: name.to_string(),
                    }
                    .into());
                }

                let Some(def) = self.lookup(source, reference) else {
                    return self.unknown(source, reference);
                };
                let canonical = via_canonical(&def, source)?;
                hops.push(with_canonical(ChainHop::reverse(source, reference), canonical));
                current = source.to_string();
                rest = remainder;
                continue;
            }

            let Some((head, tail)) = rest.split_once('.') else {
                break;
            };
            let (code, modifier) = split_modifier(head);
            let Some(def) = self.lookup(&current, code) else {
                return self.unknown(&current, code);
            };
            let canonical = via_canonical(&def, &current)?;
            let target = match modifier {
                Some(raw) => match SearchModifier::parse(raw) {
                    Some(SearchModifier::Type(target)) => target,
                    _ => {
                        return Err(RequestError::UnknownModifier {
                            parameter: code.to_string(),
                            modifier: raw.to_string(),
                        }
                        .into());
                    }
                },
                None => match def.target.as_slice() {
                    [only] => only.clone(),
                    _ => {
                        return Err(ChainError::AmbiguousTarget {
                            parameter: code.to_string(),
                        }
                        .into());
                    }
                },
            };
            hops.push(with_canonical(ChainHop::forward(code, target.as_str()), canonical));
            current = target;
            rest = tail;
        }

        let (code, modifier) = split_modifier(rest);
        let Some(def) = self.lookup(&current, code) else {
            return self.unknown(&current, code);
        };
        let modifier = modifier
            .map(|raw| {
                SearchModifier::parse(raw).ok_or_else(|| RequestError::UnknownModifier {
                    parameter: code.to_string(),
                    modifier: raw.to_string(),
                })
            })
            .transpose()?;

        let mut clause = ParameterClause::new(code, def.param_type);
        clause.values = if modifier == Some(SearchModifier::Missing) {
            vec![ParameterValue::text(value)]
        } else {
            self.parse_values(&def, value)?
        };
        clause.modifier = modifier;
        if !hops.is_empty() {
            clause.chain = Some(Chain::for_parameter(code, hops)?);
        }
        Ok(Some(clause))
    }

    fn lookup(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterDefinition>> {
        if resource_type == schema::WHOLE_SYSTEM {
            self.registry.find_by_code(code)
        } else {
            self.registry.get_param(resource_type, code)
        }
    }

    fn unknown(&self, resource_type: &str, code: &str) -> QueryResult<Option<ParameterClause>> {
        if self.config.strict_parameters {
            return Err(RequestError::UnknownParameter {
                resource_type: resource_type.to_string(),
                parameter: code.to_string(),
            }
            .into());
        }
        tracing::warn!(
            resource_type = %resource_type,
            parameter = %code,
            "Ignoring unknown search parameter"
        );
        Ok(None)
    }

    fn parse_values(
        &self,
        def: &SearchParameterDefinition,
        raw: &str,
    ) -> QueryResult<Vec<ParameterValue>> {
        split_unescaped(raw, ',')
            .iter()
            .map(|value| match def.param_type {
                SearchParamType::Composite => self.parse_composite(def, value),
                other => Ok(ParameterValue::parse(other, &def.code, value)?),
            })
            .collect()
    }

    fn parse_composite(
        &self,
        def: &SearchParameterDefinition,
        raw: &str,
    ) -> QueryResult<ParameterValue> {
        let invalid = |message: String| ParameterError::InvalidValue {
            parameter: def.code.clone(),
            value: raw.to_string(),
            message,
        };
        let components = self
            .registry
            .components(def)
            .map_err(|e| invalid(e.to_string()))?;
        let parts = split_unescaped(raw, '$');
        if parts.len() != components.len() {
            return Err(invalid(format!("expected {} components", components.len())).into());
        }

        let clauses = components
            .iter()
            .zip(&parts)
            .map(|(component, part)| {
                let value = ParameterValue::parse(component.param_type, &component.code, part)?;
                Ok(ParameterClause::new(component.code.clone(), component.param_type)
                    .with_value(value))
            })
            .collect::<Result<Vec<_>, ParameterError>>()?;
        Ok(ParameterValue::composite(clauses))
    }
}

/// Whether a chain through `def` follows canonical URLs; fails for
/// parameters that cannot be chained at all.
fn via_canonical(def: &SearchParameterDefinition, resource_type: &str) -> Result<bool, ChainError> {
    match def.param_type {
        SearchParamType::Reference => Ok(false),
        SearchParamType::Canonical => Ok(true),
        other => Err(ChainError::NotAReference {
            parameter: def.code.clone(),
            resource_type: resource_type.to_string(),
            param_type: other.to_string(),
        }),
    }
}

fn with_canonical(hop: ChainHop, canonical: bool) -> ChainHop {
    if canonical {
        hop.via_canonical()
    } else {
        hop
    }
}

/// `name[:modifier]`.
fn split_modifier(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((code, modifier)) => (code, Some(modifier)),
        None => (name, None),
    }
}

fn is_include(name: &str, parameter: &str) -> bool {
    name == parameter
        || name
            .strip_prefix(parameter)
            .is_some_and(|rest| rest == ":iterate" || rest == ":recurse")
}

fn parse_include(
    include_type: IncludeType,
    name: &str,
    value: &str,
) -> QueryResult<IncludeDirective> {
    let iterate = name.contains(':');
    IncludeDirective::parse(include_type, value, iterate).ok_or_else(|| {
        RequestError::InvalidInclude {
            value: value.to_string(),
        }
        .into()
    })
}

fn parse_paging(name: &str, value: &str, min: u32) -> Result<u32, RequestError> {
    value
        .parse::<u32>()
        .ok()
        .filter(|n| *n >= min)
        .ok_or_else(|| RequestError::InvalidPaging {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Splits on `separator` unless escaped with `\`. Only the escape in front
/// of the separator is removed; every other escape is kept for the value
/// parser.
fn split_unescaped(value: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&separator) {
            current.push(separator);
            chars.next();
        } else if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}
