//! FHIR search parameter clauses.
//!
//! This module defines the immutable description of one filter clause: its
//! type, modifier, values and the chain of reference hops leading to it.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ParameterError};

use super::date::{DateBound, DateValue};

/// Token system used for codes that were indexed without a system (`|code`).
pub const DEFAULT_TOKEN_SYSTEM: &str = "default-token-system";

/// FHIR search parameter types.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// A reference to a canonical resource by `url[|version]`.
    Canonical,
    /// A composite search parameter that combines others.
    Composite,
    /// Special search parameters (`near`).
    Special,
    /// The logical id of the resource (`_id`).
    Id,
    /// The last modification instant of the resource (`_lastUpdated`).
    LastUpdated,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Canonical => write!(f, "canonical"),
            SearchParamType::Composite => write!(f, "composite"),
            SearchParamType::Special => write!(f, "special"),
            SearchParamType::Id => write!(f, "id"),
            SearchParamType::LastUpdated => write!(f, "lastupdated"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "canonical" => Ok(SearchParamType::Canonical),
            "composite" => Ok(SearchParamType::Composite),
            "special" => Ok(SearchParamType::Special),
            "id" => Ok(SearchParamType::Id),
            "lastupdated" => Ok(SearchParamType::LastUpdated),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

impl SearchParamType {
    /// Returns true for types whose values carry a comparison prefix.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            SearchParamType::Number
                | SearchParamType::Date
                | SearchParamType::Quantity
                | SearchParamType::LastUpdated
        )
    }
}

/// Search modifiers that can be applied to search parameters.
///
/// See: https://build.fhir.org/search.html#modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Exact string match (string parameters).
    Exact,
    /// Contains substring (string parameters).
    Contains,
    /// Text search (token parameters).
    Text,
    /// Negation - exclude matches, including resources with no value.
    Not,
    /// Match if value is missing.
    Missing,
    /// Match codes or paths above in hierarchy.
    Above,
    /// Match codes or paths below in hierarchy.
    Below,
    /// Match codes in a value set (token parameters).
    In,
    /// Match codes not in a value set (token parameters).
    NotIn,
    /// Match on identifier (reference parameters).
    Identifier,
    /// Specify reference type (reference parameters).
    Type(String),
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Exact => write!(f, "exact"),
            SearchModifier::Contains => write!(f, "contains"),
            SearchModifier::Text => write!(f, "text"),
            SearchModifier::Not => write!(f, "not"),
            SearchModifier::Missing => write!(f, "missing"),
            SearchModifier::Above => write!(f, "above"),
            SearchModifier::Below => write!(f, "below"),
            SearchModifier::In => write!(f, "in"),
            SearchModifier::NotIn => write!(f, "not-in"),
            SearchModifier::Identifier => write!(f, "identifier"),
            SearchModifier::Type(t) => write!(f, "{}", t),
        }
    }
}

impl SearchModifier {
    /// Parses a modifier string, returning None for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "text" => Some(SearchModifier::Text),
            "not" => Some(SearchModifier::Not),
            "missing" => Some(SearchModifier::Missing),
            "above" => Some(SearchModifier::Above),
            "below" => Some(SearchModifier::Below),
            "in" => Some(SearchModifier::In),
            "not-in" => Some(SearchModifier::NotIn),
            "identifier" => Some(SearchModifier::Identifier),
            _ => {
                // Check if it's a resource type modifier
                if s.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                    Some(SearchModifier::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Returns true if this modifier is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchModifier::Exact | SearchModifier::Contains => {
                param_type == SearchParamType::String
            }
            SearchModifier::Text | SearchModifier::Not => param_type == SearchParamType::Token,
            SearchModifier::Missing => !matches!(
                param_type,
                SearchParamType::Id | SearchParamType::LastUpdated | SearchParamType::Composite
            ),
            SearchModifier::Above | SearchModifier::Below => matches!(
                param_type,
                SearchParamType::Token | SearchParamType::Uri | SearchParamType::Canonical
            ),
            SearchModifier::In | SearchModifier::NotIn => param_type == SearchParamType::Token,
            SearchModifier::Identifier | SearchModifier::Type(_) => {
                param_type == SearchParamType::Reference
            }
        }
    }

    /// Returns true for modifiers compiled as set-absence.
    pub fn is_negation(&self) -> bool {
        matches!(self, SearchModifier::Not | SearchModifier::NotIn)
    }
}

/// Comparison prefixes for search parameters.
///
/// See: https://build.fhir.org/search.html#prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
            SearchPrefix::Sa => write!(f, "sa"),
            SearchPrefix::Eb => write!(f, "eb"),
            SearchPrefix::Ap => write!(f, "ap"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

impl SearchPrefix {
    /// Extracts a prefix from the beginning of a value string.
    ///
    /// Returns the prefix and the remaining value.
    pub fn extract(value: &str) -> (Self, &str) {
        if value.len() > 2 && value.is_char_boundary(2) {
            let prefix = &value[..2];
            if prefix.chars().all(|c| c.is_ascii_lowercase()) {
                if let Ok(p) = prefix.parse() {
                    return (p, &value[2..]);
                }
            }
        }
        (SearchPrefix::Eq, value)
    }

    /// Returns true if this prefix is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchPrefix::Eq => true,
            SearchPrefix::Ne
            | SearchPrefix::Gt
            | SearchPrefix::Lt
            | SearchPrefix::Ge
            | SearchPrefix::Le
            | SearchPrefix::Ap => param_type.is_ordered(),
            SearchPrefix::Sa | SearchPrefix::Eb => matches!(
                param_type,
                SearchParamType::Date | SearchParamType::LastUpdated
            ),
        }
    }

    /// Returns true for prefixes that bound a range from below.
    pub fn is_lower_bound(&self) -> bool {
        matches!(self, SearchPrefix::Gt | SearchPrefix::Ge | SearchPrefix::Sa)
    }

    /// Returns true for prefixes that bound a range from above.
    pub fn is_upper_bound(&self) -> bool {
        matches!(self, SearchPrefix::Lt | SearchPrefix::Le | SearchPrefix::Eb)
    }
}

/// One OR-branch of a clause's values.
///
/// Exactly one shape is populated per value: either a scalar form or a
/// composite list of component clauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ParameterValue {
    /// Raw text for string, uri, reference, canonical, id and special values.
    Text { value: String },
    /// A coded value. `system: None` matches any system, `code: None` any
    /// code in the system.
    Token {
        system: Option<String>,
        code: Option<String>,
    },
    /// A number with comparison prefix.
    Number { prefix: SearchPrefix, value: Decimal },
    /// A quantity with optional system and unit code.
    Quantity {
        prefix: SearchPrefix,
        value: Decimal,
        system: Option<String>,
        code: Option<String>,
    },
    /// A single date comparison.
    Date { bound: DateBound },
    /// Several date comparisons that must all hold (consolidated clauses).
    DateRange { bounds: Vec<DateBound> },
    /// Component clauses that must match the same composite row.
    Composite { components: Vec<ParameterClause> },
}

impl ParameterValue {
    /// Creates a text value.
    pub fn text(value: impl Into<String>) -> Self {
        ParameterValue::Text {
            value: value.into(),
        }
    }

    /// Creates a token value.
    pub fn token(system: Option<&str>, code: impl Into<String>) -> Self {
        ParameterValue::Token {
            system: system.map(String::from),
            code: Some(code.into()),
        }
    }

    /// Creates a composite value.
    pub fn composite(components: Vec<ParameterClause>) -> Self {
        ParameterValue::Composite { components }
    }

    /// Parses a raw value for a scalar parameter type.
    ///
    /// Composite values need their component definitions and are built by
    /// the request parser instead.
    pub fn parse(
        param_type: SearchParamType,
        parameter: &str,
        raw: &str,
    ) -> Result<Self, ParameterError> {
        let invalid = |message: String| ParameterError::InvalidValue {
            parameter: parameter.to_string(),
            value: raw.to_string(),
            message,
        };

        match param_type {
            SearchParamType::String
            | SearchParamType::Uri
            | SearchParamType::Reference
            | SearchParamType::Canonical
            | SearchParamType::Special
            | SearchParamType::Id => Ok(Self::text(raw)),
            SearchParamType::Token => {
                let parts = split_escaped(raw, '|');
                match parts.as_slice() {
                    [code] => Ok(ParameterValue::Token {
                        system: None,
                        code: Some(code.clone()),
                    }),
                    [system, code] => Ok(ParameterValue::Token {
                        system: Some(system.clone()),
                        code: (!code.is_empty()).then(|| code.clone()),
                    }),
                    _ => Err(invalid("expected [system|]code".to_string())),
                }
            }
            SearchParamType::Number => {
                let (prefix, number) = SearchPrefix::extract(raw);
                let value = Decimal::from_str(number).map_err(|e| invalid(e.to_string()))?;
                Ok(ParameterValue::Number { prefix, value })
            }
            SearchParamType::Quantity => {
                let (prefix, rest) = SearchPrefix::extract(raw);
                let parts = split_escaped(rest, '|');
                let number = parts.first().map(String::as_str).unwrap_or_default();
                let value = Decimal::from_str(number).map_err(|e| invalid(e.to_string()))?;
                let non_empty = |i: usize| parts.get(i).filter(|s| !s.is_empty()).cloned();
                if parts.len() > 3 {
                    return Err(invalid("expected number[|system|code]".to_string()));
                }
                Ok(ParameterValue::Quantity {
                    prefix,
                    value,
                    system: non_empty(1),
                    code: non_empty(2),
                })
            }
            SearchParamType::Date | SearchParamType::LastUpdated => {
                let (prefix, date) = SearchPrefix::extract(raw);
                let value = DateValue::parse(date).map_err(invalid)?;
                Ok(ParameterValue::Date {
                    bound: DateBound { prefix, value },
                })
            }
            SearchParamType::Composite => Err(ParameterError::ValueShapeMismatch {
                parameter: parameter.to_string(),
                param_type: param_type.to_string(),
            }),
        }
    }

    /// Returns the comparison prefix of ordered values.
    pub fn prefix(&self) -> Option<SearchPrefix> {
        match self {
            ParameterValue::Number { prefix, .. } | ParameterValue::Quantity { prefix, .. } => {
                Some(*prefix)
            }
            ParameterValue::Date { bound } => Some(bound.prefix),
            _ => None,
        }
    }

    /// Returns true for composite values.
    pub fn is_composite(&self) -> bool {
        matches!(self, ParameterValue::Composite { .. })
    }

    /// Returns the raw text of a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text { value } => Some(value),
            _ => None,
        }
    }
}

/// Direction of one reference hop in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainDirection {
    /// Follow a reference held by the current resource (`subject:Patient.name`).
    Forward,
    /// Follow references pointing at the current resource (`_has:Observation:patient:code`).
    Reverse,
}

/// One reference hop of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHop {
    /// Hop direction.
    pub direction: ChainDirection,
    /// The reference parameter followed. For forward hops it belongs to the
    /// current resource type, for reverse hops to `resource_type`.
    pub reference_param: String,
    /// Forward: the referenced type. Reverse: the referencing type.
    pub resource_type: String,
    /// Whether the reference parameter holds canonical URLs.
    #[serde(default)]
    pub canonical: bool,
}

impl ChainHop {
    /// Creates a forward hop.
    pub fn forward(reference_param: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            direction: ChainDirection::Forward,
            reference_param: reference_param.into(),
            resource_type: target_type.into(),
            canonical: false,
        }
    }

    /// Creates a reverse hop.
    pub fn reverse(source_type: impl Into<String>, reference_param: impl Into<String>) -> Self {
        Self {
            direction: ChainDirection::Reverse,
            reference_param: reference_param.into(),
            resource_type: source_type.into(),
            canonical: false,
        }
    }

    /// Marks the hop as following a canonical reference.
    pub fn via_canonical(mut self) -> Self {
        self.canonical = true;
        self
    }
}

/// A non-empty, validated sequence of reference hops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ChainHop>", into = "Vec<ChainHop>")]
pub struct Chain {
    hops: Vec<ChainHop>,
}

impl Chain {
    /// Validates and creates a chain.
    pub fn new(hops: Vec<ChainHop>) -> Result<Self, ChainError> {
        Self::validate(&hops, "")?;
        Ok(Self { hops })
    }

    /// Creates a chain, naming the terminal parameter in errors.
    pub fn for_parameter(parameter: &str, hops: Vec<ChainHop>) -> Result<Self, ChainError> {
        Self::validate(&hops, parameter)?;
        Ok(Self { hops })
    }

    fn validate(hops: &[ChainHop], parameter: &str) -> Result<(), ChainError> {
        if hops.is_empty() {
            return Err(ChainError::Empty {
                parameter: parameter.to_string(),
            });
        }

        for (position, hop) in hops.iter().enumerate() {
            let message = if hop.reference_param.is_empty() {
                Some("missing reference parameter")
            } else if hop.resource_type.is_empty() {
                Some("missing resource type")
            } else {
                None
            };
            if let Some(message) = message {
                return Err(ChainError::IncompleteHop {
                    parameter: parameter.to_string(),
                    position,
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the hops in traversal order.
    pub fn hops(&self) -> &[ChainHop] {
        &self.hops
    }

    /// Returns the number of hops.
    pub fn depth(&self) -> usize {
        self.hops.len()
    }

    /// Returns the resource type reached after the last hop.
    pub fn terminal_type(&self) -> &str {
        // validated non-empty
        self.hops
            .last()
            .map(|h| h.resource_type.as_str())
            .unwrap_or_default()
    }
}

impl TryFrom<Vec<ChainHop>> for Chain {
    type Error = ChainError;

    fn try_from(hops: Vec<ChainHop>) -> Result<Self, Self::Error> {
        Chain::new(hops)
    }
}

impl From<Chain> for Vec<ChainHop> {
    fn from(chain: Chain) -> Self {
        chain.hops
    }
}

/// One filter clause of a search.
///
/// When `chain` is present the clause's own code, type, modifier and values
/// describe the terminal condition evaluated on the resource reached by the
/// last hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterClause {
    /// The logical parameter name (e.g. "name", "code").
    pub code: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// Modifier, if any.
    pub modifier: Option<SearchModifier>,

    /// The values. Multiple values are ORed.
    pub values: Vec<ParameterValue>,

    /// Reference hops leading to the resource the clause is evaluated on.
    #[serde(default)]
    pub chain: Option<Chain>,
}

impl ParameterClause {
    /// Creates a clause without values.
    pub fn new(code: impl Into<String>, param_type: SearchParamType) -> Self {
        Self {
            code: code.into(),
            param_type,
            modifier: None,
            values: Vec::new(),
            chain: None,
        }
    }

    /// Creates a string clause with one value.
    pub fn string(code: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(code, SearchParamType::String).with_value(ParameterValue::text(value))
    }

    /// Creates a token clause with one value.
    pub fn token(code: impl Into<String>, system: Option<&str>, value: impl Into<String>) -> Self {
        Self::new(code, SearchParamType::Token).with_value(ParameterValue::token(system, value))
    }

    /// Creates a `:missing` clause.
    pub fn missing(code: impl Into<String>, param_type: SearchParamType, missing: bool) -> Self {
        Self::new(code, param_type)
            .with_modifier(SearchModifier::Missing)
            .with_value(ParameterValue::text(missing.to_string()))
    }

    /// Sets the modifier.
    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Adds a value.
    pub fn with_value(mut self, value: ParameterValue) -> Self {
        self.values.push(value);
        self
    }

    /// Replaces the values.
    pub fn with_values(mut self, values: Vec<ParameterValue>) -> Self {
        self.values = values;
        self
    }

    /// Sets the chain of hops leading to this clause.
    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Returns true when the clause is reached through reference hops.
    pub fn is_chained(&self) -> bool {
        self.chain.is_some()
    }

    /// Returns the `:missing` flag, if this is a missing clause.
    pub fn missing_flag(&self) -> Result<Option<bool>, ParameterError> {
        if self.modifier != Some(SearchModifier::Missing) {
            return Ok(None);
        }
        let raw = match self.values.first() {
            Some(ParameterValue::Text { value }) => value.as_str(),
            Some(ParameterValue::Token {
                code: Some(code), ..
            }) => code.as_str(),
            _ => "",
        };
        match raw {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(ParameterError::InvalidValue {
                parameter: self.code.clone(),
                value: raw.to_string(),
                message: "expected true or false".to_string(),
            }),
        }
    }

    /// Returns true for clauses evaluated against the entity row itself.
    pub fn is_entity_column(&self) -> bool {
        matches!(
            self.param_type,
            SearchParamType::Id | SearchParamType::LastUpdated
        )
    }
}

/// Splits on `separator`, honoring `\` escapes and removing them.
pub(crate) fn split_escaped(value: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => current.push(next),
                None => current.push(c),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_param_type_display() {
        assert_eq!(SearchParamType::String.to_string(), "string");
        assert_eq!(SearchParamType::Token.to_string(), "token");
        assert_eq!(SearchParamType::Canonical.to_string(), "canonical");
    }

    #[test]
    fn test_search_param_type_parse() {
        assert_eq!(
            "TOKEN".parse::<SearchParamType>().unwrap(),
            SearchParamType::Token
        );
        assert!("bogus".parse::<SearchParamType>().is_err());
    }

    #[test]
    fn test_search_modifier_parse() {
        assert_eq!(SearchModifier::parse("exact"), Some(SearchModifier::Exact));
        assert_eq!(SearchModifier::parse("not-in"), Some(SearchModifier::NotIn));
        assert_eq!(
            SearchModifier::parse("Patient"),
            Some(SearchModifier::Type("Patient".to_string()))
        );
        assert_eq!(SearchModifier::parse("unknown"), None);
    }

    #[test]
    fn test_search_modifier_validity() {
        assert!(SearchModifier::Exact.is_valid_for(SearchParamType::String));
        assert!(!SearchModifier::Exact.is_valid_for(SearchParamType::Token));
        assert!(SearchModifier::Not.is_valid_for(SearchParamType::Token));
        assert!(!SearchModifier::Not.is_valid_for(SearchParamType::String));
        assert!(SearchModifier::Below.is_valid_for(SearchParamType::Uri));
        assert!(!SearchModifier::Missing.is_valid_for(SearchParamType::Id));
    }

    #[test]
    fn test_search_prefix_extract() {
        assert_eq!(
            SearchPrefix::extract("gt2020-01-01"),
            (SearchPrefix::Gt, "2020-01-01")
        );
        assert_eq!(
            SearchPrefix::extract("2020-01-01"),
            (SearchPrefix::Eq, "2020-01-01")
        );
        assert_eq!(SearchPrefix::extract("le100"), (SearchPrefix::Le, "100"));
        // a bare prefix is a value, not a prefix
        assert_eq!(SearchPrefix::extract("ne"), (SearchPrefix::Eq, "ne"));
    }

    #[test]
    fn test_search_prefix_validity() {
        assert!(SearchPrefix::Gt.is_valid_for(SearchParamType::Number));
        assert!(SearchPrefix::Sa.is_valid_for(SearchParamType::LastUpdated));
        assert!(!SearchPrefix::Sa.is_valid_for(SearchParamType::Number));
        assert!(!SearchPrefix::Ne.is_valid_for(SearchParamType::Token));
    }

    #[test]
    fn test_parse_token_value() {
        let v = ParameterValue::parse(SearchParamType::Token, "code", "http://loinc.org|1234-5")
            .unwrap();
        assert_eq!(
            v,
            ParameterValue::Token {
                system: Some("http://loinc.org".to_string()),
                code: Some("1234-5".to_string()),
            }
        );

        let v = ParameterValue::parse(SearchParamType::Token, "code", "http://loinc.org|").unwrap();
        assert_eq!(
            v,
            ParameterValue::Token {
                system: Some("http://loinc.org".to_string()),
                code: None,
            }
        );

        let v = ParameterValue::parse(SearchParamType::Token, "code", r"a\|b").unwrap();
        assert_eq!(v, ParameterValue::token(None, "a|b"));
    }

    #[test]
    fn test_parse_quantity_value() {
        let v = ParameterValue::parse(
            SearchParamType::Quantity,
            "value-quantity",
            "le5.4|http://unitsofmeasure.org|mg",
        )
        .unwrap();
        match v {
            ParameterValue::Quantity {
                prefix,
                value,
                system,
                code,
            } => {
                assert_eq!(prefix, SearchPrefix::Le);
                assert_eq!(value.to_string(), "5.4");
                assert_eq!(system.as_deref(), Some("http://unitsofmeasure.org"));
                assert_eq!(code.as_deref(), Some("mg"));
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_parse_number_rejects_text() {
        let err = ParameterValue::parse(SearchParamType::Number, "probability", "abc").unwrap_err();
        assert!(matches!(err, ParameterError::InvalidValue { .. }));
    }

    #[test]
    fn test_chain_validation() {
        assert!(matches!(
            Chain::for_parameter("name", vec![]),
            Err(ChainError::Empty { .. })
        ));
        assert!(matches!(
            Chain::new(vec![ChainHop::forward("subject", "")]),
            Err(ChainError::IncompleteHop { position: 0, .. })
        ));

        let chain = Chain::new(vec![
            ChainHop::forward("subject", "Patient"),
            ChainHop::forward("organization", "Organization"),
        ])
        .unwrap();
        assert_eq!(chain.depth(), 2);
        assert_eq!(chain.terminal_type(), "Organization");
    }

    #[test]
    fn test_chain_deserialize_validates() {
        let result: Result<Chain, _> = serde_json::from_str("[]");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_flag() {
        let clause = ParameterClause::missing("status", SearchParamType::Token, true);
        assert_eq!(clause.missing_flag().unwrap(), Some(true));

        let plain = ParameterClause::token("status", None, "active");
        assert_eq!(plain.missing_flag().unwrap(), None);

        let bad = ParameterClause::new("status", SearchParamType::Token)
            .with_modifier(SearchModifier::Missing)
            .with_value(ParameterValue::text("maybe"));
        assert!(bad.missing_flag().is_err());
    }

    #[test]
    fn test_split_escaped() {
        assert_eq!(split_escaped("a,b", ','), vec!["a", "b"]);
        assert_eq!(split_escaped(r"a\,b,c", ','), vec!["a,b", "c"]);
        assert_eq!(split_escaped("", ','), vec![""]);
    }
}
