//! Error types for search query compilation.
//!
//! Every fatal error is raised while the query tree is being compiled, before
//! any statement reaches a database. Identity lookups that fail are not errors
//! at this level: they surface as [`UnresolvedNameError`], which the parameter
//! handlers turn into constant predicates and which deliberately has no
//! conversion into [`QueryError`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for query compilation.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed parameter chains
    #[error(transparent)]
    MalformedChain(#[from] ChainError),

    /// Unsupported type/modifier combinations and bad values
    #[error(transparent)]
    UnsupportedParameter(#[from] ParameterError),

    /// Invalid geospatial input
    #[error(transparent)]
    InvalidBoundingArea(#[from] LocationError),

    /// Invalid request level directives (paging, sort, include)
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised when a chain of reference hops is not well formed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A chain was built without any hops.
    #[error("chain for parameter '{parameter}' has no reference hops")]
    Empty { parameter: String },

    /// A hop is missing its reference parameter or resource type.
    #[error("chain hop {position} of '{parameter}' is incomplete: {message}")]
    IncompleteHop {
        parameter: String,
        position: usize,
        message: String,
    },

    /// The terminal clause of a chain is itself chained.
    #[error("terminal clause '{parameter}' of a chain cannot itself be chained")]
    ChainedTerminal { parameter: String },

    /// An intermediate link does not go through a reference parameter.
    #[error("'{parameter}' on {resource_type} is a {param_type} parameter and cannot be chained")]
    NotAReference {
        parameter: String,
        resource_type: String,
        param_type: String,
    },

    /// More hops than the configured limit.
    #[error("chain depth {depth} exceeds maximum of {max_depth}")]
    TooDeep { depth: usize, max_depth: usize },

    /// A forward hop through a reference with several targets and no type modifier.
    #[error("chained parameter '{parameter}' references multiple types; add a type modifier")]
    AmbiguousTarget { parameter: String },
}

/// Errors raised for parameter type/modifier combinations that have no rule,
/// and for values that cannot be parsed for the parameter's type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// No compilation rule exists for the modifier on this parameter type.
    #[error("unsupported modifier ':{modifier}' for {param_type} parameter '{parameter}'")]
    UnsupportedModifier {
        parameter: String,
        param_type: String,
        modifier: String,
    },

    /// A composite component is itself a composite.
    #[error("nested composite parameters are not supported: '{parameter}'")]
    NestedComposite { parameter: String },

    /// A composite value was supplied for a non-composite parameter, or the reverse.
    #[error("value shape does not match {param_type} parameter '{parameter}'")]
    ValueShapeMismatch {
        parameter: String,
        param_type: String,
    },

    /// A comparison prefix that the parameter type cannot use.
    #[error("prefix '{prefix}' is not valid for {param_type} parameter '{parameter}'")]
    InvalidPrefix {
        parameter: String,
        param_type: String,
        prefix: String,
    },

    /// The value could not be parsed.
    #[error("invalid value '{value}' for parameter '{parameter}': {message}")]
    InvalidValue {
        parameter: String,
        value: String,
        message: String,
    },

    /// A clause without any value.
    #[error("parameter '{parameter}' has no values")]
    NoValues { parameter: String },

    /// Terminology-backed modifiers used without a terminology service.
    #[error("modifier ':{modifier}' on '{parameter}' requires a terminology service")]
    TerminologyUnavailable { parameter: String, modifier: String },

    /// A parameter that cannot be used in this kind of query.
    #[error("parameter '{parameter}' is not supported here: {message}")]
    NotSupportedHere { parameter: String, message: String },
}

/// Errors raised for malformed geospatial search input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    /// The value does not have the `lat|lng[|distance[|units]]` shape.
    #[error("invalid near value '{value}': {message}")]
    Malformed { value: String, message: String },

    /// A prefix other than `eq` was used.
    #[error("prefix '{prefix}' is not supported for location searches")]
    BadPrefix { prefix: String },

    /// Distance units that cannot be converted.
    #[error("unsupported distance units '{units}'")]
    BadUnits { units: String },

    /// Latitude or longitude outside the valid range.
    #[error("coordinate out of range: latitude {latitude}, longitude {longitude}")]
    OutOfRange { latitude: f64, longitude: f64 },
}

/// Errors raised for request-level directives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// A parameter name unknown for the resource type.
    #[error("unknown search parameter '{parameter}' for {resource_type}")]
    UnknownParameter {
        resource_type: String,
        parameter: String,
    },

    /// A modifier string that is not recognised.
    #[error("unknown modifier ':{modifier}' on '{parameter}'")]
    UnknownModifier { parameter: String, modifier: String },

    /// Malformed `_has` expression.
    #[error("invalid _has expression '{expression}'")]
    InvalidReverseChain { expression: String },

    /// Malformed `_include` / `_revinclude` value.
    #[error("invalid include directive '{value}'")]
    InvalidInclude { value: String },

    /// Sorting on a parameter that cannot be sorted.
    #[error("cannot sort on '{parameter}': {message}")]
    InvalidSort { parameter: String, message: String },

    /// Malformed `_count` or `_page` value.
    #[error("invalid paging value '{value}' for {name}")]
    InvalidPaging { name: String, value: String },
}

/// Errors raised by search parameter registry updates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A definition with the same URL is already registered.
    #[error("search parameter '{url}' is already registered")]
    DuplicateUrl { url: String },

    /// No definition with the given URL or code.
    #[error("search parameter '{identifier}' not found")]
    NotFound { identifier: String },

    /// A composite definition without any component.
    #[error("composite search parameter '{url}' has no components")]
    EmptyComposite { url: String },
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("failed to parse search configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// One or more settings are invalid.
    #[error("invalid search configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// What kind of symbolic name an identity lookup failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    ParameterName,
    CodeSystem,
    CommonTokenValue,
    Canonical,
    ResourceType,
    ValueSet,
}

impl std::fmt::Display for NameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameKind::ParameterName => write!(f, "parameter name"),
            NameKind::CodeSystem => write!(f, "code system"),
            NameKind::CommonTokenValue => write!(f, "token value"),
            NameKind::Canonical => write!(f, "canonical"),
            NameKind::ResourceType => write!(f, "resource type"),
            NameKind::ValueSet => write!(f, "value set"),
        }
    }
}

/// The identity cache holds no id for a name.
///
/// Recovered locally by every handler: a positive match becomes a predicate
/// that matches nothing, a negated match one that matches everything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unresolved {kind}: {name}")]
pub struct UnresolvedNameError {
    pub kind: NameKind,
    pub name: String,
}

impl UnresolvedNameError {
    /// Creates a new unresolved-name error.
    pub fn new(kind: NameKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Result type alias for query compilation.
pub type QueryResult<T> = Result<T, QueryError>;
