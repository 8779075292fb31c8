//! Configuration for search query compilation.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a version-pinned reference (`Patient/1/_history/2`) is matched when
/// following references backwards (reverse chains and `_revinclude`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceVersionPolicy {
    /// A pinned version only matches while it is still the current version
    /// of the referenced resource. Unpinned references always match.
    #[default]
    PinnedMustBeCurrent,
    /// The pinned version is ignored; any reference to the logical id matches.
    IgnorePinnedVersion,
}

/// Configuration for the query compiler.
///
/// # Example
///
/// ```
/// use helios_search_query::config::{ReferenceVersionPolicy, SearchQueryConfig};
///
/// let config = SearchQueryConfig {
///     max_chain_depth: 2,
///     reference_version_policy: ReferenceVersionPolicy::IgnorePinnedVersion,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueryConfig {
    /// Page size used when `_count` is absent.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound for `_count`. Larger requests are clamped.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Maximum number of reference hops in a single chain.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    /// Version pin handling for reverse chains and `_revinclude`.
    #[serde(default)]
    pub reference_version_policy: ReferenceVersionPolicy,

    /// Whether unknown parameter names fail the request.
    ///
    /// When false, unknown parameters are dropped with a warning.
    #[serde(default)]
    pub strict_parameters: bool,

    /// Whether whole-system `_id` filters also restrict on the set of known
    /// resource type ids, which lets the database use the (type, id) index.
    #[serde(default = "default_true")]
    pub restrict_whole_system_id_by_type: bool,
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_max_chain_depth() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for SearchQueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_chain_depth: default_max_chain_depth(),
            reference_version_policy: ReferenceVersionPolicy::default(),
            strict_parameters: false,
            restrict_whole_system_id_by_type: true,
        }
    }
}

impl SearchQueryConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Sets the maximum chain depth.
    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    /// Sets the reference version policy.
    pub fn with_reference_version_policy(mut self, policy: ReferenceVersionPolicy) -> Self {
        self.reference_version_policy = policy;
        self
    }

    /// Makes unknown parameters fail the request.
    pub fn with_strict_parameters(mut self) -> Self {
        self.strict_parameters = true;
        self
    }

    /// Sets the default and maximum page sizes.
    pub fn with_page_sizes(mut self, default_size: u32, max_size: u32) -> Self {
        self.default_page_size = default_size;
        self.max_page_size = max_size;
        self
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.default_page_size == 0 {
            errors.push("default_page_size cannot be 0".to_string());
        }

        if self.max_page_size < self.default_page_size {
            errors.push(format!(
                "max_page_size ({}) cannot be smaller than default_page_size ({})",
                self.max_page_size, self.default_page_size
            ));
        }

        if self.max_chain_depth == 0 {
            errors.push("max_chain_depth cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
