//! Helios FHIR Search Query Compiler
//!
//! This crate turns FHIR search requests into SQL against an entity +
//! parameter-table schema: one `{Type}_LOGICAL_RESOURCES` table per resource
//! type, one table per kind of indexed value (`{Type}_STR_VALUES`,
//! `{Type}_DATE_VALUES`, ...) and global `LOGICAL_RESOURCES` tables for
//! whole-system searches.
//!
//! # Pipeline
//!
//! - [`parser`] - Reads `name[:modifier][.chain]=value` pairs into a [`SearchRequest`]
//! - [`builder`] - Plans the [`QueryTree`] that answers a request
//! - [`tree`] - Query trees and the order in which their stages are compiled
//! - [`compiler`] - Per-clause dispatch, chains and date consolidation
//! - [`renderer`] - The [`SearchQueryRenderer`] contract and the SQL implementation
//! - [`sql`] - The SQL syntax tree and rendered [`SqlFragment`]s
//!
//! Supporting modules:
//!
//! - [`registry`] - Search parameter definitions per resource type
//! - [`identity`] - Surrogate ids for parameter names, code systems and canonicals
//! - [`terminology`] - Value set and subsumption lookups for token modifiers
//! - [`location`] - `near` parameters and bounding boxes
//! - [`config`] - Paging, chain depth and reference version settings
//! - [`error`] - Error types
//!
//! # Quick Start
//!
//! ```
//! use helios_search_query::builder::SearchQueryBuilder;
//! use helios_search_query::config::SearchQueryConfig;
//! use helios_search_query::identity::InMemoryIdentityCache;
//! use helios_search_query::parser::SearchRequestParser;
//! use helios_search_query::registry::{SearchParameterDefinition, SearchParameterRegistry};
//! use helios_search_query::renderer::SqlQueryRenderer;
//! use helios_search_query::types::SearchParamType;
//!
//! let config = SearchQueryConfig::default();
//! let mut registry = SearchParameterRegistry::with_common_parameters();
//! registry
//!     .register(
//!         SearchParameterDefinition::new("sp:Patient-family", "family", SearchParamType::String)
//!             .with_base(["Patient"]),
//!     )
//!     .unwrap();
//!
//! let identity = InMemoryIdentityCache::new();
//! identity.intern_parameter_name("family");
//!
//! let request = SearchRequestParser::new(&registry, &config)
//!     .parse(Some("Patient"), [("family", "smith"), ("_count", "20")])
//!     .unwrap();
//! let tree = SearchQueryBuilder::new(&config, &identity, &registry)
//!     .build(&request)
//!     .unwrap();
//! let fragment = SqlQueryRenderer::new(&identity, &config).render(&tree).unwrap();
//!
//! assert!(fragment.sql.contains("Patient_STR_VALUES"));
//! assert!(fragment.sql.contains("LIMIT 20 OFFSET 0"));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod extensions;
pub mod identity;
pub mod location;
pub mod normalize;
pub mod parser;
pub mod registry;
pub mod renderer;
pub mod sql;
pub mod terminology;
pub mod tree;
pub mod types;

// Re-export commonly used types at crate root
pub use builder::SearchQueryBuilder;
pub use config::SearchQueryConfig;
pub use error::{QueryError, QueryResult};
pub use parser::SearchRequestParser;
pub use registry::{SearchParameterDefinition, SearchParameterRegistry};
pub use renderer::{SearchQueryRenderer, SqlQueryRenderer};
pub use sql::{SqlFragment, SqlParam};
pub use tree::QueryTree;
pub use types::{ParameterClause, SearchRequest};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
