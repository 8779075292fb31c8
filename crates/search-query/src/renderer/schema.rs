//! Physical schema names.
//!
//! Each resource type `T` has its own family of tables:
//!
//! | Table | Holds |
//! |-------|-------|
//! | `T_LOGICAL_RESOURCES` | one row per logical resource |
//! | `T_RESOURCES` | one row per version, with the payload |
//! | `T_STR_VALUES` | string and uri index rows |
//! | `T_NUMBER_VALUES` | number index rows |
//! | `T_QUANTITY_VALUES` | quantity index rows |
//! | `T_DATE_VALUES` | date index rows as inclusive ranges |
//! | `T_LATLNG_VALUES` | position index rows |
//! | `T_RESOURCE_TOKEN_REFS` | token and reference rows by surrogate id |
//! | `T_TOKEN_VALUES_V` | view exposing `TOKEN_VALUE` and `CODE_SYSTEM_ID` |
//! | `T_PROFILES`, `T_TAGS`, `T_SECURITY` | meta index rows |
//!
//! Whole-system searches use the global `LOGICAL_RESOURCES` table and the
//! `LOGICAL_RESOURCE_*` meta tables.

// Table and column names are self-describing
#![allow(missing_docs)]

use crate::types::SearchParamType;

/// Pseudo resource type used for whole-system scopes.
pub const WHOLE_SYSTEM: &str = "Resource";

pub const LOGICAL_RESOURCE_ID: &str = "LOGICAL_RESOURCE_ID";
pub const LOGICAL_ID: &str = "LOGICAL_ID";
pub const CURRENT_RESOURCE_ID: &str = "CURRENT_RESOURCE_ID";
pub const RESOURCE_ID: &str = "RESOURCE_ID";
pub const RESOURCE_TYPE_ID: &str = "RESOURCE_TYPE_ID";
pub const IS_DELETED: &str = "IS_DELETED";
pub const VERSION_ID: &str = "VERSION_ID";
pub const LAST_UPDATED: &str = "LAST_UPDATED";
pub const DATA: &str = "DATA";
pub const PARAMETER_NAME_ID: &str = "PARAMETER_NAME_ID";
pub const STR_VALUE: &str = "STR_VALUE";
pub const STR_VALUE_LCASE: &str = "STR_VALUE_LCASE";
pub const NUMBER_VALUE: &str = "NUMBER_VALUE";
pub const QUANTITY_VALUE: &str = "QUANTITY_VALUE";
pub const CODE: &str = "CODE";
pub const CODE_SYSTEM_ID: &str = "CODE_SYSTEM_ID";
pub const DATE_START: &str = "DATE_START";
pub const DATE_END: &str = "DATE_END";
pub const LATITUDE_VALUE: &str = "LATITUDE_VALUE";
pub const LONGITUDE_VALUE: &str = "LONGITUDE_VALUE";
pub const TOKEN_VALUE: &str = "TOKEN_VALUE";
pub const COMMON_TOKEN_VALUE_ID: &str = "COMMON_TOKEN_VALUE_ID";
pub const REF_VERSION_ID: &str = "REF_VERSION_ID";
pub const COMPOSITE_ID: &str = "COMPOSITE_ID";
pub const CANONICAL_ID: &str = "CANONICAL_ID";
pub const VERSION: &str = "VERSION";
pub const FRAGMENT: &str = "FRAGMENT";

/// Value of `IS_DELETED` for live rows.
pub const NOT_DELETED: &str = "N";

/// Index table families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamTable {
    Strings,
    Numbers,
    Quantities,
    Dates,
    LatLng,
    TokenRefs,
    TokenValues,
    Profiles,
    Tags,
    Security,
}

impl ParamTable {
    fn suffix(&self) -> &'static str {
        match self {
            ParamTable::Strings => "STR_VALUES",
            ParamTable::Numbers => "NUMBER_VALUES",
            ParamTable::Quantities => "QUANTITY_VALUES",
            ParamTable::Dates => "DATE_VALUES",
            ParamTable::LatLng => "LATLNG_VALUES",
            ParamTable::TokenRefs => "RESOURCE_TOKEN_REFS",
            ParamTable::TokenValues => "TOKEN_VALUES_V",
            ParamTable::Profiles => "PROFILES",
            ParamTable::Tags => "TAGS",
            ParamTable::Security => "SECURITY",
        }
    }

    /// The table holding index rows for a parameter type, if it has one.
    pub fn for_type(param_type: SearchParamType) -> Option<Self> {
        match param_type {
            SearchParamType::String | SearchParamType::Uri | SearchParamType::Canonical => {
                Some(ParamTable::Strings)
            }
            SearchParamType::Number => Some(ParamTable::Numbers),
            SearchParamType::Quantity => Some(ParamTable::Quantities),
            SearchParamType::Date => Some(ParamTable::Dates),
            SearchParamType::Special => Some(ParamTable::LatLng),
            SearchParamType::Token | SearchParamType::Reference => Some(ParamTable::TokenRefs),
            SearchParamType::Composite | SearchParamType::Id | SearchParamType::LastUpdated => {
                None
            }
        }
    }

    /// Meta tables are keyed by resource only, without a parameter name.
    pub fn has_parameter_name(&self) -> bool {
        !matches!(
            self,
            ParamTable::Profiles | ParamTable::Tags | ParamTable::Security
        )
    }

    /// The column sorted on, if the table can be sorted.
    pub fn sort_column(&self) -> Option<&'static str> {
        match self {
            ParamTable::Strings => Some(STR_VALUE),
            ParamTable::Numbers => Some(NUMBER_VALUE),
            ParamTable::Quantities => Some(QUANTITY_VALUE),
            ParamTable::Dates => Some(DATE_START),
            ParamTable::TokenValues => Some(TOKEN_VALUE),
            _ => None,
        }
    }
}

/// `T_LOGICAL_RESOURCES`, or the global `LOGICAL_RESOURCES`.
pub fn logical_resources(resource_type: &str) -> String {
    if resource_type == WHOLE_SYSTEM {
        "LOGICAL_RESOURCES".to_string()
    } else {
        format!("{}_LOGICAL_RESOURCES", resource_type)
    }
}

/// `T_RESOURCES`.
pub fn resources(resource_type: &str) -> String {
    format!("{}_RESOURCES", resource_type)
}

/// The index table of a family for a resource type.
pub fn parameter_table(resource_type: &str, table: ParamTable) -> String {
    if resource_type == WHOLE_SYSTEM {
        format!("LOGICAL_RESOURCE_{}", table.suffix())
    } else {
        format!("{}_{}", resource_type, table.suffix())
    }
}
