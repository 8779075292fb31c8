//! In-memory SQLite fixture store.
//!
//! Creates the entity + parameter table schema on demand for each resource
//! type and indexes values the way a loader would, interning every name in
//! the identity cache the renderer reads.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, params_from_iter};

use helios_search_query::identity::InMemoryIdentityCache;
use helios_search_query::normalize::normalize_string;
use helios_search_query::sql::{SqlFragment, TIMESTAMP_FORMAT};
use helios_search_query::types::DateValue;

/// Tables shared by every resource type.
const GLOBAL_SCHEMA: &str = "
CREATE TABLE LOGICAL_RESOURCES (
    LOGICAL_RESOURCE_ID INTEGER PRIMARY KEY,
    RESOURCE_TYPE_ID INTEGER NOT NULL,
    LOGICAL_ID TEXT NOT NULL,
    CURRENT_RESOURCE_ID INTEGER,
    VERSION_ID INTEGER NOT NULL,
    IS_DELETED TEXT NOT NULL DEFAULT 'N',
    LAST_UPDATED TEXT NOT NULL
);
CREATE TABLE COMMON_TOKEN_VALUES (
    COMMON_TOKEN_VALUE_ID INTEGER PRIMARY KEY,
    CODE_SYSTEM_ID INTEGER NOT NULL,
    TOKEN_VALUE TEXT NOT NULL
);
CREATE TABLE LOGICAL_RESOURCE_TAGS (
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMMON_TOKEN_VALUE_ID INTEGER NOT NULL
);
CREATE TABLE LOGICAL_RESOURCE_SECURITY (
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMMON_TOKEN_VALUE_ID INTEGER NOT NULL
);
CREATE TABLE LOGICAL_RESOURCE_PROFILES (
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    CANONICAL_ID INTEGER NOT NULL,
    VERSION TEXT,
    FRAGMENT TEXT
);
";

/// Tables of one resource type, `{T}` standing for the type name.
const TYPE_SCHEMA: &str = "
CREATE TABLE {T}_LOGICAL_RESOURCES (
    LOGICAL_RESOURCE_ID INTEGER PRIMARY KEY,
    LOGICAL_ID TEXT NOT NULL,
    CURRENT_RESOURCE_ID INTEGER,
    VERSION_ID INTEGER NOT NULL,
    IS_DELETED TEXT NOT NULL DEFAULT 'N',
    LAST_UPDATED TEXT NOT NULL
);
CREATE TABLE {T}_RESOURCES (
    RESOURCE_ID INTEGER PRIMARY KEY,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    VERSION_ID INTEGER NOT NULL,
    LAST_UPDATED TEXT NOT NULL,
    IS_DELETED TEXT NOT NULL,
    DATA TEXT
);
CREATE TABLE {T}_STR_VALUES (
    PARAMETER_NAME_ID INTEGER NOT NULL,
    STR_VALUE TEXT,
    STR_VALUE_LCASE TEXT,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMPOSITE_ID INTEGER
);
CREATE TABLE {T}_NUMBER_VALUES (
    PARAMETER_NAME_ID INTEGER NOT NULL,
    NUMBER_VALUE REAL,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMPOSITE_ID INTEGER
);
CREATE TABLE {T}_QUANTITY_VALUES (
    PARAMETER_NAME_ID INTEGER NOT NULL,
    QUANTITY_VALUE REAL,
    CODE TEXT,
    CODE_SYSTEM_ID INTEGER,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMPOSITE_ID INTEGER
);
CREATE TABLE {T}_DATE_VALUES (
    PARAMETER_NAME_ID INTEGER NOT NULL,
    DATE_START TEXT,
    DATE_END TEXT,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMPOSITE_ID INTEGER
);
CREATE TABLE {T}_LATLNG_VALUES (
    PARAMETER_NAME_ID INTEGER NOT NULL,
    LATITUDE_VALUE REAL,
    LONGITUDE_VALUE REAL,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL
);
CREATE TABLE {T}_RESOURCE_TOKEN_REFS (
    PARAMETER_NAME_ID INTEGER NOT NULL,
    COMMON_TOKEN_VALUE_ID INTEGER,
    REF_VERSION_ID INTEGER,
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMPOSITE_ID INTEGER
);
CREATE VIEW {T}_TOKEN_VALUES_V AS
    SELECT R.PARAMETER_NAME_ID, R.LOGICAL_RESOURCE_ID, R.COMMON_TOKEN_VALUE_ID,
           R.REF_VERSION_ID, R.COMPOSITE_ID, C.CODE_SYSTEM_ID, C.TOKEN_VALUE
      FROM {T}_RESOURCE_TOKEN_REFS R
      JOIN COMMON_TOKEN_VALUES C ON C.COMMON_TOKEN_VALUE_ID = R.COMMON_TOKEN_VALUE_ID;
CREATE TABLE {T}_PROFILES (
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    CANONICAL_ID INTEGER NOT NULL,
    VERSION TEXT,
    FRAGMENT TEXT
);
CREATE TABLE {T}_TAGS (
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMMON_TOKEN_VALUE_ID INTEGER NOT NULL
);
CREATE TABLE {T}_SECURITY (
    LOGICAL_RESOURCE_ID INTEGER NOT NULL,
    COMMON_TOKEN_VALUE_ID INTEGER NOT NULL
);
";

fn timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// A stored resource: its type and logical resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stored<'a> {
    /// Resource type.
    pub resource_type: &'a str,
    /// Surrogate key shared by the type and global tables.
    pub logical_resource_id: i64,
}

/// An in-memory database holding indexed fixture resources.
pub struct FixtureStore {
    conn: Connection,
    identity: InMemoryIdentityCache,
    types: RefCell<HashSet<String>>,
    next_id: Cell<i64>,
    next_composite: Cell<i64>,
}

impl FixtureStore {
    /// Opens an empty store.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to open SQLite");
        conn.execute_batch(GLOBAL_SCHEMA)
            .expect("Failed to create global schema");
        Self {
            conn,
            identity: InMemoryIdentityCache::new(),
            types: RefCell::new(HashSet::new()),
            next_id: Cell::new(1),
            next_composite: Cell::new(1),
        }
    }

    /// The identity cache the store interns names into.
    pub fn identity(&self) -> &InMemoryIdentityCache {
        &self.identity
    }

    /// Creates the tables of a resource type if needed.
    pub fn ensure_type(&self, resource_type: &str) -> i64 {
        if self.types.borrow_mut().insert(resource_type.to_string()) {
            self.conn
                .execute_batch(&TYPE_SCHEMA.replace("{T}", resource_type))
                .expect("Failed to create type schema");
        }
        self.identity.intern_resource_type(resource_type)
    }

    /// Stores a live resource in its version 1.
    pub fn add_resource<'a>(&self, resource_type: &'a str, logical_id: &str) -> Stored<'a> {
        let type_id = self.ensure_type(resource_type);
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let updated = timestamp(Utc::now());

        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_LOGICAL_RESOURCES \
                     (LOGICAL_RESOURCE_ID, LOGICAL_ID, CURRENT_RESOURCE_ID, VERSION_ID, LAST_UPDATED) \
                     VALUES (?1, ?2, ?1, 1, ?3)",
                    resource_type
                ),
                params![id, logical_id, updated],
            )
            .expect("Failed to insert logical resource");
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_RESOURCES \
                     (RESOURCE_ID, LOGICAL_RESOURCE_ID, VERSION_ID, LAST_UPDATED, IS_DELETED, DATA) \
                     VALUES (?1, ?1, 1, ?2, 'N', ?3)",
                    resource_type
                ),
                params![
                    id,
                    updated,
                    format!(r#"{{"resourceType":"{}","id":"{}"}}"#, resource_type, logical_id)
                ],
            )
            .expect("Failed to insert resource version");
        self.conn
            .execute(
                "INSERT INTO LOGICAL_RESOURCES \
                 (LOGICAL_RESOURCE_ID, RESOURCE_TYPE_ID, LOGICAL_ID, CURRENT_RESOURCE_ID, VERSION_ID, LAST_UPDATED) \
                 VALUES (?1, ?2, ?3, ?1, 1, ?4)",
                params![id, type_id, logical_id, updated],
            )
            .expect("Failed to insert global logical resource");

        Stored {
            resource_type,
            logical_resource_id: id,
        }
    }

    /// Marks a resource deleted in the type and global tables.
    pub fn delete(&self, resource: Stored<'_>) {
        for table in [
            format!("{}_LOGICAL_RESOURCES", resource.resource_type),
            "LOGICAL_RESOURCES".to_string(),
        ] {
            self.conn
                .execute(
                    &format!("UPDATE {} SET IS_DELETED = 'Y' WHERE LOGICAL_RESOURCE_ID = ?1", table),
                    params![resource.logical_resource_id],
                )
                .expect("Failed to delete resource");
        }
    }

    /// A fresh composite row id, shared by the components of one value.
    pub fn composite_id(&self) -> i64 {
        let id = self.next_composite.get();
        self.next_composite.set(id + 1);
        id
    }

    /// Indexes a string value with its normalized shadow.
    pub fn index_string(&self, resource: Stored<'_>, parameter: &str, value: &str) {
        self.index_string_in(resource, parameter, value, None);
    }

    /// Indexes a string value, optionally as a composite component.
    pub fn index_string_in(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        value: &str,
        composite: Option<i64>,
    ) {
        let name_id = self.identity.intern_parameter_name(parameter);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_STR_VALUES \
                     (PARAMETER_NAME_ID, STR_VALUE, STR_VALUE_LCASE, LOGICAL_RESOURCE_ID, COMPOSITE_ID) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    resource.resource_type
                ),
                params![
                    name_id,
                    value,
                    normalize_string(value),
                    resource.logical_resource_id,
                    composite
                ],
            )
            .expect("Failed to index string");
    }

    /// Indexes a number.
    pub fn index_number(&self, resource: Stored<'_>, parameter: &str, value: f64) {
        let name_id = self.identity.intern_parameter_name(parameter);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_NUMBER_VALUES \
                     (PARAMETER_NAME_ID, NUMBER_VALUE, LOGICAL_RESOURCE_ID) VALUES (?1, ?2, ?3)",
                    resource.resource_type
                ),
                params![name_id, value, resource.logical_resource_id],
            )
            .expect("Failed to index number");
    }

    /// Indexes a quantity, optionally as a composite component.
    pub fn index_quantity(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        value: f64,
        system: &str,
        code: &str,
        composite: Option<i64>,
    ) {
        let name_id = self.identity.intern_parameter_name(parameter);
        let system_id = self.identity.intern_code_system(system);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_QUANTITY_VALUES \
                     (PARAMETER_NAME_ID, QUANTITY_VALUE, CODE, CODE_SYSTEM_ID, LOGICAL_RESOURCE_ID, COMPOSITE_ID) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    resource.resource_type
                ),
                params![
                    name_id,
                    value,
                    code,
                    system_id,
                    resource.logical_resource_id,
                    composite
                ],
            )
            .expect("Failed to index quantity");
    }

    /// Indexes a position.
    pub fn index_position(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        latitude: f64,
        longitude: f64,
    ) {
        let name_id = self.identity.intern_parameter_name(parameter);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_LATLNG_VALUES \
                     (PARAMETER_NAME_ID, LATITUDE_VALUE, LONGITUDE_VALUE, LOGICAL_RESOURCE_ID) \
                     VALUES (?1, ?2, ?3, ?4)",
                    resource.resource_type
                ),
                params![name_id, latitude, longitude, resource.logical_resource_id],
            )
            .expect("Failed to index position");
    }

    /// Indexes a date as the inclusive range its precision covers.
    pub fn index_date(&self, resource: Stored<'_>, parameter: &str, raw: &str) {
        let name_id = self.identity.intern_parameter_name(parameter);
        let value = DateValue::parse(raw).expect("Invalid fixture date");
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_DATE_VALUES \
                     (PARAMETER_NAME_ID, DATE_START, DATE_END, LOGICAL_RESOURCE_ID) \
                     VALUES (?1, ?2, ?3, ?4)",
                    resource.resource_type
                ),
                params![
                    name_id,
                    timestamp(value.lower),
                    timestamp(value.upper),
                    resource.logical_resource_id
                ],
            )
            .expect("Failed to index date");
    }

    /// Registers a (system, code) pair and returns its surrogate id.
    fn common_token_value(&self, system: &str, code: &str) -> i64 {
        let system_id = self.identity.intern_code_system(system);
        let id = self.identity.intern_common_token_value(system, code);
        self.conn
            .execute(
                "INSERT OR IGNORE INTO COMMON_TOKEN_VALUES \
                 (COMMON_TOKEN_VALUE_ID, CODE_SYSTEM_ID, TOKEN_VALUE) VALUES (?1, ?2, ?3)",
                params![id, system_id, code],
            )
            .expect("Failed to insert common token value");
        id
    }

    fn insert_token_ref(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        token_id: i64,
        version: Option<i64>,
        composite: Option<i64>,
    ) {
        let name_id = self.identity.intern_parameter_name(parameter);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {}_RESOURCE_TOKEN_REFS \
                     (PARAMETER_NAME_ID, COMMON_TOKEN_VALUE_ID, REF_VERSION_ID, LOGICAL_RESOURCE_ID, COMPOSITE_ID) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    resource.resource_type
                ),
                params![name_id, token_id, version, resource.logical_resource_id, composite],
            )
            .expect("Failed to index token");
    }

    /// Indexes a coded value.
    pub fn index_token(&self, resource: Stored<'_>, parameter: &str, system: &str, code: &str) {
        self.index_token_in(resource, parameter, system, code, None);
    }

    /// Indexes a coded value, optionally as a composite component.
    pub fn index_token_in(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        system: &str,
        code: &str,
        composite: Option<i64>,
    ) {
        let token_id = self.common_token_value(system, code);
        self.insert_token_ref(resource, parameter, token_id, None, composite);
    }

    /// Indexes a local reference as a token whose system is the target type.
    pub fn index_reference(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        target_type: &str,
        target_id: &str,
    ) {
        self.ensure_type(target_type);
        let token_id = self.common_token_value(target_type, target_id);
        self.insert_token_ref(resource, parameter, token_id, None, None);
    }

    /// Indexes a reference pinned to a version of its target.
    pub fn index_versioned_reference(
        &self,
        resource: Stored<'_>,
        parameter: &str,
        target_type: &str,
        target_id: &str,
        version: i64,
    ) {
        self.ensure_type(target_type);
        let token_id = self.common_token_value(target_type, target_id);
        self.insert_token_ref(resource, parameter, token_id, Some(version), None);
    }

    /// Records a new current version of a resource.
    pub fn bump_version(&self, resource: Stored<'_>) {
        for table in [
            format!("{}_LOGICAL_RESOURCES", resource.resource_type),
            "LOGICAL_RESOURCES".to_string(),
        ] {
            self.conn
                .execute(
                    &format!(
                        "UPDATE {} SET VERSION_ID = VERSION_ID + 1 WHERE LOGICAL_RESOURCE_ID = ?1",
                        table
                    ),
                    params![resource.logical_resource_id],
                )
                .expect("Failed to bump version");
        }
    }

    /// Tags a resource in the type and global tag tables.
    pub fn tag(&self, resource: Stored<'_>, system: &str, code: &str) {
        let token_id = self.common_token_value(system, code);
        for table in [
            format!("{}_TAGS", resource.resource_type),
            "LOGICAL_RESOURCE_TAGS".to_string(),
        ] {
            self.conn
                .execute(
                    &format!(
                        "INSERT INTO {} (LOGICAL_RESOURCE_ID, COMMON_TOKEN_VALUE_ID) VALUES (?1, ?2)",
                        table
                    ),
                    params![resource.logical_resource_id, token_id],
                )
                .expect("Failed to tag resource");
        }
    }

    /// Runs a statement and returns the `LOGICAL_ID` column of every row.
    pub fn logical_ids(&self, fragment: &SqlFragment) -> Vec<String> {
        let mut stmt = self
            .conn
            .prepare(&fragment.sql)
            .unwrap_or_else(|e| panic!("Failed to prepare {}: {}", fragment.sql, e));
        let column = stmt
            .column_index("LOGICAL_ID")
            .expect("Statement has no LOGICAL_ID column");
        stmt.query_map(params_from_iter(fragment.params.iter()), |row| {
            row.get::<_, String>(column)
        })
        .expect("Failed to run statement")
        .collect::<Result<Vec<_>, _>>()
        .expect("Failed to read rows")
    }

    /// Runs a `COUNT(*)` statement.
    pub fn count(&self, fragment: &SqlFragment) -> i64 {
        self.conn
            .query_row(
                &fragment.sql,
                params_from_iter(fragment.params.iter()),
                |row| row.get(0),
            )
            .unwrap_or_else(|e| panic!("Failed to run {}: {}", fragment.sql, e))
    }
}

impl Default for FixtureStore {
    fn default() -> Self {
        Self::new()
    }
}
