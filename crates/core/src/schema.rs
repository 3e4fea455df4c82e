//! Declarative field registry for the log record.
//!
//! One table drives every schema-dependent behaviour: the canonical hashing
//! order, the JSON ⇄ storage name map, the query whitelist, and the index
//! list the store creates at startup. Adding a field means adding one row
//! here plus its accessor arms in [`crate::record`].

use std::collections::HashMap;
use std::sync::OnceLock;

/// Semantic kind of a field, used for canonical encoding, column typing
/// and query value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Timestamp,
    Boolean,
}

/// Excluded from the canonical hash input.
pub const NO_HASH: u8 = 1 << 0;
/// Rejected when named in a query or sort specification.
pub const NO_QUERY: u8 = 1 << 1;
/// No secondary index is created for this field.
pub const NO_INDEX: u8 = 1 << 2;
/// Runtime-only; never persisted by the store.
pub const EPHEMERAL: u8 = 1 << 3;

/// One row of the registry.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Canonical storage name (lowercase), also the store column name.
    pub storage_name: &'static str,
    /// External JSON name; usually identical to the storage name.
    pub json_name: &'static str,
    pub kind: FieldKind,
    pub flags: u8,
}

impl FieldSpec {
    pub fn hashed(&self) -> bool {
        self.flags & NO_HASH == 0
    }

    pub fn queryable(&self) -> bool {
        self.flags & NO_QUERY == 0
    }

    pub fn indexed(&self) -> bool {
        self.flags & NO_INDEX == 0
    }

    pub fn persisted(&self) -> bool {
        self.flags & EPHEMERAL == 0
    }
}

/// The record schema, in lexicographic storage-name order. The order is
/// load-bearing: the canonical hasher walks this table top to bottom.
const FIELDS: &[FieldSpec] = &[
    field("account_group_id", "account_group_id", FieldKind::Text, 0),
    field("client_name", "client_name", FieldKind::Text, 0),
    field("exception", "exception", FieldKind::Text, 0),
    field("facility", "facility", FieldKind::Text, 0),
    field("format_version", "format_version", FieldKind::Integer, 0),
    field("hash", "hash", FieldKind::Text, NO_HASH | NO_QUERY),
    field("hostname", "hostname", FieldKind::Text, 0),
    field("instance_id", "instance_id", FieldKind::Text, 0),
    field("level", "level", FieldKind::Text, 0),
    field("level_no", "level_no", FieldKind::Integer, 0),
    field("message", "message", FieldKind::Text, 0),
    field("originator_ip", "originator_ip", FieldKind::Text, 0),
    field("originator_port", "originator_port", FieldKind::Integer, 0),
    field("originator_time", "timestamp", FieldKind::Timestamp, 0),
    field("pid", "pid", FieldKind::Integer, 0),
    field("previous_hash", "previous_hash", FieldKind::Text, 0),
    field("sequence_id", "sequence_id", FieldKind::Integer, 0),
    field("shard_group", "shard_group", FieldKind::Integer, 0),
    field("time", "time", FieldKind::Timestamp, 0),
    field("user", "user", FieldKind::Text, 0),
    field(
        "verified",
        "verified",
        FieldKind::Boolean,
        NO_HASH | NO_QUERY | NO_INDEX | EPHEMERAL,
    ),
];

const fn field(storage_name: &'static str, json_name: &'static str, kind: FieldKind, flags: u8) -> FieldSpec {
    FieldSpec {
        storage_name,
        json_name,
        kind,
        flags,
    }
}

/// Read-only registry built once at first use.
pub struct Schema {
    fields: &'static [FieldSpec],
    by_storage: HashMap<&'static str, usize>,
    by_json: HashMap<&'static str, usize>,
}

impl Schema {
    fn new() -> Self {
        debug_assert!(
            FIELDS.windows(2).all(|w| w[0].storage_name < w[1].storage_name),
            "registry rows must be sorted by storage name"
        );
        let by_storage = FIELDS
            .iter()
            .enumerate()
            .map(|(i, f)| (f.storage_name, i))
            .collect();
        let by_json = FIELDS
            .iter()
            .enumerate()
            .map(|(i, f)| (f.json_name, i))
            .collect();
        Schema {
            fields: FIELDS,
            by_storage,
            by_json,
        }
    }

    /// Process-wide registry instance. Safe for concurrent readers.
    pub fn global() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(Schema::new)
    }

    /// All fields, lexicographically ordered by storage name. This is the
    /// deterministic order the canonical hasher uses.
    pub fn ordered_fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    pub fn ordered_storage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.storage_name)
    }

    /// Fields the store materialises as columns, in registry order.
    pub fn persisted_fields(&self) -> impl Iterator<Item = &'static FieldSpec> + '_ {
        self.fields.iter().filter(|f| f.persisted())
    }

    pub fn field(&self, storage_name: &str) -> Option<&'static FieldSpec> {
        self.by_storage.get(storage_name).map(|&i| &self.fields[i])
    }

    /// Resolve an external JSON name to its registry row.
    pub fn field_by_json(&self, json_name: &str) -> Option<&'static FieldSpec> {
        self.by_json.get(json_name).map(|&i| &self.fields[i])
    }

    /// Map an external JSON name to the canonical storage name.
    pub fn storage_name_of(&self, json_name: &str) -> Option<&'static str> {
        self.field_by_json(json_name).map(|f| f.storage_name)
    }

    pub fn is_queryable(&self, storage_name: &str) -> bool {
        self.field(storage_name).is_some_and(|f| f.queryable())
    }

    pub fn is_hashed(&self, storage_name: &str) -> bool {
        self.field(storage_name).is_some_and(|f| f.hashed())
    }

    pub fn is_indexed(&self, storage_name: &str) -> bool {
        self.field(storage_name).is_some_and(|f| f.indexed())
    }
}
