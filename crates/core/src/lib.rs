//! slogger core: the record schema and the tamper-evidence primitives.
//!
//! Everything here is pure and synchronous: the declarative field registry,
//! the log record with its normalisation rules, the level/facility code
//! maps, and the canonical SHA-256 chain hasher. The server crate layers
//! storage, ingestion and the query API on top.

pub mod error;
pub mod hash;
pub mod levels;
pub mod record;
pub mod schema;

pub use error::Error;
pub use hash::Hasher;
pub use record::{FieldValue, LogRecord, FORMAT_VERSION};
pub use schema::{FieldKind, FieldSpec, Schema};
