//! slogger server: ingestion listeners, the chained append pipeline, the
//! query API and the SQLite-backed record store.

pub mod config;
pub mod http;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod syslog;
pub mod tls;

use std::sync::Arc;

use slogger_core::Hasher;

use crate::store::Store;

/// State shared by every listener and handler. Built once at startup and
/// immutable afterwards.
pub struct AppState {
    pub store: Store,
    pub hasher: Hasher,
    pub shard_group: i32,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn shared(store: Store, hasher: Hasher, shard_group: i32) -> SharedState {
        Arc::new(AppState {
            store,
            hasher,
            shard_group,
        })
    }
}
