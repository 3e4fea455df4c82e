//! The chained append pipeline and the verifying query executor.
//!
//! Appends are optimistic: read the shard's chain head, link to it, hash,
//! insert. The unique compound index arbitrates concurrent writers — the
//! loser sees a duplicate sequence and retries against the new head, so a
//! shard's committed records always form a gap-free sequence. Sequence
//! numbers derive from observed store state, not a generator, so every
//! writer eventually wins.

use std::time::Instant;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use slogger_core::{Error, Hasher, LogRecord};

use crate::store::{InsertOutcome, Store, StoreQuery};

/// Initial backoff period in microseconds.
pub const INITIAL_BACKOFF_MICROS: u64 = 1;
/// Maximum backoff period in microseconds.
pub const MAXIMUM_BACKOFF_MICROS: u64 = 100_000;
/// Collisions tolerated before the randomised backoff kicks in.
pub const ITERATIONS_BEFORE_BACKOFF: u32 = 5;

/// Buffered records between the executor and the response writer.
pub const QUERY_STREAM_DEPTH: usize = 10;

/// Append a normalised record to the shard's chain.
///
/// On return the record carries its assigned `sequence_id`,
/// `previous_hash`, `shard_group` and `hash`, with `verified` set (in
/// memory only). Duplicate-sequence collisions retry indefinitely; any
/// other store failure aborts with `Error::Storage`.
pub async fn append(
    store: &Store,
    hasher: &Hasher,
    shard_group: i32,
    record: &mut LogRecord,
) -> Result<(), Error> {
    let start = Instant::now();

    // Millisecond truncation up front keeps the hash input identical to
    // what a verifier reconstructs from the store.
    record.truncate_timestamps();
    record.shard_group = shard_group;

    let mut backoff = INITIAL_BACKOFF_MICROS;
    let mut iteration = 0u32;
    loop {
        match store.chain_head(shard_group)? {
            Some(head) => {
                record.previous_hash = head.hash;
                record.sequence_id = head.sequence_id + 1;
            }
            None => {
                record.previous_hash.clear();
                record.sequence_id = 0;
            }
        }
        hasher.seal(record);

        match store.insert(record)? {
            InsertOutcome::Inserted => {
                if backoff >= MAXIMUM_BACKOFF_MICROS {
                    warn!(iteration, "append succeeded only after maximum backoff");
                }
                record.verified = true;
                debug!(
                    sequence_id = record.sequence_id,
                    elapsed = ?start.elapsed(),
                    "record appended"
                );
                return Ok(());
            }
            InsertOutcome::DuplicateSequence => {
                // A concurrent writer took this sequence; re-read the head.
                if iteration >= ITERATIONS_BEFORE_BACKOFF {
                    let sleep_micros = rand::thread_rng().gen_range(1..=backoff);
                    tokio::time::sleep(std::time::Duration::from_micros(sleep_micros)).await;
                    backoff = (backoff * 2).min(MAXIMUM_BACKOFF_MICROS);
                }
                iteration += 1;
            }
        }
    }
}

/// Run a translated query, verifying each record against its stored hash
/// and handing it off through `tx`.
///
/// Returns `(count, complete)`: the number of records delivered and
/// whether the iteration ran to its natural end (a receiver that goes
/// away mid-stream yields `complete == false`). Synchronous — callers run
/// it on a blocking worker.
pub fn stream_records(
    store: &Store,
    hasher: &Hasher,
    query: &StoreQuery,
    order_by: &str,
    limit: i64,
    tx: &mpsc::Sender<LogRecord>,
) -> Result<(usize, bool), Error> {
    let start = Instant::now();
    let (count, complete) = store.select(query, order_by, limit, &mut |mut record| {
        record.verified = hasher.verify(&record);
        tx.blocking_send(record).is_ok()
    })?;
    debug!(count, complete, elapsed = ?start.elapsed(), "query streamed");
    Ok((count, complete))
}
