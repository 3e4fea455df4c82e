//! Canonical serialisation and the keyed chain hash.
//!
//! Every record hashes to SHA-256 over a deterministic byte string: the
//! registry's fields in lexicographic storage-name order, each value
//! encoded by kind and followed by a single 0x00 terminator, with the
//! shared secret appended last. The terminator is emitted even for fields
//! that contribute no value bytes, which is what distinguishes an empty
//! string from an unset timestamp. `previous_hash` is part of the input,
//! which is what links a record to its predecessor; `hash` itself is not,
//! so the digest is never self-referential.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::record::{FieldValue, LogRecord};
use crate::schema::Schema;

/// Computes and verifies record hashes under a shared secret.
#[derive(Debug, Clone)]
pub struct Hasher {
    secret: String,
}

impl Hasher {
    pub fn new(secret: impl Into<String>) -> Self {
        Hasher {
            secret: secret.into(),
        }
    }

    /// The canonical byte string fed to SHA-256 for this record.
    pub fn canonical_bytes(&self, record: &LogRecord) -> Vec<u8> {
        let schema = Schema::global();
        let mut buf = Vec::with_capacity(256);
        for field in schema.ordered_fields() {
            if field.hashed() {
                match record.field(field.storage_name) {
                    Some(FieldValue::Text(s)) => buf.extend_from_slice(s.as_bytes()),
                    Some(FieldValue::Int(v)) => buf.extend_from_slice(hex_int(v).as_bytes()),
                    Some(FieldValue::Time(Some(t))) => {
                        // Truncated to the store's millisecond precision so
                        // write-side and read-side input are byte-identical,
                        // then encoded as nanoseconds.
                        let nanos = t.timestamp_millis() * 1_000_000;
                        buf.extend_from_slice(hex_int(nanos).as_bytes());
                    }
                    Some(FieldValue::Time(None)) => {}
                    Some(FieldValue::Bool(_)) | None => {}
                }
            }
            buf.push(0);
        }
        buf.extend_from_slice(self.secret.as_bytes());
        buf
    }

    /// Lowercase 64-character hex SHA-256 of the canonical bytes.
    pub fn compute(&self, record: &LogRecord) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes(record)))
    }

    /// Compute and store the record's hash.
    pub fn seal(&self, record: &mut LogRecord) {
        record.hash = self.compute(record);
    }

    /// Whether the stored hash matches a recomputation. Constant-time
    /// comparison.
    pub fn verify(&self, record: &LogRecord) -> bool {
        let recomputed = self.compute(record);
        recomputed.as_bytes().ct_eq(record.hash.as_bytes()).into()
    }
}

/// Lowercase hex without width padding; negative values render as a sign
/// followed by the hex magnitude. Only `level_no` (-1 for unknown levels)
/// can be negative among the hashed fields.
fn hex_int(v: i64) -> String {
    let wide = v as i128;
    if wide < 0 {
        format!("-{:x}", -wide)
    } else {
        format!("{wide:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    const SECRET: &str = "sekritsquirrel";

    fn hasher() -> Hasher {
        Hasher::new(SECRET)
    }

    #[test]
    fn canonical_bytes_of_a_default_record() {
        // One segment per registry field in lexicographic storage order:
        // empty text and unset timestamps contribute nothing, integers
        // contribute their hex form, no-hash fields contribute nothing.
        let segments: [&str; 21] = [
            "",  // account_group_id
            "",  // client_name
            "",  // exception
            "",  // facility
            "0", // format_version
            "",  // hash (no_hash)
            "",  // hostname
            "",  // instance_id
            "",  // level
            "0", // level_no
            "",  // message
            "",  // originator_ip
            "0", // originator_port
            "",  // originator_time (unset)
            "0", // pid
            "",  // previous_hash
            "0", // sequence_id
            "0", // shard_group
            "",  // time (unset)
            "",  // user
            "",  // verified (no_hash)
        ];
        let mut expected = Vec::new();
        for segment in segments {
            expected.extend_from_slice(segment.as_bytes());
            expected.push(0);
        }
        expected.extend_from_slice(SECRET.as_bytes());

        assert_eq!(hasher().canonical_bytes(&LogRecord::default()), expected);
    }

    #[test]
    fn hash_is_deterministic_and_lowercase_hex() {
        let record = LogRecord {
            message: "hello".to_string(),
            level: "info".to_string(),
            ..Default::default()
        };
        let a = hasher().compute(&record);
        let b = hasher().compute(&record);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn empty_string_differs_from_adjacent_field_shift() {
        // "ab" in message vs "a" in message and "b" in the next hashed
        // field must not collide: the terminator separates them.
        let mut left = LogRecord::default();
        left.message = "ab".to_string();
        let mut right = LogRecord::default();
        right.message = "a".to_string();
        right.originator_ip = "b".to_string();
        assert_ne!(hasher().compute(&left), hasher().compute(&right));
    }

    #[test]
    fn every_hashed_field_contributes() {
        let base = hasher().compute(&LogRecord::default());

        let mut tampered = LogRecord::default();
        tampered.previous_hash = "x".to_string();
        assert_ne!(hasher().compute(&tampered), base);

        let mut tampered = LogRecord::default();
        tampered.sequence_id = 1;
        assert_ne!(hasher().compute(&tampered), base);

        let mut tampered = LogRecord::default();
        tampered.time = DateTime::<Utc>::from_timestamp_millis(1);
        assert_ne!(hasher().compute(&tampered), base);
    }

    #[test]
    fn no_hash_fields_do_not_contribute() {
        let base = hasher().compute(&LogRecord::default());

        let mut record = LogRecord::default();
        record.hash = "ffff".to_string();
        record.verified = true;
        assert_eq!(hasher().compute(&record), base);
    }

    #[test]
    fn secret_is_part_of_the_input() {
        let record = LogRecord::default();
        assert_ne!(
            Hasher::new("a").compute(&record),
            Hasher::new("b").compute(&record)
        );
    }

    #[test]
    fn negative_level_no_encodes_with_a_sign() {
        assert_eq!(hex_int(-1), "-1");
        assert_eq!(hex_int(0), "0");
        assert_eq!(hex_int(255), "ff");
        assert_eq!(hex_int(i64::MIN), format!("-{:x}", (i64::MIN as i128).unsigned_abs()));
    }

    #[test]
    fn seal_then_verify() {
        let mut record = LogRecord {
            message: "hello".to_string(),
            level: "info".to_string(),
            ..Default::default()
        };
        record.normalise();
        record.truncate_timestamps();
        hasher().seal(&mut record);
        assert!(hasher().verify(&record));

        record.message = "tampered".to_string();
        assert!(!hasher().verify(&record));
    }

    #[test]
    fn verify_is_stable_across_precision_truncation() {
        // A record hashed after truncation verifies even if the reader
        // reconstructs it from the store's millisecond representation.
        let fine = DateTime::<Utc>::from_timestamp(1_435_586_559, 987_654_321).unwrap();
        let mut record = LogRecord {
            time: Some(fine),
            ..Default::default()
        };
        hasher().seal(&mut record);

        let mut from_store = record.clone();
        from_store.truncate_timestamps();
        assert!(hasher().verify(&from_store));
    }
}
