//! The log record and its normalisation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::levels::level_to_no;

/// Canonical serialisation format produced by this implementation. Any
/// change to the canonical hashing rules must bump this.
pub const FORMAT_VERSION: i32 = 1;

/// A single log record.
///
/// Text fields use the empty string as "unset" and timestamps use `None`,
/// mirroring how the store persists them (empty string / zero). The
/// external JSON names differ from the storage names only where noted;
/// in particular `originator_time` travels as `"timestamp"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    pub message: String,
    pub instance_id: String,
    pub account_group_id: String,
    pub level: String,
    pub exception: String,
    #[serde(rename = "timestamp")]
    pub originator_time: Option<DateTime<Utc>>,
    pub pid: i32,

    pub originator_ip: String,
    pub originator_port: i32,
    pub facility: String,
    pub hostname: String,
    pub user: String,
    pub client_name: String,
    pub time: Option<DateTime<Utc>>,

    // Assigned by normalisation and the append pipeline.
    pub level_no: i32,
    pub hash: String,
    pub previous_hash: String,
    pub sequence_id: i64,
    pub shard_group: i32,
    pub format_version: i32,
    /// Runtime-only verification flag; never persisted as true.
    pub verified: bool,
}

/// A typed view of one record field, keyed by storage name through
/// [`LogRecord::field`]. The canonical hasher and the store row mapping
/// both go through this so the registry stays the single source of truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Int(i64),
    Time(Option<DateTime<Utc>>),
    Bool(bool),
}

impl LogRecord {
    /// Typed value of the field with the given storage name.
    pub fn field(&self, storage_name: &str) -> Option<FieldValue<'_>> {
        let value = match storage_name {
            "account_group_id" => FieldValue::Text(&self.account_group_id),
            "client_name" => FieldValue::Text(&self.client_name),
            "exception" => FieldValue::Text(&self.exception),
            "facility" => FieldValue::Text(&self.facility),
            "format_version" => FieldValue::Int(self.format_version.into()),
            "hash" => FieldValue::Text(&self.hash),
            "hostname" => FieldValue::Text(&self.hostname),
            "instance_id" => FieldValue::Text(&self.instance_id),
            "level" => FieldValue::Text(&self.level),
            "level_no" => FieldValue::Int(self.level_no.into()),
            "message" => FieldValue::Text(&self.message),
            "originator_ip" => FieldValue::Text(&self.originator_ip),
            "originator_port" => FieldValue::Int(self.originator_port.into()),
            "originator_time" => FieldValue::Time(self.originator_time),
            "pid" => FieldValue::Int(self.pid.into()),
            "previous_hash" => FieldValue::Text(&self.previous_hash),
            "sequence_id" => FieldValue::Int(self.sequence_id),
            "shard_group" => FieldValue::Int(self.shard_group.into()),
            "time" => FieldValue::Time(self.time),
            "user" => FieldValue::Text(&self.user),
            "verified" => FieldValue::Bool(self.verified),
            _ => return None,
        };
        Some(value)
    }

    /// Assign a field by storage name. Returns false when the name is
    /// unknown or the value kind does not match the field.
    pub fn set_field(&mut self, storage_name: &str, value: FieldValue<'_>) -> bool {
        match (storage_name, value) {
            ("account_group_id", FieldValue::Text(v)) => self.account_group_id = v.to_owned(),
            ("client_name", FieldValue::Text(v)) => self.client_name = v.to_owned(),
            ("exception", FieldValue::Text(v)) => self.exception = v.to_owned(),
            ("facility", FieldValue::Text(v)) => self.facility = v.to_owned(),
            ("format_version", FieldValue::Int(v)) => self.format_version = v as i32,
            ("hash", FieldValue::Text(v)) => self.hash = v.to_owned(),
            ("hostname", FieldValue::Text(v)) => self.hostname = v.to_owned(),
            ("instance_id", FieldValue::Text(v)) => self.instance_id = v.to_owned(),
            ("level", FieldValue::Text(v)) => self.level = v.to_owned(),
            ("level_no", FieldValue::Int(v)) => self.level_no = v as i32,
            ("message", FieldValue::Text(v)) => self.message = v.to_owned(),
            ("originator_ip", FieldValue::Text(v)) => self.originator_ip = v.to_owned(),
            ("originator_port", FieldValue::Int(v)) => self.originator_port = v as i32,
            ("originator_time", FieldValue::Time(v)) => self.originator_time = v,
            ("pid", FieldValue::Int(v)) => self.pid = v as i32,
            ("previous_hash", FieldValue::Text(v)) => self.previous_hash = v.to_owned(),
            ("sequence_id", FieldValue::Int(v)) => self.sequence_id = v,
            ("shard_group", FieldValue::Int(v)) => self.shard_group = v as i32,
            ("time", FieldValue::Time(v)) => self.time = v,
            ("user", FieldValue::Text(v)) => self.user = v.to_owned(),
            ("verified", FieldValue::Bool(v)) => self.verified = v,
            _ => return false,
        }
        true
    }

    /// Fill the derived fields.
    ///
    /// `level_no` comes from the level map (-1 for unknown levels), an
    /// unset receipt `time` becomes the current wall clock, an unset
    /// `originator_time` inherits `time`, the format version is stamped
    /// and the verification flag cleared. Idempotent apart from the
    /// wall-clock default on first call.
    pub fn normalise(&mut self) {
        self.level_no = level_to_no(&self.level);
        if self.time.is_none() {
            self.time = Some(Utc::now());
        }
        if self.originator_time.is_none() {
            self.originator_time = self.time;
        }
        self.format_version = FORMAT_VERSION;
        self.verified = false;
    }

    /// Truncate both timestamps to the store's millisecond precision so
    /// the canonical hash input is byte-identical on write and re-read.
    pub fn truncate_timestamps(&mut self) {
        self.time = self.time.and_then(truncate_to_millis);
        self.originator_time = self.originator_time.and_then(truncate_to_millis);
    }
}

fn truncate_to_millis(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(t.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalise_fills_derived_fields() {
        let mut record = LogRecord {
            level: "Info".to_string(),
            verified: true,
            ..Default::default()
        };
        record.normalise();
        assert_eq!(record.level_no, 6);
        assert_eq!(record.format_version, FORMAT_VERSION);
        assert!(!record.verified);
        assert!(record.time.is_some());
        assert_eq!(record.originator_time, record.time);
    }

    #[test]
    fn normalise_defaults_unknown_level_to_none() {
        let mut record = LogRecord::default();
        record.normalise();
        assert_eq!(record.level_no, -1);
    }

    #[test]
    fn normalise_keeps_supplied_timestamps() {
        let originator = Utc.with_ymd_and_hms(2015, 6, 29, 14, 2, 39).unwrap();
        let receipt = Utc.with_ymd_and_hms(2015, 7, 3, 16, 40, 54).unwrap();
        let mut record = LogRecord {
            originator_time: Some(originator),
            time: Some(receipt),
            ..Default::default()
        };
        record.normalise();
        assert_eq!(record.originator_time, Some(originator));
        assert_eq!(record.time, Some(receipt));
    }

    #[test]
    fn normalise_is_idempotent() {
        let mut record = LogRecord {
            level: "warn".to_string(),
            ..Default::default()
        };
        record.normalise();
        let first = record.clone();
        record.normalise();
        assert_eq!(record, first);
    }

    #[test]
    fn originator_time_uses_the_external_timestamp_name() {
        let json = r#"{"message":"hello","timestamp":"2015-06-29T14:02:39+00:00"}"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.message, "hello");
        assert_eq!(
            record.originator_time,
            Some(Utc.with_ymd_and_hms(2015, 6, 29, 14, 2, 39).unwrap())
        );

        let out = serde_json::to_value(&record).unwrap();
        assert!(out.get("timestamp").is_some());
        assert!(out.get("originator_time").is_none());
    }

    #[test]
    fn field_access_covers_the_registry() {
        let record = LogRecord::default();
        let schema = crate::Schema::global();
        for name in schema.ordered_storage_names() {
            assert!(record.field(name).is_some(), "no accessor for {name}");
        }
        assert!(record.field("bogus").is_none());
    }

    #[test]
    fn set_field_rejects_kind_mismatches() {
        let mut record = LogRecord::default();
        assert!(record.set_field("message", FieldValue::Text("hi")));
        assert_eq!(record.message, "hi");
        assert!(!record.set_field("message", FieldValue::Int(1)));
        assert!(!record.set_field("bogus", FieldValue::Int(1)));
    }

    #[test]
    fn truncation_drops_sub_millisecond_precision() {
        let fine = DateTime::<Utc>::from_timestamp(1_435_586_559, 123_456_789).unwrap();
        let mut record = LogRecord {
            time: Some(fine),
            originator_time: Some(fine),
            ..Default::default()
        };
        record.truncate_timestamps();
        let expect = DateTime::<Utc>::from_timestamp(1_435_586_559, 123_000_000).unwrap();
        assert_eq!(record.time, Some(expect));
        assert_eq!(record.originator_time, Some(expect));
    }
}
