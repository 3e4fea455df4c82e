//! Syslog ingress: UDP datagrams and newline-delimited TCP/TLS streams.
//!
//! Every message runs through the same conversion: transport address and
//! parsed parts become a record, embedded JSON payloads are absorbed into
//! matching fields, and the result goes down the append pipeline. A bad
//! message is logged and dropped; it never takes a listener with it.

pub mod parser;

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use slogger_core::levels::{facility_from_code, level_from_severity};
use slogger_core::schema::FieldKind;
use slogger_core::{Error, FieldValue, LogRecord, Schema};

use crate::pipeline::append;
use crate::SharedState;

pub use parser::{parse_message, SyslogParts};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Receive datagrams forever. One datagram may carry several newline
/// separated messages.
pub async fn run_udp(socket: UdpSocket, state: SharedState) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                for line in text.lines() {
                    handle_line(&state, line, peer).await;
                }
            }
            Err(err) => warn!(%err, "syslog udp receive failed"),
        }
    }
}

/// Accept TCP connections forever, optionally TLS-wrapped, one task per
/// connection.
pub async fn run_tcp(listener: TcpListener, state: SharedState, tls: Option<TlsAcceptor>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => read_lines(stream, peer, state).await,
                            Err(err) => debug!(%err, "syslog tls handshake failed"),
                        },
                        None => read_lines(stream, peer, state).await,
                    }
                });
            }
            Err(err) => warn!(%err, "syslog accept failed"),
        }
    }
}

async fn read_lines<S>(stream: S, peer: SocketAddr, state: SharedState)
where
    S: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&state, &line, peer).await,
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "syslog connection read failed");
                break;
            }
        }
    }
}

async fn handle_line(state: &SharedState, line: &str, peer: SocketAddr) {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return;
    }
    let parts = parse_message(line, Some(peer));
    // Each message runs in its own task so that even a panic in record
    // processing cannot take the listener down.
    let state = state.clone();
    match tokio::spawn(async move { process_parts(&state, parts).await }).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%err, "syslog message dropped"),
        Err(err) => warn!(%err, "syslog message processing panicked"),
    }
}

/// Convert parsed parts into a record and append it.
pub async fn process_parts(state: &SharedState, parts: SyslogParts) -> Result<(), Error> {
    let mut record = LogRecord::default();

    if let Some(client) = parts.client.as_deref() {
        if let Ok(addr) = client.parse::<SocketAddr>() {
            record.originator_ip = addr.ip().to_string();
            record.originator_port = addr.port().into();
        }
    }
    if parts.timestamp.is_some() {
        record.originator_time = parts.timestamp;
    }
    if let Some(severity) = parts.severity {
        record.level = level_from_severity(severity).to_string();
    }
    if let Some(facility) = parts.facility {
        record.facility = facility_from_code(facility);
    }
    if let Some(hostname) = parts.hostname {
        record.hostname = hostname;
    }

    match (parts.tag, parts.content) {
        (Some(tag), Some(content)) => {
            let combined = format!("{tag}:{content}");
            if tag.contains('{') {
                // The colon split fell inside a JSON object; the
                // recombined text is the payload.
                if !absorb_json(&mut record, &combined) {
                    record.message = combined;
                }
            } else if content.contains('{') {
                if !absorb_json(&mut record, &content) {
                    record.message = combined;
                }
            } else {
                record.message = combined;
            }
        }
        (None, Some(content)) => {
            if content.contains('{') {
                if !absorb_json(&mut record, &content) {
                    record.message = content;
                }
            } else {
                record.message = content;
            }
        }
        (Some(tag), None) => record.message = tag,
        (None, None) => {}
    }

    // Receipt time is ours regardless of what the sender claimed; the
    // originator time keeps the inbound value.
    record.time = Some(Utc::now());
    record.normalise();
    append(&state.store, &state.hasher, state.shard_group, &mut record).await
}

enum Absorbed {
    Text(String),
    Int(i64),
    Time(DateTime<Utc>),
    Flag(bool),
}

/// Interpret `raw` as a JSON object and merge its registry-known fields
/// into the record. Returns false — leaving the record untouched — when
/// the text is not an object or a known field carries the wrong kind of
/// value; unknown keys are ignored.
fn absorb_json(record: &mut LogRecord, raw: &str) -> bool {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return false;
    };
    let schema = Schema::global();

    let mut updates: Vec<(&'static str, Absorbed)> = Vec::new();
    for (key, value) in &map {
        let Some(field) = schema.field_by_json(key) else {
            continue;
        };
        let update = match (field.kind, value) {
            (_, Value::Null) => continue,
            (FieldKind::Text, Value::String(s)) => Absorbed::Text(s.clone()),
            (FieldKind::Integer, Value::Number(n)) => match n.as_i64() {
                Some(i) => Absorbed::Int(i),
                None => return false,
            },
            (FieldKind::Timestamp, Value::String(s)) => {
                match DateTime::parse_from_rfc3339(s) {
                    Ok(t) => Absorbed::Time(t.with_timezone(&Utc)),
                    Err(_) => return false,
                }
            }
            (FieldKind::Boolean, Value::Bool(b)) => Absorbed::Flag(*b),
            _ => return false,
        };
        updates.push((field.storage_name, update));
    }

    for (name, update) in &updates {
        match update {
            Absorbed::Text(s) => record.set_field(name, FieldValue::Text(s)),
            Absorbed::Int(i) => record.set_field(name, FieldValue::Int(*i)),
            Absorbed::Time(t) => record.set_field(name, FieldValue::Time(Some(*t))),
            Absorbed::Flag(b) => record.set_field(name, FieldValue::Bool(*b)),
        };
    }
    true
}
