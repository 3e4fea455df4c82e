//! Syslog ingestion tests: parts conversion, embedded-JSON absorption and
//! live listeners end to end.

use std::net::SocketAddr;
use std::time::Duration;

use slogger_core::{Hasher, LogRecord};
use slogger_server::query::{order_by_clause, parse_sort};
use slogger_server::store::{Store, StoreQuery};
use slogger_server::syslog::{self, parse_message, SyslogParts};
use slogger_server::{AppState, SharedState};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

fn test_state() -> SharedState {
    AppState::shared(
        Store::open_in_memory("logitems").unwrap(),
        Hasher::new("sekritsquirrel"),
        1234,
    )
}

fn stored_records(state: &SharedState) -> Vec<LogRecord> {
    let order = order_by_clause(&parse_sort("sequence_id").unwrap());
    let mut records = Vec::new();
    state
        .store
        .select(&StoreQuery::match_all(), &order, 0, &mut |mut record| {
            record.verified = state.hasher.verify(&record);
            records.push(record);
            true
        })
        .unwrap();
    records
}

/// Poll the store until `want` records are present.
async fn wait_for_records(state: &SharedState, want: usize) -> Vec<LogRecord> {
    for _ in 0..100 {
        let records = stored_records(state);
        if records.len() >= want {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {want} records");
}

#[tokio::test]
async fn plain_message_becomes_a_tagged_record() {
    let state = test_state();
    let addr: SocketAddr = "192.0.2.7:33000".parse().unwrap();
    let parts = parse_message("<13>Oct 11 22:14:15 web1 app: something happened", Some(addr));
    syslog::process_parts(&state, parts).await.unwrap();

    let records = stored_records(&state);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.message, "app:something happened");
    assert_eq!(record.hostname, "web1");
    assert_eq!(record.level, "notice");
    assert_eq!(record.level_no, 5);
    assert_eq!(record.facility, "user");
    assert_eq!(record.originator_ip, "192.0.2.7");
    assert_eq!(record.originator_port, 33000);
    assert!(record.time.is_some());
    assert!(record.verified);
}

#[tokio::test]
async fn unknown_facility_keeps_the_code() {
    let state = test_state();
    let parts = SyslogParts {
        severity: Some(9),
        facility: Some(42),
        content: Some("odd".to_string()),
        ..Default::default()
    };
    syslog::process_parts(&state, parts).await.unwrap();

    let records = stored_records(&state);
    assert_eq!(records[0].level, "none");
    assert_eq!(records[0].level_no, -1);
    assert_eq!(records[0].facility, "unknown [42]");
}

#[tokio::test]
async fn embedded_json_in_tag_and_content_is_absorbed() {
    let state = test_state();
    // A JSON payload split by the tag:content convention; the brace in
    // the tag marks it as one JSON document.
    let parts = parse_message(r#"<13>{"user":"alice","pid":42,"foo":"bar"}"#, None);
    assert!(parts.tag.as_deref().unwrap().contains('{'));
    syslog::process_parts(&state, parts).await.unwrap();

    let records = stored_records(&state);
    let record = &records[0];
    // Known fields are absorbed, the unknown "foo" is dropped, and the
    // message stays unset.
    assert_eq!(record.message, "");
    assert_eq!(record.user, "alice");
    assert_eq!(record.pid, 42);
    assert!(record.verified);
}

#[tokio::test]
async fn json_content_behind_a_plain_tag_is_absorbed() {
    let state = test_state();
    let parts = parse_message(r#"<13>app: {"message":"inner","user":"bob"}"#, None);
    assert_eq!(parts.tag.as_deref(), Some("app"));
    syslog::process_parts(&state, parts).await.unwrap();

    let records = stored_records(&state);
    assert_eq!(records[0].message, "inner");
    assert_eq!(records[0].user, "bob");
}

#[tokio::test]
async fn broken_json_falls_back_to_the_concatenation() {
    let state = test_state();
    let parts = parse_message(r#"<13>app: {"message": broken"#, None);
    syslog::process_parts(&state, parts).await.unwrap();

    let records = stored_records(&state);
    assert_eq!(records[0].message, r#"app:{"message": broken"#);
}

#[tokio::test]
async fn receipt_time_overrides_inbound_claims() {
    let state = test_state();
    let parts = parse_message("<13>Oct 11 22:14:15 web1 app: hi", None);
    let inbound = parts.timestamp.unwrap();
    syslog::process_parts(&state, parts).await.unwrap();

    let records = stored_records(&state);
    // The originator keeps its claim; the receipt time is ours.
    assert_eq!(
        records[0].originator_time.unwrap().timestamp(),
        inbound.timestamp()
    );
    assert_ne!(records[0].time, records[0].originator_time);
}

#[tokio::test]
async fn udp_listener_ingests_datagrams() {
    let state = test_state();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(syslog::run_udp(socket, state.clone()));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(b"<14>Oct 11 22:14:15 web1 app: over udp", addr)
        .await
        .unwrap();

    let records = wait_for_records(&state, 1).await;
    let record = &records[0];
    assert_eq!(record.message, "app:over udp");
    assert_eq!(record.level, "info");
    assert_eq!(record.originator_ip, "127.0.0.1");
    assert!(record.verified);
}

#[tokio::test]
async fn tcp_listener_ingests_line_streams() {
    let state = test_state();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(syslog::run_tcp(listener, state.clone(), None));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"<13>Oct 11 22:14:15 web1 app: first\n<13>Oct 11 22:14:16 web1 app: second\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let records = wait_for_records(&state, 2).await;
    let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
    assert!(messages.contains(&"app:first"));
    assert!(messages.contains(&"app:second"));
    for record in &records {
        assert!(record.verified);
        assert_eq!(record.originator_ip, "127.0.0.1");
    }
}

#[tokio::test]
async fn a_bad_message_does_not_kill_the_listener() {
    let state = test_state();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(syslog::run_udp(socket, state.clone()));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // Invalid UTF-8 (ingested lossily) and an empty datagram (skipped),
    // then a good message.
    sender.send_to(&[0xff, 0xfe, 0xfd], addr).await.unwrap();
    sender.send_to(b"", addr).await.unwrap();
    sender
        .send_to(b"<13>Oct 11 22:14:15 web1 app: still alive", addr)
        .await
        .unwrap();

    let records = wait_for_records(&state, 2).await;
    assert!(records
        .iter()
        .any(|record| record.message == "app:still alive"));
}
