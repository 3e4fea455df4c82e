//! Syslog wire parsing.
//!
//! Accepts both RFC 5424 and the older RFC 3164 framing and degrades
//! gracefully: whatever cannot be parsed structurally survives as message
//! content rather than being dropped. The output is the flat parts
//! structure the ingress conversion works from.

use std::net::SocketAddr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// Parsed fields of one syslog message. Every part is optional; absent
/// parts simply leave the corresponding record fields unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyslogParts {
    /// Sender address as host:port text.
    pub client: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub severity: Option<i32>,
    pub facility: Option<i32>,
    pub hostname: Option<String>,
    pub content: Option<String>,
    pub tag: Option<String>,
}

/// Parse a single syslog line.
pub fn parse_message(line: &str, client: Option<SocketAddr>) -> SyslogParts {
    let mut parts = SyslogParts {
        client: client.map(|addr| addr.to_string()),
        ..Default::default()
    };

    let mut rest = line;
    if let Some((pri, after)) = parse_pri(rest) {
        parts.severity = Some(pri & 7);
        parts.facility = Some(pri >> 3);
        rest = after;
    }

    if let Some(after_version) = rest.strip_prefix("1 ") {
        parse_rfc5424(after_version, &mut parts);
    } else {
        parse_rfc3164(rest, &mut parts);
    }
    parts
}

/// `<PRI>` prefix: priority 0..=191, severity in the low three bits.
fn parse_pri(s: &str) -> Option<(i32, &str)> {
    let inner = s.strip_prefix('<')?;
    let end = inner.find('>')?;
    if end == 0 || end > 3 {
        return None;
    }
    let pri: i32 = inner[..end].parse().ok()?;
    if !(0..=191).contains(&pri) {
        return None;
    }
    Some((pri, &inner[end + 1..]))
}

fn next_token(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, ""),
    }
}

fn nil_token(token: &str) -> Option<&str> {
    (!token.is_empty() && token != "-").then_some(token)
}

fn parse_rfc5424(s: &str, parts: &mut SyslogParts) {
    let (timestamp, rest) = next_token(s);
    if let Some(token) = nil_token(timestamp) {
        if let Ok(t) = DateTime::parse_from_rfc3339(token) {
            parts.timestamp = Some(t.with_timezone(&Utc));
        }
    }
    let (hostname, rest) = next_token(rest);
    parts.hostname = nil_token(hostname).map(str::to_owned);
    let (app_name, rest) = next_token(rest);
    parts.tag = nil_token(app_name).map(str::to_owned);
    let (_procid, rest) = next_token(rest);
    let (_msgid, rest) = next_token(rest);
    let msg = skip_structured_data(rest);
    let msg = msg.strip_prefix('\u{feff}').unwrap_or(msg);
    if !msg.is_empty() {
        parts.content = Some(msg.to_string());
    }
}

/// Skip the STRUCTURED-DATA element ("-" or one or more bracketed
/// elements with `\]` escapes) and return the remaining MSG.
fn skip_structured_data(s: &str) -> &str {
    if let Some(rest) = s.strip_prefix('-') {
        return rest.strip_prefix(' ').unwrap_or(rest);
    }
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b'[' {
        let mut j = i + 1;
        let mut escaped = false;
        loop {
            match bytes.get(j) {
                None => return "",
                Some(b'\\') if !escaped => escaped = true,
                Some(b']') if !escaped => break,
                Some(_) => escaped = false,
            }
            j += 1;
        }
        i = j + 1;
    }
    s[i..].strip_prefix(' ').unwrap_or(&s[i..])
}

fn parse_rfc3164(s: &str, parts: &mut SyslogParts) {
    let mut rest = s;
    if let Some((timestamp, after)) = parse_rfc3164_timestamp(rest) {
        parts.timestamp = Some(timestamp);
        let (hostname, after) = next_token(after);
        if !hostname.is_empty() {
            parts.hostname = Some(hostname.to_string());
        }
        rest = after;
    }
    split_tag_content(rest, parts);
}

/// `Mmm dd hh:mm:ss`, day space-padded, year assumed current.
fn parse_rfc3164_timestamp(s: &str) -> Option<(DateTime<Utc>, &str)> {
    if s.len() < 15 || !s.is_char_boundary(15) {
        return None;
    }
    let (stamp, rest) = s.split_at(15);
    let bytes = stamp.as_bytes();
    if bytes[3] != b' ' || bytes[6] != b' ' || bytes[9] != b':' || bytes[12] != b':' {
        return None;
    }
    let month = match &stamp[..3] {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    let day: u32 = stamp[4..6].trim_start().parse().ok()?;
    let hour: u32 = stamp[7..9].parse().ok()?;
    let minute: u32 = stamp[10..12].parse().ok()?;
    let second: u32 = stamp[13..15].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(Utc::now().year(), month, day)?;
    let naive = date.and_hms_opt(hour, minute, second)?;
    Some((
        Utc.from_utc_datetime(&naive),
        rest.strip_prefix(' ').unwrap_or(rest),
    ))
}

/// Split `tag:content` at the first colon. A candidate tag containing a
/// space is not a tag; the whole text is content then.
fn split_tag_content(msg: &str, parts: &mut SyslogParts) {
    if msg.is_empty() {
        return;
    }
    if let Some(colon) = msg.find(':') {
        let (tag, content) = msg.split_at(colon);
        let content = &content[1..];
        if !tag.is_empty() && !tag.contains(' ') {
            parts.tag = Some(tag.to_string());
            let content = content.strip_prefix(' ').unwrap_or(content);
            if !content.is_empty() {
                parts.content = Some(content.to_string());
            }
            return;
        }
    }
    parts.content = Some(msg.to_string());
}
