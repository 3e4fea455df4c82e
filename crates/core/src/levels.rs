//! Syslog level and facility code maps.
//!
//! The numeric codes follow RFC 5424; the word forms are what the record
//! schema stores and what the query API matches against.

/// Numeric level for a level word. Unknown words map to "none" (-1).
///
/// Lookup is case-insensitive; both the short and long spellings of
/// err/error and warn/warning are accepted.
pub fn level_to_no(level: &str) -> i32 {
    match level.to_ascii_lowercase().as_str() {
        "emerg" | "panic" => 0,
        "alert" => 1,
        "crit" => 2,
        "err" | "error" => 3,
        "warn" | "warning" => 4,
        "notice" => 5,
        "info" => 6,
        "debug" => 7,
        _ => -1,
    }
}

/// Canonical level word for a syslog severity code. Out-of-range codes
/// map to "none".
pub fn level_from_severity(severity: i32) -> &'static str {
    match severity {
        0 => "emerg",
        1 => "alert",
        2 => "crit",
        3 => "err",
        4 => "warn",
        5 => "notice",
        6 => "info",
        7 => "debug",
        _ => "none",
    }
}

/// Facility word for a syslog facility code. Unknown codes yield the
/// literal `unknown [N]` so the original value survives in queries.
pub fn facility_from_code(facility: i32) -> String {
    let name = match facility {
        0 => "kern",
        1 => "user",
        2 => "mail",
        3 => "daemon",
        4 => "auth",
        5 => "syslog",
        6 => "lpr",
        7 => "news",
        8 => "uucp",
        9 => "cron",
        10 => "authpriv",
        11 => "ftp",
        12 => "netinfo",
        13 => "remoteauth",
        14 => "install",
        15 => "ras",
        16 => "local0",
        17 => "local1",
        18 => "local2",
        19 => "local3",
        20 => "local4",
        21 => "local5",
        22 => "local6",
        23 => "local7",
        _ => return format!("unknown [{facility}]"),
    };
    name.to_string()
}
