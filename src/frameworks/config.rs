use crate::interface_adapters::codec::WireEncoding;
use std::{env, time::Duration};

// Runtime/server knobs (not land rules).

pub fn http_port() -> u16 {
    env::var("LAND_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3001)
}

/// How long a fresh connection may idle before its join must arrive.
pub fn join_timeout() -> Duration {
    let millis = env::var("LAND_JOIN_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(10_000);
    Duration::from_millis(millis)
}

/// Destroy-when-empty delay for lands. Zero disables idle destruction.
pub fn empty_destroy_interval() -> Option<Duration> {
    let millis = env::var("LAND_EMPTY_DESTROY_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30_000);
    if millis == 0 {
        None
    } else {
        Some(Duration::from_millis(millis))
    }
}

/// `SST_SYNC_PARALLEL_ENCODE` gates the parallel send fan-out during sync.
/// Defaults to on when the wire encoding is a JSON form.
pub fn parallel_send_enabled(encoding: WireEncoding) -> bool {
    match env::var("SST_SYNC_PARALLEL_ENCODE") {
        Ok(value) => parse_switch(&value).unwrap_or_else(|| encoding.is_json()),
        Err(_) => encoding.is_json(),
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

pub const MAILBOX_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_the_switch_value_is_recognized_then_it_parses() {
        assert_eq!(parse_switch("1"), Some(true));
        assert_eq!(parse_switch("on"), Some(true));
        assert_eq!(parse_switch("TRUE"), Some(true));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("off"), Some(false));
        assert_eq!(parse_switch("false"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }
}
