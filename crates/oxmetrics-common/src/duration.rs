//! Interval values as written in flags, env vars and JSON config files.
//!
//! A bare integer means seconds. Strings may carry an `s`, `m` or `h` suffix.

use serde::de::{self, Deserializer, Visitor};
use std::time::Duration;

/// Parses `"10"`, `"10s"`, `"5m"` or `"1h"`.
///
/// # Examples
///
/// ```
/// use oxmetrics_common::duration::parse;
/// use std::time::Duration;
///
/// assert_eq!(parse("300").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
/// assert!(parse("-1").is_err());
/// ```
pub fn parse(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => raw.split_at(i),
        None => (raw, ""),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {raw:?}"))?;
    let secs = match unit {
        "" | "s" => Some(n),
        "m" => n.checked_mul(60),
        "h" => n.checked_mul(3600),
        _ => return Err(format!("invalid duration unit in {raw:?}")),
    };
    secs.map(Duration::from_secs)
        .ok_or_else(|| format!("duration out of range: {raw:?}"))
}

/// `#[serde(deserialize_with = "...")]` helper accepting integers or strings.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("seconds as an integer or a string like \"10s\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
