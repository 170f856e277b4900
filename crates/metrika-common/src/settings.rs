use serde::Deserialize;
use std::time::Duration;

/// Longest accepted interval, 366 days. Timers are armed at `now + interval`,
/// which must stay representable.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

/// Parses an interval given as whole seconds (`"10"`) or with a unit suffix
/// (`"500ms"`, `"10s"`, `"1m"`, `"1h"`).
///
/// # Examples
///
/// ```
/// use metrika_common::settings::parse_interval;
/// use std::time::Duration;
///
/// assert_eq!(parse_interval("10").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
/// assert!(parse_interval("soon").is_err());
/// ```
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval: {raw:?}"))?;
    let scaled = match unit {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3600).map(Duration::from_secs),
        _ => return Err(format!("invalid interval unit in {raw:?}")),
    };
    scaled
        .ok_or_else(|| format!("interval out of range: {raw:?}"))
        .and_then(bounded)
}

fn bounded(interval: Duration) -> Result<Duration, String> {
    if interval > MAX_INTERVAL {
        return Err(format!(
            "interval {}s exceeds the maximum of {}s",
            interval.as_secs(),
            MAX_INTERVAL.as_secs()
        ));
    }
    Ok(interval)
}

/// Interval as written in a config file: an integer number of seconds or a
/// string accepted by [`parse_interval`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntervalValue {
    Secs(u64),
    Text(String),
}

impl IntervalValue {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            IntervalValue::Secs(secs) => bounded(Duration::from_secs(*secs)),
            IntervalValue::Text(text) => parse_interval(text),
        }
    }
}

/// Parses a boolean setting from an environment variable.
///
/// ```
/// use metrika_common::settings::parse_bool;
///
/// assert_eq!(parse_bool("true"), Ok(true));
/// assert_eq!(parse_bool("0"), Ok(false));
/// assert!(parse_bool("maybe").is_err());
/// ```
pub fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("invalid boolean {other:?}")),
    }
}
