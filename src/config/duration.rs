//! Human readable durations such as `"100ms"`, `"10s"`, `"5m"`, `"1h"` and
//! `"1d"`, plus serde helpers for config fields.

use super::ConfigError;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const MILLIS_PER_SECOND: u64 = 1000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: u64 = 24 * MILLIS_PER_HOUR;

/// Parses a duration string. A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
  let trimmed = s.trim();
  if trimmed.is_empty() {
    return Err(ConfigError::InvalidDuration {
      value: s.to_string(),
      reason: "empty duration string".to_string(),
    });
  }

  let (num_str, unit) = trimmed
    .find(|c: char| !c.is_ascii_digit())
    .map(|i| trimmed.split_at(i))
    .unwrap_or((trimmed, "s"));

  let num: u64 = num_str.parse().map_err(|_| ConfigError::InvalidDuration {
    value: s.to_string(),
    reason: format!("invalid number '{num_str}'"),
  })?;

  let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
    "ms" => 1,
    "s" | "" => MILLIS_PER_SECOND,
    "m" => MILLIS_PER_MINUTE,
    "h" => MILLIS_PER_HOUR,
    "d" => MILLIS_PER_DAY,
    other => {
      return Err(ConfigError::InvalidDuration {
        value: s.to_string(),
        reason: format!("unknown unit '{other}'"),
      });
    }
  };

  num
    .checked_mul(multiplier)
    .map(Duration::from_millis)
    .ok_or_else(|| ConfigError::InvalidDuration {
      value: s.to_string(),
      reason: "value too large".to_string(),
    })
}

/// Formats a duration using the largest unit that divides it evenly.
pub fn format_duration(duration: &Duration) -> String {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  if millis == 0 {
    return "0s".to_string();
  }
  for (unit, size) in [
    ("d", MILLIS_PER_DAY),
    ("h", MILLIS_PER_HOUR),
    ("m", MILLIS_PER_MINUTE),
    ("s", MILLIS_PER_SECOND),
  ] {
    if millis % size == 0 {
      return format!("{}{unit}", millis / size);
    }
  }
  format!("{millis}ms")
}

/// Serde `deserialize_with` helper.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serde `serialize_with` helper.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
  S: Serializer,
{
  serializer.serialize_str(&format_duration(duration))
}

/// Serde `deserialize_with` helper for optional durations.
pub fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
  D: Deserializer<'de>,
{
  let opt: Option<String> = Option::deserialize(deserializer)?;
  opt
    .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
    .transpose()
}
