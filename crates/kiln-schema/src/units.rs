use crate::config::ConfigError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Parse a human-readable byte quantity using binary multiples.
///
/// Accepts plain integers (including `-1`) and sizes such as `512m`, `1.5g`,
/// `4MiB` or `64 kb`. Units are case-insensitive and always powers of 1024.
pub fn parse_bytes(input: &str) -> Result<i64, ConfigError> {
    let trimmed = input.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(n);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidSize(input.to_owned()))?;
    let multiplier =
        unit_multiplier(suffix.trim_start()).ok_or_else(|| ConfigError::InvalidSize(input.to_owned()))?;

    Ok((value * multiplier as f64) as i64)
}

fn unit_multiplier(suffix: &str) -> Option<i64> {
    let lower = suffix.to_ascii_lowercase();
    let unit = lower.strip_suffix('b').unwrap_or(&lower);
    let unit = unit.strip_suffix('i').unwrap_or(unit);
    let power = match unit {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        _ => return None,
    };
    Some(1024_i64.pow(power))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Int(i64),
    Text(String),
}

/// Serde adapter for byte fields that may be written as `8388608` or `"8m"`.
pub fn deserialize_bytes<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawSize::deserialize(deserializer)? {
        RawSize::Int(n) => Ok(n),
        RawSize::Text(s) => parse_bytes(&s).map_err(D::Error::custom),
    }
}
