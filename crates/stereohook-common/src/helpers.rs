//! Environment parsing helpers shared by the plugin and the engine.

use std::str::FromStr;

/// Reads a boolean flag from the environment.
///
/// Accepts `1`, `true`, `yes`, `on` (any case) as true and `0`, `false`,
/// `no`, `off` as false. Anything else, or an unset variable, yields `None`.
pub fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|value| parse_bool(&value))
}

/// Reads and parses a numeric value from the environment.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
