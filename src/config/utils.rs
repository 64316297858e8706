use std::env;
use std::str::FromStr;

/// Read an environment variable, treating empty values as unset.
pub(crate) fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an environment variable into `T`.
pub(crate) fn parse_env<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: '{value}' ({e})").into()),
        None => Ok(None),
    }
}

/// Parse a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_env_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_var(key) {
        Some(value) => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| format!("Invalid boolean for {key}: '{value}'").into()),
        None => Ok(None),
    }
}
