//! Store option parsing
//!
//! Cache options arrive from configuration as a flat string map.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{CacheError, Result};

/// Parses `name` from `options`, returning `default` when absent.
pub fn parse<T>(options: &HashMap<String, String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match options.get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, e.to_string())),
        None => Ok(default),
    }
}

/// Parses a boolean option. Accepts the usual spellings (`1`, `t`, `true`, ...).
pub fn parse_bool(options: &HashMap<String, String>, name: &str, default: bool) -> Result<bool> {
    let Some(value) = options.get(name) else {
        return Ok(default);
    };

    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(invalid(name, format!("invalid boolean '{}'", other))),
    }
}

/// Parses the `ttl` option. Zero is rejected, the default must be positive.
pub fn parse_ttl(options: &HashMap<String, String>, default: u64) -> Result<u64> {
    match parse(options, "ttl", default)? {
        0 => Err(invalid("ttl", "must be greater than 0".to_string())),
        ttl => Ok(ttl.min(super::MAX_TTL)),
    }
}

fn invalid(name: &str, reason: String) -> CacheError {
    CacheError::InvalidOption {
        name: name.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_present_and_absent() {
        let opts = options(&[("memory_limit", "2048")]);
        assert_eq!(parse(&opts, "memory_limit", 10usize).unwrap(), 2048);
        assert_eq!(parse(&opts, "ttl", 86400u64).unwrap(), 86400);
    }

    #[test]
    fn test_parse_invalid_number() {
        let opts = options(&[("memory_limit", "lots")]);
        let result = parse(&opts, "memory_limit", 10usize);
        assert!(matches!(result, Err(CacheError::InvalidOption { name, .. }) if name == "memory_limit"));
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl(&options(&[]), 86400).unwrap(), 86400);
        assert_eq!(parse_ttl(&options(&[("ttl", "60")]), 86400).unwrap(), 60);
        assert_eq!(
            parse_ttl(&options(&[("ttl", "18446744073709551615")]), 86400).unwrap(),
            crate::cache::MAX_TTL
        );

        let result = parse_ttl(&options(&[("ttl", "0")]), 86400);
        assert!(matches!(result, Err(CacheError::InvalidOption { name, .. }) if name == "ttl"));
    }

    #[test]
    fn test_parse_bool_spellings() {
        assert!(parse_bool(&options(&[("force_purge", "t")]), "force_purge", false).unwrap());
        assert!(!parse_bool(&options(&[("force_purge", "0")]), "force_purge", true).unwrap());
        assert!(parse_bool(&options(&[]), "force_purge", true).unwrap());
        assert!(parse_bool(&options(&[("force_purge", "maybe")]), "force_purge", true).is_err());
    }
}
