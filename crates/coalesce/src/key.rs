use std::fmt::Display;
use std::str::FromStr;
use crate::error::LoadError;

/// Parses a raw identifier from the API boundary into a loader key.
///
/// Malformed input becomes [`LoadError::InvalidKey`] for the caller to report,
/// rather than a panic deep inside a resolver.
///
/// ```
/// use coalesce::{parse_key, LoadError};
///
/// assert_eq!(parse_key::<i64>("42").unwrap(), 42);
/// assert!(matches!(parse_key::<i64>("4x2"), Err(LoadError::InvalidKey { .. })));
/// ```
pub fn parse_key<K>(raw: &str) -> Result<K, LoadError>
where
    K: FromStr,
    K::Err: Display,
{
    raw.parse::<K>().map_err(|err| LoadError::InvalidKey {
        raw: raw.to_string(),
        reason: err.to_string(),
    })
}
