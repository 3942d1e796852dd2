//! # Constructor Options
//!
//! Purpose: Accept connection parameters either as a structured options value
//! or as a `redis://` connection string, and normalize both into one shape.
//!
//! ## Connection String Format
//!
//! ```text
//! redis://[[user]:password@]host[:port][/db][?prefix=value&option=value...]
//! ```
//!
//! The user name is ignored. Query parameters other than `prefix` are
//! forwarded to the store client as passthrough options.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{CacheError, CacheResult};

/// Connection parameters for a cache handle.
///
/// Any field not listed here is kept in `passthrough` and handed to the
/// store client's own configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CacheOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    /// Logical database; accepts a number or a numeric string.
    #[serde(default, deserialize_with = "deserialize_db")]
    pub db: Option<u32>,
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl CacheOptions {
    /// Parses a `redis://` connection string.
    pub fn from_url(input: &str) -> CacheResult<Self> {
        let url = Url::parse(input).map_err(|err| CacheError::InvalidUrl(err.to_string()))?;
        if url.scheme() != "redis" {
            return Err(CacheError::InvalidUrl(format!(
                "unsupported scheme `{}`, expected `redis`",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
            .filter(|host| !host.is_empty())
            .map(str::to_string);

        let password = match url.password() {
            Some(raw) => Some(
                urlencoding::decode(raw)
                    .map_err(|err| CacheError::InvalidUrl(format!("password is not valid utf-8: {err}")))?
                    .into_owned(),
            ),
            None => None,
        };

        let db = match url.path().trim_matches('/') {
            "" => None,
            raw => Some(raw.parse::<u32>().map_err(|_| {
                CacheError::InvalidUrl(format!("database `{raw}` is not a non-negative integer"))
            })?),
        };

        let mut prefix = None;
        let mut passthrough = Map::new();
        for (name, value) in url.query_pairs() {
            if name == "prefix" {
                prefix = Some(value.into_owned());
            } else {
                passthrough.insert(name.into_owned(), Value::String(value.into_owned()));
            }
        }

        Ok(CacheOptions {
            host,
            port: url.port(),
            password,
            db,
            prefix,
            passthrough,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DbIndex {
    Number(u32),
    Text(String),
}

fn deserialize_db<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DbIndex>::deserialize(deserializer)? {
        None => Ok(None),
        Some(DbIndex::Number(db)) => Ok(Some(db)),
        Some(DbIndex::Text(text)) if text.is_empty() => Ok(None),
        Some(DbIndex::Text(text)) => text
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("db `{text}` is not a non-negative integer"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_connection_string() {
        let options = CacheOptions::from_url("redis://:s%40cret@cache.local:6380/3?prefix=app:&max_idle=2").unwrap();
        assert_eq!(options.host.as_deref(), Some("cache.local"));
        assert_eq!(options.port, Some(6380));
        assert_eq!(options.password.as_deref(), Some("s@cret"));
        assert_eq!(options.db, Some(3));
        assert_eq!(options.prefix.as_deref(), Some("app:"));
        assert_eq!(options.passthrough.get("max_idle"), Some(&json!("2")));
        assert!(!options.passthrough.contains_key("prefix"));
    }

    #[test]
    fn parses_minimal_connection_string() {
        let options = CacheOptions::from_url("redis://localhost").unwrap();
        assert_eq!(options.host.as_deref(), Some("localhost"));
        assert_eq!(options.port, None);
        assert_eq!(options.password, None);
        assert_eq!(options.db, None);
        assert_eq!(options.prefix, None);
    }

    #[test]
    fn ignores_user_name_and_unwraps_ipv6() {
        let options = CacheOptions::from_url("redis://admin:pw@[::1]:7000").unwrap();
        assert_eq!(options.host.as_deref(), Some("::1"));
        assert_eq!(options.port, Some(7000));
        assert_eq!(options.password.as_deref(), Some("pw"));
    }

    #[test]
    fn rejects_bad_connection_strings() {
        assert!(matches!(
            CacheOptions::from_url("http://localhost:6379"),
            Err(CacheError::InvalidUrl(_))
        ));
        assert!(matches!(
            CacheOptions::from_url("redis://localhost/zero"),
            Err(CacheError::InvalidUrl(_))
        ));
        assert!(matches!(CacheOptions::from_url("not a url"), Err(CacheError::InvalidUrl(_))));
    }

    #[test]
    fn deserializes_options_with_passthrough() {
        let options: CacheOptions = serde_json::from_value(json!({
            "host": "10.0.0.5",
            "port": 6379,
            "db": "4",
            "prefix": "jobs:",
            "connect_timeout_ms": 250
        }))
        .unwrap();
        assert_eq!(options.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(options.db, Some(4));
        assert_eq!(options.prefix.as_deref(), Some("jobs:"));
        assert_eq!(options.passthrough.len(), 1);
        assert_eq!(options.passthrough.get("connect_timeout_ms"), Some(&json!(250)));

        let numeric: CacheOptions = serde_json::from_value(json!({ "db": 2 })).unwrap();
        assert_eq!(numeric.db, Some(2));
        assert!(serde_json::from_value::<CacheOptions>(json!({ "db": "two" })).is_err());
    }
}
