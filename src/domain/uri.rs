//! Connection URIs
//!
//! `scheme://[user@]host[:port][/path][?key=value&...]`. The scheme picks the
//! backend; query parameters carry backend options.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A parsed management endpoint reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    raw: String,
    scheme: String,
    username: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    params: BTreeMap<String, String>,
}

impl ConnectionUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidUri {
            uri: raw.to_string(),
            reason,
        };

        if raw.trim().is_empty() {
            return Err(invalid("empty URI".into()));
        }

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("missing '//' authority section".into()));
        }

        let username = match url.username() {
            "" => None,
            user => Some(user.to_string()),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        let mut params = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            if params.insert(key.to_string(), value.to_string()).is_some() {
                return Err(invalid(format!("duplicate query parameter '{}'", key)));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: url.scheme().to_string(),
            username,
            host,
            port: url.port(),
            path: url.path().to_string(),
            params,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Parse a query parameter, reporting a malformed value as `InvalidUri`
    pub fn parse_param<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.param(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| Error::InvalidUri {
                uri: self.raw.clone(),
                reason: format!("bad value '{}' for parameter '{}'", value, key),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ConnectionUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_simulator_uri() {
        let uri = ConnectionUri::parse("sim://user@host?namespace=root/test").unwrap();
        assert_eq!(uri.scheme(), "sim");
        assert_eq!(uri.username(), Some("user"));
        assert_eq!(uri.host(), Some("host"));
        assert_eq!(uri.port(), None);
        assert_eq!(uri.param("namespace"), Some("root/test"));
    }

    #[test]
    fn test_parse_port_and_encoded_params() {
        let uri: ConnectionUri = "sim://username@client:5988?namespace=root%2Funa&jobs=deferred"
            .parse()
            .unwrap();
        assert_eq!(uri.port(), Some(5988));
        assert_eq!(uri.param("namespace"), Some("root/una"));
        assert_eq!(uri.param("jobs"), Some("deferred"));
        assert_eq!(uri.parse_param::<u64>("missing").unwrap(), None);
    }

    #[test]
    fn test_parse_param_type_error() {
        let uri = ConnectionUri::parse("sim://host?job_duration_ms=soon").unwrap();
        assert_matches!(
            uri.parse_param::<u64>("job_duration_ms"),
            Err(Error::InvalidUri { .. })
        );
    }

    #[test]
    fn test_invalid_uris() {
        assert_matches!(ConnectionUri::parse(""), Err(Error::InvalidUri { .. }));
        assert_matches!(
            ConnectionUri::parse("not a uri"),
            Err(Error::InvalidUri { .. })
        );
        assert_matches!(
            ConnectionUri::parse("mailto:admin"),
            Err(Error::InvalidUri { .. })
        );
        assert_matches!(
            ConnectionUri::parse("sim://host?a=1&a=2"),
            Err(Error::InvalidUri { .. })
        );
    }
}
