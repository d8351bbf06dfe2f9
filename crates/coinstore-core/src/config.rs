//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::dialect::Dialect;
use crate::error::Error;

/// Configuration for opening a data store.
///
/// The URL follows the `protocol:subprotocol:subprotocol-data` scheme, e.g.
/// `coinstore:sqlite:/var/lib/books.db` or `coinstore:sqlite::memory:`.
/// Credentials are opaque strings forwarded to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    url: String,
    user: Option<String>,
    password: Option<String>,
}

impl StoreConfig {
    /// Create a configuration for the given store URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
        }
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// The raw store URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The configured user name, if any.
    pub fn user_name(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The configured password, if any.
    pub fn password_value(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Split the URL into its three parts.
    pub fn parse(&self) -> Result<StoreUrl> {
        StoreUrl::parse(&self.url)
    }
}

/// A parsed `protocol:subprotocol:data` store URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUrl {
    pub protocol: String,
    pub subprotocol: String,
    /// Everything after the second colon; may itself contain colons
    /// (`:memory:`) or be empty.
    pub data: String,
}

impl StoreUrl {
    /// Parse a store URL.
    pub fn parse(url: &str) -> Result<Self> {
        let (protocol, rest) = url
            .split_once(':')
            .ok_or_else(|| Error::config(format!("store URL '{url}' has no protocol")))?;
        let (subprotocol, data) = rest
            .split_once(':')
            .ok_or_else(|| Error::config(format!("store URL '{url}' has no subprotocol")))?;
        if protocol.is_empty() || subprotocol.is_empty() {
            return Err(Error::config(format!("store URL '{url}' is malformed")));
        }
        Ok(Self {
            protocol: protocol.to_string(),
            subprotocol: subprotocol.to_string(),
            data: data.to_string(),
        })
    }

    /// The dialect named by the subprotocol.
    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_subprotocol(&self.subprotocol).ok_or_else(|| {
            Error::config(format!("unsupported subprotocol '{}'", self.subprotocol))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_url() {
        let url = StoreUrl::parse("coinstore:sqlite:/tmp/books.db").unwrap();
        assert_eq!(url.protocol, "coinstore");
        assert_eq!(url.subprotocol, "sqlite");
        assert_eq!(url.data, "/tmp/books.db");
        assert_eq!(url.dialect().unwrap(), Dialect::Sqlite);
    }

    #[test]
    fn data_may_contain_colons() {
        let url = StoreUrl::parse("coinstore:sqlite::memory:").unwrap();
        assert_eq!(url.data, ":memory:");
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(StoreUrl::parse("justoneword").is_err());
        assert!(StoreUrl::parse("coinstore:sqliteonly").is_err());
        assert!(StoreUrl::parse(":sqlite:data").is_err());
    }

    #[test]
    fn builder_keeps_credentials() {
        let config = StoreConfig::new("coinstore:sqlite::memory:")
            .user("alice")
            .password("secret");
        assert_eq!(config.user_name(), Some("alice"));
        assert_eq!(config.password_value(), Some("secret"));
        assert_eq!(config.parse().unwrap().subprotocol, "sqlite");
    }
}
