//! Broker connection settings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the broker lives and how to log into it.
///
/// `url` picks the implementation by scheme. `memory://` runs the
/// in-process broker and ignores the rest of the fields; they are kept so
/// a deployment's configuration stays the same shape whichever broker is
/// selected.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,

    /// Unacked deliveries allowed per consumer.
    pub prefetch: usize,

    /// Capacity of the broker command channel.
    pub channel_size: usize,
}

impl BrokerConfig {
    /// The part of `url` before `://`, lowercased.
    pub fn scheme(&self) -> String {
        self.url
            .split_once("://")
            .map_or(self.url.as_str(), |(scheme, _)| scheme)
            .to_ascii_lowercase()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_owned(),
            host: "localhost".to_owned(),
            port: 5672,
            username: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            prefetch: 1,
            channel_size: 256,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("vhost", &self.vhost)
            .field("prefetch", &self.prefetch)
            .field("channel_size", &self.channel_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.scheme(), "memory");
        assert_eq!(config.port, 5672);
        assert_eq!(config.vhost, "/");
        assert_eq!(config.prefetch, 1);
    }

    #[test]
    fn test_broker_config_scheme() {
        let config = BrokerConfig {
            url: "AMQP://rabbit:5672/".to_owned(),
            ..BrokerConfig::default()
        };
        assert_eq!(config.scheme(), "amqp");
    }

    #[test]
    fn test_broker_config_debug_hides_password() {
        let config = BrokerConfig {
            password: "hunter2".to_owned(),
            ..BrokerConfig::default()
        };
        let shown = format!("{config:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }
}
