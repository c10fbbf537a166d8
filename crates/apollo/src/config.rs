//! Server configuration and the `apollod` command line.

use std::time::Duration;

use apollo_bus::BrokerConfig;
use clap::Parser;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Everything a server process needs to know at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub address: String,
    pub port: u16,
    pub broker: BrokerConfig,
    /// Period of the session reaper.
    pub cron_interval: Duration,
    /// Inactivity after which a session is reaped.
    pub session_expiry: Duration,
    /// How long an events request stays parked before an empty answer.
    pub poll_timeout: Duration,
    /// Names this process's inter queue. Must be unique per process.
    pub server_id: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: 8081,
            broker: BrokerConfig::default(),
            cron_interval: Duration::from_secs(3600),
            session_expiry: Duration::from_secs(3600),
            poll_timeout: Duration::from_secs(30),
            server_id: generate_server_id(),
            log_filter: "info".to_owned(),
        }
    }
}

impl ServerConfig {
    /// `address:port`, ready for a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 8 random bytes as hex.
pub fn generate_server_id() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Apollo game server.
#[derive(Parser, Debug)]
#[command(name = "apollod", author, version, about, long_about = None)]
pub struct Cli {
    /// HTTP bind address.
    #[arg(long, env = "APOLLO_ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// HTTP bind port.
    #[arg(short, long, env = "APOLLO_PORT", default_value_t = 8081)]
    pub port: u16,

    /// Broker URL; `memory://` runs the in-process broker.
    #[arg(long, env = "APOLLO_BROKER_URL", default_value = "memory://")]
    pub broker_url: String,

    #[arg(long, env = "APOLLO_BROKER_HOST", default_value = "localhost")]
    pub broker_host: String,

    #[arg(long, env = "APOLLO_BROKER_PORT", default_value_t = 5672)]
    pub broker_port: u16,

    #[arg(long, env = "APOLLO_BROKER_USER", default_value = "guest")]
    pub broker_user: String,

    #[arg(long, env = "APOLLO_BROKER_PASSWORD", default_value = "guest", hide_env_values = true)]
    pub broker_password: String,

    #[arg(long, env = "APOLLO_BROKER_VHOST", default_value = "/")]
    pub broker_vhost: String,

    /// Unacked deliveries per consumer.
    #[arg(long, env = "APOLLO_PREFETCH", default_value_t = 1)]
    pub prefetch: usize,

    /// Seconds between reaper runs.
    #[arg(long, env = "APOLLO_CRON_INTERVAL", default_value_t = 3600)]
    pub cron_interval: u64,

    /// Seconds of inactivity before a session is reaped.
    #[arg(long, env = "APOLLO_SESSION_EXPIRY", default_value_t = 3600)]
    pub session_expiry: u64,

    /// Seconds an events request may stay parked.
    #[arg(long, env = "APOLLO_POLL_TIMEOUT", default_value_t = 30)]
    pub poll_timeout: u64,

    /// Process id used for the inter queue. Random when unset.
    #[arg(long, env = "APOLLO_SERVER_ID")]
    pub server_id: Option<String>,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, env = "APOLLO_LOG", default_value = "info")]
    pub log_filter: String,

    /// Log as JSON lines.
    #[arg(long, env = "APOLLO_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            address: self.address,
            port: self.port,
            broker: BrokerConfig {
                url: self.broker_url,
                host: self.broker_host,
                port: self.broker_port,
                username: self.broker_user,
                password: self.broker_password,
                vhost: self.broker_vhost,
                prefetch: self.prefetch,
                ..BrokerConfig::default()
            },
            cron_interval: Duration::from_secs(self.cron_interval),
            session_expiry: Duration::from_secs(self.session_expiry),
            poll_timeout: Duration::from_secs(self.poll_timeout),
            server_id: self.server_id.unwrap_or_else(generate_server_id),
            log_filter: self.log_filter,
        }
    }
}
