//! Server configuration, from command-line flags with environment fallbacks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use gameshare_common::{Error, Result};
use serde::Serialize;

use crate::relay::{RelayPolicy, ReplayPolicy, DEFAULT_MAX_BUFFERED};

/// Default configuration values
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 128;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

const MIN_MESSAGE_BYTES: usize = 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "gameshare-signal")]
#[command(about = "GameShare signaling server - pairs a game host with its remote players")]
#[command(version)]
pub struct ServerConfig {
    /// Interface to listen on
    #[arg(long, env = "GAMESHARE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// WebSocket/HTTP port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Buffered offers, answers and candidates kept per session and kind
    #[arg(long, env = "GAMESHARE_MAX_BUFFERED", default_value_t = DEFAULT_MAX_BUFFERED)]
    pub max_buffered_messages: usize,

    /// Whether buffered offers/answers survive their first replay
    #[arg(long, env = "GAMESHARE_REPLAY_POLICY", value_enum, default_value_t = ReplayPolicy::Keep)]
    pub replay_policy: ReplayPolicy,

    /// Expire sessions with no signaling activity for this long (0 disables)
    #[arg(long, env = "GAMESHARE_IDLE_SESSION_TIMEOUT_SECS", default_value_t = 0)]
    pub idle_session_timeout_secs: u64,

    /// Frames queued per connection before further frames are dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Largest accepted WebSocket message
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Signaling URL advertised to peers (derived from the bound address if unset)
    #[arg(long, env = "WS_SIGNALING_URL")]
    pub public_url: Option<String>,

    /// STUN server URLs handed to peers
    #[arg(
        long = "stun-url",
        env = "GAMESHARE_STUN_URLS",
        value_delimiter = ',',
        default_value = DEFAULT_STUN_URL
    )]
    pub stun_urls: Vec<String>,

    /// TURN server URL handed to peers
    #[arg(long, env = "GAMESHARE_TURN_URL")]
    pub turn_url: Option<String>,

    #[arg(long, env = "GAMESHARE_TURN_USERNAME")]
    pub turn_username: Option<String>,

    #[arg(long, env = "GAMESHARE_TURN_CREDENTIAL", hide_env_values = true)]
    pub turn_credential: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_buffered_messages: DEFAULT_MAX_BUFFERED,
            replay_policy: ReplayPolicy::Keep,
            idle_session_timeout_secs: 0,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            public_url: None,
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
            turn_url: None,
            turn_username: None,
            turn_credential: None,
            log_level: "info".to_string(),
        }
    }
}

/// One entry of an `RTCConfiguration.iceServers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.outbox_capacity == 0 {
            return Err(Error::config("outbox capacity must be at least 1"));
        }
        if self.max_message_bytes < MIN_MESSAGE_BYTES {
            return Err(Error::config(format!(
                "max message size must be at least {MIN_MESSAGE_BYTES} bytes"
            )));
        }
        if self.turn_url.is_some()
            && (self.turn_username.is_none() || self.turn_credential.is_none())
        {
            return Err(Error::config(
                "a TURN url needs both --turn-username and --turn-credential",
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn relay_policy(&self) -> RelayPolicy {
        RelayPolicy {
            max_buffered: self.max_buffered_messages,
            replay: self.replay_policy,
        }
    }

    pub fn idle_session_timeout(&self) -> Option<Duration> {
        (self.idle_session_timeout_secs > 0)
            .then(|| Duration::from_secs(self.idle_session_timeout_secs))
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = Vec::new();
        let stun: Vec<String> = self
            .stun_urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if !stun.is_empty() {
            servers.push(IceServer {
                urls: stun,
                username: None,
                credential: None,
            });
        }
        if let Some(turn) = &self.turn_url {
            servers.push(IceServer {
                urls: vec![turn.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }
        servers
    }
}

/// Signaling URL for a bound address, substituting loopback for the
/// unspecified address.
pub fn signaling_url_for_bound_addr(bound_addr: SocketAddr) -> String {
    let host = if bound_addr.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        bound_addr.ip().to_string()
    };
    format!("ws://{}:{}/signaling", host, bound_addr.port())
}
