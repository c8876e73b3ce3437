use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role a connection takes inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// The peer sharing its game (desktop streamer).
    Host,
    /// The peer consuming the stream (browser viewer).
    Client,
}

impl PeerRole {
    pub fn opposite(self) -> Self {
        match self {
            PeerRole::Host => PeerRole::Client,
            PeerRole::Client => PeerRole::Host,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeerRole::Host => "host",
            PeerRole::Client => "client",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(PeerRole::Host),
            "client" => Ok(PeerRole::Client),
            other => Err(Error::protocol(format!("unknown role {other:?}"))),
        }
    }
}

/// Frames sent by peers to the signaling server.
///
/// `offer`, `answer` and `ice-candidate` payloads are opaque to the server;
/// they are decoded only to validate shape and pick a destination, and the
/// original frame text is what gets relayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Bind the connection to a session under a role.
    Join {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(
            rename = "clientType",
            alias = "role",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        client_type: Option<String>,
    },

    /// SDP offer.
    Offer {
        sdp: String,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// SDP answer.
    Answer {
        sdp: String,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Trickled ICE candidate, routed by `target`.
    #[serde(alias = "ice_candidate")]
    IceCandidate {
        candidate: String,
        #[serde(alias = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(alias = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<PeerRole>,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl SignalMessage {
    /// Decode a single text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Join { .. } => "join",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// Session id carried by the frame itself, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SignalMessage::Join { session_id, .. }
            | SignalMessage::Offer { session_id, .. }
            | SignalMessage::Answer { session_id, .. }
            | SignalMessage::IceCandidate { session_id, .. } => session_id.as_deref(),
        }
    }
}

/// Frames the server originates. Relayed peer frames are not represented
/// here since they are forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a successful `join`.
    Joined {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "clientType")]
        client_type: PeerRole,
    },

    /// Sent to the host when a client joins its session.
    ClientJoined {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Sent to the host when a client connection closes.
    ClientLeft {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Sent to every client when the host connection closes.
    HostLeft,

    Error { error: String },
}

impl ServerMessage {
    pub fn error(msg: impl Into<String>) -> Self {
        ServerMessage::Error { error: msg.into() }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
