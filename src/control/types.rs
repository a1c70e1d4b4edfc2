use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::constants::GRANT_PATIENCE_MESSAGES;
use crate::common::errors::{Fc2Error, Result};

/// Control socket address returned by the server lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEndpoint {
    pub url: String,
    pub control_token: String,
}

/// Inbound frame envelope. `id` may be present but is not needed.
#[derive(Debug, Deserialize)]
pub struct ControlMessage {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arguments: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outbound frame envelope.
#[derive(Debug, Serialize)]
pub struct OutboundMessage<'a> {
    pub name: &'a str,
    pub arguments: Value,
    pub id: u64,
}

/// Inbound message kinds the receive loop dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Response,
    HeartbeatAck,
    MediaConnection,
    MediaDisconnection,
    ControlDisconnection,
    PublishStop,
    ChannelInformation,
    Comment,
    NgComment,
    UserCount,
    Unknown(String),
}

impl MessageKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "_response_" => Self::Response,
            "heartbeat" => Self::HeartbeatAck,
            "media_connection" => Self::MediaConnection,
            "media_disconnection" => Self::MediaDisconnection,
            "control_disconnection" => Self::ControlDisconnection,
            "publish_stop" => Self::PublishStop,
            "channel_information" => Self::ChannelInformation,
            "comment" => Self::Comment,
            "ng_comment" => Self::NgComment,
            "user_count" => Self::UserCount,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Viewer chatter, not worth a log line.
    pub fn is_chatter(&self) -> bool {
        matches!(self, Self::Comment | Self::NgComment | Self::UserCount)
    }
}

/// The media server assignment carried by a `_response_` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGrant {
    pub host: String,
    pub media_token: String,
    pub application: String,
    pub play_path: String,
}

impl HostGrant {
    /// `Ok(None)` when the arguments carry no host (e.g. a heartbeat reply).
    /// A host without the remaining fields is a protocol error.
    pub fn from_arguments(arguments: &Map<String, Value>) -> Result<Option<Self>> {
        let Some(host) = arguments
            .get("host")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
        else {
            return Ok(None);
        };

        let field = |key: &str| -> Result<String> {
            arguments
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Fc2Error::Protocol(format!("host grant without `{}`", key)))
        };

        Ok(Some(Self {
            host: host.to_string(),
            media_token: field("media_token")?,
            application: field("application")?,
            play_path: field("play_rtmp_stream")?,
        }))
    }
}

/// Lifecycle of one control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Connecting,
    AwaitingHost,
    Streaming,
    Closed,
    TimedOut,
    Failed,
}

impl ControlState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::TimedOut | Self::Failed)
    }
}

/// Why the receive loop ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFailure {
    FeeRequired,
    Protocol(String),
    Transport(String),
}

impl ChannelFailure {
    pub fn to_error(&self) -> Fc2Error {
        match self {
            Self::FeeRequired => Fc2Error::FeeRequired,
            Self::Protocol(msg) => Fc2Error::Protocol(msg.clone()),
            Self::Transport(msg) => Fc2Error::WebSocket(msg.clone()),
        }
    }
}

/// State shared between the receive loop and whoever waits on the channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelStatus {
    pub state: ControlState,
    pub message_count: u32,
    pub grant: Option<HostGrant>,
    pub failure: Option<ChannelFailure>,
}

impl ChannelStatus {
    /// True once the caller's wait has an answer.
    pub fn is_settled(&self) -> bool {
        self.grant.is_some()
            || self.message_count >= GRANT_PATIENCE_MESSAGES
            || self.state.is_terminal()
    }

    /// The caller-visible result of the wait. Only meaningful when settled.
    pub fn resolution(&self) -> Result<HostGrant> {
        if let Some(grant) = &self.grant {
            return Ok(grant.clone());
        }
        if self.message_count >= GRANT_PATIENCE_MESSAGES {
            return Err(Fc2Error::Timeout {
                messages: self.message_count,
            });
        }
        match (&self.state, &self.failure) {
            (ControlState::Failed, Some(failure)) => Err(failure.to_error()),
            _ => Err(Fc2Error::Timeout {
                messages: self.message_count,
            }),
        }
    }
}
