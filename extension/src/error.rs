// Error taxonomy for the background channel

use thiserror::Error;

use crate::protocol::ErrorInfo;

/// Failure of a call or subscription routed through the background channel.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The channel went away while the request was outstanding (or before it was sent).
    #[error("channel to background closed")]
    ChannelClosed,

    /// The background answered with `{ error }`. Propagated verbatim.
    #[error("background error: {0}")]
    Remote(ErrorInfo),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl BridgeError {
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, BridgeError::ChannelClosed)
    }

    /// Message shown on the screen that issued the failed call.
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::Remote(info) => info.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Outgoing side of the transport refused a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// Misuse of a confirmation latch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LatchError {
    /// A confirm/reject is already running or its status is still showing.
    #[error("confirmation already in progress")]
    NotIdle,

    /// Upstream reports nothing for this screen to act on.
    #[error("nothing to confirm")]
    NothingToConfirm,

    #[error("no confirmation in progress")]
    NotConfirming,
}
