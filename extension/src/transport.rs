// Channel transport to the background process
//
// The real channel (a runtime port in the browser) lives outside this crate.
// The client only needs a way to push frames out; incoming frames arrive as
// an ordered stream handed to `BackgroundClient::pump`.

use futures::channel::mpsc;
use futures::StreamExt;

use crate::error::TransportError;
use crate::ids::CorrelationId;
use crate::protocol::{IncomingEnvelope, OutgoingEnvelope};

/// Outgoing half of the ordered duplex channel.
///
/// `send` must not block: frames are queued and delivered in order.
pub trait ChannelTransport {
    fn send(&self, frame: String) -> Result<(), TransportError>;
}

/// UI-side transport backed by an in-memory queue.
pub struct MemoryTransport {
    outgoing_tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport for MemoryTransport {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outgoing_tx
            .unbounded_send(frame)
            .map_err(|_| TransportError::Closed)
    }
}

/// Frames flowing from the background to the UI.
pub type IncomingFrames = mpsc::UnboundedReceiver<String>;

/// Background side of an in-memory channel.
///
/// Dropping it closes the channel in both directions.
pub struct BackgroundEnd {
    outgoing_rx: mpsc::UnboundedReceiver<String>,
    incoming_tx: mpsc::UnboundedSender<String>,
}

/// Build a connected in-memory channel.
pub fn channel() -> (MemoryTransport, IncomingFrames, BackgroundEnd) {
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded::<String>();
    let (incoming_tx, incoming_rx) = mpsc::unbounded::<String>();

    (
        MemoryTransport { outgoing_tx },
        incoming_rx,
        BackgroundEnd {
            outgoing_rx,
            incoming_tx,
        },
    )
}

impl BackgroundEnd {
    /// Next request written by the UI, waiting if none is queued yet.
    pub async fn next_request(&mut self) -> Option<OutgoingEnvelope> {
        loop {
            let frame = self.outgoing_rx.next().await?;
            match serde_json::from_str(&frame) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!("Dropping malformed request frame: {}", e),
            }
        }
    }

    /// Next queued request, without waiting.
    pub fn try_next_request(&mut self) -> Option<OutgoingEnvelope> {
        loop {
            let frame = self.outgoing_rx.try_next().ok()??;
            match serde_json::from_str(&frame) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!("Dropping malformed request frame: {}", e),
            }
        }
    }

    /// Drain every request queued so far.
    pub fn drain_requests(&mut self) -> Vec<OutgoingEnvelope> {
        std::iter::from_fn(|| self.try_next_request()).collect()
    }

    pub fn reply(
        &self,
        id: &CorrelationId,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.push(&IncomingEnvelope::response(id, payload))
    }

    pub fn reject(&self, id: &CorrelationId, message: &str) -> Result<(), TransportError> {
        self.push(&IncomingEnvelope::error(id, message))
    }

    pub fn push(&self, envelope: &IncomingEnvelope) -> Result<(), TransportError> {
        let frame = serde_json::to_string(envelope).map_err(|_| TransportError::Closed)?;
        self.push_frame(frame)
    }

    /// Push a raw frame, well-formed or not.
    pub fn push_frame(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.incoming_tx
            .unbounded_send(frame.into())
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frames_preserve_order() {
        let (transport, mut incoming, mut background) = channel();

        for n in 0..3 {
            let env = OutgoingEnvelope {
                id: CorrelationId::from(format!("1.{}", n)),
                message: "ping".to_string(),
                request: json!({ "n": n }),
            };
            transport.send(serde_json::to_string(&env).unwrap()).unwrap();
        }

        let ids: Vec<_> = background
            .drain_requests()
            .into_iter()
            .map(|env| env.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1.0", "1.1", "1.2"]);

        background.push_frame("first").unwrap();
        background.push_frame("second").unwrap();
        assert_eq!(incoming.try_next().unwrap().as_deref(), Some("first"));
        assert_eq!(incoming.try_next().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_send_after_background_dropped_fails() {
        let (transport, _incoming, background) = channel();
        drop(background);

        assert_eq!(transport.send("{}".to_string()), Err(TransportError::Closed));
    }
}
