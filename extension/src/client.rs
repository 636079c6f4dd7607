// Correlation client and subscription multiplexer
//
// Every outgoing request gets a fresh correlation id and an entry in the
// in-flight table. Incoming envelopes are matched against that table:
// one-shot entries are removed on their first response, subscriber
// entries stay until unsubscribed or terminated by an error or close.
//
// Single-threaded by construction (Rc/RefCell): inserts happen in
// `call`/`subscribe`, removals in `dispatch`/`unsubscribe`/`close`, and
// no table borrow is held while user code runs.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::{FutureExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::BridgeError;
use crate::ids::{Clock, CorrelationId, IdGenerator, SystemClock};
use crate::protocol::{ErrorInfo, IncomingEnvelope, OutgoingEnvelope};
use crate::transport::ChannelTransport;

/// What a subscriber sees for its id.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEvent {
    Update(Value),
    /// Terminal. The subscription is detached.
    Error(ErrorInfo),
    /// Terminal. The channel closed.
    Closed,
}

/// Result of handing one incoming envelope to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A one-shot call completed with a payload.
    Resolved,
    /// A one-shot call completed with a remote error.
    Rejected,
    /// A subscriber received an update and stays attached.
    Delivered,
    /// A subscriber received a terminal error and was detached.
    Terminated,
    /// No in-flight entry for this id (late or duplicate delivery).
    Orphaned,
    /// The frame could not be parsed.
    Malformed,
}

/// A subscriber callback plus the events waiting for it.
///
/// An event raised while the callback is running (it called back into the
/// client) is queued and delivered once the running call returns.
struct HandlerSlot {
    callback: RefCell<Box<dyn FnMut(SubscriptionEvent)>>,
    queued: RefCell<VecDeque<SubscriptionEvent>>,
}

type Handler = Rc<HandlerSlot>;

enum InFlightEntry {
    OneShot(oneshot::Sender<Result<Value, BridgeError>>),
    Subscriber(Handler),
}

struct ClientInner {
    transport: Box<dyn ChannelTransport>,
    ids: IdGenerator,
    config: ClientConfig,
    in_flight: RefCell<HashMap<CorrelationId, InFlightEntry>>,
    closed: Cell<bool>,
}

/// Shared handle to the background channel.
///
/// Cheap to clone; the popup and tab views each hold a clone of the same
/// client so they share one in-flight table.
#[derive(Clone)]
pub struct BackgroundClient {
    inner: Rc<ClientInner>,
}

impl BackgroundClient {
    pub fn new(transport: impl ChannelTransport + 'static, config: ClientConfig) -> Self {
        Self::with_clock(transport, config, SystemClock)
    }

    pub fn with_clock(
        transport: impl ChannelTransport + 'static,
        config: ClientConfig,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(ClientInner {
                transport: Box::new(transport),
                ids: IdGenerator::new(clock),
                config,
                in_flight: RefCell::new(HashMap::new()),
                closed: Cell::new(false),
            }),
        }
    }

    /// Send a one-shot request.
    ///
    /// Returns immediately; the handle completes exactly once, with the
    /// matching response, the remote error, or `ChannelClosed`.
    pub fn call(&self, message: &str, payload: Value) -> CallHandle {
        let id = self.inner.ids.next_id();
        let (tx, rx) = oneshot::channel();

        if self.inner.closed.get() {
            let _ = tx.send(Err(BridgeError::ChannelClosed));
            return CallHandle { id, rx };
        }

        self.inner
            .in_flight
            .borrow_mut()
            .insert(id.clone(), InFlightEntry::OneShot(tx));

        if let Err(e) = self.send_envelope(&id, message, payload) {
            // Gone already if the failure closed the client.
            let entry = self.inner.in_flight.borrow_mut().remove(&id);
            if let Some(InFlightEntry::OneShot(tx)) = entry {
                let _ = tx.send(Err(e));
            }
        }

        CallHandle { id, rx }
    }

    /// Typed wrapper over `call`.
    pub async fn request<Req, Resp>(
        &self,
        message: &str,
        payload: &Req,
    ) -> Result<Resp, BridgeError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(BridgeError::Encode)?;
        let response = self.call(message, payload).await?;
        serde_json::from_value(response).map_err(BridgeError::Decode)
    }

    /// Install a long-lived handler for every response on a fresh id.
    ///
    /// `on_event` sees each `Update` in delivery order, one at a time, and at
    /// most one terminal `Error` or `Closed`.
    pub fn subscribe<F>(&self, message: &str, payload: Value, on_event: F) -> Subscription
    where
        F: FnMut(SubscriptionEvent) + 'static,
    {
        let id = self.inner.ids.next_id();
        let handler: Handler = Rc::new(HandlerSlot {
            callback: RefCell::new(Box::new(on_event)),
            queued: RefCell::new(VecDeque::new()),
        });

        let subscription = Subscription {
            id: id.clone(),
            client: self.clone(),
        };

        if self.inner.closed.get() {
            notify(&handler, SubscriptionEvent::Closed);
            return subscription;
        }

        self.inner
            .in_flight
            .borrow_mut()
            .insert(id.clone(), InFlightEntry::Subscriber(handler));

        if let Err(e) = self.send_envelope(&id, message, payload) {
            let entry = self.inner.in_flight.borrow_mut().remove(&id);
            if let Some(InFlightEntry::Subscriber(handler)) = entry {
                notify(&handler, SubscriptionEvent::Error(ErrorInfo::new(e.to_string())));
            }
        }

        subscription
    }

    /// Route one incoming envelope to its in-flight entry.
    pub fn dispatch(&self, envelope: IncomingEnvelope) -> DispatchOutcome {
        let id = envelope.id.clone();
        let result = envelope.into_result();

        let Some(entry) = self.inner.in_flight.borrow_mut().remove(&id) else {
            tracing::debug!("Discarding response for unknown id {}", id);
            return DispatchOutcome::Orphaned;
        };

        match (entry, result) {
            (InFlightEntry::OneShot(tx), Ok(payload)) => {
                tracing::debug!("Response for {}", id);
                // Receiver gone means the caller stopped waiting.
                let _ = tx.send(Ok(payload));
                DispatchOutcome::Resolved
            }
            (InFlightEntry::OneShot(tx), Err(info)) => {
                tracing::debug!("Error response for {}: {}", id, info);
                let _ = tx.send(Err(BridgeError::Remote(info)));
                DispatchOutcome::Rejected
            }
            (InFlightEntry::Subscriber(handler), Ok(payload)) => {
                // Back in the table before user code runs, so the handler may unsubscribe.
                self.inner
                    .in_flight
                    .borrow_mut()
                    .insert(id.clone(), InFlightEntry::Subscriber(handler.clone()));
                tracing::debug!("Update for subscription {}", id);
                notify(&handler, SubscriptionEvent::Update(payload));
                DispatchOutcome::Delivered
            }
            (InFlightEntry::Subscriber(handler), Err(info)) => {
                tracing::debug!("Subscription {} terminated: {}", id, info);
                notify(&handler, SubscriptionEvent::Error(info));
                DispatchOutcome::Terminated
            }
        }
    }

    /// Parse and dispatch one raw frame.
    pub fn dispatch_frame(&self, frame: &str) -> DispatchOutcome {
        match serde_json::from_str::<IncomingEnvelope>(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                tracing::warn!("Dropping malformed frame from background: {}", e);
                DispatchOutcome::Malformed
            }
        }
    }

    /// Drive the receive side until the channel ends, then close.
    pub async fn pump<S>(&self, mut frames: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        while let Some(frame) = frames.next().await {
            self.dispatch_frame(&frame);
        }
        self.close();
    }

    /// Fail everything outstanding with `ChannelClosed`.
    ///
    /// Later calls fail immediately. Not retried: reconnecting is the
    /// transport's business.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }

        let drained: Vec<_> = self.inner.in_flight.borrow_mut().drain().collect();
        tracing::info!("Background channel closed; failing {} in-flight entries", drained.len());

        for (_, entry) in drained {
            match entry {
                InFlightEntry::OneShot(tx) => {
                    let _ = tx.send(Err(BridgeError::ChannelClosed));
                }
                InFlightEntry::Subscriber(handler) => {
                    notify(&handler, SubscriptionEvent::Closed);
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of calls and subscriptions still tracked.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.borrow().len()
    }

    fn detach(&self, id: &CorrelationId) -> bool {
        let removed = matches!(
            self.inner.in_flight.borrow_mut().remove(id),
            Some(InFlightEntry::Subscriber(_))
        );
        if !removed || self.inner.closed.get() {
            return removed;
        }

        if let Some(message) = self.inner.config.unsubscribe_message.as_deref() {
            let notice_id = self.inner.ids.next_id();
            let notice = serde_json::json!({ "subscription": id });
            if let Err(e) = self.send_envelope(&notice_id, message, notice) {
                tracing::debug!("Unsubscribe notice for {} not sent: {}", id, e);
            }
        }
        removed
    }

    /// A transport failure means the channel is gone: the client is closed
    /// before this returns, failing every outstanding entry.
    fn send_envelope(
        &self,
        id: &CorrelationId,
        message: &str,
        request: Value,
    ) -> Result<(), BridgeError> {
        let envelope = OutgoingEnvelope {
            id: id.clone(),
            message: message.to_string(),
            request,
        };

        let frame = serde_json::to_string(&envelope).map_err(|e| {
            tracing::warn!("Failed to encode {} ({}): {}", message, id, e);
            BridgeError::Encode(e)
        })?;

        tracing::debug!("Sending {} ({})", message, id);
        if let Err(e) = self.inner.transport.send(frame) {
            tracing::warn!("Failed to send {} ({}): {}", message, id, e);
            self.close();
            return Err(BridgeError::ChannelClosed);
        }
        Ok(())
    }
}

fn notify(handler: &Handler, event: SubscriptionEvent) {
    handler.queued.borrow_mut().push_back(event);

    let Ok(mut callback) = handler.callback.try_borrow_mut() else {
        // The running call drains the queue when it returns.
        tracing::debug!("Subscriber busy; event queued");
        return;
    };
    loop {
        let next = handler.queued.borrow_mut().pop_front();
        let Some(event) = next else { break };
        (&mut *callback)(event);
    }
}

/// Completion of a one-shot call.
///
/// Dropping it is the only cancellation: the entry stays until its response
/// arrives and is then discarded.
pub struct CallHandle {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<Value, BridgeError>>,
}

impl CallHandle {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }
}

impl Future for CallHandle {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped with the client: nothing will ever answer.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(BridgeError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Handle to an attached subscription.
///
/// Dropping it leaves the subscription attached; call `unsubscribe`.
pub struct Subscription {
    id: CorrelationId,
    client: BackgroundClient,
}

impl Subscription {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Detach locally and, if configured, tell the background to stop.
    ///
    /// Returns false if it was already detached. No event is delivered after
    /// this returns.
    pub fn unsubscribe(&self) -> bool {
        self.client.detach(&self.id)
    }
}
