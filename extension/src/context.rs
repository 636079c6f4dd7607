// Shared pending-request context for the popup and tab views
// Keeps the latest background snapshot and its arbitration result

use std::cell::RefCell;
use std::rc::Rc;

use crate::client::{BackgroundClient, Subscription, SubscriptionEvent};
use crate::pending::{Arbitration, PendingSnapshot, Route};

#[derive(Clone)]
pub struct PendingContext {
    client: BackgroundClient,
    state: Rc<RefCell<PendingState>>,
    subscription: Rc<RefCell<Option<Subscription>>>,
}

struct PendingState {
    snapshot: PendingSnapshot,
    arbitration: Arbitration,
    last_error: Option<String>,
}

// Contexts compare by identity
impl PartialEq for PendingContext {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl PendingState {
    fn apply(&mut self, snapshot: PendingSnapshot) -> Arbitration {
        let arbitration = snapshot.evaluate();
        if arbitration.route != self.arbitration.route {
            tracing::debug!("Arbitrated route {} -> {}", self.arbitration.route, arbitration.route);
        }
        self.snapshot = snapshot;
        self.arbitration = arbitration.clone();
        self.last_error = None;
        arbitration
    }

    fn handle(&mut self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Update(payload) => match PendingSnapshot::from_value(payload) {
                Ok(snapshot) => {
                    self.apply(snapshot);
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed pending snapshot: {}", e);
                    self.last_error = Some(format!("malformed snapshot: {}", e));
                }
            },
            SubscriptionEvent::Error(info) => {
                tracing::warn!("Pending-state subscription failed: {}", info);
                self.last_error = Some(info.message);
            }
            SubscriptionEvent::Closed => {
                self.last_error = Some("channel to background closed".to_string());
            }
        }
    }
}

impl PendingContext {
    pub fn new(client: BackgroundClient) -> Self {
        let snapshot = PendingSnapshot::default();
        let arbitration = snapshot.evaluate();

        Self {
            client,
            state: Rc::new(RefCell::new(PendingState {
                snapshot,
                arbitration,
                last_error: None,
            })),
            subscription: Rc::new(RefCell::new(None)),
        }
    }

    /// Subscribe to pushed snapshots; each one is re-arbitrated on arrival.
    ///
    /// Replaces any earlier watch.
    pub fn watch(&self, message: &str) {
        self.stop();

        let state = self.state.clone();
        let subscription = self.client.subscribe(message, serde_json::json!({}), move |event| {
            state.borrow_mut().handle(event);
        });
        *self.subscription.borrow_mut() = Some(subscription);
    }

    pub fn stop(&self) -> bool {
        let subscription = self.subscription.borrow_mut().take();
        subscription.is_some_and(|subscription| subscription.unsubscribe())
    }

    /// Feed a snapshot obtained some other way (e.g. an initial one-shot fetch).
    pub fn apply(&self, snapshot: PendingSnapshot) -> Arbitration {
        self.state.borrow_mut().apply(snapshot)
    }

    pub fn client(&self) -> &BackgroundClient {
        &self.client
    }

    pub fn snapshot(&self) -> PendingSnapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn arbitration(&self) -> Arbitration {
        self.state.borrow().arbitration.clone()
    }

    pub fn has_pending(&self) -> bool {
        self.state.borrow().arbitration.has_pending
    }

    pub fn route_path(&self, home_route: &str) -> String {
        self.state.borrow().arbitration.path(home_route).to_string()
    }

    pub fn should_redirect(&self, current: Route) -> Option<Route> {
        self.state.borrow().arbitration.redirect_from(current)
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::protocol::IncomingEnvelope;
    use crate::transport::channel;
    use serde_json::json;

    #[test]
    fn test_watch_rearbitrates_on_every_snapshot() {
        let (transport, _incoming, mut background) = channel();
        let client = BackgroundClient::new(transport, ClientConfig::default());
        let popup = PendingContext::new(client.clone());
        let tab = popup.clone();
        assert!(popup == tab);

        popup.watch("watchPendingRequests");
        let request = background.try_next_request().unwrap();
        assert_eq!(request.message, "watchPendingRequests");
        assert!(!tab.has_pending());

        client.dispatch(IncomingEnvelope::response(
            &request.id,
            json!({ "unapprovedTxs": { "t1": { "time": 4 } } }),
        ));
        assert_eq!(tab.arbitration().route, Route::ConfirmTransaction);
        assert_eq!(tab.should_redirect(Route::ConfirmTransaction), None);

        client.dispatch(IncomingEnvelope::response(
            &request.id,
            json!({
                "permissionRequests": { "p1": { "time": 1 } },
                "unapprovedTxs": { "t1": { "time": 4 } }
            }),
        ));
        assert_eq!(tab.should_redirect(Route::ConfirmTransaction), Some(Route::Connect));
        assert_eq!(tab.route_path("/"), "/connect");

        assert!(popup.stop());
        assert!(!popup.stop());
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn test_malformed_snapshot_keeps_last_good_state() {
        let (transport, _incoming, mut background) = channel();
        let client = BackgroundClient::new(transport, ClientConfig::default());
        let context = PendingContext::new(client.clone());

        context.watch("watchPendingRequests");
        let id = background.try_next_request().unwrap().id;

        client.dispatch(IncomingEnvelope::response(
            &id,
            json!({ "permissionRequests": { "p1": { "time": 1 } } }),
        ));
        client.dispatch(IncomingEnvelope::response(
            &id,
            json!({ "permissionRequests": "nope" }),
        ));

        assert_eq!(context.arbitration().route, Route::Connect);
        assert!(context.last_error().is_some());
    }

    #[test]
    fn test_channel_close_is_recorded() {
        let (transport, _incoming, _background) = channel();
        let client = BackgroundClient::new(transport, ClientConfig::default());
        let context = PendingContext::new(client.clone());

        context.watch("watchPendingRequests");
        client.close();

        assert_eq!(
            context.last_error().as_deref(),
            Some("channel to background closed")
        );
        assert_eq!(context.route_path("/home"), "/home");
    }
}
