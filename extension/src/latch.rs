// Per-view confirmation latch
//
// Idle -> Confirming(subject) -> Settling(subject, status) -> Idle
//
// While Idle the latch mirrors whatever upstream currently reports for the
// screen. A confirm/reject freezes that value; upstream churn is still
// recorded but not shown until the latch is Idle again, so the terminal
// status is displayed next to the item it belongs to.

use std::cell::RefCell;
use std::time::Duration;

use serde_json::Value;

use crate::client::{BackgroundClient, CallHandle};
use crate::error::{BridgeError, LatchError};

/// Terminal outcome shown while settling.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmStatus {
    Success(Value),
    Error(String),
}

impl ConfirmStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ConfirmStatus::Success(_))
    }
}

impl From<Result<Value, BridgeError>> for ConfirmStatus {
    fn from(result: Result<Value, BridgeError>) -> Self {
        match result {
            Ok(payload) => ConfirmStatus::Success(payload),
            Err(e) => ConfirmStatus::Error(e.user_message()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LatchState<T> {
    Idle,
    Confirming(T),
    Settling { subject: T, status: ConfirmStatus },
}

/// What a finished confirmation acted on, and how it ended.
#[derive(Clone, Debug, PartialEq)]
pub struct Settled<T> {
    pub subject: T,
    pub status: ConfirmStatus,
}

#[derive(Debug)]
pub struct ConfirmationLatch<T> {
    upstream: Option<T>,
    state: LatchState<T>,
}

impl<T> Default for ConfirmationLatch<T> {
    fn default() -> Self {
        Self {
            upstream: None,
            state: LatchState::Idle,
        }
    }
}

impl<T: Clone> ConfirmationLatch<T> {
    pub fn new(upstream: Option<T>) -> Self {
        Self {
            upstream,
            state: LatchState::Idle,
        }
    }

    /// Record the latest upstream value for this screen.
    pub fn observe(&mut self, upstream: Option<T>) {
        self.upstream = upstream;
    }

    /// What the screen should display and act on.
    pub fn subject(&self) -> Option<&T> {
        match &self.state {
            LatchState::Confirming(subject) | LatchState::Settling { subject, .. } => Some(subject),
            LatchState::Idle => self.upstream.as_ref(),
        }
    }

    pub fn state(&self) -> &LatchState<T> {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, LatchState::Idle)
    }

    pub fn status(&self) -> Option<&ConfirmStatus> {
        match &self.state {
            LatchState::Settling { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Freeze the current upstream value for a confirm/reject.
    pub fn begin_confirm(&mut self) -> Result<T, LatchError> {
        if !self.is_idle() {
            return Err(LatchError::NotIdle);
        }
        let subject = self.upstream.clone().ok_or(LatchError::NothingToConfirm)?;
        self.state = LatchState::Confirming(subject.clone());
        Ok(subject)
    }

    /// Record the outcome of the confirm/reject call.
    pub fn settle(&mut self, result: Result<Value, BridgeError>) -> Result<Settled<T>, LatchError> {
        match std::mem::replace(&mut self.state, LatchState::Idle) {
            LatchState::Confirming(subject) => {
                let status = ConfirmStatus::from(result);
                self.state = LatchState::Settling {
                    subject: subject.clone(),
                    status: status.clone(),
                };
                Ok(Settled { subject, status })
            }
            other => {
                self.state = other;
                Err(LatchError::NotConfirming)
            }
        }
    }

    /// Leave Settling and resume mirroring upstream.
    pub fn finish(&mut self) {
        if matches!(self.state, LatchState::Settling { .. }) {
            self.state = LatchState::Idle;
        }
    }
}

/// Run one confirm/reject end to end.
///
/// `action` builds the outgoing call from the frozen subject. The latch is
/// back to Idle when this returns, whatever the call's outcome.
pub async fn run_confirmation<T, F>(
    latch: &RefCell<ConfirmationLatch<T>>,
    client: &BackgroundClient,
    settle_for: Duration,
    action: F,
) -> Result<Settled<T>, LatchError>
where
    T: Clone,
    F: FnOnce(&BackgroundClient, &T) -> CallHandle,
{
    let subject = latch.borrow_mut().begin_confirm()?;
    let result = action(client, &subject).await;

    let settled = latch.borrow_mut().settle(result)?;
    match &settled.status {
        ConfirmStatus::Success(_) => tracing::info!("Confirmation succeeded"),
        ConfirmStatus::Error(message) => tracing::warn!("Confirmation failed: {}", message),
    }

    if !settle_for.is_zero() {
        tokio::time::sleep(settle_for).await;
    }
    latch.borrow_mut().finish();

    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::protocol::IncomingEnvelope;
    use crate::transport::channel;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq)]
    struct Tx {
        id: &'static str,
    }

    #[test]
    fn test_idle_mirrors_upstream() {
        let mut latch = ConfirmationLatch::new(Some(Tx { id: "a" }));
        assert_eq!(latch.subject(), Some(&Tx { id: "a" }));

        latch.observe(Some(Tx { id: "b" }));
        assert_eq!(latch.subject(), Some(&Tx { id: "b" }));

        latch.observe(None);
        assert_eq!(latch.subject(), None);
        assert_eq!(latch.begin_confirm(), Err(LatchError::NothingToConfirm));
        assert!(latch.is_idle());
    }

    #[test]
    fn test_confirming_freezes_subject() {
        let mut latch = ConfirmationLatch::new(Some(Tx { id: "a" }));

        assert_eq!(latch.begin_confirm(), Ok(Tx { id: "a" }));
        latch.observe(Some(Tx { id: "b" }));
        latch.observe(None);
        latch.observe(Some(Tx { id: "c" }));
        assert_eq!(latch.subject(), Some(&Tx { id: "a" }));
        assert_eq!(latch.begin_confirm(), Err(LatchError::NotIdle));

        let settled = latch.settle(Ok(json!(true))).unwrap();
        assert_eq!(settled.subject, Tx { id: "a" });
        assert_eq!(latch.status(), Some(&ConfirmStatus::Success(json!(true))));
        assert_eq!(latch.begin_confirm(), Err(LatchError::NotIdle));

        // The status is still shown against the confirmed item.
        assert_eq!(latch.subject(), Some(&Tx { id: "a" }));
        latch.observe(Some(Tx { id: "c" }));
        assert_eq!(latch.subject(), Some(&Tx { id: "a" }));

        latch.finish();
        assert!(latch.is_idle());
        assert_eq!(latch.subject(), Some(&Tx { id: "c" }));
    }

    #[test]
    fn test_settling_keeps_confirmed_subject() {
        let mut latch = ConfirmationLatch::new(Some(Tx { id: "a" }));
        latch.begin_confirm().unwrap();
        latch.observe(Some(Tx { id: "b" }));

        latch.settle(Ok(json!(true))).unwrap();
        assert_eq!(
            latch.state(),
            &LatchState::Settling {
                subject: Tx { id: "a" },
                status: ConfirmStatus::Success(json!(true)),
            }
        );
        assert_eq!(latch.subject(), Some(&Tx { id: "a" }));

        latch.finish();
        assert_eq!(latch.subject(), Some(&Tx { id: "b" }));
    }

    #[test]
    fn test_failed_confirmation_still_returns_to_idle() {
        let mut latch = ConfirmationLatch::new(Some(Tx { id: "a" }));
        latch.begin_confirm().unwrap();

        let settled = latch.settle(Err(BridgeError::ChannelClosed)).unwrap();
        assert_eq!(
            settled.status,
            ConfirmStatus::Error("channel to background closed".to_string())
        );
        latch.finish();
        assert!(latch.is_idle());
    }

    #[test]
    fn test_settle_without_confirm() {
        let mut latch = ConfirmationLatch::new(Some(Tx { id: "a" }));
        assert_eq!(latch.settle(Ok(json!(null))), Err(LatchError::NotConfirming));
        assert!(latch.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_confirmation_acts_on_frozen_subject() {
        let (transport, _incoming, mut background) = channel();
        let client = BackgroundClient::new(transport, ClientConfig::default());
        let latch = RefCell::new(ConfirmationLatch::new(Some(Tx { id: "a" })));

        let confirm = run_confirmation(&latch, &client, Duration::from_millis(1500), |client, tx| {
            client.call("approveTransaction", json!({ "id": tx.id }))
        });
        let background_side = async {
            let request = background.next_request().await.unwrap();
            assert_eq!(request.request, json!({ "id": "a" }));

            // A newer request lands mid-confirmation.
            latch.borrow_mut().observe(Some(Tx { id: "b" }));
            assert_eq!(latch.borrow().subject(), Some(&Tx { id: "a" }));

            client.dispatch(IncomingEnvelope::response(&request.id, json!({ "hash": "0x1" })));
        };

        let (settled, ()) = futures::join!(confirm, background_side);
        let settled = settled.unwrap();

        assert_eq!(settled.subject, Tx { id: "a" });
        assert!(settled.status.is_success());
        assert!(latch.borrow().is_idle());
        assert_eq!(latch.borrow().subject(), Some(&Tx { id: "b" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_loss_mid_confirmation_recovers() {
        let (transport, _incoming, mut background) = channel();
        let client = BackgroundClient::new(transport, ClientConfig::default());
        let latch = RefCell::new(ConfirmationLatch::new(Some(Tx { id: "a" })));

        let confirm = run_confirmation(&latch, &client, Duration::from_millis(10), |client, tx| {
            client.call("rejectTransaction", json!({ "id": tx.id }))
        });
        let background_side = async {
            background.next_request().await.unwrap();
            client.close();
        };

        let (settled, ()) = futures::join!(confirm, background_side);
        let settled = settled.unwrap();

        assert_eq!(
            settled.status,
            ConfirmStatus::Error("channel to background closed".to_string())
        );
        assert!(latch.borrow().is_idle());
    }

    #[tokio::test]
    async fn test_remote_error_is_reported_verbatim() {
        let (transport, _incoming, mut background) = channel();
        let client = BackgroundClient::new(transport, ClientConfig::default());
        let latch = RefCell::new(ConfirmationLatch::new(Some(Tx { id: "a" })));

        let confirm = run_confirmation(&latch, &client, Duration::ZERO, |client, tx| {
            client.call("approveTransaction", json!({ "id": tx.id }))
        });
        let background_side = async {
            let request = background.next_request().await.unwrap();
            client.dispatch(IncomingEnvelope::error(&request.id, "insufficient funds"));
        };

        let (settled, ()) = futures::join!(confirm, background_side);
        assert_eq!(
            settled.unwrap().status,
            ConfirmStatus::Error("insufficient funds".to_string())
        );
        assert!(latch.borrow().is_idle());
    }
}
