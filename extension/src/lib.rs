//! Communication and arbitration core of the wallet extension UI.
//!
//! The popup and tab views talk to the background process through one
//! [`BackgroundClient`] over a single ordered channel. Pending requests
//! pushed by the background are merged by [`pending::evaluate`] into the one
//! screen to show, and each confirmation screen acts through a
//! [`ConfirmationLatch`] so a request arriving mid-confirmation cannot
//! replace the one the user is looking at.
//!
//! Everything here runs on the UI's single-threaded event loop.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod latch;
pub mod pending;
pub mod protocol;
pub mod transport;

pub use client::{BackgroundClient, CallHandle, DispatchOutcome, Subscription, SubscriptionEvent};
pub use config::{BridgeConfig, ClientConfig, ConfirmationConfig, RouterConfig};
pub use context::PendingContext;
pub use error::{BridgeError, LatchError, TransportError};
pub use ids::{Clock, CorrelationId, IdGenerator, SystemClock};
pub use latch::{run_confirmation, ConfirmStatus, ConfirmationLatch, LatchState, Settled};
pub use pending::{
    evaluate, should_redirect, Arbitration, DappRequest, DappRequestKind, PendingRecord,
    PendingSnapshot, PermissionRequest, RequestKind, Route, UnapprovedTransaction,
};
pub use protocol::{ErrorInfo, IncomingEnvelope, OutgoingEnvelope};
pub use transport::{channel, BackgroundEnd, ChannelTransport, IncomingFrames, MemoryTransport};
