// Pending-request arbitration
//
// The background pushes three collections of requests waiting on the user.
// `evaluate` merges them and picks the one screen to show: earliest `time`
// first, ties going to permissions, then transactions, then dapp requests,
// then request id within a collection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Site asking to connect to the wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PermissionRequest {
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Transaction waiting for approval.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnapprovedTransaction {
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Signing, asset or network request raised by a dapp.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DappRequest {
    pub time: u64,
    #[serde(rename = "type")]
    pub kind: DappRequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DappRequestKind {
    Sign,
    AddAsset,
    SwitchNetwork,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    PermissionRequest,
    Transaction,
    SigningRequest,
    AssetRequest,
    NetworkSwitchRequest,
}

impl From<DappRequestKind> for RequestKind {
    fn from(kind: DappRequestKind) -> Self {
        match kind {
            DappRequestKind::Sign => RequestKind::SigningRequest,
            DappRequestKind::AddAsset => RequestKind::AssetRequest,
            DappRequestKind::SwitchNetwork => RequestKind::NetworkSwitchRequest,
        }
    }
}

impl RequestKind {
    /// The one place request kinds map to screens.
    pub const fn route(self) -> Route {
        match self {
            RequestKind::PermissionRequest => Route::Connect,
            RequestKind::Transaction => Route::ConfirmTransaction,
            RequestKind::SigningRequest => Route::Sign,
            RequestKind::AssetRequest => Route::AddAsset,
            RequestKind::NetworkSwitchRequest => Route::SwitchNetwork,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Connect,
    ConfirmTransaction,
    Sign,
    AddAsset,
    SwitchNetwork,
}

impl Route {
    /// Path understood by the view router. `Home` is configurable, see `Arbitration::path`.
    pub const fn path(self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Connect => "/connect",
            Route::ConfirmTransaction => "/confirm-transaction",
            Route::Sign => "/sign",
            Route::AddAsset => "/add-asset",
            Route::SwitchNetwork => "/switch-network",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// One pending item, derived on every evaluation and never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRecord {
    pub id: String,
    pub time: u64,
    pub kind: RequestKind,
    pub route: Route,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arbitration {
    pub has_pending: bool,
    pub route: Route,
    pub next: Option<PendingRecord>,
}

impl Arbitration {
    /// The arbitrated route, if a screen showing `current` should leave.
    pub fn redirect_from(&self, current: Route) -> Option<Route> {
        (self.route != current).then_some(self.route)
    }

    /// Router path, with the configured home route when nothing is pending.
    pub fn path<'a>(&self, home_route: &'a str) -> &'a str {
        match self.route {
            Route::Home => home_route,
            route => route.path(),
        }
    }
}

/// All pending records in display order.
pub fn pending_queue(
    permission_requests: &BTreeMap<String, PermissionRequest>,
    transactions: &BTreeMap<String, UnapprovedTransaction>,
    dapp_requests: &BTreeMap<String, DappRequest>,
) -> Vec<PendingRecord> {
    let record = |id: &String, time: u64, kind: RequestKind| PendingRecord {
        id: id.clone(),
        time,
        kind,
        route: kind.route(),
    };

    let mut queue: Vec<PendingRecord> = permission_requests
        .iter()
        .map(|(id, req)| record(id, req.time, RequestKind::PermissionRequest))
        .chain(
            transactions
                .iter()
                .map(|(id, tx)| record(id, tx.time, RequestKind::Transaction)),
        )
        .chain(
            dapp_requests
                .iter()
                .map(|(id, req)| record(id, req.time, req.kind.into())),
        )
        .collect();

    // Stable: equal times keep collection precedence.
    queue.sort_by_key(|record| record.time);
    queue
}

/// Pick the screen to show for the current snapshots. Pure.
pub fn evaluate(
    permission_requests: &BTreeMap<String, PermissionRequest>,
    transactions: &BTreeMap<String, UnapprovedTransaction>,
    dapp_requests: &BTreeMap<String, DappRequest>,
) -> Arbitration {
    let next = pending_queue(permission_requests, transactions, dapp_requests)
        .into_iter()
        .next();

    Arbitration {
        has_pending: next.is_some(),
        route: next.as_ref().map_or(Route::Home, |record| record.route),
        next,
    }
}

/// Where a screen showing `current` should go, if it is no longer the arbitrated one.
pub fn should_redirect(
    current: Route,
    permission_requests: &BTreeMap<String, PermissionRequest>,
    transactions: &BTreeMap<String, UnapprovedTransaction>,
    dapp_requests: &BTreeMap<String, DappRequest>,
) -> Option<Route> {
    evaluate(permission_requests, transactions, dapp_requests).redirect_from(current)
}

/// The three collections as the background pushes them.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingSnapshot {
    #[serde(default)]
    pub permission_requests: BTreeMap<String, PermissionRequest>,
    #[serde(default)]
    pub unapproved_txs: BTreeMap<String, UnapprovedTransaction>,
    #[serde(default)]
    pub dapp_requests: BTreeMap<String, DappRequest>,
}

impl PendingSnapshot {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn evaluate(&self) -> Arbitration {
        evaluate(
            &self.permission_requests,
            &self.unapproved_txs,
            &self.dapp_requests,
        )
    }

    pub fn queue(&self) -> Vec<PendingRecord> {
        pending_queue(
            &self.permission_requests,
            &self.unapproved_txs,
            &self.dapp_requests,
        )
    }

    pub fn should_redirect(&self, current: Route) -> Option<Route> {
        should_redirect(
            current,
            &self.permission_requests,
            &self.unapproved_txs,
            &self.dapp_requests,
        )
    }

    /// First unapproved transaction in display order.
    pub fn first_transaction(&self) -> Option<(&String, &UnapprovedTransaction)> {
        self.unapproved_txs.iter().min_by_key(|(_, tx)| tx.time)
    }

    /// Earliest dapp request of one kind.
    pub fn first_dapp_request(&self, kind: DappRequestKind) -> Option<(&String, &DappRequest)> {
        self.dapp_requests
            .iter()
            .filter(|(_, req)| req.kind == kind)
            .min_by_key(|(_, req)| req.time)
    }
}
