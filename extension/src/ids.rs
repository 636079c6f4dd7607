// Correlation ids: "<monotonic-millis>.<counter>"

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Token linking a request to its response(s).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&CorrelationId> for CorrelationId {
    fn from(id: &CorrelationId) -> Self {
        id.clone()
    }
}

/// Coarse wall clock, injected so tests can pin time.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Owned id source for one client.
///
/// The counter never repeats within a generator and the millisecond part
/// never goes backwards, even if the clock does.
pub struct IdGenerator {
    clock: Box<dyn Clock>,
    counter: Cell<u64>,
    last_millis: Cell<u64>,
}

impl IdGenerator {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            counter: Cell::new(0),
            last_millis: Cell::new(0),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        let millis = self.clock.now_millis().max(self.last_millis.get());
        self.last_millis.set(millis);

        let counter = self.counter.get() + 1;
        self.counter.set(counter);

        CorrelationId(format!("{}.{}", millis, counter))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}
