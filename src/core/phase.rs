//! Observable phase of a reporting run.
//!
//! ```text
//! Starting -> Connected -> Announced -> Polling -> Stopping
//!     \           \            \           \
//!      +-----------+------------+-----------+--> Failed(reason)
//! ```

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Source setup: name map, oversampling.
    Starting,
    Connected,
    /// Discovery sent for every statically known instance.
    Announced,
    Polling,
    /// Cancelled; connection being released.
    Stopping,
    Failed(String),
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Starting => "Starting",
            LifecyclePhase::Connected => "Connected",
            LifecyclePhase::Announced => "Announced",
            LifecyclePhase::Polling => "Polling",
            LifecyclePhase::Stopping => "Stopping",
            LifecyclePhase::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Stopping | LifecyclePhase::Failed(_))
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Failed(reason) => write!(f, "Failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseTracker {
    tx: watch::Sender<LifecyclePhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        let (tx, _) = watch::channel(LifecyclePhase::Starting);
        Self { tx }
    }
}

impl PhaseTracker {
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LifecyclePhase {
        self.tx.borrow().clone()
    }

    /// Terminal phases are sticky.
    pub fn set(&self, next: LifecyclePhase) {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            previous = Some(std::mem::replace(current, next.clone()));
            true
        });
        match previous {
            Some(from) if next.is_terminal() => info!("Lifecycle {} -> {}", from.as_str(), next),
            Some(from) => debug!("Lifecycle {} -> {}", from.as_str(), next),
            None => {}
        }
    }
}
