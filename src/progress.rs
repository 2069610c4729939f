//! Observer trait for dispatch lifecycle events.
//!
//! Inject an [`Arc<dyn DispatchObserver>`] via
//! [`crate::Dispatcher::with_observer`] to follow each request through
//! `Received → Validated → Executing → Completed | Failed`. The CLI uses it
//! to drive its spinner; a server could forward the events to metrics.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdftools::{DispatchObserver, DispatchState};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use uuid::Uuid;
//!
//! struct Counter(AtomicUsize);
//!
//! impl DispatchObserver for Counter {
//!     fn on_state(&self, _id: Uuid, _operation: &str, _state: DispatchState) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::error::TransformError;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Per-request dispatch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    /// Inputs staged, operation name and parameters received.
    Received,
    /// Parameters parsed and inputs checked against the operation.
    Validated,
    /// The operation is running (locally or remotely).
    Executing,
    Completed,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchState::Received => "received",
            DispatchState::Validated => "validated",
            DispatchState::Executing => "executing",
            DispatchState::Completed => "completed",
            DispatchState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Called by the dispatcher as a request moves through its states.
///
/// All methods default to no-ops. Implementations must be `Send + Sync`;
/// concurrent requests report through the same observer.
pub trait DispatchObserver: Send + Sync {
    /// Every state transition, terminal ones included.
    fn on_state(&self, request_id: Uuid, operation: &str, state: DispatchState) {
        let _ = (request_id, operation, state);
    }

    /// The request completed; `output_bytes` is the total produced.
    fn on_complete(&self, request_id: Uuid, operation: &str, output_bytes: usize) {
        let _ = (request_id, operation, output_bytes);
    }

    /// The request failed.
    fn on_error(&self, request_id: Uuid, operation: &str, error: &TransformError) {
        let _ = (request_id, operation, error);
    }
}

/// Observer that ignores everything. The default.
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}

pub type ObserverHandle = Arc<dyn DispatchObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<DispatchState>>,
        errors: Mutex<Vec<String>>,
    }

    impl DispatchObserver for Recorder {
        fn on_state(&self, _id: Uuid, _operation: &str, state: DispatchState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_error(&self, _id: Uuid, _operation: &str, error: &TransformError) {
            self.errors.lock().unwrap().push(error.kind().to_string());
        }
    }

    #[test]
    fn noop_observer_accepts_all_events() {
        let obs = NoopObserver;
        let id = Uuid::new_v4();
        obs.on_state(id, "merge", DispatchState::Received);
        obs.on_complete(id, "merge", 42);
        obs.on_error(id, "merge", &TransformError::validation("x"));
    }

    #[test]
    fn recorder_sees_events_through_arc_dyn() {
        let rec = Arc::new(Recorder::default());
        let obs: ObserverHandle = rec.clone();
        let id = Uuid::new_v4();
        obs.on_state(id, "split", DispatchState::Received);
        obs.on_state(id, "split", DispatchState::Failed);
        obs.on_error(id, "split", &TransformError::validation("No file uploaded"));

        assert_eq!(
            *rec.states.lock().unwrap(),
            vec![DispatchState::Received, DispatchState::Failed]
        );
        assert_eq!(*rec.errors.lock().unwrap(), vec!["validation".to_string()]);
    }

    #[test]
    fn terminal_states() {
        assert!(DispatchState::Completed.is_terminal());
        assert!(DispatchState::Failed.is_terminal());
        assert!(!DispatchState::Executing.is_terminal());
        assert_eq!(DispatchState::Validated.to_string(), "validated");
    }
}
