//! Per-request lifecycle and user cancellation

use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    /// Request submitted, no chunk received yet
    Sending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Failed
        )
    }

    fn is_active(self) -> bool {
        matches!(self, RequestState::Sending | RequestState::Streaming)
    }
}

/// Abort handle shared between the reader loop and a stop trigger.
///
/// Cloning yields another handle to the same request.
#[derive(Debug, Clone)]
pub struct CancellationController {
    token: CancellationToken,
    state: Arc<Mutex<RequestState>>,
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Arc::new(Mutex::new(RequestState::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        // The guarded value is a plain enum, so a poisoned lock is still usable
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> RequestState {
        *self.lock()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Idle -> Sending
    pub fn begin(&self) {
        let mut state = self.lock();
        if *state == RequestState::Idle {
            *state = RequestState::Sending;
        }
    }

    /// Sending -> Streaming, on the first received chunk
    pub fn mark_streaming(&self) {
        let mut state = self.lock();
        if *state == RequestState::Sending {
            *state = RequestState::Streaming;
        }
    }

    /// Stop the request. Returns false if it already ended or was cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if !state.is_active() {
            debug!("Ignoring cancel in state {:?}", *state);
            return false;
        }
        *state = RequestState::Cancelled;
        self.token.cancel();
        true
    }

    /// Record how the reader loop ended and return the final state.
    ///
    /// A cancel that happened first always wins over the natural outcome.
    pub fn settle(&self, natural: RequestState) -> RequestState {
        let mut state = self.lock();
        if !state.is_terminal() {
            *state = natural;
        }
        *state
    }
}
