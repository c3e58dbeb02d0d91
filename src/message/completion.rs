use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

/// Ceiling for [`BatchCompletion::wait_finish`].
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionState {
    Pending,
    Succeeded,
    Failed,
}

/// What a bounded wait on a batch observed. A timed-out wait carries no
/// verdict, callers decide how to treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    Failed,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WaitOutcome::Completed)
    }
}

/// One-shot success/failure signal for a batch. Clones share the same signal;
/// only the first `done`/`fail` takes effect.
#[derive(Debug, Clone)]
pub struct BatchCompletion {
    state: Arc<watch::Sender<CompletionState>>,
}

impl Default for BatchCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchCompletion {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CompletionState::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    /// Marks the batch successful. Returns false if it was already settled.
    pub fn done(&self) -> bool {
        self.settle(CompletionState::Succeeded)
    }

    /// Marks the batch failed. Returns false if it was already settled.
    pub fn fail(&self) -> bool {
        self.settle(CompletionState::Failed)
    }

    fn settle(&self, outcome: CompletionState) -> bool {
        let settled = self.state.send_if_modified(|state| {
            if *state == CompletionState::Pending {
                *state = outcome;
                true
            } else {
                false
            }
        });
        trace!("batch completion settle {:?}: {}", outcome, settled);
        settled
    }

    pub fn is_settled(&self) -> bool {
        *self.state.borrow() != CompletionState::Pending
    }

    pub fn is_success(&self) -> bool {
        *self.state.borrow() == CompletionState::Succeeded
    }

    pub fn handle(&self) -> CompletionHandle {
        CompletionHandle {
            state: self.state.subscribe(),
        }
    }

    /// Waits for a verdict for at most [`WAIT_TIMEOUT`].
    pub async fn wait_finish(&self) -> WaitOutcome {
        self.handle().wait(WAIT_TIMEOUT).await
    }
}

/// Waiting side of a [`BatchCompletion`].
#[derive(Debug)]
pub struct CompletionHandle {
    state: watch::Receiver<CompletionState>,
}

impl CompletionHandle {
    pub async fn wait(mut self, ceiling: Duration) -> WaitOutcome {
        let settled = self
            .state
            .wait_for(|state| *state != CompletionState::Pending);
        match tokio::time::timeout(ceiling, settled).await {
            Ok(Ok(state)) if *state == CompletionState::Succeeded => WaitOutcome::Completed,
            // every signalling side dropped without a verdict
            Ok(_) => WaitOutcome::Failed,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
