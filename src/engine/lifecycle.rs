//! Request state cell shared by a handle and its background task.

use crate::error::Error;
use crate::types::{RequestState, Response};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

struct Slot {
    state: RequestState,
    response: Option<Response>,
    error: Option<Arc<Error>>,
}

/// `NotStarted -> Pending -> Completed | Failed`, with waiters for both async and
/// blocking callers.
///
/// The result is stored under the same lock as the state, so a reader that sees a
/// terminal state always sees its payload.
pub(crate) struct Lifecycle {
    slot: Mutex<Slot>,
    cond: Condvar,
    state_tx: watch::Sender<RequestState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(RequestState::NotStarted);
        Self {
            slot: Mutex::new(Slot {
                state: RequestState::NotStarted,
                response: None,
                error: None,
            }),
            cond: Condvar::new(),
            state_tx,
        }
    }

    pub fn completed(response: Response) -> Self {
        let cell = Self::new();
        cell.try_begin();
        cell.complete(response);
        cell
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: RequestState) {
        self.cond.notify_all();
        self.state_tx.send_replace(state);
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    /// Moves `NotStarted` to `Pending`. Returns false when the request already began.
    pub fn try_begin(&self) -> bool {
        let mut slot = self.lock();
        if slot.state != RequestState::NotStarted {
            return false;
        }
        slot.state = RequestState::Pending;
        drop(slot);
        self.publish(RequestState::Pending);
        true
    }

    pub fn complete(&self, response: Response) -> bool {
        let mut slot = self.lock();
        if slot.state != RequestState::Pending {
            return false;
        }
        slot.response = Some(response);
        slot.state = RequestState::Completed;
        drop(slot);
        self.publish(RequestState::Completed);
        true
    }

    pub fn fail(&self, error: Error) -> bool {
        let mut slot = self.lock();
        if slot.state != RequestState::Pending {
            return false;
        }
        slot.error = Some(Arc::new(error));
        slot.state = RequestState::Failed;
        drop(slot);
        self.publish(RequestState::Failed);
        true
    }

    pub fn response(&self) -> Option<Response> {
        self.lock().response.clone()
    }

    pub fn error(&self) -> Option<Arc<Error>> {
        self.lock().error.clone()
    }

    /// Waits for a terminal state, up to `timeout`. Returns the state observed last.
    pub async fn wait(&self, timeout: Option<Duration>) -> RequestState {
        let mut rx = self.state_tx.subscribe();
        let terminal = async {
            loop {
                let state = self.state();
                if state.is_terminal() {
                    return state;
                }
                if rx.changed().await.is_err() {
                    return self.state();
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, terminal)
                .await
                .unwrap_or_else(|_| self.state()),
            None => terminal.await,
        }
    }

    /// Blocking counterpart of [`wait`](Self::wait). Must not run on an async worker thread.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> RequestState {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.lock();
        while !slot.state.is_terminal() {
            match deadline {
                None => {
                    slot = self.cond.wait(slot).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    slot = guard;
                }
            }
        }
        slot.state
    }
}
