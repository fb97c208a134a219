//! Buffered producer/consumer stream with a terminal result.
//!
//! A producer (usually a channel handler on the port thread) pushes fragments
//! and then settles the stream exactly once, either resolving it with a value
//! collected from the buffered fragments or rejecting it with an error.
//! Consumers may iterate the fragments, block on the terminal value, or both.
//! Every fragment stays buffered, so a consumer that starts late still
//! observes the full sequence.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::LmStudioError;

#[derive(Debug)]
enum Outcome<T> {
    Pending,
    Resolved(T),
    Rejected(LmStudioError),
}

#[derive(Debug)]
struct SinkState<F, T> {
    fragments: Vec<F>,
    outcome: Outcome<T>,
}

#[derive(Debug)]
pub struct StreamingSink<F, T> {
    state: Mutex<SinkState<F, T>>,
    changed: Condvar,
}

impl<F, T> Default for StreamingSink<F, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F, T> StreamingSink<F, T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                fragments: Vec::new(),
                outcome: Outcome::Pending,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState<F, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a fragment. Returns `false` once the stream is settled.
    pub fn push(&self, fragment: F) -> bool {
        let mut state = self.lock();
        if !matches!(state.outcome, Outcome::Pending) {
            return false;
        }
        state.fragments.push(fragment);
        self.changed.notify_all();
        true
    }

    /// Resolves the stream with a value computed from every buffered fragment.
    pub fn finish_with(&self, collect: impl FnOnce(&[F]) -> T) -> bool {
        let mut state = self.lock();
        if !matches!(state.outcome, Outcome::Pending) {
            return false;
        }
        state.outcome = Outcome::Resolved(collect(&state.fragments));
        self.changed.notify_all();
        true
    }

    pub fn fail(&self, error: LmStudioError) -> bool {
        let mut state = self.lock();
        if !matches!(state.outcome, Outcome::Pending) {
            return false;
        }
        state.outcome = Outcome::Rejected(error);
        self.changed.notify_all();
        true
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.lock().outcome, Outcome::Pending)
    }
}

impl<F, T: Clone> StreamingSink<F, T> {
    fn settled(state: &SinkState<F, T>) -> Option<Result<T, LmStudioError>> {
        match &state.outcome {
            Outcome::Pending => None,
            Outcome::Resolved(value) => Some(Ok(value.clone())),
            Outcome::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Blocks until the stream settles.
    pub fn wait(&self) -> Result<T, LmStudioError> {
        let mut state = self.lock();
        loop {
            if let Some(result) = Self::settled(&state) {
                return result;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, LmStudioError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(result) = Self::settled(&state) {
                return Some(result);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn try_result(&self) -> Option<Result<T, LmStudioError>> {
        Self::settled(&self.lock())
    }
}

impl<F: Clone, T> StreamingSink<F, T> {
    /// Snapshot of the fragments buffered so far.
    pub fn fragments(&self) -> Vec<F> {
        self.lock().fragments.clone()
    }

    /// Iterates from the first fragment, whatever the current state.
    pub fn iter(self: &Arc<Self>) -> StreamIter<F, T> {
        StreamIter {
            sink: self.clone(),
            cursor: 0,
            done: false,
        }
    }
}

/// Yields fragments in push order, blocking while the stream is pending.
///
/// After the buffered fragments run out, a resolved stream ends the iteration
/// and a rejected stream yields its error once.
#[derive(Debug)]
pub struct StreamIter<F, T> {
    sink: Arc<StreamingSink<F, T>>,
    cursor: usize,
    done: bool,
}

impl<F: Clone, T> Iterator for StreamIter<F, T> {
    type Item = Result<F, LmStudioError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut state = self.sink.lock();
        loop {
            if let Some(fragment) = state.fragments.get(self.cursor) {
                self.cursor += 1;
                return Some(Ok(fragment.clone()));
            }
            if matches!(state.outcome, Outcome::Pending) {
                state = self
                    .sink
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            self.done = true;
            return match &state.outcome {
                Outcome::Rejected(error) => Some(Err(error.clone())),
                _ => None,
            };
        }
    }
}
