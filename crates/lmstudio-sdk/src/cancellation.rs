//! One-shot signals used to propagate caller cancellation to channels.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LmStudioError;

type Subscriber = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct EventState {
    emitted: bool,
    subscribers: Vec<Subscriber>,
}

/// One-shot, multi-subscriber signal.
///
/// Subscribers registered before emission run when it is emitted; those
/// registered afterwards run immediately on the subscribing thread.
#[derive(Clone)]
pub struct BufferedEvent {
    state: Arc<Mutex<EventState>>,
}

/// The emitting side of a [`BufferedEvent`].
#[derive(Clone)]
pub struct EventEmitter {
    state: Arc<Mutex<EventState>>,
}

impl BufferedEvent {
    pub fn create() -> (BufferedEvent, EventEmitter) {
        let state = Arc::new(Mutex::new(EventState::default()));
        (
            BufferedEvent {
                state: state.clone(),
            },
            EventEmitter { state },
        )
    }

    pub fn subscribe(&self, subscriber: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.emitted {
            drop(state);
            subscriber();
        } else {
            state.subscribers.push(Box::new(subscriber));
        }
    }

    pub fn is_emitted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emitted
    }
}

impl EventEmitter {
    /// Fires the event. Only the first call runs subscribers; returns whether this was it.
    pub fn emit(&self) -> bool {
        let subscribers = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.emitted {
                return false;
            }
            state.emitted = true;
            std::mem::take(&mut state.subscribers)
        };
        for subscriber in subscribers {
            subscriber();
        }
        true
    }
}

impl std::fmt::Debug for BufferedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedEvent")
            .field("emitted", &self.is_emitted())
            .finish()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

/// Caller-held handle that aborts an operation through its [`AbortSignal`].
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
    emitter: EventEmitter,
}

impl AbortController {
    pub fn new() -> Self {
        let (event, emitter) = BufferedEvent::create();
        Self {
            signal: AbortSignal { event },
            emitter,
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.emitter.emit();
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    event: BufferedEvent,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.event.is_emitted()
    }

    /// Runs `listener` on abort, or right away if already aborted.
    pub fn on_abort(&self, listener: impl FnOnce() + Send + 'static) {
        self.event.subscribe(listener);
    }
}

/// Result of a cancellable operation
#[derive(Debug, Clone, PartialEq)]
pub enum CancellableResult<T> {
    /// Operation completed successfully
    Completed(T),
    /// Operation was cancelled
    Cancelled,
}

impl<T> CancellableResult<T> {
    /// Check if the operation was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CancellableResult::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            CancellableResult::Completed(value) => Some(value),
            CancellableResult::Cancelled => None,
        }
    }

    /// Convert to Result, mapping Cancelled to [`LmStudioError::Cancelled`]
    pub fn into_result(self) -> Result<T, LmStudioError> {
        self.completed().ok_or(LmStudioError::Cancelled)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CancellableResult<U> {
        match self {
            CancellableResult::Completed(value) => CancellableResult::Completed(f(value)),
            CancellableResult::Cancelled => CancellableResult::Cancelled,
        }
    }
}
