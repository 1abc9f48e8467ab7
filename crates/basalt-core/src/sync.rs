//! # Completion Promises
//!
//! CPU-side handles on GPU completion.
//!
//! A [`CompletionPromise`] pairs a queue timeline value with a wait handle.
//! It resolves once the queue's completed value reaches the target, or fails
//! with the device error that prevented it.
//!
//! ## Cooperative continuations
//!
//! There is no background thread. Continuations registered with
//! [`CompletionPromise::on_complete`] run synchronously on whichever thread
//! first observes resolution, through [`CompletionPromise::state`] or
//! [`CompletionPromise::wait`]. A continuation registered on an already
//! resolved promise runs immediately on the registering thread. A promise
//! nobody polls never runs its continuations.
//!
//! ## Typed results
//!
//! [`Promise<T>`] couples a completion with a value produced once the GPU is
//! done (for example bytes copied back from a readback buffer). The value
//! can be taken exactly once; a second [`Promise::get`] fails with
//! [`Error::ResultExtracted`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::{Mutex, Once};

use crate::error::{Error, Result};
use crate::hal::{RawQueue, RawWaitHandle};

// =============================================================================
// PROMISE STATE
// =============================================================================

/// Observable state of a promise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState {
    /// GPU has not reached the target yet
    Pending,
    /// GPU reached the target
    Completed,
    /// Submission or wait failed
    Failed(Error),
}

impl PromiseState {
    /// Check for resolution, successful or not
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Convert into a result, treating `Pending` as success
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

type Continuation = Box<dyn FnOnce(&PromiseState) + Send + 'static>;

enum Source {
    Timeline {
        queue: Arc<dyn RawQueue>,
        handle: Box<dyn RawWaitHandle>,
    },
    Ready,
    Failed(Error),
}

struct PromiseShared {
    target: u64,
    source: Source,
    resolved: Once<PromiseState>,
    continuations: Mutex<Vec<Continuation>>,
}

impl PromiseShared {
    /// Record the final state and run pending continuations
    fn resolve(&self, state: PromiseState) -> PromiseState {
        let (state, pending) = {
            let mut continuations = self.continuations.lock();
            let state = self.resolved.call_once(|| state).clone();
            (state, core::mem::take(&mut *continuations))
        };
        for continuation in pending {
            continuation(&state);
        }
        state
    }
}

// =============================================================================
// COMPLETION PROMISE
// =============================================================================

/// Promise for a queue timeline value
///
/// Clones share resolution state and continuations.
#[derive(Clone)]
pub struct CompletionPromise {
    inner: Arc<PromiseShared>,
}

impl CompletionPromise {
    fn from_source(target: u64, source: Source) -> Self {
        Self {
            inner: Arc::new(PromiseShared {
                target,
                source,
                resolved: Once::new(),
                continuations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Promise for `target` on `queue`
    ///
    /// If the backend cannot produce a wait handle the promise is failed.
    pub fn for_value(queue: Arc<dyn RawQueue>, target: u64) -> Self {
        match queue.completion_handle(target) {
            Ok(handle) => Self::from_source(target, Source::Timeline { queue, handle }),
            Err(err) => Self::failed(err),
        }
    }

    /// Already completed promise
    pub fn completed() -> Self {
        Self::from_source(0, Source::Ready)
    }

    /// Failed promise
    pub fn failed(err: Error) -> Self {
        Self::from_source(0, Source::Failed(err))
    }

    /// Target timeline value, zero for promises not bound to a queue
    pub fn target(&self) -> u64 {
        self.inner.target
    }

    /// Queue this promise waits on
    pub fn queue(&self) -> Option<&Arc<dyn RawQueue>> {
        match &self.inner.source {
            Source::Timeline { queue, .. } => Some(queue),
            _ => None,
        }
    }

    /// Check if this promise waits on `queue`
    pub fn is_on_queue(&self, queue: &Arc<dyn RawQueue>) -> bool {
        self.queue().is_some_and(|own| Arc::ptr_eq(own, queue))
    }

    /// Non-blocking poll
    pub fn state(&self) -> PromiseState {
        if let Some(state) = self.inner.resolved.get() {
            return state.clone();
        }
        match &self.inner.source {
            Source::Ready => self.inner.resolve(PromiseState::Completed),
            Source::Failed(err) => self.inner.resolve(PromiseState::Failed(err.clone())),
            Source::Timeline { queue, handle } => {
                if queue.completed_value() >= self.inner.target {
                    return self.inner.resolve(PromiseState::Completed);
                }
                match handle.poll() {
                    Ok(true) => self.inner.resolve(PromiseState::Completed),
                    Ok(false) => PromiseState::Pending,
                    Err(err) => self.inner.resolve(PromiseState::Failed(err)),
                }
            }
        }
    }

    /// Block until resolved
    ///
    /// Returns at once if the queue already reached the target. The wait has
    /// no timeout.
    pub fn wait(&self) -> PromiseState {
        let state = self.state();
        if state.is_resolved() {
            return state;
        }
        match &self.inner.source {
            Source::Timeline { handle, .. } => match handle.wait() {
                Ok(()) => self.inner.resolve(PromiseState::Completed),
                Err(err) => self.inner.resolve(PromiseState::Failed(err)),
            },
            // Ready and failed sources resolve in `state`
            _ => state,
        }
    }

    /// Run `continuation` once resolved
    ///
    /// Runs immediately if the promise is already resolved.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(&PromiseState) + Send + 'static,
    {
        let ready = {
            let mut continuations = self.inner.continuations.lock();
            match self.inner.resolved.get() {
                Some(state) => Some(state.clone()),
                None => {
                    continuations.push(Box::new(continuation));
                    return;
                }
            }
        };
        if let Some(state) = ready {
            continuation(&state);
        }
    }

    /// Number of continuations waiting
    pub fn pending_continuations(&self) -> usize {
        self.inner.continuations.lock().len()
    }
}

impl fmt::Debug for CompletionPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPromise")
            .field("target", &self.inner.target)
            .field("resolved", &self.inner.resolved.get())
            .finish()
    }
}

// =============================================================================
// TYPED PROMISE
// =============================================================================

enum Stage<T> {
    Ready(T),
    Deferred(Box<dyn FnOnce() -> Result<T> + Send + 'static>),
    Taken,
}

impl<T> Stage<T> {
    fn run(self) -> Result<T> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Deferred(produce) => produce(),
            Self::Taken => Err(Error::ResultExtracted),
        }
    }
}

/// Completion plus a result extracted once
pub struct Promise<T> {
    completion: CompletionPromise,
    stage: Mutex<Stage<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Completed promise holding `value`
    pub fn ready(value: T) -> Self {
        Self::with_value(CompletionPromise::completed(), value)
    }

    /// Value available once `completion` resolves
    pub fn with_value(completion: CompletionPromise, value: T) -> Self {
        Self {
            completion,
            stage: Mutex::new(Stage::Ready(value)),
        }
    }

    /// Value produced by `produce` after `completion` resolves
    pub fn deferred<F>(completion: CompletionPromise, produce: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self {
            completion,
            stage: Mutex::new(Stage::Deferred(Box::new(produce))),
        }
    }

    /// Failed promise
    pub fn failed(err: Error) -> Self {
        Self {
            completion: CompletionPromise::failed(err),
            stage: Mutex::new(Stage::Taken),
        }
    }

    /// Underlying completion
    pub fn completion(&self) -> &CompletionPromise {
        &self.completion
    }

    /// Non-blocking poll
    pub fn state(&self) -> PromiseState {
        self.completion.state()
    }

    /// Block until the completion resolves
    pub fn wait(&self) -> PromiseState {
        self.completion.wait()
    }

    /// Wait, then take the value
    pub fn get(&self) -> Result<T> {
        self.completion.wait().into_result()?;
        let stage = core::mem::replace(&mut *self.stage.lock(), Stage::Taken);
        stage.run()
    }

    /// Transform the value once it is taken
    pub fn map<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let stage = self.stage.into_inner();
        Promise::deferred(self.completion, move || f(stage.run()?))
    }

    /// Chain a second GPU stage
    ///
    /// `next` runs after this promise's value is taken and returns the
    /// promise of the second stage; `get` on the result waits for both.
    pub fn then<U, F>(self, next: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>> + Send + 'static,
    {
        let stage = self.stage.into_inner();
        Promise::deferred(self.completion, move || next(stage.run()?)?.get())
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(CompletionPromise: Send, Sync, Clone);
static_assertions::assert_impl_all!(Promise<alloc::vec::Vec<u8>>: Send, Sync);
