//! # Command Queues
//!
//! A queue submits closed lists and owns a monotonically increasing fence
//! counter. Every submission batch ends with a signal of the next counter
//! value, and the returned [`CompletionPromise`] resolves once the backend
//! timeline reaches it.
//!
//! ```text
//!   execute(list) ──▶ close ──▶ submit ──▶ settle resting states ──▶ signal(n)
//!                                                                       │
//!                                          CompletionPromise(n) ◀───────┘
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use basalt_core::hal::RawQueue;
use basalt_core::{
    CompletionPromise, Device, Error, ErrorKind, ListKind, OptionalSupport, PromiseState, Result,
};

use crate::list::CommandList;
use crate::tracker::{StateList, TrackerConfig};

/// Queue options
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Debug label
    pub label: Option<String>,
    /// Tracking options of lists created by the queue
    pub tracker: TrackerConfig,
}

impl QueueConfig {
    /// Attach a debug label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tracking options for lists created by the queue
    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }
}

/// Submission queue of one tier
#[derive(Debug)]
pub struct CommandQueue {
    device: Device,
    kind: ListKind,
    raw: Arc<dyn RawQueue>,
    /// Last value handed to `signal`
    fence: AtomicU64,
    config: QueueConfig,
}

impl CommandQueue {
    /// Queue with default options
    pub fn new(device: &Device, kind: ListKind) -> Result<Self> {
        Self::with_config(device, kind, QueueConfig::default())
    }

    /// Queue with explicit options
    pub fn with_config(device: &Device, kind: ListKind, config: QueueConfig) -> Result<Self> {
        let raw = device.raw().create_queue(kind)?;
        log::info!("{}: created {} queue", device.info().name, kind);
        Ok(Self {
            device: device.clone(),
            kind,
            raw,
            fence: AtomicU64::new(0),
            config,
        })
    }

    /// Tier
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Owning device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Backend queue
    pub fn raw(&self) -> &Arc<dyn RawQueue> {
        &self.raw
    }

    /// Debug label
    pub fn label(&self) -> Option<&str> {
        self.config.label.as_deref()
    }

    /// Last value signaled on the timeline
    pub fn last_signaled(&self) -> u64 {
        self.fence.load(Ordering::Acquire)
    }

    /// Last value the timeline completed
    pub fn completed_value(&self) -> u64 {
        self.raw.completed_value()
    }

    // =========================================================================
    // LISTS
    // =========================================================================

    /// New list for this queue's tier
    ///
    /// With `previous`, the new list starts from the previous list's final
    /// states, so a recorded-but-not-executed list can be continued.
    pub fn create_list(&self, previous: Option<&CommandList>) -> CommandList {
        self.create_list_of(self.kind, previous)
    }

    /// New list of a lower (or equal) tier
    pub fn create_list_of(&self, kind: ListKind, previous: Option<&CommandList>) -> CommandList {
        let config = self.config.tracker.clone();
        match previous {
            Some(prev) => {
                let begin: StateList = prev.generate_state_list();
                CommandList::with_begin_states(&self.device, kind, begin, config)
            }
            None => CommandList::with_config(&self.device, kind, config),
        }
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Close and submit one list
    pub fn execute(&self, list: &mut CommandList) -> Result<CompletionPromise> {
        self.execute_all(core::slice::from_mut(list))
    }

    /// Close and submit several lists as one batch with a single signal
    ///
    /// Configuration errors are returned directly. A backend failure during
    /// submission yields a failed promise.
    pub fn execute_all(&self, lists: &mut [CommandList]) -> Result<CompletionPromise> {
        for list in lists.iter() {
            if !self.kind.supports(list.kind()) {
                return Err(Error::TierMismatch {
                    queue: self.kind,
                    list: list.kind(),
                });
            }
            if !list.device().same(&self.device) {
                return Err(Error::InvalidParameter("list recorded for another device"));
            }
        }
        for list in lists.iter_mut() {
            list.close()?;
        }

        for list in lists.iter() {
            if let Err(err) = self.raw.submit(list.commands()) {
                if err.kind() == ErrorKind::Device {
                    log::error!("{} queue submission failed: {}", self.kind, err);
                    return Ok(CompletionPromise::failed(err));
                }
                return Err(err);
            }
            let arena = self.device.arena();
            for entry in list.tracker().settled_states() {
                if !arena.settle(entry.resource, entry.state, entry.pending_split) {
                    log::trace!("{} released before its list executed", entry.resource);
                }
            }
        }

        Ok(self.signal())
    }

    /// Signal the next fence value
    ///
    /// The promise resolves once everything submitted so far completes.
    pub fn signal(&self) -> CompletionPromise {
        let value = self.fence.fetch_add(1, Ordering::AcqRel) + 1;
        match self.raw.signal(value) {
            Ok(()) => CompletionPromise::for_value(self.raw.clone(), value),
            Err(err) => {
                log::error!("{} queue signal {} failed: {}", self.kind, value, err);
                CompletionPromise::failed(err)
            }
        }
    }

    /// Make later work on this queue wait for `promise`
    ///
    /// Waiting on this queue's own promise is a no-op since the queue
    /// executes in order.
    pub fn wait_for(&self, promise: &CompletionPromise) -> Result<()> {
        if promise.is_on_queue(&self.raw) {
            return Ok(());
        }
        match promise.queue() {
            Some(other) => self.raw.wait_for(other.as_ref(), promise.target()),
            None => match promise.state() {
                PromiseState::Failed(err) => Err(err),
                _ => Ok(()),
            },
        }
    }

    /// Signal and block until everything submitted completes
    pub fn wait_idle(&self) -> PromiseState {
        self.signal().wait()
    }

    /// Timestamp ticks per second
    pub fn timestamp_frequency(&self) -> Result<u64> {
        if self.kind == ListKind::Copy && !self.device.supports(OptionalSupport::COPY_QUEUE_TIMESTAMP) {
            return Err(Error::FeatureNotSupported("copy queue timestamps"));
        }
        self.raw.timestamp_frequency()
    }
}

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);
