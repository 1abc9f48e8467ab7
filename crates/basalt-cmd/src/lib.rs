//! # BASALT Command
//!
//! Command recording and submission on top of `basalt-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         basalt-cmd                           │
//! │                                                              │
//! │   CommandList ──owns──▶ StateTracker ──batch──▶ Barriers     │
//! │        │                     ▲                               │
//! │        │ close               │ begin states                  │
//! │        ▼                     │                               │
//! │   CommandQueue ──signal──▶ CompletionPromise                 │
//! │        │                                                     │
//! │        ├── staging: map_staged · read_bytes · write_bytes    │
//! │        └── query:   QueryPool ──resolve──▶ QueryResolve      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lists are recorded on one thread each. Two lists may be recorded in
//! parallel when the second is seeded from the first one's state list.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod list;
pub mod query;
pub mod queue;
pub mod staging;
pub mod tracker;

pub use list::CommandList;
pub use query::{QueryBlock, QueryPool, QueryResolve, QueryToken};
pub use queue::{CommandQueue, QueueConfig};
pub use staging::{map_staged, read_bytes, write_bytes, StagedMapping};
pub use tracker::{
    DecayPromotion, PromotionPolicy, ReadOnlyPromotion, RecordStatus, StateList, StateListEntry,
    StateRecord, StateTracker, TrackerConfig, TrackerStats, TransitionFlags, TransitionOutcome,
};
