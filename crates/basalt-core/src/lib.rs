//! # BASALT Core
//!
//! Foundational types for the BASALT GPU coordination layer.
//!
//! This crate holds everything the command and binding crates share:
//! resource states and flags, the device registry, resources and their
//! arena, the backend traits, and the completion promises that turn a
//! queue's timeline into something the CPU can wait on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          basalt-core                             │
//! │  ┌────────────┐  ┌─────────────┐  ┌────────────┐  ┌───────────┐  │
//! │  │  Device    │  │  Resource   │  │  Promise   │  │  Error    │  │
//! │  │  Registry  │─▶│  + Arena    │  │  (sync)    │  │  Kinds    │  │
//! │  └─────┬──────┘  └──────┬──────┘  └─────┬──────┘  └───────────┘  │
//! │        │                │               │                        │
//! │  ┌─────▼────────────────▼───────────────▼──────────────────────┐  │
//! │  │        hal: Instance · RawDevice · RawQueue · RawMemory      │  │
//! │  └─────────────────────────────┬───────────────────────────────┘  │
//! │                                │                                 │
//! │                        ┌───────▼───────┐                         │
//! │                        │  soft backend │ (feature "soft")        │
//! │                        └───────────────┘                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod arena;
pub mod command;
pub mod device;
pub mod error;
pub mod hal;
pub mod resource;
pub mod state;
pub mod sync;
pub mod types;

#[cfg(feature = "soft")]
pub mod soft;

// Re-exports for convenience
pub use arena::{ArenaEntry, ResourceArena};
pub use command::{Barrier, BarrierKind, Command};
pub use device::{
    AdapterInfo, Architecture, Device, DeviceRegistry, OptionalSupport, RegistryConfig,
    ShaderDataTypes,
};
pub use error::{DeviceError, Error, ErrorKind, Result};
pub use hal::{Descriptor, QueryKind, SamplerDesc, ViewShape};
pub use resource::{BufferDesc, Mapping, Resource, TextureDesc};
pub use state::ResourceState;
pub use sync::{CompletionPromise, Promise, PromiseState};
pub use types::*;
