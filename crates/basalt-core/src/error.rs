//! # BASALT Error Handling
//!
//! Error types shared by every BASALT crate.
//!
//! Errors fall into three categories (see [`ErrorKind`]):
//! - **Configuration**: the caller asked for something the resource, device
//!   or binding layout does not allow
//! - **Ordering**: operations were issued in an order the protocol forbids
//! - **Device**: the backend rejected a submission or lost the device
//!
//! Configuration and ordering errors are raised synchronously by the call
//! that caused them. Device errors usually surface through a failed
//! [`CompletionPromise`](crate::sync::CompletionPromise).

use alloc::string::String;
use core::fmt;

use crate::state::ResourceState;
use crate::types::{Capabilities, ListKind, ResourceId};

// =============================================================================
// RESULT TYPE
// =============================================================================

/// BASALT Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// DEVICE ERROR PAYLOAD
// =============================================================================

/// Structured payload of a backend failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Backend status code
    pub code: i32,
    /// Backend message
    pub message: String,
}

impl DeviceError {
    /// Create a device error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device error {:#x}: {}", self.code, self.message)
    }
}

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad heap/state combination, binding mismatch, out-of-range offset
    Configuration,
    /// Protocol violation between operations
    Ordering,
    /// Backend failure
    Device,
}

/// BASALT unified error type
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// State not allowed for this resource
    StateForbidden {
        /// Resource
        resource: ResourceId,
        /// Requested state
        requested: ResourceState,
        /// Rule that was violated
        reason: &'static str,
    },
    /// List or queue tier lacks a capability
    MissingCapability {
        /// Tier in use
        kind: ListKind,
        /// Capabilities required
        required: Capabilities,
    },
    /// Queue cannot execute a list of this tier
    TierMismatch {
        /// Queue tier
        queue: ListKind,
        /// List tier
        list: ListKind,
    },
    /// Optional device feature missing
    FeatureNotSupported(&'static str),
    /// Resource is not in the arena (already destroyed)
    UnknownResource(ResourceId),
    /// Resource memory cannot be mapped by the CPU
    NotCpuVisible(ResourceId),
    /// Range exceeds the resource
    OutOfBounds {
        /// Range start
        offset: u64,
        /// Range length
        size: u64,
        /// Resource size
        limit: u64,
    },
    /// Binding slot outside the table partition
    SlotOutOfRange {
        /// Requested offset
        offset: u16,
        /// Partition capacity
        capacity: u16,
    },
    /// Shared slot table has no room left
    SlotTableFull {
        /// Table capacity
        capacity: u16,
    },
    /// No bind point with this name
    UnknownBindPoint(String),
    /// View does not fit the bind point
    BindingMismatch {
        /// Bind point name
        name: String,
        /// Rule that was violated
        reason: &'static str,
    },
    /// Query token does not belong to this pool
    InvalidQueryToken,
    /// Invalid argument
    InvalidParameter(&'static str),

    // =========================================================================
    // Ordering Errors
    // =========================================================================
    /// Resource used while a split barrier is still open
    SplitBarrierOpen(ResourceId),
    /// Split end without a matching begin
    SplitBarrierMissing(ResourceId),
    /// Recording into a closed list
    ListClosed,
    /// Typed promise result taken twice
    ResultExtracted,
    /// Query pool resolved before finalization
    QueriesNotFinalized,
    /// Query pool finalized twice, or allocated into after finalization
    QueriesFinalized,

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// Backend failure
    Device(DeviceError),
    /// No usable device
    NoDevice,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SplitBarrierOpen(_)
            | Self::SplitBarrierMissing(_)
            | Self::ListClosed
            | Self::ResultExtracted
            | Self::QueriesNotFinalized
            | Self::QueriesFinalized => ErrorKind::Ordering,
            Self::Device(_) | Self::NoDevice => ErrorKind::Device,
            _ => ErrorKind::Configuration,
        }
    }

    /// Shorthand for a backend failure
    pub fn device(code: i32, message: impl Into<String>) -> Self {
        Self::Device(DeviceError::new(code, message))
    }
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Configuration
            Self::StateForbidden {
                resource,
                requested,
                reason,
            } => write!(f, "{resource} cannot enter {requested:?}: {reason}"),
            Self::MissingCapability { kind, required } => {
                write!(f, "{kind} tier lacks {required:?}")
            }
            Self::TierMismatch { queue, list } => {
                write!(f, "{queue} queue cannot execute a {list} list")
            }
            Self::FeatureNotSupported(what) => write!(f, "device does not support {what}"),
            Self::UnknownResource(id) => write!(f, "{id} is not alive"),
            Self::NotCpuVisible(id) => write!(f, "{id} is not CPU-visible"),
            Self::OutOfBounds {
                offset,
                size,
                limit,
            } => write!(f, "range {offset}+{size} exceeds {limit} bytes"),
            Self::SlotOutOfRange { offset, capacity } => {
                write!(f, "slot {offset} outside partition of {capacity}")
            }
            Self::SlotTableFull { capacity } => write!(f, "slot table full ({capacity})"),
            Self::UnknownBindPoint(name) => write!(f, "no bind point named `{name}`"),
            Self::BindingMismatch { name, reason } => {
                write!(f, "cannot bind `{name}`: {reason}")
            }
            Self::InvalidQueryToken => write!(f, "query token not from this pool"),
            Self::InvalidParameter(what) => write!(f, "invalid parameter: {what}"),

            // Ordering
            Self::SplitBarrierOpen(id) => write!(f, "{id} used with an open split barrier"),
            Self::SplitBarrierMissing(id) => write!(f, "{id} ends a split barrier never begun"),
            Self::ListClosed => write!(f, "command list is closed"),
            Self::ResultExtracted => write!(f, "promise result already extracted"),
            Self::QueriesNotFinalized => write!(f, "query pool not finalized"),
            Self::QueriesFinalized => write!(f, "query pool already finalized"),

            // Device
            Self::Device(err) => write!(f, "{err}"),
            Self::NoDevice => write!(f, "no usable device"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
