//! # Backend Interface
//!
//! Traits implemented by a vendor backend. Everything above this module
//! talks to the GPU only through these traits.
//!
//! ```text
//! ┌──────────┐ open  ┌───────────┐ create ┌───────────────────────────────┐
//! │ Instance │──────▶│ RawDevice │───────▶│ RawMemory · RawQueue ·        │
//! └──────────┘       └───────────┘        │ RawQueryHeap · RawBindingTable│
//!                                         └───────────────────────────────┘
//! ```
//!
//! Queues expose a timeline: `signal(n)` makes the queue's completed value
//! reach `n` once previously submitted work is done, and a wait handle for
//! `n` becomes signaled at that point.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use crate::command::Command;
use crate::device::AdapterInfo;
use crate::error::Result;
use crate::types::{
    Format, HeapFlags, HeapProperties, ListKind, ResourceDimension, ResourceFlags, ResourceId,
};

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Memory allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDesc {
    /// Arena identity the memory will back
    pub resource: ResourceId,
    /// Size in bytes
    pub size: u64,
    /// Resolved heap properties
    pub heap: HeapProperties,
    /// Heap flags
    pub heap_flags: HeapFlags,
    /// Usage flags
    pub flags: ResourceFlags,
    /// Shape
    pub dimension: ResourceDimension,
}

/// Query kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// GPU timestamp
    Timestamp,
    /// Occlusion sample count
    Occlusion,
}

impl QueryKind {
    /// Bytes written per query on resolve
    pub const fn result_size(self) -> u64 {
        8
    }
}

/// Sampler filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest texel
    Point,
    /// Bilinear / trilinear
    Linear,
    /// Anisotropic
    Anisotropic,
}

/// Sampler addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Repeat
    Wrap,
    /// Mirror
    Mirror,
    /// Clamp to edge
    Clamp,
    /// Border color
    Border,
}

/// Sampler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    /// Filter
    pub filter: Filter,
    /// Addressing on all axes
    pub address: AddressMode,
    /// Anisotropy limit
    pub max_anisotropy: u8,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Linear,
            address: AddressMode::Wrap,
            max_anisotropy: 1,
        }
    }
}

/// Shape of a shader view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewShape {
    /// Buffer elements
    Buffer {
        /// First element
        first_element: u64,
        /// Element count
        count: u32,
        /// Element stride, zero for typed views
        stride: u32,
        /// Byte-address view
        raw: bool,
    },
    /// 2D texture subresources
    Texture2D {
        /// Most detailed mip
        first_mip: u8,
        /// Mip count
        mip_count: u8,
        /// First array layer
        first_layer: u16,
        /// Layer count
        layer_count: u16,
    },
}

/// One entry of a binding table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Empty slot
    Null,
    /// Constant buffer range
    ConstantBuffer {
        /// Resource
        resource: ResourceId,
        /// Byte offset
        offset: u64,
        /// Byte size
        size: u64,
    },
    /// Read-only view
    ShaderResource {
        /// Resource
        resource: ResourceId,
        /// View format
        format: Format,
        /// View shape
        shape: ViewShape,
    },
    /// Read-write view
    UnorderedAccess {
        /// Resource
        resource: ResourceId,
        /// View format
        format: Format,
        /// View shape
        shape: ViewShape,
    },
    /// Sampler
    Sampler(SamplerDesc),
}

impl Descriptor {
    /// Resource referenced by this descriptor
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            Self::ConstantBuffer { resource, .. }
            | Self::ShaderResource { resource, .. }
            | Self::UnorderedAccess { resource, .. } => Some(*resource),
            Self::Null | Self::Sampler(_) => None,
        }
    }
}

/// Binding table contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingTableDesc {
    /// Buffer and texture descriptors, indexed by slot
    pub resources: Vec<Descriptor>,
    /// Sampler descriptors, indexed by slot
    pub samplers: Vec<Descriptor>,
}

// =============================================================================
// BACKEND TRAITS
// =============================================================================

/// Entry point of a backend
pub trait Instance: Send + Sync {
    /// Adapters in enumeration order
    fn adapters(&self) -> Vec<AdapterInfo>;

    /// Open the adapter at `index`
    fn open(&self, index: usize) -> Result<Arc<dyn RawDevice>>;
}

/// Backend device
pub trait RawDevice: Send + Sync + fmt::Debug {
    /// Allocate memory for a resource
    fn create_memory(&self, desc: &MemoryDesc) -> Result<Arc<dyn RawMemory>>;

    /// Create a queue of a tier
    fn create_queue(&self, kind: ListKind) -> Result<Arc<dyn RawQueue>>;

    /// Create a query heap
    fn create_query_heap(&self, kind: QueryKind, capacity: u32) -> Result<Arc<dyn RawQueryHeap>>;

    /// Create a GPU-visible binding table
    fn create_binding_table(&self, desc: &BindingTableDesc) -> Result<Arc<dyn RawBindingTable>>;
}

/// Backend memory allocation
pub trait RawMemory: Send + Sync + fmt::Debug {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Copy bytes out of the allocation
    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()>;

    /// Copy bytes into the allocation
    fn write(&self, offset: u64, src: &[u8]) -> Result<()>;
}

/// Waitable completion handle for one timeline value
pub trait RawWaitHandle: Send + Sync + fmt::Debug {
    /// Non-blocking check
    ///
    /// `Ok(true)` once signaled, `Ok(false)` while pending, and an error once
    /// the device can no longer reach the value.
    fn poll(&self) -> Result<bool>;

    /// Block until signaled, or fail if the device is lost
    fn wait(&self) -> Result<()>;
}

/// Backend queue with a completion timeline
pub trait RawQueue: Send + Sync + fmt::Debug {
    /// Tier of the queue
    fn kind(&self) -> ListKind;

    /// Submit one batch of commands
    fn submit(&self, commands: &[Command]) -> Result<()>;

    /// Signal `value` once previous work completes
    fn signal(&self, value: u64) -> Result<()>;

    /// Make later work wait until `other` reaches `value`
    fn wait_for(&self, other: &dyn RawQueue, value: u64) -> Result<()>;

    /// Last completed timeline value
    fn completed_value(&self) -> u64;

    /// Handle that signals when the timeline reaches `value`
    fn completion_handle(&self, value: u64) -> Result<Box<dyn RawWaitHandle>>;

    /// Timestamp ticks per second
    fn timestamp_frequency(&self) -> Result<u64>;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

/// Backend query heap
pub trait RawQueryHeap: Send + Sync + fmt::Debug {
    /// Kind of queries
    fn kind(&self) -> QueryKind;

    /// Number of queries
    fn capacity(&self) -> u32;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

/// Backend binding table
pub trait RawBindingTable: Send + Sync + fmt::Debug {
    /// Number of resource slots
    fn resource_slots(&self) -> u32;

    /// Number of sampler slots
    fn sampler_slots(&self) -> u32;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}
