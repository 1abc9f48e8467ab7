//! # Core Types
//!
//! Identities, capability tiers, heap placement and resource flags.

use core::fmt;

// =============================================================================
// RESOURCE IDENTITY
// =============================================================================

/// Stable identity of a resource inside a device's resource arena
///
/// State records and commands refer to resources through this id instead of
/// holding the resource itself, so a record never keeps memory alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Get raw value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

// =============================================================================
// CAPABILITY TIERS
// =============================================================================

bitflags::bitflags! {
    /// Operations a list or queue is able to record or execute
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Copy and resolve operations
        const COPY = 1 << 0;
        /// Compute dispatch and binding tables
        const COMPUTE = 1 << 1;
        /// Graphics work
        const GRAPHICS = 1 << 2;
    }
}

/// Capability tier of a command list or queue
///
/// Tiers are ordered `Copy ⊂ Compute ⊂ Direct`: a `Direct` list can record
/// everything a `Compute` list can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Copy engine only
    Copy,
    /// Compute and copy
    Compute,
    /// Everything
    Direct,
}

impl ListKind {
    /// Capabilities of this tier
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Copy => Capabilities::COPY,
            Self::Compute => Capabilities::COPY.union(Capabilities::COMPUTE),
            Self::Direct => Capabilities::all(),
        }
    }

    /// Check whether this tier can do everything `other` can
    pub fn supports(self, other: ListKind) -> bool {
        self.capabilities().contains(other.capabilities())
    }

    /// Check a capability requirement
    pub fn has(self, required: Capabilities) -> bool {
        self.capabilities().contains(required)
    }

    /// Short name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Compute => "compute",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// HEAP PLACEMENT
// =============================================================================

/// Heap placement class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// Device-local memory
    Default,
    /// CPU-written, GPU-read memory
    Upload,
    /// GPU-written, CPU-read memory
    Readback,
    /// Explicit page and pool properties
    Custom,
}

/// CPU page property of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuPageProperty {
    /// Filled from the device
    Unknown,
    /// No CPU access
    NotAvailable,
    /// Uncached, write-combined
    WriteCombine,
    /// Cached
    WriteBack,
}

/// Memory pool preference of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryPool {
    /// Filled from the device
    Unknown,
    /// System memory
    PreferCpu,
    /// Video memory
    PreferGpu,
}

/// Full heap properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapProperties {
    /// Placement class
    pub heap_type: HeapType,
    /// CPU page property
    pub cpu_page: CpuPageProperty,
    /// Pool preference
    pub pool: MemoryPool,
}

impl HeapProperties {
    /// Properties of a placement class, to be filled by the device
    pub const fn of(heap_type: HeapType) -> Self {
        Self {
            heap_type,
            cpu_page: CpuPageProperty::Unknown,
            pool: MemoryPool::Unknown,
        }
    }

    /// Custom heap with explicit properties
    pub const fn custom(cpu_page: CpuPageProperty, pool: MemoryPool) -> Self {
        Self {
            heap_type: HeapType::Custom,
            cpu_page,
            pool,
        }
    }

    /// Check if the CPU can map this heap
    pub fn is_cpu_visible(&self) -> bool {
        match self.heap_type {
            HeapType::Upload | HeapType::Readback => true,
            HeapType::Default => false,
            HeapType::Custom => matches!(
                self.cpu_page,
                CpuPageProperty::WriteCombine | CpuPageProperty::WriteBack
            ),
        }
    }
}

impl Default for HeapProperties {
    fn default() -> Self {
        Self::of(HeapType::Default)
    }
}

bitflags::bitflags! {
    /// Heap creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeapFlags: u32 {
        /// Shared across processes
        const SHARED = 0x1;
        /// Deny buffers
        const DENY_BUFFERS = 0x4;
        /// Allow display scanout
        const ALLOW_DISPLAY = 0x8;
        /// Shared across adapters
        const SHARED_CROSS_ADAPTER = 0x20;
        /// Deny render target and depth textures
        const DENY_RT_DS_TEXTURES = 0x40;
        /// Deny other textures
        const DENY_NON_RT_DS_TEXTURES = 0x80;
        /// Allow shader atomics
        const ALLOW_SHADER_ATOMICS = 0x400;
    }
}

bitflags::bitflags! {
    /// Resource usage permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        /// Render target usage
        const ALLOW_RENDER_TARGET = 0x1;
        /// Depth-stencil usage
        const ALLOW_DEPTH_STENCIL = 0x2;
        /// Unordered (read-write) access from shaders
        const ALLOW_UNORDERED_ACCESS = 0x4;
        /// No shader reads
        const DENY_SHADER_RESOURCE = 0x8;
        /// Cross-adapter sharing
        const ALLOW_CROSS_ADAPTER = 0x10;
        /// Concurrent access from several queues
        const ALLOW_SIMULTANEOUS_ACCESS = 0x20;
        /// Video decode only
        const VIDEO_DECODE_REFERENCE_ONLY = 0x40;
    }
}

// =============================================================================
// RESOURCE SHAPE
// =============================================================================

/// Texel and element formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// No format (structured data)
    Unknown,
    /// 32-bit typeless, used for raw views
    R32Typeless,
    /// 32-bit unsigned integer
    R32Uint,
    /// 32-bit float
    R32Float,
    /// 8-bit RGBA, normalized
    Rgba8Unorm,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float RGBA
    Rgba32Float,
    /// 32-bit float depth
    D32Float,
}

impl Format {
    /// Bytes per element, zero for `Unknown`
    pub const fn bytes_per_element(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R32Typeless | Self::R32Uint | Self::R32Float | Self::Rgba8Unorm => 4,
            Self::D32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Dimension of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    /// Linear buffer
    Buffer,
    /// 2D texture (array)
    Texture2D {
        /// Width in texels
        width: u32,
        /// Height in texels
        height: u32,
        /// Array layers
        layers: u16,
        /// Mip levels
        mips: u8,
        /// Texel format
        format: Format,
    },
}

impl ResourceDimension {
    /// Check if this is a buffer
    pub const fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer)
    }
}

/// CPU access requested when mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    /// Read only
    Read,
    /// Write only, previous content is not fetched
    Write,
    /// Read and write
    ReadWrite,
}

impl MapAccess {
    /// Check if data must be fetched on map
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Check if data must be written back on unmap
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

static_assertions::assert_impl_all!(ResourceId: Send, Sync, Copy);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(ListKind::Direct.supports(ListKind::Compute));
        assert!(ListKind::Compute.supports(ListKind::Copy));
        assert!(ListKind::Direct.supports(ListKind::Copy));
        assert!(!ListKind::Copy.supports(ListKind::Compute));
        assert!(!ListKind::Compute.supports(ListKind::Direct));
    }

    #[test]
    fn test_capability_checks() {
        assert!(ListKind::Copy.has(Capabilities::COPY));
        assert!(!ListKind::Copy.has(Capabilities::COMPUTE));
        assert!(ListKind::Compute.has(Capabilities::COMPUTE));
        assert!(!ListKind::Compute.has(Capabilities::GRAPHICS));
    }

    #[test]
    fn test_cpu_visibility() {
        assert!(HeapProperties::of(HeapType::Upload).is_cpu_visible());
        assert!(HeapProperties::of(HeapType::Readback).is_cpu_visible());
        assert!(!HeapProperties::of(HeapType::Default).is_cpu_visible());
        let custom = HeapProperties::custom(CpuPageProperty::NotAvailable, MemoryPool::PreferGpu);
        assert!(!custom.is_cpu_visible());
        let custom = HeapProperties::custom(CpuPageProperty::WriteBack, MemoryPool::PreferCpu);
        assert!(custom.is_cpu_visible());
    }
}
