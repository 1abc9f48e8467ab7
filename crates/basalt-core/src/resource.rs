//! # Resources
//!
//! GPU memory objects with a declared state.
//!
//! A [`Resource`] is a shared handle: clones refer to the same memory, and
//! the memory is released when the last clone drops. The arena entry goes
//! away at the same moment, so lists that still name the resource see it as
//! unknown instead of touching freed memory.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};

use crate::arena::{ArenaEntry, ResourceArena};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::hal::{MemoryDesc, RawMemory};
use crate::state::ResourceState;
use crate::types::{
    Format, HeapFlags, HeapProperties, HeapType, MapAccess, ResourceDimension, ResourceFlags,
    ResourceId,
};

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Buffer creation parameters
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Heap placement
    pub heap: HeapProperties,
    /// Heap flags
    pub heap_flags: HeapFlags,
    /// Usage flags
    pub flags: ResourceFlags,
    /// Initial state, ignored for upload and readback heaps
    pub initial_state: ResourceState,
    /// Debug label
    pub label: Option<String>,
}

impl BufferDesc {
    /// Device-local buffer in the common state
    pub fn new(size: u64) -> Self {
        Self {
            size,
            heap: HeapProperties::of(HeapType::Default),
            heap_flags: HeapFlags::empty(),
            flags: ResourceFlags::empty(),
            initial_state: ResourceState::COMMON,
            label: None,
        }
    }

    /// Set the placement class
    pub fn with_heap_type(mut self, heap_type: HeapType) -> Self {
        self.heap = HeapProperties::of(heap_type);
        self
    }

    /// Set explicit heap properties
    pub fn with_heap(mut self, heap: HeapProperties) -> Self {
        self.heap = heap;
        self
    }

    /// Set usage flags
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set initial state
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    /// Set debug label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// 2D texture creation parameters
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Array layers
    pub layers: u16,
    /// Mip levels
    pub mips: u8,
    /// Texel format
    pub format: Format,
    /// Heap placement
    pub heap: HeapProperties,
    /// Usage flags
    pub flags: ResourceFlags,
    /// Initial state
    pub initial_state: ResourceState,
    /// Debug label
    pub label: Option<String>,
}

impl TextureDesc {
    /// Single-layer, single-mip device-local texture
    pub fn new(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            layers: 1,
            mips: 1,
            format,
            heap: HeapProperties::of(HeapType::Default),
            flags: ResourceFlags::empty(),
            initial_state: ResourceState::COMMON,
            label: None,
        }
    }

    /// Set usage flags
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set mip count
    pub fn with_mips(mut self, mips: u8) -> Self {
        self.mips = mips.max(1);
        self
    }

    /// Set initial state
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    fn byte_size(&self) -> u64 {
        let bpe = u64::from(self.format.bytes_per_element());
        let (mut w, mut h) = (u64::from(self.width), u64::from(self.height));
        let mut total = 0;
        for _ in 0..self.mips {
            total += w * h * bpe;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total * u64::from(self.layers)
    }
}

// =============================================================================
// RESOURCE
// =============================================================================

struct ResourceShared {
    id: ResourceId,
    size: u64,
    heap: HeapProperties,
    flags: ResourceFlags,
    dimension: ResourceDimension,
    label: Option<String>,
    raw: Arc<dyn RawMemory>,
    arena: Arc<ResourceArena>,
}

impl Drop for ResourceShared {
    fn drop(&mut self) {
        self.arena.remove(self.id);
    }
}

/// Shared handle to GPU memory
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceShared>,
}

/// State a freshly created resource rests in
///
/// Upload memory is always readable and readback memory always a copy
/// destination, whatever the caller asked for.
fn creation_state(heap_type: HeapType, requested: ResourceState) -> Result<ResourceState> {
    match heap_type {
        HeapType::Upload => Ok(ResourceState::GENERIC_READ),
        HeapType::Readback => Ok(ResourceState::COPY_DEST),
        _ if requested.is_invalid() => Err(Error::InvalidParameter("initial state is INVALID")),
        _ => Ok(requested),
    }
}

impl Resource {
    /// Create a buffer
    pub fn buffer(device: &Device, desc: &BufferDesc) -> Result<Self> {
        if desc.size == 0 {
            return Err(Error::InvalidParameter("zero-sized buffer"));
        }
        Self::create(
            device,
            desc.size,
            desc.heap,
            desc.heap_flags,
            desc.flags,
            ResourceDimension::Buffer,
            desc.initial_state,
            desc.label.clone(),
        )
    }

    /// Create a 2D texture
    pub fn texture(device: &Device, desc: &TextureDesc) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(Error::InvalidParameter("empty texture extent"));
        }
        if desc.format == Format::Unknown {
            return Err(Error::InvalidParameter("texture needs a format"));
        }
        if matches!(desc.heap.heap_type, HeapType::Upload | HeapType::Readback) {
            return Err(Error::InvalidParameter("textures cannot live in upload or readback heaps"));
        }
        let dimension = ResourceDimension::Texture2D {
            width: desc.width,
            height: desc.height,
            layers: desc.layers,
            mips: desc.mips,
            format: desc.format,
        };
        Self::create(
            device,
            desc.byte_size(),
            desc.heap,
            HeapFlags::empty(),
            desc.flags,
            dimension,
            desc.initial_state,
            desc.label.clone(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        device: &Device,
        size: u64,
        heap: HeapProperties,
        heap_flags: HeapFlags,
        flags: ResourceFlags,
        dimension: ResourceDimension,
        initial_state: ResourceState,
        label: Option<String>,
    ) -> Result<Self> {
        let heap = device.resolve_heap_properties(heap);
        let resting = creation_state(heap.heap_type, initial_state)?;
        let arena = device.arena().clone();
        let id = arena.reserve();

        let raw = device.raw().create_memory(&MemoryDesc {
            resource: id,
            size,
            heap,
            heap_flags,
            flags,
            dimension,
        })?;

        arena.insert(
            id,
            ArenaEntry {
                resting,
                pending_split: None,
                heap: heap.heap_type,
                flags,
                dimension,
                size,
            },
        );
        log::trace!("created {} ({} bytes, {:?}, {:?})", id, size, heap.heap_type, resting);

        Ok(Self {
            inner: Arc::new(ResourceShared {
                id,
                size,
                heap,
                flags,
                dimension,
                label,
                raw,
                arena,
            }),
        })
    }

    /// Arena identity
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Resolved heap properties
    pub fn heap(&self) -> HeapProperties {
        self.inner.heap
    }

    /// Usage flags
    pub fn flags(&self) -> ResourceFlags {
        self.inner.flags
    }

    /// Shape
    pub fn dimension(&self) -> ResourceDimension {
        self.inner.dimension
    }

    /// Debug label
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Backend memory
    pub fn raw(&self) -> &Arc<dyn RawMemory> {
        &self.inner.raw
    }

    /// Advisory state between lists
    pub fn resting_state(&self) -> ResourceState {
        self.inner
            .arena
            .resting(self.inner.id)
            .unwrap_or(ResourceState::INVALID)
    }

    /// Check if the CPU can map this resource directly
    pub fn is_cpu_visible(&self) -> bool {
        self.inner.heap.is_cpu_visible()
    }

    /// Check if shaders may read this resource
    pub fn can_bind_shader(&self) -> bool {
        !self.inner.flags.contains(ResourceFlags::DENY_SHADER_RESOURCE)
    }

    /// Check if shaders may write this resource
    pub fn allows_unordered_access(&self) -> bool {
        self.inner.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS)
    }

    /// Check if two handles refer to the same memory
    pub fn same(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check that a byte range lies inside the resource
    pub fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.inner.size => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset,
                size,
                limit: self.inner.size,
            }),
        }
    }

    /// Map a byte range of CPU-visible memory
    ///
    /// GPU-only memory has to go through a queue-backed staged map instead.
    pub fn map(&self, offset: u64, size: u64, access: MapAccess) -> Result<Mapping> {
        if !self.is_cpu_visible() {
            return Err(Error::NotCpuVisible(self.inner.id));
        }
        self.check_range(offset, size)?;
        let len = usize::try_from(size).map_err(|_| Error::InvalidParameter("mapping too large"))?;

        let mut data = vec![0u8; len];
        if access.reads() {
            self.inner.raw.read(offset, &mut data)?;
        }
        Ok(Mapping {
            resource: self.clone(),
            offset,
            data,
            access,
            committed: false,
        })
    }

    /// Map the whole resource
    pub fn map_all(&self, access: MapAccess) -> Result<Mapping> {
        self.map(0, self.inner.size, access)
    }
}

impl Device {
    /// Create a buffer on this device
    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<Resource> {
        Resource::buffer(self, desc)
    }

    /// Create a 2D texture on this device
    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Resource> {
        Resource::texture(self, desc)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("heap", &self.inner.heap.heap_type)
            .field("label", &self.inner.label)
            .finish()
    }
}

// =============================================================================
// MAPPING
// =============================================================================

/// CPU view of a mapped byte range
///
/// Write mappings are flushed back to the resource on [`Mapping::commit`] or
/// on drop.
pub struct Mapping {
    resource: Resource,
    offset: u64,
    data: Vec<u8>,
    access: MapAccess,
    committed: bool,
}

impl Mapping {
    /// Mapped resource
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Offset of the range
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flush writes and unmap
    pub fn commit(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        if self.committed || !self.access.writes() {
            self.committed = true;
            return Ok(());
        }
        self.committed = true;
        self.resource.raw().write(self.offset, &self.data)
    }
}

impl Deref for Mapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Mapping {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("unmap of {} failed: {}", self.resource.id(), err);
        }
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("resource", &self.resource.id())
            .field("offset", &self.offset)
            .field("len", &self.data.len())
            .field("access", &self.access)
            .finish()
    }
}

static_assertions::assert_impl_all!(Resource: Send, Sync, Clone);

#[cfg(all(test, feature = "soft"))]
mod tests {
    use super::*;
    use crate::soft::SoftInstance;

    fn device() -> Device {
        SoftInstance::new().open_device()
    }

    #[test]
    fn test_upload_and_readback_fixed_states() {
        let device = device();
        let upload = Resource::buffer(
            &device,
            &BufferDesc::new(64)
                .with_heap_type(HeapType::Upload)
                .with_state(ResourceState::COPY_DEST),
        )
        .unwrap();
        assert_eq!(upload.resting_state(), ResourceState::GENERIC_READ);

        let readback =
            Resource::buffer(&device, &BufferDesc::new(64).with_heap_type(HeapType::Readback)).unwrap();
        assert_eq!(readback.resting_state(), ResourceState::COPY_DEST);
    }

    #[test]
    fn test_map_requires_cpu_visible() {
        let device = device();
        let buffer = Resource::buffer(&device, &BufferDesc::new(64)).unwrap();
        assert_eq!(
            buffer.map(0, 16, MapAccess::Read).unwrap_err(),
            Error::NotCpuVisible(buffer.id())
        );
    }

    #[test]
    fn test_map_write_back_on_drop() {
        let device = device();
        let upload =
            Resource::buffer(&device, &BufferDesc::new(16).with_heap_type(HeapType::Upload)).unwrap();
        {
            let mut map = upload.map(4, 4, MapAccess::Write).unwrap();
            map.copy_from_slice(&[1, 2, 3, 4]);
        }
        let map = upload.map_all(MapAccess::Read).unwrap();
        assert_eq!(&map[4..8], &[1, 2, 3, 4]);
        assert_eq!(&map[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_map_out_of_bounds() {
        let device = device();
        let upload =
            Resource::buffer(&device, &BufferDesc::new(16).with_heap_type(HeapType::Upload)).unwrap();
        assert!(matches!(
            upload.map(8, 16, MapAccess::Read),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_drop_removes_arena_entry() {
        let device = device();
        let buffer = Resource::buffer(&device, &BufferDesc::new(64)).unwrap();
        let id = buffer.id();
        let clone = buffer.clone();
        drop(buffer);
        assert!(device.arena().contains(id));
        drop(clone);
        assert!(!device.arena().contains(id));
    }
}
