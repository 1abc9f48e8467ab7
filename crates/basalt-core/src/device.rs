//! # Devices
//!
//! Adapter capabilities, opened devices and the process-wide registry.
//!
//! The registry is built once at startup from a backend [`Instance`] and is
//! immutable afterwards. Code that needs a device receives a [`Device`]
//! explicitly; [`DeviceRegistry::install`] only exists for programs that want
//! a single init-once, never-torn-down list.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Once;

use crate::arena::ResourceArena;
use crate::error::{Error, Result};
use crate::hal::{Instance, RawDevice};
use crate::types::{CpuPageProperty, HeapProperties, HeapType, MemoryPool};

// =============================================================================
// CAPABILITY FLAGS
// =============================================================================

bitflags::bitflags! {
    /// Memory architecture of an adapter
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Architecture: u32 {
        /// Tile-based renderer
        const TILED_RENDERER = 1 << 0;
        /// Unified memory
        const UMA = 1 << 1;
        /// Unified memory with coherent CPU caches
        const CACHE_COHERENT_UMA = 1 << 2;
        /// Separate GPU MMU
        const ISOLATED_MMU = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Shader data-type widths supported by an adapter
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderDataTypes: u32 {
        /// 64-bit floats
        const FP64 = 1 << 0;
        /// 64-bit integers
        const INT64 = 1 << 1;
        /// 16-bit floats
        const FP16 = 1 << 2;
        /// 16-bit integers
        const INT16 = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Optional features of an adapter
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptionalSupport: u32 {
        /// Depth bounds test
        const DEPTH_BOUNDS_TEST = 1 << 0;
        /// Timestamps on copy queues
        const COPY_QUEUE_TIMESTAMP = 1 << 1;
        /// Background shader processing
        const BACKGROUND_PROCESSING = 1 << 2;
    }
}

/// Immutable description of an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter name
    pub name: String,
    /// PCI vendor id
    pub vendor_id: u32,
    /// Software rasterizer
    pub software: bool,
    /// Memory architecture
    pub architecture: Architecture,
    /// Shader data types
    pub data_types: ShaderDataTypes,
    /// Optional features
    pub optional: OptionalSupport,
    /// Shader model, as `major * 10 + minor`
    pub shader_model: u32,
    /// Wave (subgroup) width
    pub wave_size: u32,
}

impl AdapterInfo {
    /// Check for unified memory
    pub fn is_uma(&self) -> bool {
        self.architecture.contains(Architecture::UMA)
    }
}

// =============================================================================
// DEVICE
// =============================================================================

struct DeviceShared {
    info: AdapterInfo,
    raw: Arc<dyn RawDevice>,
    arena: Arc<ResourceArena>,
}

/// An opened device
///
/// Cheap to clone; all clones share the backend device and resource arena.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceShared>,
}

impl Device {
    /// Wrap a backend device
    pub fn new(info: AdapterInfo, raw: Arc<dyn RawDevice>) -> Self {
        Self {
            inner: Arc::new(DeviceShared {
                info,
                raw,
                arena: Arc::new(ResourceArena::new()),
            }),
        }
    }

    /// Adapter description
    pub fn info(&self) -> &AdapterInfo {
        &self.inner.info
    }

    /// Backend device
    pub fn raw(&self) -> &Arc<dyn RawDevice> {
        &self.inner.raw
    }

    /// Resource arena of this device
    pub fn arena(&self) -> &Arc<ResourceArena> {
        &self.inner.arena
    }

    /// Check an optional feature
    pub fn supports(&self, feature: OptionalSupport) -> bool {
        self.inner.info.optional.contains(feature)
    }

    /// Check if two handles refer to the same device
    pub fn same(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Heap properties of a standard placement class on this device
    pub fn heap_properties(&self, heap_type: HeapType) -> HeapProperties {
        let uma = self.inner.info.is_uma();
        let coherent = self
            .inner
            .info
            .architecture
            .contains(Architecture::CACHE_COHERENT_UMA);
        let (cpu_page, pool) = match heap_type {
            HeapType::Default => (
                CpuPageProperty::NotAvailable,
                if uma { MemoryPool::PreferCpu } else { MemoryPool::PreferGpu },
            ),
            HeapType::Upload => (
                if coherent { CpuPageProperty::WriteBack } else { CpuPageProperty::WriteCombine },
                MemoryPool::PreferCpu,
            ),
            HeapType::Readback => (CpuPageProperty::WriteBack, MemoryPool::PreferCpu),
            HeapType::Custom => (CpuPageProperty::Unknown, MemoryPool::Unknown),
        };
        HeapProperties {
            heap_type,
            cpu_page,
            pool,
        }
    }

    /// Fill and correct requested heap properties
    ///
    /// Standard classes take the device's properties. Custom heaps are forced
    /// into system memory on unified-memory devices, and a GPU-preferred
    /// custom heap loses CPU access.
    pub fn resolve_heap_properties(&self, requested: HeapProperties) -> HeapProperties {
        if requested.heap_type != HeapType::Custom {
            return self.heap_properties(requested.heap_type);
        }

        let mut props = requested;
        if props.cpu_page == CpuPageProperty::Unknown {
            props.cpu_page = CpuPageProperty::NotAvailable;
        }
        if props.pool == MemoryPool::Unknown {
            props.pool = MemoryPool::PreferGpu;
        }
        if self.inner.info.is_uma() && props.pool != MemoryPool::PreferCpu {
            log::warn!(
                "{}: custom heap forced to system memory on UMA adapter",
                self.inner.info.name
            );
            props.pool = MemoryPool::PreferCpu;
        }
        if props.pool == MemoryPool::PreferGpu && props.cpu_page != CpuPageProperty::NotAvailable {
            log::warn!(
                "{}: GPU-preferred custom heap cannot be CPU-visible",
                self.inner.info.name
            );
            props.cpu_page = CpuPageProperty::NotAvailable;
        }
        props
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.info.name)
            .field("architecture", &self.inner.info.architecture)
            .finish()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry enumeration options
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Keep software adapters
    pub include_software: bool,
}

impl RegistryConfig {
    /// Keep or skip software adapters
    pub fn with_software(mut self, include: bool) -> Self {
        self.include_software = include;
        self
    }
}

/// Ordered list of opened devices
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

static GLOBAL_REGISTRY: Once<DeviceRegistry> = Once::new();

impl DeviceRegistry {
    /// Open every usable adapter of `instance`
    ///
    /// Software adapters are skipped unless the config asks for them.
    /// Adapters that fail to open are skipped with a warning.
    pub fn enumerate(instance: &dyn Instance, config: &RegistryConfig) -> Self {
        let mut devices = Vec::new();
        for (index, info) in instance.adapters().into_iter().enumerate() {
            if info.software && !config.include_software {
                log::warn!("skipping software adapter {}", info.name);
                continue;
            }
            match instance.open(index) {
                Ok(raw) => {
                    log::info!(
                        "device {}: {} (sm {}, wave {}, {:?})",
                        devices.len(),
                        info.name,
                        info.shader_model,
                        info.wave_size,
                        info.architecture
                    );
                    devices.push(Device::new(info, raw));
                }
                Err(err) => log::warn!("cannot open adapter {}: {}", info.name, err),
            }
        }
        Self { devices }
    }

    /// Devices in enumeration order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Device by index
    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    /// First device
    pub fn first(&self) -> Result<&Device> {
        self.devices.first().ok_or(Error::NoDevice)
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device was found
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Make this the process-wide registry
    ///
    /// The first installed registry wins and lives until process exit; later
    /// calls return it and drop their argument.
    pub fn install(self) -> &'static DeviceRegistry {
        let mut fresh = Some(self);
        let installed = GLOBAL_REGISTRY.call_once(|| fresh.take().unwrap_or(Self { devices: Vec::new() }));
        if fresh.is_some() {
            log::warn!("device registry already installed");
        }
        installed
    }

    /// Process-wide registry, if installed
    pub fn global() -> Option<&'static DeviceRegistry> {
        GLOBAL_REGISTRY.get()
    }
}

#[cfg(all(test, feature = "soft"))]
mod tests {
    use super::*;
    use crate::soft::SoftInstance;

    #[test]
    fn test_enumerate_skips_software() {
        let instance = SoftInstance::new();
        let registry = DeviceRegistry::enumerate(&instance, &RegistryConfig::default());
        assert!(registry.is_empty());
        assert_eq!(registry.first().unwrap_err(), Error::NoDevice);

        let registry =
            DeviceRegistry::enumerate(&instance, &RegistryConfig::default().with_software(true));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_enumerate_hardware_adapter() {
        let instance = SoftInstance::new().with_adapter(SoftInstance::discrete_adapter("Test GPU"));
        let registry = DeviceRegistry::enumerate(&instance, &RegistryConfig::default());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.first().unwrap().info().name, "Test GPU");
    }

    #[test]
    fn test_custom_heap_on_uma() {
        let mut adapter = SoftInstance::discrete_adapter("UMA GPU");
        adapter.architecture = Architecture::UMA;
        let instance = SoftInstance::empty().with_adapter(adapter);
        let registry = DeviceRegistry::enumerate(&instance, &RegistryConfig::default());
        let device = registry.first().unwrap();

        let props = device.resolve_heap_properties(HeapProperties::custom(
            CpuPageProperty::WriteBack,
            MemoryPool::PreferGpu,
        ));
        assert_eq!(props.pool, MemoryPool::PreferCpu);
        assert_eq!(props.cpu_page, CpuPageProperty::WriteBack);
    }

    #[test]
    fn test_gpu_preferred_custom_heap_loses_cpu_access() {
        let instance = SoftInstance::empty().with_adapter(SoftInstance::discrete_adapter("dGPU"));
        let registry = DeviceRegistry::enumerate(&instance, &RegistryConfig::default());
        let device = registry.first().unwrap();

        let props = device.resolve_heap_properties(HeapProperties::custom(
            CpuPageProperty::WriteCombine,
            MemoryPool::PreferGpu,
        ));
        assert_eq!(props.cpu_page, CpuPageProperty::NotAvailable);
        assert!(!props.is_cpu_visible());
    }

    #[test]
    fn test_install_is_init_once() {
        let instance = SoftInstance::new();
        let config = RegistryConfig::default().with_software(true);
        let first = DeviceRegistry::enumerate(&instance, &config).install();
        let second = DeviceRegistry::enumerate(&SoftInstance::empty(), &config).install();
        assert!(core::ptr::eq(first, second));
        assert!(DeviceRegistry::global().is_some());
    }
}
