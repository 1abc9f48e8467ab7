//! # Views
//!
//! Typed windows onto resources, as bound to slots. Two views are equal when
//! they reference the same resource with the same description, which is
//! what lets the shared allocator coalesce duplicate bindings.

use basalt_core::hal::{Descriptor, SamplerDesc, ViewShape};
use basalt_core::{Error, Format, Resource, ResourceDimension, ResourceFlags, Result};

use crate::layout::BindTarget;

/// Constant buffer placement alignment
pub const CONSTANT_ALIGNMENT: u64 = 256;

/// Largest constant buffer view
pub const MAX_CONSTANT_SIZE: u64 = 64 * 1024;

/// Interpretation of a buffer view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferViewKind {
    /// Array of structures
    Structured,
    /// Byte address
    Raw,
    /// Typed elements
    Typed,
    /// Constant buffer range
    Constant,
}

// =============================================================================
// BUFFER VIEW
// =============================================================================

/// View of a buffer range
#[derive(Debug, Clone)]
pub struct BufferView {
    resource: Resource,
    kind: BufferViewKind,
    format: Format,
    first_element: u64,
    count: u32,
    stride: u32,
}

impl BufferView {
    fn checked(
        resource: &Resource,
        kind: BufferViewKind,
        format: Format,
        first_element: u64,
        count: u32,
        stride: u32,
    ) -> Result<Self> {
        if !resource.dimension().is_buffer() {
            return Err(Error::InvalidParameter("buffer view of a texture"));
        }
        if count == 0 || stride == 0 {
            return Err(Error::InvalidParameter("empty buffer view"));
        }
        let stride64 = u64::from(stride);
        resource.check_range(first_element * stride64, u64::from(count) * stride64)?;
        Ok(Self {
            resource: resource.clone(),
            kind,
            format,
            first_element,
            count,
            stride,
        })
    }

    /// Array of `count` structures of `stride` bytes
    pub fn structured(resource: &Resource, first_element: u64, count: u32, stride: u32) -> Result<Self> {
        Self::checked(resource, BufferViewKind::Structured, Format::Unknown, first_element, count, stride)
    }

    /// Byte-address view of `size` bytes at `offset`, both 4-byte aligned
    pub fn raw(resource: &Resource, offset: u64, size: u64) -> Result<Self> {
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(Error::InvalidParameter("raw views are 4-byte aligned"));
        }
        let count = u32::try_from(size / 4).map_err(|_| Error::InvalidParameter("raw view too large"))?;
        Self::checked(resource, BufferViewKind::Raw, Format::R32Typeless, offset / 4, count, 4)
    }

    /// Typed view of `count` elements of `format`
    pub fn typed(resource: &Resource, format: Format, first_element: u64, count: u32) -> Result<Self> {
        if format == Format::Unknown || format == Format::D32Float {
            return Err(Error::InvalidParameter("typed view needs a color format"));
        }
        Self::checked(
            resource,
            BufferViewKind::Typed,
            format,
            first_element,
            count,
            format.bytes_per_element(),
        )
    }

    /// Constant buffer range
    ///
    /// `offset` must be 256-byte aligned; `size` is rounded up to the
    /// alignment.
    pub fn constant(resource: &Resource, offset: u64, size: u64) -> Result<Self> {
        if offset % CONSTANT_ALIGNMENT != 0 {
            return Err(Error::InvalidParameter("constant views are 256-byte aligned"));
        }
        let size = size.div_ceil(CONSTANT_ALIGNMENT) * CONSTANT_ALIGNMENT;
        if size == 0 || size > MAX_CONSTANT_SIZE {
            return Err(Error::InvalidParameter("constant view size out of range"));
        }
        Self::checked(
            resource,
            BufferViewKind::Constant,
            Format::Unknown,
            offset / CONSTANT_ALIGNMENT,
            (size / CONSTANT_ALIGNMENT) as u32,
            CONSTANT_ALIGNMENT as u32,
        )
    }

    /// Viewed resource
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Interpretation
    pub fn kind(&self) -> BufferViewKind {
        self.kind
    }

    /// Element format
    pub fn format(&self) -> Format {
        self.format
    }

    /// First element
    pub fn first_element(&self) -> u64 {
        self.first_element
    }

    /// Element count
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Element stride in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Byte offset of the range
    pub fn byte_offset(&self) -> u64 {
        self.first_element * u64::from(self.stride)
    }

    /// Byte size of the range
    pub fn byte_size(&self) -> u64 {
        u64::from(self.count) * u64::from(self.stride)
    }

    /// Shape of the descriptor
    pub fn shape(&self) -> ViewShape {
        ViewShape::Buffer {
            first_element: self.first_element,
            count: self.count,
            stride: match self.kind {
                BufferViewKind::Structured => self.stride,
                _ => 0,
            },
            raw: self.kind == BufferViewKind::Raw,
        }
    }
}

impl PartialEq for BufferView {
    fn eq(&self, other: &Self) -> bool {
        self.resource.id() == other.resource.id()
            && self.kind == other.kind
            && self.format == other.format
            && self.first_element == other.first_element
            && self.count == other.count
            && self.stride == other.stride
    }
}

impl Eq for BufferView {}

// =============================================================================
// TEXTURE VIEW
// =============================================================================

/// View of texture subresources
#[derive(Debug, Clone)]
pub struct TextureView {
    resource: Resource,
    format: Format,
    first_mip: u8,
    mip_count: u8,
    first_layer: u16,
    layer_count: u16,
}

impl TextureView {
    /// View of every mip and layer in the texture's own format
    pub fn new(resource: &Resource) -> Result<Self> {
        match resource.dimension() {
            ResourceDimension::Texture2D {
                layers,
                mips,
                format,
                ..
            } => Ok(Self {
                resource: resource.clone(),
                format,
                first_mip: 0,
                mip_count: mips,
                first_layer: 0,
                layer_count: layers,
            }),
            ResourceDimension::Buffer => Err(Error::InvalidParameter("texture view of a buffer")),
        }
    }

    fn extent(&self) -> (u8, u16) {
        match self.resource.dimension() {
            ResourceDimension::Texture2D { mips, layers, .. } => (mips, layers),
            ResourceDimension::Buffer => (0, 0),
        }
    }

    /// Restrict to a mip range
    pub fn with_mips(mut self, first: u8, count: u8) -> Result<Self> {
        let (mips, _) = self.extent();
        if count == 0 || u16::from(first) + u16::from(count) > u16::from(mips) {
            return Err(Error::InvalidParameter("mip range outside the texture"));
        }
        self.first_mip = first;
        self.mip_count = count;
        Ok(self)
    }

    /// Restrict to a layer range
    pub fn with_layers(mut self, first: u16, count: u16) -> Result<Self> {
        let (_, layers) = self.extent();
        if count == 0 || u32::from(first) + u32::from(count) > u32::from(layers) {
            return Err(Error::InvalidParameter("layer range outside the texture"));
        }
        self.first_layer = first;
        self.layer_count = count;
        Ok(self)
    }

    /// Viewed resource
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// View format
    pub fn format(&self) -> Format {
        self.format
    }

    /// Shape of the descriptor
    pub fn shape(&self) -> ViewShape {
        ViewShape::Texture2D {
            first_mip: self.first_mip,
            mip_count: self.mip_count,
            first_layer: self.first_layer,
            layer_count: self.layer_count,
        }
    }
}

impl PartialEq for TextureView {
    fn eq(&self, other: &Self) -> bool {
        self.resource.id() == other.resource.id()
            && self.format == other.format
            && self.shape() == other.shape()
    }
}

impl Eq for TextureView {}

// =============================================================================
// BOUND VIEW
// =============================================================================

/// Anything that can occupy a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundView {
    /// Buffer view
    Buffer(BufferView),
    /// Texture view
    Texture(TextureView),
    /// Sampler state
    Sampler(SamplerDesc),
}

impl BoundView {
    /// Viewed resource, if any
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Self::Buffer(view) => Some(view.resource()),
            Self::Texture(view) => Some(view.resource()),
            Self::Sampler(_) => None,
        }
    }

    /// Kind of bind point the view fits
    pub fn target(&self) -> BindTarget {
        match self {
            Self::Buffer(_) => BindTarget::Buffer,
            Self::Texture(_) => BindTarget::Texture,
            Self::Sampler(_) => BindTarget::Sampler,
        }
    }

    /// Check if the view belongs in the sampler table
    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler(_))
    }

    /// Descriptor written into a binding table
    ///
    /// Resources allowing unordered access get write descriptors.
    pub fn descriptor(&self) -> Descriptor {
        let (resource, format, shape) = match self {
            Self::Sampler(desc) => return Descriptor::Sampler(*desc),
            Self::Buffer(view) if view.kind() == BufferViewKind::Constant => {
                return Descriptor::ConstantBuffer {
                    resource: view.resource().id(),
                    offset: view.byte_offset(),
                    size: view.byte_size(),
                };
            }
            Self::Buffer(view) => (view.resource(), view.format(), view.shape()),
            Self::Texture(view) => (view.resource(), view.format(), view.shape()),
        };
        if resource.flags().contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) {
            Descriptor::UnorderedAccess {
                resource: resource.id(),
                format,
                shape,
            }
        } else {
            Descriptor::ShaderResource {
                resource: resource.id(),
                format,
                shape,
            }
        }
    }
}

impl From<BufferView> for BoundView {
    fn from(view: BufferView) -> Self {
        Self::Buffer(view)
    }
}

impl From<TextureView> for BoundView {
    fn from(view: TextureView) -> Self {
        Self::Texture(view)
    }
}

impl From<SamplerDesc> for BoundView {
    fn from(desc: SamplerDesc) -> Self {
        Self::Sampler(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::soft::SoftInstance;
    use basalt_core::{BufferDesc, Device, TextureDesc};

    fn device() -> Device {
        SoftInstance::new().open_device()
    }

    #[test]
    fn test_equality_by_identity_and_range() {
        let device = device();
        let a = device.create_buffer(&BufferDesc::new(1024)).unwrap();
        let b = device.create_buffer(&BufferDesc::new(1024)).unwrap();

        let v1 = BufferView::structured(&a, 0, 4, 16).unwrap();
        let v2 = BufferView::structured(&a.clone(), 0, 4, 16).unwrap();
        let v3 = BufferView::structured(&b, 0, 4, 16).unwrap();
        let v4 = BufferView::structured(&a, 1, 4, 16).unwrap();
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
        assert_ne!(v1, v4);
    }

    #[test]
    fn test_raw_view() {
        let device = device();
        let a = device.create_buffer(&BufferDesc::new(64)).unwrap();
        let raw = BufferView::raw(&a, 8, 32).unwrap();
        assert_eq!(raw.format(), Format::R32Typeless);
        assert_eq!((raw.first_element(), raw.count()), (2, 8));
        assert_eq!(
            raw.shape(),
            ViewShape::Buffer {
                first_element: 2,
                count: 8,
                stride: 0,
                raw: true
            }
        );
        assert!(BufferView::raw(&a, 2, 8).is_err());
        assert!(matches!(BufferView::raw(&a, 32, 64), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn test_constant_view() {
        let device = device();
        let a = device.create_buffer(&BufferDesc::new(1024)).unwrap();
        let cb = BufferView::constant(&a, 256, 100).unwrap();
        assert_eq!((cb.byte_offset(), cb.byte_size()), (256, 256));
        assert_eq!(
            BoundView::from(cb).descriptor(),
            Descriptor::ConstantBuffer {
                resource: a.id(),
                offset: 256,
                size: 256
            }
        );
        assert!(BufferView::constant(&a, 16, 16).is_err());
    }

    #[test]
    fn test_descriptor_follows_flags() {
        let device = device();
        let plain = device.create_buffer(&BufferDesc::new(64)).unwrap();
        let uav = device
            .create_buffer(&BufferDesc::new(64).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS))
            .unwrap();
        let read = BoundView::from(BufferView::typed(&plain, Format::R32Float, 0, 16).unwrap());
        let write = BoundView::from(BufferView::typed(&uav, Format::R32Float, 0, 16).unwrap());
        assert!(matches!(read.descriptor(), Descriptor::ShaderResource { .. }));
        assert!(matches!(write.descriptor(), Descriptor::UnorderedAccess { .. }));
    }

    #[test]
    fn test_texture_view_ranges() {
        let device = device();
        let tex = device
            .create_texture(&TextureDesc::new(16, 16, Format::Rgba8Unorm).with_mips(4))
            .unwrap();
        let view = TextureView::new(&tex).unwrap();
        assert_eq!(
            view.shape(),
            ViewShape::Texture2D {
                first_mip: 0,
                mip_count: 4,
                first_layer: 0,
                layer_count: 1
            }
        );
        let narrowed = view.clone().with_mips(1, 2).unwrap();
        assert_ne!(view, narrowed);
        assert!(view.clone().with_mips(3, 2).is_err());
        assert!(view.with_layers(0, 2).is_err());

        let buffer = device.create_buffer(&BufferDesc::new(64)).unwrap();
        assert!(TextureView::new(&buffer).is_err());
    }
}
