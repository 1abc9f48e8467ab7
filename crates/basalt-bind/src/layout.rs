//! # Program Layout
//!
//! The bind points a compiled program exposes, with slot offsets assigned.
//!
//! ```text
//!   resource table: | buffers ........ | textures ...... |
//!   sampler table:  | samplers ... |
//! ```
//!
//! Each bind point occupies `count` consecutive slots of its table.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use basalt_core::{Error, ResourceState, Result};

/// Kind of a bind point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindCategory {
    /// Constant buffer
    ConstBuffer,
    /// Read-only view
    ReadView,
    /// Read-write view
    WriteView,
    /// Sampler state
    Sampler,
}

impl BindCategory {
    /// State a bound resource must be in, if any
    pub const fn required_state(self) -> Option<ResourceState> {
        match self {
            Self::ConstBuffer => Some(ResourceState::VERTEX_AND_CONSTANT_BUFFER),
            Self::ReadView => Some(ResourceState::NON_PIXEL_SHADER_RESOURCE),
            Self::WriteView => Some(ResourceState::UNORDERED_ACCESS),
            Self::Sampler => None,
        }
    }

    /// Name used in messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConstBuffer => "const-buffer",
            Self::ReadView => "read-view",
            Self::WriteView => "write-view",
            Self::Sampler => "sampler",
        }
    }
}

impl fmt::Display for BindCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a bind point accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindTarget {
    /// Buffer views
    Buffer,
    /// Texture views
    Texture,
    /// Samplers
    Sampler,
}

/// One named bind point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPoint {
    /// Name in the program
    pub name: String,
    /// Kind
    pub category: BindCategory,
    /// Accepted view type
    pub target: BindTarget,
    /// Register space
    pub space: u32,
    /// Register
    pub register: u32,
    /// Array length
    pub count: u32,
    /// Structure stride, zero if not structured
    pub stride: u32,
    /// First slot in its table, assigned by the layout
    pub offset: u16,
}

impl BindPoint {
    /// Single-element bind point at space 0, register 0
    pub fn new(name: impl Into<String>, category: BindCategory, target: BindTarget) -> Self {
        Self {
            name: name.into(),
            category,
            target,
            space: 0,
            register: 0,
            count: 1,
            stride: 0,
            offset: 0,
        }
    }

    /// Set space and register
    pub fn with_register(mut self, space: u32, register: u32) -> Self {
        self.space = space;
        self.register = register;
        self
    }

    /// Set array length
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Set structure stride
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Check if the point lives in the sampler table
    pub fn is_sampler(&self) -> bool {
        self.category == BindCategory::Sampler
    }
}

/// Bind points of one program with assigned offsets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    points: Vec<BindPoint>,
    buffer_slots: u16,
    texture_slots: u16,
    sampler_slots: u16,
}

impl ProgramLayout {
    /// Validate bind points and assign offsets
    ///
    /// Buffers take the first resource slots, textures follow, samplers
    /// have their own table.
    pub fn new(points: Vec<BindPoint>) -> Result<Self> {
        let mut points = points;
        for (i, point) in points.iter().enumerate() {
            if point.count == 0 {
                return Err(Error::InvalidParameter("bind point with zero elements"));
            }
            let consistent = matches!(
                (point.category, point.target),
                (BindCategory::ConstBuffer, BindTarget::Buffer)
                    | (BindCategory::ReadView | BindCategory::WriteView, BindTarget::Buffer | BindTarget::Texture)
                    | (BindCategory::Sampler, BindTarget::Sampler)
            );
            if !consistent {
                return Err(Error::BindingMismatch {
                    name: point.name.clone(),
                    reason: "category does not accept the target",
                });
            }
            if points[..i].iter().any(|p| p.name == point.name) {
                return Err(Error::BindingMismatch {
                    name: point.name.clone(),
                    reason: "duplicate bind point",
                });
            }
        }

        let out_of_range = || Error::InvalidParameter("layout exceeds the slot range");
        let total = |target: BindTarget| -> Result<u32> {
            points
                .iter()
                .filter(|p| p.target == target)
                .try_fold(0u32, |sum, p| sum.checked_add(p.count))
                .ok_or_else(out_of_range)
        };
        let (buffers, textures, samplers) = (
            total(BindTarget::Buffer)?,
            total(BindTarget::Texture)?,
            total(BindTarget::Sampler)?,
        );
        // u16::MAX marks an unassigned slot
        let views = buffers.checked_add(textures).ok_or_else(out_of_range)?;
        if views >= u32::from(u16::MAX) || samplers >= u32::from(u16::MAX) {
            return Err(out_of_range());
        }

        let mut cursors = [0, buffers, 0];
        for point in &mut points {
            let cursor = match point.target {
                BindTarget::Buffer => &mut cursors[0],
                BindTarget::Texture => &mut cursors[1],
                BindTarget::Sampler => &mut cursors[2],
            };
            point.offset = *cursor as u16;
            *cursor += point.count;
        }

        let layout = Self {
            points,
            buffer_slots: buffers as u16,
            texture_slots: textures as u16,
            sampler_slots: samplers as u16,
        };
        log::trace!(
            "layout: {} points, {}+{} resource slots, {} sampler slots",
            layout.points.len(),
            layout.buffer_slots,
            layout.texture_slots,
            layout.sampler_slots
        );
        Ok(layout)
    }

    /// Bind points in declaration order
    pub fn points(&self) -> &[BindPoint] {
        &self.points
    }

    /// Position and description of a named bind point
    pub fn find(&self, name: &str) -> Result<(usize, &BindPoint)> {
        self.points
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
            .ok_or_else(|| Error::UnknownBindPoint(name.into()))
    }

    /// Slots taken by buffer points
    pub fn buffer_slots(&self) -> u16 {
        self.buffer_slots
    }

    /// Slots taken by texture points
    pub fn texture_slots(&self) -> u16 {
        self.texture_slots
    }

    /// Slots in the resource table
    pub fn resource_slots(&self) -> u16 {
        self.buffer_slots + self.texture_slots
    }

    /// Slots in the sampler table
    pub fn sampler_slots(&self) -> u16 {
        self.sampler_slots
    }
}
