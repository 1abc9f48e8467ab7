//! # Binding Slot Allocators
//!
//! Map views to offsets in the resource and sampler tables of a program
//! invocation.
//!
//! ```text
//!   Shared                               Unique
//!   ┌────┬────┬────┬────┐                ┌─────────┬──────────┐  ┌──────────┐
//!   │ A:2│ B:1│ -- │ C:1│  refcounted    │ buffers │ textures │  │ samplers │
//!   └────┴────┴────┴────┘  coalescing    └─────────┴──────────┘  └──────────┘
//!                                         fixed offsets from the layout
//! ```

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use basalt_core::{Device, Error, Result};

use crate::layout::{BindPoint, BindTarget, ProgramLayout};
use crate::table::{generate_binding_table, BindingTable};
use crate::view::BoundView;

/// Offset meaning "pick one for me"
pub const UNASSIGNED: u16 = u16::MAX;

/// Which table a slot lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotTable {
    /// Buffers and textures
    Resource,
    /// Samplers
    Sampler,
}

impl SlotTable {
    /// Table a view belongs in
    pub fn of(view: &BoundView) -> Self {
        if view.is_sampler() {
            Self::Sampler
        } else {
            Self::Resource
        }
    }
}

/// Occupied slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    /// Bound view
    pub view: BoundView,
    /// Bindings sharing the slot
    pub refs: u32,
}

/// Shared allocator options
#[derive(Debug, Clone)]
pub struct SlotConfig {
    /// Slots in each table
    pub capacity: u16,
}

impl SlotConfig {
    /// Set the table capacity
    pub fn with_capacity(mut self, capacity: u16) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

// =============================================================================
// ALLOCATOR TRAIT
// =============================================================================

/// Slot assignment strategy
pub trait SlotAllocator: Send + Sync + fmt::Debug {
    /// Place `view`, at `preferred` if given
    ///
    /// Returns the offset the view ended up at.
    fn set_view(&mut self, view: BoundView, preferred: u16) -> Result<u16>;

    /// Drop one binding of the slot at `offset`
    fn release(&mut self, table: SlotTable, offset: u16) -> Result<()>;

    /// Slots of a table
    fn entries(&self, table: SlotTable) -> &[Option<SlotEntry>];

    /// Forget every binding
    fn clear(&mut self);

    /// Offset the allocator wants for an element of a bind point
    ///
    /// `current` is the offset the element was last bound at.
    fn offset_for(&self, point: &BindPoint, element: u32, current: u16) -> u16 {
        let _ = (point, element);
        current
    }

    /// Occupied slot at `offset`
    fn entry(&self, table: SlotTable, offset: u16) -> Option<&SlotEntry> {
        self.entries(table).get(usize::from(offset))?.as_ref()
    }

    /// Realize the tables on a device
    ///
    /// Returns `None` when no slot is occupied.
    fn generate_binding_table(&self, device: &Device) -> Result<Option<BindingTable>> {
        generate_binding_table(
            self.entries(SlotTable::Resource),
            self.entries(SlotTable::Sampler),
            device,
        )
    }
}

fn out_of_range(offset: u16, capacity: usize) -> Error {
    Error::SlotOutOfRange {
        offset,
        capacity: capacity as u16,
    }
}

// =============================================================================
// SHARED ALLOCATOR
// =============================================================================

/// Refcounted allocator that coalesces identical views
#[derive(Debug, Clone)]
pub struct SharedSlotAllocator {
    resources: Vec<Option<SlotEntry>>,
    samplers: Vec<Option<SlotEntry>>,
}

impl SharedSlotAllocator {
    /// Allocator with `config.capacity` slots per table
    pub fn new(config: SlotConfig) -> Self {
        let capacity = usize::from(config.capacity.min(UNASSIGNED - 1));
        Self {
            resources: vec![None; capacity],
            samplers: vec![None; capacity],
        }
    }

    fn table_mut(&mut self, table: SlotTable) -> &mut Vec<Option<SlotEntry>> {
        match table {
            SlotTable::Resource => &mut self.resources,
            SlotTable::Sampler => &mut self.samplers,
        }
    }

    /// Reference count of a slot, zero if free
    pub fn refs(&self, table: SlotTable, offset: u16) -> u32 {
        self.entry(table, offset).map_or(0, |e| e.refs)
    }

    /// Occupied slots in a table
    pub fn occupied(&self, table: SlotTable) -> usize {
        self.entries(table).iter().filter(|e| e.is_some()).count()
    }

    fn detach(slot: &mut Option<SlotEntry>) {
        if let Some(entry) = slot {
            if entry.refs > 1 {
                entry.refs -= 1;
            } else {
                *slot = None;
            }
        }
    }
}

impl Default for SharedSlotAllocator {
    fn default() -> Self {
        Self::new(SlotConfig::default())
    }
}

impl SlotAllocator for SharedSlotAllocator {
    fn set_view(&mut self, view: BoundView, preferred: u16) -> Result<u16> {
        let table = self.table_mut(SlotTable::of(&view));
        let capacity = table.len();
        let concrete = preferred != UNASSIGNED;
        if concrete && usize::from(preferred) >= capacity {
            return Err(out_of_range(preferred, capacity));
        }

        if concrete {
            if let Some(entry) = &table[usize::from(preferred)] {
                if entry.view == view {
                    return Ok(preferred);
                }
            }
        }

        if let Some(found) = table
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.view == view))
        {
            if concrete {
                Self::detach(&mut table[usize::from(preferred)]);
            }
            if let Some(entry) = &mut table[found] {
                entry.refs += 1;
            }
            return Ok(found as u16);
        }

        if concrete {
            let index = usize::from(preferred);
            if table[index].as_ref().is_some_and(|e| e.refs > 1) {
                Self::detach(&mut table[index]);
            } else {
                table[index] = Some(SlotEntry { view, refs: 1 });
                return Ok(preferred);
            }
        }

        let free = table
            .iter()
            .position(Option::is_none)
            .ok_or(Error::SlotTableFull {
                capacity: capacity as u16,
            })?;
        table[free] = Some(SlotEntry { view, refs: 1 });
        Ok(free as u16)
    }

    fn release(&mut self, table: SlotTable, offset: u16) -> Result<()> {
        let table = self.table_mut(table);
        let capacity = table.len();
        let slot = table
            .get_mut(usize::from(offset))
            .ok_or_else(|| out_of_range(offset, capacity))?;
        if slot.is_none() {
            return Err(Error::InvalidParameter("releasing a free slot"));
        }
        Self::detach(slot);
        Ok(())
    }

    fn entries(&self, table: SlotTable) -> &[Option<SlotEntry>] {
        match table {
            SlotTable::Resource => &self.resources,
            SlotTable::Sampler => &self.samplers,
        }
    }

    fn clear(&mut self) {
        self.resources.iter_mut().for_each(|s| *s = None);
        self.samplers.iter_mut().for_each(|s| *s = None);
    }
}

// =============================================================================
// UNIQUE ALLOCATOR
// =============================================================================

/// Fixed allocator with offsets assigned by a program layout
#[derive(Debug, Clone)]
pub struct UniqueSlotAllocator {
    buffers: u16,
    resources: Vec<Option<SlotEntry>>,
    samplers: Vec<Option<SlotEntry>>,
}

impl UniqueSlotAllocator {
    /// Partitioned tables: buffers, then textures, then a sampler table
    pub fn new(buffers: u16, textures: u16, samplers: u16) -> Self {
        Self {
            buffers,
            resources: vec![None; usize::from(buffers) + usize::from(textures)],
            samplers: vec![None; usize::from(samplers)],
        }
    }

    /// Tables sized for a layout
    pub fn from_layout(layout: &ProgramLayout) -> Self {
        Self::new(layout.buffer_slots(), layout.texture_slots(), layout.sampler_slots())
    }

    /// Slots reserved for buffers
    pub fn buffer_slots(&self) -> u16 {
        self.buffers
    }
}

impl SlotAllocator for UniqueSlotAllocator {
    fn set_view(&mut self, view: BoundView, offset: u16) -> Result<u16> {
        let buffers = usize::from(self.buffers);
        let target = view.target();
        let table = match SlotTable::of(&view) {
            SlotTable::Resource => &mut self.resources,
            SlotTable::Sampler => &mut self.samplers,
        };
        let index = usize::from(offset);
        if offset == UNASSIGNED || index >= table.len() {
            return Err(out_of_range(offset, table.len()));
        }
        let in_buffer_part = index < buffers;
        match target {
            BindTarget::Buffer if !in_buffer_part => {
                return Err(out_of_range(offset, buffers));
            }
            BindTarget::Texture if in_buffer_part => {
                return Err(Error::BindingMismatch {
                    name: alloc::format!("slot {}", offset),
                    reason: "texture view in the buffer partition",
                });
            }
            _ => {}
        }
        table[index] = Some(SlotEntry { view, refs: 1 });
        Ok(offset)
    }

    fn release(&mut self, table: SlotTable, offset: u16) -> Result<()> {
        let table = match table {
            SlotTable::Resource => &mut self.resources,
            SlotTable::Sampler => &mut self.samplers,
        };
        let capacity = table.len();
        let slot = table
            .get_mut(usize::from(offset))
            .ok_or_else(|| out_of_range(offset, capacity))?;
        *slot = None;
        Ok(())
    }

    fn entries(&self, table: SlotTable) -> &[Option<SlotEntry>] {
        match table {
            SlotTable::Resource => &self.resources,
            SlotTable::Sampler => &self.samplers,
        }
    }

    fn clear(&mut self) {
        self.resources.iter_mut().for_each(|s| *s = None);
        self.samplers.iter_mut().for_each(|s| *s = None);
    }

    fn offset_for(&self, point: &BindPoint, element: u32, _current: u16) -> u16 {
        u16::try_from(u32::from(point.offset) + element).unwrap_or(UNASSIGNED)
    }
}

static_assertions::assert_impl_all!(SharedSlotAllocator: Send, Sync);
static_assertions::assert_impl_all!(UniqueSlotAllocator: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{BufferView, TextureView};
    use basalt_core::hal::SamplerDesc;
    use basalt_core::soft::SoftInstance;
    use basalt_core::{BufferDesc, Format, TextureDesc};

    fn views(n: usize) -> (Device, Vec<BoundView>) {
        let device = SoftInstance::new().open_device();
        let views = (0..n)
            .map(|_| {
                let buffer = device.create_buffer(&BufferDesc::new(64)).unwrap();
                BoundView::from(BufferView::raw(&buffer, 0, 64).unwrap())
            })
            .collect();
        (device, views)
    }

    #[test]
    fn test_coalescing_and_release() {
        let (_device, v) = views(2);
        let mut shared = SharedSlotAllocator::default();

        let first = shared.set_view(v[0].clone(), UNASSIGNED).unwrap();
        let second = shared.set_view(v[0].clone(), UNASSIGNED).unwrap();
        assert_eq!(first, second);
        assert_eq!(shared.refs(SlotTable::Resource, first), 2);

        shared.release(SlotTable::Resource, first).unwrap();
        assert_eq!(shared.entry(SlotTable::Resource, first).map(|e| &e.view), Some(&v[0]));
        assert_eq!(shared.refs(SlotTable::Resource, first), 1);

        shared.release(SlotTable::Resource, first).unwrap();
        assert_eq!(shared.refs(SlotTable::Resource, first), 0);
        assert_eq!(shared.set_view(v[1].clone(), UNASSIGNED).unwrap(), first);
    }

    #[test]
    fn test_concrete_offset() {
        let (_device, v) = views(3);
        let mut shared = SharedSlotAllocator::default();

        let a = shared.set_view(v[0].clone(), UNASSIGNED).unwrap();
        assert_eq!(shared.set_view(v[0].clone(), a).unwrap(), a);
        assert_eq!(shared.refs(SlotTable::Resource, a), 1);

        // Sole owner: overwritten in place
        assert_eq!(shared.set_view(v[1].clone(), a).unwrap(), a);
        assert_eq!(shared.entry(SlotTable::Resource, a).map(|e| &e.view), Some(&v[1]));

        // Shared slot: the old content stays, the new view goes elsewhere
        shared.set_view(v[1].clone(), UNASSIGNED).unwrap();
        let moved = shared.set_view(v[2].clone(), a).unwrap();
        assert_ne!(moved, a);
        assert_eq!(shared.refs(SlotTable::Resource, a), 1);
        assert_eq!(shared.entry(SlotTable::Resource, a).map(|e| &e.view), Some(&v[1]));
    }

    #[test]
    fn test_table_full_and_out_of_range() {
        let (_device, v) = views(3);
        let mut shared = SharedSlotAllocator::new(SlotConfig::default().with_capacity(2));
        shared.set_view(v[0].clone(), UNASSIGNED).unwrap();
        shared.set_view(v[1].clone(), UNASSIGNED).unwrap();
        assert_eq!(
            shared.set_view(v[2].clone(), UNASSIGNED),
            Err(Error::SlotTableFull { capacity: 2 })
        );
        assert_eq!(
            shared.set_view(v[2].clone(), 5),
            Err(Error::SlotOutOfRange {
                offset: 5,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_samplers_have_their_own_table() {
        let (_device, v) = views(1);
        let mut shared = SharedSlotAllocator::default();
        let buffer = shared.set_view(v[0].clone(), UNASSIGNED).unwrap();
        let sampler = shared
            .set_view(BoundView::from(SamplerDesc::default()), UNASSIGNED)
            .unwrap();
        assert_eq!((buffer, sampler), (0, 0));
        assert_eq!(shared.occupied(SlotTable::Sampler), 1);
    }

    #[test]
    fn test_unique_partitions() {
        let (device, v) = views(1);
        let tex = device
            .create_texture(&TextureDesc::new(4, 4, Format::Rgba8Unorm))
            .unwrap();
        let tex_view = BoundView::from(TextureView::new(&tex).unwrap());
        let mut unique = UniqueSlotAllocator::new(1, 1, 0);

        assert_eq!(unique.set_view(v[0].clone(), 0).unwrap(), 0);
        assert_eq!(unique.set_view(tex_view.clone(), 1).unwrap(), 1);
        assert!(matches!(
            unique.set_view(tex_view.clone(), 0),
            Err(Error::BindingMismatch { .. })
        ));
        assert_eq!(
            unique.set_view(v[0].clone(), 1),
            Err(Error::SlotOutOfRange {
                offset: 1,
                capacity: 1
            })
        );
        assert_eq!(
            unique.set_view(tex_view, UNASSIGNED),
            Err(Error::SlotOutOfRange {
                offset: UNASSIGNED,
                capacity: 2
            })
        );
        assert!(matches!(
            unique.set_view(BoundView::from(SamplerDesc::default()), 0),
            Err(Error::SlotOutOfRange { .. })
        ));
    }
}
