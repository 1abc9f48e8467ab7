//! Realization of slot tables as backend binding tables.

use alloc::sync::Arc;
use alloc::vec::Vec;

use basalt_core::hal::{BindingTableDesc, Descriptor, RawBindingTable};
use basalt_core::{Device, ResourceId, Result};

use crate::slots::SlotEntry;

/// GPU-visible binding table
#[derive(Debug, Clone)]
pub struct BindingTable {
    raw: Arc<dyn RawBindingTable>,
    resources: Vec<ResourceId>,
    resource_slots: u32,
    sampler_slots: u32,
}

impl BindingTable {
    /// Backend table
    pub fn raw(&self) -> &Arc<dyn RawBindingTable> {
        &self.raw
    }

    /// Distinct resources the table references
    pub fn resources(&self) -> &[ResourceId] {
        &self.resources
    }

    /// Length of the resource table
    pub fn resource_slots(&self) -> u32 {
        self.resource_slots
    }

    /// Length of the sampler table
    pub fn sampler_slots(&self) -> u32 {
        self.sampler_slots
    }
}

fn descriptors(entries: &[Option<SlotEntry>]) -> Vec<Descriptor> {
    let len = entries
        .iter()
        .rposition(Option::is_some)
        .map_or(0, |last| last + 1);
    entries[..len]
        .iter()
        .map(|slot| slot.as_ref().map_or(Descriptor::Null, |e| e.view.descriptor()))
        .collect()
}

/// Build a binding table covering every occupied slot
///
/// Each table runs up to its last occupied slot; free slots before it
/// become null descriptors so that every bound view keeps the offset its
/// binding set handed out. Returns `None` if nothing is occupied.
pub fn generate_binding_table(
    resources: &[Option<SlotEntry>],
    samplers: &[Option<SlotEntry>],
    device: &Device,
) -> Result<Option<BindingTable>> {
    let desc = BindingTableDesc {
        resources: descriptors(resources),
        samplers: descriptors(samplers),
    };
    if desc.resources.is_empty() && desc.samplers.is_empty() {
        return Ok(None);
    }

    let mut ids: Vec<ResourceId> = Vec::new();
    for id in desc.resources.iter().filter_map(Descriptor::resource) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let raw = device.raw().create_binding_table(&desc)?;
    log::trace!(
        "binding table: {} resource slots, {} sampler slots",
        desc.resources.len(),
        desc.samplers.len()
    );
    Ok(Some(BindingTable {
        raw,
        resources: ids,
        resource_slots: desc.resources.len() as u32,
        sampler_slots: desc.samplers.len() as u32,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::{SharedSlotAllocator, SlotAllocator, SlotTable, UNASSIGNED};
    use crate::view::{BoundView, BufferView};
    use basalt_core::hal::SamplerDesc;
    use basalt_core::soft::{SoftBindingTable, SoftInstance};
    use basalt_core::BufferDesc;

    #[test]
    fn test_empty_tables_generate_nothing() {
        let device = SoftInstance::new().open_device();
        let shared = SharedSlotAllocator::default();
        assert!(shared.generate_binding_table(&device).unwrap().is_none());
    }

    #[test]
    fn test_holes_become_null() {
        let device = SoftInstance::new().open_device();
        let a = device.create_buffer(&BufferDesc::new(64)).unwrap();
        let b = device.create_buffer(&BufferDesc::new(64)).unwrap();
        let mut shared = SharedSlotAllocator::default();

        shared
            .set_view(BoundView::from(BufferView::raw(&a, 0, 64).unwrap()), UNASSIGNED)
            .unwrap();
        shared
            .set_view(BoundView::from(BufferView::raw(&b, 0, 64).unwrap()), UNASSIGNED)
            .unwrap();
        shared
            .set_view(BoundView::from(BufferView::raw(&a, 0, 32).unwrap()), UNASSIGNED)
            .unwrap();
        shared
            .set_view(BoundView::from(SamplerDesc::default()), UNASSIGNED)
            .unwrap();
        shared.release(SlotTable::Resource, 1).unwrap();

        let table = shared.generate_binding_table(&device).unwrap().unwrap();
        assert_eq!((table.resource_slots(), table.sampler_slots()), (3, 1));
        assert_eq!(table.resources(), &[a.id()]);

        let soft = SoftBindingTable::of(table.raw().as_ref()).unwrap();
        assert_eq!(soft.desc().resources[1], Descriptor::Null);
        assert!(matches!(soft.desc().samplers[0], Descriptor::Sampler(_)));
    }
}
