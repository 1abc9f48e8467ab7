//! # Binding Sets
//!
//! A [`BindingSet`] binds views to the named points of a [`ProgramLayout`]
//! through a slot allocator, then records the result on a command list.
//!
//! ```text
//!   bind("input", view) ──validate──▶ allocator.set_view ──▶ offset
//!   finish(list) ──▶ transition bound resources ──▶ table ──▶ set_binding_table
//! ```

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use basalt_cmd::CommandList;
use basalt_core::{Error, Resource, ResourceState, Result};

use crate::layout::{BindCategory, BindPoint, BindTarget, ProgramLayout};
use crate::slots::{SharedSlotAllocator, SlotAllocator, SlotConfig, SlotTable, UniqueSlotAllocator, UNASSIGNED};
use crate::table::BindingTable;
use crate::view::{BoundView, BufferViewKind};

/// Views bound to the points of one program
#[derive(Debug)]
pub struct BindingSet<A: SlotAllocator> {
    layout: Arc<ProgramLayout>,
    allocator: A,
    /// Offset per point and element
    assigned: Vec<Vec<u16>>,
}

impl BindingSet<SharedSlotAllocator> {
    /// Set backed by a shared, coalescing allocator
    pub fn shared(layout: Arc<ProgramLayout>, config: SlotConfig) -> Self {
        Self::new(layout, SharedSlotAllocator::new(config))
    }
}

impl BindingSet<UniqueSlotAllocator> {
    /// Set backed by the layout's fixed offsets
    pub fn unique(layout: Arc<ProgramLayout>) -> Self {
        let allocator = UniqueSlotAllocator::from_layout(&layout);
        Self::new(layout, allocator)
    }
}

fn mismatch(point: &BindPoint, reason: &'static str) -> Error {
    Error::BindingMismatch {
        name: point.name.clone(),
        reason,
    }
}

/// Check that `view` may be bound to `point`
pub fn validate_view(point: &BindPoint, view: &BoundView) -> Result<()> {
    if view.target() != point.target {
        return Err(mismatch(point, "view type does not match the bind point"));
    }
    match (point.category, view) {
        (BindCategory::ConstBuffer, BoundView::Buffer(buffer)) => {
            if buffer.kind() != BufferViewKind::Constant {
                return Err(mismatch(point, "constant buffers need a constant view"));
            }
        }
        (_, BoundView::Buffer(buffer)) if buffer.kind() == BufferViewKind::Constant => {
            return Err(mismatch(point, "constant view on a shader view point"));
        }
        (BindCategory::ReadView, BoundView::Buffer(buffer)) => {
            if !buffer.resource().can_bind_shader() {
                return Err(mismatch(point, "resource denies shader reads"));
            }
            if point.stride != 0 && buffer.stride() != point.stride {
                return Err(mismatch(point, "structure stride differs"));
            }
        }
        (BindCategory::ReadView, BoundView::Texture(texture)) => {
            if !texture.resource().can_bind_shader() {
                return Err(mismatch(point, "resource denies shader reads"));
            }
        }
        (BindCategory::WriteView, BoundView::Buffer(buffer)) => {
            if !buffer.resource().allows_unordered_access() {
                return Err(mismatch(point, "resource does not allow unordered access"));
            }
            if point.stride != 0 && buffer.stride() != point.stride {
                return Err(mismatch(point, "structure stride differs"));
            }
        }
        (BindCategory::WriteView, BoundView::Texture(texture)) => {
            if !texture.resource().allows_unordered_access() {
                return Err(mismatch(point, "resource does not allow unordered access"));
            }
        }
        (BindCategory::Sampler, BoundView::Sampler(_)) => {}
        _ => return Err(mismatch(point, "view does not fit the category")),
    }
    Ok(())
}

impl<A: SlotAllocator> BindingSet<A> {
    /// Set over `layout` with an explicit allocator
    pub fn new(layout: Arc<ProgramLayout>, allocator: A) -> Self {
        let assigned = layout
            .points()
            .iter()
            .map(|p| vec![UNASSIGNED; p.count as usize])
            .collect();
        Self {
            layout,
            allocator,
            assigned,
        }
    }

    /// Layout
    pub fn layout(&self) -> &ProgramLayout {
        &self.layout
    }

    /// Allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Offset of a bound element
    pub fn offset_of(&self, name: &str, element: u32) -> Result<Option<u16>> {
        let (index, _) = self.layout.find(name)?;
        Ok(self.assigned[index]
            .get(element as usize)
            .copied()
            .filter(|&o| o != UNASSIGNED))
    }

    /// Bind the first element of a point
    pub fn bind(&mut self, name: &str, view: impl Into<BoundView>) -> Result<u16> {
        self.bind_at(name, 0, view)
    }

    /// Bind one element of an array point
    pub fn bind_at(&mut self, name: &str, element: u32, view: impl Into<BoundView>) -> Result<u16> {
        let view = view.into();
        let (index, point) = self.layout.find(name)?;
        if element >= point.count {
            return Err(mismatch(point, "element outside the bind point"));
        }
        validate_view(point, &view)?;

        let current = self.assigned[index][element as usize];
        let preferred = self.allocator.offset_for(point, element, current);
        let offset = self.allocator.set_view(view, preferred)?;
        self.assigned[index][element as usize] = offset;
        log::trace!("bound {}[{}] at slot {}", name, element, offset);
        Ok(offset)
    }

    /// Unbind one element
    pub fn unbind(&mut self, name: &str, element: u32) -> Result<()> {
        let (index, point) = self.layout.find(name)?;
        let table = if point.target == BindTarget::Sampler {
            SlotTable::Sampler
        } else {
            SlotTable::Resource
        };
        let slot = self.assigned[index]
            .get_mut(element as usize)
            .ok_or_else(|| mismatch(point, "element outside the bind point"))?;
        if *slot == UNASSIGNED {
            return Ok(());
        }
        self.allocator.release(table, *slot)?;
        *slot = UNASSIGNED;
        Ok(())
    }

    /// Bound resources with the state their category needs
    ///
    /// A resource bound for writing and for anything else is refused.
    pub fn required_states(&self) -> Result<Vec<(Resource, ResourceState)>> {
        let mut required: Vec<(Resource, ResourceState)> = Vec::new();
        for (point, offsets) in self.layout.points().iter().zip(&self.assigned) {
            let Some(state) = point.category.required_state() else {
                continue;
            };
            for &offset in offsets.iter().filter(|&&o| o != UNASSIGNED) {
                let Some(resource) = self
                    .allocator
                    .entry(SlotTable::Resource, offset)
                    .and_then(|e| e.view.resource())
                else {
                    continue;
                };
                match required.iter_mut().find(|(r, _)| r.same(resource)) {
                    Some((_, existing)) if *existing == state => {}
                    Some((_, existing)) => {
                        let merged = *existing | state;
                        if merged.is_write() {
                            return Err(mismatch(point, "resource bound for writing and reading"));
                        }
                        *existing = merged;
                    }
                    None => required.push((resource.clone(), state)),
                }
            }
        }
        Ok(required)
    }

    /// Transition bound resources, build the table and record it on `list`
    ///
    /// Returns `None` if nothing is bound.
    pub fn finish(&self, list: &mut CommandList) -> Result<Option<BindingTable>> {
        for (resource, state) in self.required_states()? {
            list.transition(&resource, state)?;
        }
        let Some(table) = self.allocator.generate_binding_table(list.device())? else {
            return Ok(None);
        };
        list.set_binding_table(table.raw().clone(), table.resources())?;
        Ok(Some(table))
    }

    /// Unbind everything
    pub fn clear(&mut self) {
        self.allocator.clear();
        for offsets in &mut self.assigned {
            offsets.iter_mut().for_each(|o| *o = UNASSIGNED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{BufferView, TextureView};
    use basalt_core::soft::{SoftBindingTable, SoftInstance};
    use basalt_core::{
        BufferDesc, Descriptor, Device, Format, ListKind, ResourceFlags, SamplerDesc, TextureDesc,
    };

    fn layout() -> Arc<ProgramLayout> {
        Arc::new(
            ProgramLayout::new(vec![
                BindPoint::new("params", BindCategory::ConstBuffer, BindTarget::Buffer),
                BindPoint::new("input", BindCategory::ReadView, BindTarget::Buffer).with_stride(16),
                BindPoint::new("output", BindCategory::WriteView, BindTarget::Buffer),
                BindPoint::new("image", BindCategory::ReadView, BindTarget::Texture),
                BindPoint::new("linear", BindCategory::Sampler, BindTarget::Sampler),
            ])
            .unwrap(),
        )
    }

    struct Fixture {
        device: Device,
        params: Resource,
        input: Resource,
        output: Resource,
        image: Resource,
    }

    fn fixture() -> Fixture {
        let device = SoftInstance::new().open_device();
        let params = device.create_buffer(&BufferDesc::new(256)).unwrap();
        let input = device.create_buffer(&BufferDesc::new(256)).unwrap();
        let output = device
            .create_buffer(&BufferDesc::new(256).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS))
            .unwrap();
        let image = device
            .create_texture(&TextureDesc::new(8, 8, Format::Rgba8Unorm))
            .unwrap();
        Fixture {
            device,
            params,
            input,
            output,
            image,
        }
    }

    #[test]
    fn test_validation() {
        let f = fixture();
        let mut set = BindingSet::shared(layout(), SlotConfig::default());

        assert_eq!(
            set.bind("missing", BufferView::raw(&f.input, 0, 16).unwrap()).map(|_| ()),
            Err(Error::UnknownBindPoint("missing".into()))
        );
        assert!(matches!(
            set.bind("input", BufferView::structured(&f.input, 0, 4, 8).unwrap()),
            Err(Error::BindingMismatch { .. })
        ));
        assert!(matches!(
            set.bind("output", BufferView::raw(&f.input, 0, 16).unwrap()),
            Err(Error::BindingMismatch { .. })
        ));
        assert!(matches!(
            set.bind("params", BufferView::raw(&f.params, 0, 16).unwrap()),
            Err(Error::BindingMismatch { .. })
        ));
        assert!(matches!(
            set.bind("image", BufferView::raw(&f.input, 0, 16).unwrap()),
            Err(Error::BindingMismatch { .. })
        ));
        assert!(matches!(
            set.bind_at("linear", 1, SamplerDesc::default()),
            Err(Error::BindingMismatch { .. })
        ));
    }

    #[test]
    fn test_shared_coalesces_same_view() {
        let f = fixture();
        let layout = Arc::new(
            ProgramLayout::new(vec![
                BindPoint::new("a", BindCategory::ReadView, BindTarget::Buffer),
                BindPoint::new("b", BindCategory::ReadView, BindTarget::Buffer),
            ])
            .unwrap(),
        );
        let mut set = BindingSet::shared(layout, SlotConfig::default());
        let view = BufferView::raw(&f.input, 0, 64).unwrap();
        let a = set.bind("a", view.clone()).unwrap();
        let b = set.bind("b", view).unwrap();
        assert_eq!(a, b);
        assert_eq!(set.allocator().refs(SlotTable::Resource, a), 2);

        set.unbind("a", 0).unwrap();
        assert_eq!(set.allocator().refs(SlotTable::Resource, a), 1);
        assert_eq!(set.offset_of("a", 0).unwrap(), None);
        assert_eq!(set.offset_of("b", 0).unwrap(), Some(b));
    }

    #[test]
    fn test_finish_records_transitions_and_table() {
        let f = fixture();
        let mut set = BindingSet::unique(layout());
        set.bind("params", BufferView::constant(&f.params, 0, 64).unwrap())
            .unwrap();
        set.bind("input", BufferView::structured(&f.input, 0, 4, 16).unwrap())
            .unwrap();
        set.bind("output", BufferView::raw(&f.output, 0, 256).unwrap())
            .unwrap();
        set.bind("image", TextureView::new(&f.image).unwrap()).unwrap();
        set.bind("linear", SamplerDesc::default()).unwrap();

        let mut list = CommandList::new(&f.device, ListKind::Compute);
        let table = set.finish(&mut list).unwrap().unwrap();
        list.dispatch(8, 1, 1).unwrap();
        list.close().unwrap();

        assert_eq!(
            list.tracker().record(f.output.id()).map(|r| r.current),
            Some(ResourceState::UNORDERED_ACCESS)
        );
        assert_eq!(
            list.tracker().record(f.params.id()).map(|r| r.current),
            Some(ResourceState::VERTEX_AND_CONSTANT_BUFFER)
        );
        let names: Vec<_> = list.commands().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["barriers", "set_binding_table", "dispatch"]);

        let soft = SoftBindingTable::of(table.raw().as_ref()).unwrap();
        assert!(matches!(soft.desc().resources[0], Descriptor::ConstantBuffer { .. }));
        assert!(matches!(soft.desc().resources[2], Descriptor::UnorderedAccess { .. }));
        assert!(matches!(soft.desc().resources[3], Descriptor::ShaderResource { .. }));
        assert_eq!(table.resources().len(), 4);
    }

    #[test]
    fn test_read_write_conflict() {
        let f = fixture();
        let layout = Arc::new(
            ProgramLayout::new(vec![
                BindPoint::new("src", BindCategory::ReadView, BindTarget::Buffer),
                BindPoint::new("dst", BindCategory::WriteView, BindTarget::Buffer),
            ])
            .unwrap(),
        );
        let mut set = BindingSet::unique(layout);
        set.bind("src", BufferView::raw(&f.output, 0, 64).unwrap()).unwrap();
        set.bind("dst", BufferView::raw(&f.output, 64, 64).unwrap()).unwrap();
        assert!(matches!(set.required_states(), Err(Error::BindingMismatch { .. })));
    }

    #[test]
    fn test_empty_set_records_nothing() {
        let f = fixture();
        let set = BindingSet::shared(layout(), SlotConfig::default());
        let mut list = CommandList::new(&f.device, ListKind::Compute);
        assert!(set.finish(&mut list).unwrap().is_none());
        assert!(list.commands().is_empty());
    }
}
