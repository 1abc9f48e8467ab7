//! # Command Lists
//!
//! A command list records commands for one queue tier and owns a
//! [`StateTracker`] for the resources it touches. Commands that consume a
//! resource flush pending barriers first, so the recorded stream is always
//! `barriers → command → barriers → command ...`.
//!
//! ```text
//!   Recording ──close()──▶ Closed ──execute()──▶ submitted
//!       ▲                     │
//!       └─────reset()─────────┘
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use basalt_core::command::count_barriers;
use basalt_core::hal::RawBindingTable;
use basalt_core::{
    Capabilities, Command, Device, Error, ListKind, Resource, ResourceId,
    ResourceState, Result,
};

use crate::tracker::{
    StateList, StateTracker, TrackerConfig, TrackerStats, TransitionFlags, TransitionOutcome,
};

/// Recorded commands for one queue tier
#[derive(Debug)]
pub struct CommandList {
    device: Device,
    kind: ListKind,
    config: TrackerConfig,
    tracker: StateTracker,
    commands: Vec<Command>,
    end_states: Option<StateList>,
    closed: bool,
    label: Option<String>,
}

impl CommandList {
    /// Empty list with default tracking
    pub fn new(device: &Device, kind: ListKind) -> Self {
        Self::with_config(device, kind, TrackerConfig::default())
    }

    /// Empty list with explicit tracking options
    pub fn with_config(device: &Device, kind: ListKind, config: TrackerConfig) -> Self {
        let tracker = StateTracker::new(device.arena().clone(), kind, config.clone());
        Self::from_tracker(device, kind, config, tracker)
    }

    /// List whose resources start in the states of `begin`
    ///
    /// Resources absent from `begin` start from their resting state.
    pub fn with_begin_states(device: &Device, kind: ListKind, begin: StateList, config: TrackerConfig) -> Self {
        let tracker = StateTracker::with_begin_states(device.arena().clone(), kind, config.clone(), begin);
        Self::from_tracker(device, kind, config, tracker)
    }

    fn from_tracker(device: &Device, kind: ListKind, config: TrackerConfig, tracker: StateTracker) -> Self {
        Self {
            device: device.clone(),
            kind,
            config,
            tracker,
            commands: Vec::new(),
            end_states: None,
            closed: false,
            label: None,
        }
    }

    /// Attach a debug label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Debug label
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Tier
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Owning device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Check if the list was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Recorded commands
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Barriers in the recorded stream
    pub fn barrier_count(&self) -> usize {
        count_barriers(&self.commands)
    }

    /// State tracker
    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Tracker counters
    pub fn stats(&self) -> &TrackerStats {
        self.tracker.stats()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ListClosed)
        } else {
            Ok(())
        }
    }

    fn require(&self, required: Capabilities) -> Result<()> {
        if self.kind.has(required) {
            Ok(())
        } else {
            Err(Error::MissingCapability {
                kind: self.kind,
                required,
            })
        }
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Declare the states resources must be in when the list closes
    ///
    /// Only resources the list touches are transitioned.
    pub fn declare_end_states(&mut self, states: StateList) -> Result<()> {
        self.ensure_open()?;
        self.end_states = Some(states);
        Ok(())
    }

    /// Declared end states
    pub fn declared_end_states(&self) -> Option<&StateList> {
        self.end_states.as_ref()
    }

    /// Request a state for a resource
    pub fn transition(&mut self, resource: &Resource, state: ResourceState) -> Result<TransitionOutcome> {
        self.update_state(resource, state, TransitionFlags::empty())
    }

    /// Request a state with transition options
    pub fn update_state(
        &mut self,
        resource: &Resource,
        state: ResourceState,
        flags: TransitionFlags,
    ) -> Result<TransitionOutcome> {
        self.ensure_open()?;
        self.tracker
            .update_state(resource.id(), state, flags, &mut self.commands)
    }

    /// Begin a split barrier toward `state`
    pub fn begin_split(&mut self, resource: &Resource, state: ResourceState) -> Result<TransitionOutcome> {
        self.update_state(resource, state, TransitionFlags::SPLIT_BEGIN)
    }

    /// End a split barrier toward `state`
    pub fn end_split(&mut self, resource: &Resource, state: ResourceState) -> Result<TransitionOutcome> {
        self.update_state(resource, state, TransitionFlags::SPLIT_END)
    }

    /// Emit batched barriers
    ///
    /// Idempotent; safe to call any number of times before close.
    pub fn flush_resource_state(&mut self) {
        self.tracker.flush(&mut self.commands);
    }

    /// Current state of every touched resource
    pub fn generate_state_list(&self) -> StateList {
        self.tracker.generate_state_list()
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Copy `size` bytes between buffers
    ///
    /// Both buffers are moved to their copy states first.
    pub fn copy_buffer_region(
        &mut self,
        dst: &Resource,
        dst_offset: u64,
        src: &Resource,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        self.require(Capabilities::COPY)?;
        if dst.same(src) {
            return Err(Error::InvalidParameter("copy source and destination are the same resource"));
        }
        if !dst.dimension().is_buffer() || !src.dimension().is_buffer() {
            return Err(Error::InvalidParameter("buffer copy between non-buffers"));
        }
        src.check_range(src_offset, size)?;
        dst.check_range(dst_offset, size)?;

        self.transition(src, ResourceState::COPY_SOURCE)?;
        self.transition(dst, ResourceState::COPY_DEST)?;
        self.consume(&[src.id(), dst.id()])?;
        self.commands.push(Command::CopyBufferRegion {
            dst: dst.raw().clone(),
            dst_offset,
            src: src.raw().clone(),
            src_offset,
            size,
        });
        Ok(())
    }

    /// Bind a descriptor table for subsequent dispatches
    ///
    /// `resources` are the resources the table references; none may have an
    /// open split barrier.
    pub fn set_binding_table(&mut self, table: Arc<dyn RawBindingTable>, resources: &[ResourceId]) -> Result<()> {
        self.ensure_open()?;
        self.require(Capabilities::COMPUTE)?;
        self.consume(resources)?;
        self.commands.push(Command::SetBindingTable(table));
        Ok(())
    }

    /// Dispatch a compute grid
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.ensure_open()?;
        self.require(Capabilities::COMPUTE)?;
        if x == 0 || y == 0 || z == 0 {
            return Err(Error::InvalidParameter("empty dispatch"));
        }
        self.flush_resource_state();
        self.commands.push(Command::Dispatch { x, y, z });
        Ok(())
    }

    /// Append a command that consumes no tracked resource
    pub fn record_command(&mut self, command: Command) -> Result<()> {
        self.ensure_open()?;
        self.flush_resource_state();
        self.commands.push(command);
        Ok(())
    }

    fn consume(&mut self, resources: &[ResourceId]) -> Result<()> {
        for &id in resources {
            self.tracker.ensure_consumable(id)?;
        }
        self.flush_resource_state();
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Apply declared end states, flush and stop recording
    ///
    /// Closing twice is a no-op. If applying end states fails the list stays
    /// open and should be reset.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(end) = self.end_states.take() {
            let applied = self.tracker.apply_end_states(&end, &mut self.commands);
            self.end_states = Some(end);
            applied?;
        }
        self.flush_resource_state();
        self.closed = true;
        log::debug!(
            "closed {} list{}: {} commands, {} barriers",
            self.kind,
            self.label.as_deref().map(|l| alloc::format!(" '{}'", l)).unwrap_or_default(),
            self.commands.len(),
            self.barrier_count()
        );
        Ok(())
    }

    /// Drop recorded commands and reopen
    ///
    /// With `reset_states` every record is forgotten; otherwise records
    /// restart from their settled states.
    pub fn reset(&mut self, reset_states: bool) {
        self.commands.clear();
        self.end_states = None;
        self.closed = false;
        if reset_states {
            self.tracker = StateTracker::new(self.device.arena().clone(), self.kind, self.config.clone());
        } else {
            self.tracker.rebase();
        }
    }
}

static_assertions::assert_impl_all!(CommandList: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::soft::SoftInstance;
    use basalt_core::{BarrierKind, BufferDesc, ResourceFlags};

    fn setup() -> (Device, Resource, Resource) {
        let device = SoftInstance::new().open_device();
        let a = device.create_buffer(&BufferDesc::new(128)).unwrap();
        let b = device.create_buffer(&BufferDesc::new(128)).unwrap();
        (device, a, b)
    }

    #[test]
    fn test_copy_transitions_and_flushes() {
        let (device, src, dst) = setup();
        let mut list = CommandList::new(&device, ListKind::Copy);
        list.copy_buffer_region(&dst, 0, &src, 0, 64).unwrap();

        let names: Vec<_> = list.commands().iter().map(|c| c.name()).collect();
        assert_eq!(names, alloc::vec!["barriers", "copy_buffer_region"]);
        // Source promoted, destination transitioned
        assert_eq!(list.barrier_count(), 1);
        assert_eq!(list.commands()[0].barriers()[0].resource, dst.id());
    }

    #[test]
    fn test_copy_checks_ranges() {
        let (device, src, dst) = setup();
        let mut list = CommandList::new(&device, ListKind::Copy);
        assert!(matches!(
            list.copy_buffer_region(&dst, 100, &src, 0, 64),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            list.copy_buffer_region(&src, 0, &src, 64, 64),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_capabilities() {
        let (device, _, _) = setup();
        let mut list = CommandList::new(&device, ListKind::Copy);
        assert_eq!(
            list.dispatch(1, 1, 1),
            Err(Error::MissingCapability {
                kind: ListKind::Copy,
                required: Capabilities::COMPUTE
            })
        );
        let mut list = CommandList::new(&device, ListKind::Compute);
        assert!(list.dispatch(1, 1, 1).is_ok());
    }

    #[test]
    fn test_flush_is_idempotent() {
        let (device, a, _) = setup();
        let mut list = CommandList::new(&device, ListKind::Direct);
        list.transition(&a, ResourceState::COPY_DEST).unwrap();
        list.flush_resource_state();
        list.flush_resource_state();
        assert_eq!(list.commands().len(), 1);
    }

    #[test]
    fn test_close_applies_end_states_to_touched_only() {
        let (device, a, b) = setup();
        let mut list = CommandList::new(&device, ListKind::Direct);
        list.declare_end_states(
            StateList::new()
                .with(a.id(), ResourceState::COPY_SOURCE)
                .with(b.id(), ResourceState::COPY_DEST),
        )
        .unwrap();
        list.transition(&a, ResourceState::COPY_DEST).unwrap();
        list.close().unwrap();
        list.close().unwrap();

        assert_eq!(list.barrier_count(), 2);
        assert!(list.tracker().record(b.id()).is_none());
        assert_eq!(
            list.generate_state_list().get(a.id()).map(|e| e.state),
            Some(ResourceState::COPY_SOURCE)
        );
        assert_eq!(list.transition(&a, ResourceState::COPY_DEST), Err(Error::ListClosed));
    }

    #[test]
    fn test_close_rejects_open_split() {
        let (device, a, _) = setup();
        let mut list = CommandList::new(&device, ListKind::Direct);
        list.declare_end_states(StateList::new().with(a.id(), ResourceState::COPY_DEST))
            .unwrap();
        list.begin_split(&a, ResourceState::COPY_DEST).unwrap();
        assert_eq!(list.close(), Err(Error::SplitBarrierOpen(a.id())));
        assert!(!list.is_closed());
    }

    #[test]
    fn test_split_pair_stream() {
        let (device, a, _) = setup();
        let mut list = CommandList::new(&device, ListKind::Direct);
        list.begin_split(&a, ResourceState::COPY_DEST).unwrap();
        list.end_split(&a, ResourceState::COPY_DEST).unwrap();
        list.close().unwrap();
        let kinds: Vec<_> = list.commands()[0].barriers().iter().map(|b| b.kind).collect();
        assert_eq!(kinds, alloc::vec![BarrierKind::Begin, BarrierKind::End]);
    }

    #[test]
    fn test_binding_table_requires_consumable() {
        let device = SoftInstance::new().open_device();
        let a = device
            .create_buffer(&BufferDesc::new(64).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS))
            .unwrap();
        let table = device
            .raw()
            .create_binding_table(&basalt_core::hal::BindingTableDesc::default())
            .unwrap();
        let mut list = CommandList::new(&device, ListKind::Compute);
        list.begin_split(&a, ResourceState::UNORDERED_ACCESS).unwrap();
        assert_eq!(
            list.set_binding_table(table.clone(), &[a.id()]),
            Err(Error::SplitBarrierOpen(a.id()))
        );
        list.end_split(&a, ResourceState::UNORDERED_ACCESS).unwrap();
        list.set_binding_table(table, &[a.id()]).unwrap();
        assert_eq!(list.commands().last().map(|c| c.name()), Some("set_binding_table"));
    }

    #[test]
    fn test_reset() {
        let (device, a, _) = setup();
        let mut list = CommandList::new(&device, ListKind::Direct);
        list.transition(&a, ResourceState::COPY_SOURCE).unwrap();
        list.close().unwrap();

        list.reset(false);
        assert!(!list.is_closed());
        assert!(list.commands().is_empty());
        assert_eq!(
            list.tracker().record(a.id()).map(|r| r.current),
            Some(ResourceState::COMMON)
        );

        list.reset(true);
        assert!(list.tracker().records().is_empty());
    }
}
