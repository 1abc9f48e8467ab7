//! # Resource State Tracker
//!
//! Per-list bookkeeping that decides when a state change needs a barrier.
//!
//! ```text
//!   update_state(R, S)
//!        │
//!        ▼
//!   record for R? ──no──▶ seed from begin states, else arena resting state
//!        │
//!        ▼
//!   current ⊇ S ? ─────yes──▶ Unchanged
//!        │no
//!        ▼
//!   untouched COMMON and policy allows? ──yes──▶ Promoted (no barrier)
//!        │no
//!        ▼
//!   promoted read + read request allowed? ──yes──▶ Merged (no barrier)
//!        │no
//!        ▼
//!   barrier current → S into the batch ──▶ Transitioned / SplitBegun / SplitEnded
//! ```
//!
//! Barriers accumulate in a fixed-size batch and reach the command stream on
//! [`StateTracker::flush`], which consuming commands call implicitly.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use arrayvec::ArrayVec;
use hashbrown::HashMap;

use basalt_core::{
    ArenaEntry, Barrier, BarrierKind, Command, Error, ListKind, ResourceArena, ResourceFlags,
    ResourceId, ResourceState, Result,
};
use basalt_core::types::HeapType;

/// Barriers buffered before an automatic flush
pub const BARRIER_BATCH: usize = 16;

// =============================================================================
// TRANSITION FLAGS
// =============================================================================

bitflags::bitflags! {
    /// Options of a state request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransitionFlags: u32 {
        /// Start a split barrier; the state is reached at the matching end
        const SPLIT_BEGIN = 1 << 0;
        /// Finish a split barrier begun here or in an earlier list
        const SPLIT_END = 1 << 1;
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// How a record reached its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    /// Seeded, not changed yet
    Tracked,
    /// Implicitly promoted out of COMMON
    Promoted,
    /// Explicit barrier emitted
    Transitioned,
    /// Split barrier begun, end pending
    SplitBegin,
    /// Split barrier ended
    SplitEnd,
}

/// Tracked state of one resource inside one list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRecord {
    /// Resource
    pub resource: ResourceId,
    /// State as of the last request
    pub current: ResourceState,
    /// State when the record was created
    pub origin: ResourceState,
    /// Flush that carries (or carried) the last barrier of this record
    pub flush_generation: u32,
    /// How the record reached `current`
    pub status: RecordStatus,
    /// Target of an open split barrier
    pub pending_split: Option<ResourceState>,
    entry: ArenaEntry,
}

impl StateRecord {
    /// Placement and usage of the resource
    pub fn entry(&self) -> &ArenaEntry {
        &self.entry
    }
}

/// Result of a state request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Already in a satisfying state
    Unchanged,
    /// Promoted out of COMMON without a barrier
    Promoted,
    /// Combined with a promoted read state without a barrier
    Merged,
    /// Full barrier emitted
    Transitioned(Barrier),
    /// Split begin emitted
    SplitBegun(Barrier),
    /// Split end emitted
    SplitEnded(Barrier),
}

impl TransitionOutcome {
    /// Barrier emitted by the request
    pub fn barrier(&self) -> Option<&Barrier> {
        match self {
            Self::Transitioned(b) | Self::SplitBegun(b) | Self::SplitEnded(b) => Some(b),
            _ => None,
        }
    }

    /// Check if a barrier was emitted
    pub fn emits_barrier(&self) -> bool {
        self.barrier().is_some()
    }
}

// =============================================================================
// STATE LISTS
// =============================================================================

/// Final (or declared) state of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateListEntry {
    /// Resource
    pub resource: ResourceId,
    /// State
    pub state: ResourceState,
    /// Open split barrier target
    pub pending_split: Option<ResourceState>,
}

/// Per-resource states handed from one list to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateList {
    entries: Vec<StateListEntry>,
}

impl StateList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the state of a resource
    pub fn set(&mut self, resource: ResourceId, state: ResourceState) {
        self.insert(StateListEntry {
            resource,
            state,
            pending_split: None,
        });
    }

    /// Builder form of [`StateList::set`]
    pub fn with(mut self, resource: ResourceId, state: ResourceState) -> Self {
        self.set(resource, state);
        self
    }

    fn insert(&mut self, entry: StateListEntry) {
        match self.entries.iter_mut().find(|e| e.resource == entry.resource) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// State of a resource
    pub fn get(&self, resource: ResourceId) -> Option<&StateListEntry> {
        self.entries.iter().find(|e| e.resource == resource)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &StateListEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// PROMOTION POLICY
// =============================================================================

/// Rule deciding which requests leave COMMON without a barrier
///
/// Implicit promotion is defined by the target API. The tracker asks the
/// policy for untouched records still in COMMON, and again to widen a
/// promoted read state.
pub trait PromotionPolicy: Send + Sync + fmt::Debug {
    /// Check if `requested` may be reached from COMMON without a barrier
    fn can_promote(&self, list: ListKind, resource: &ArenaEntry, requested: ResourceState) -> bool;
}

/// Promote read-only requests on copy lists, or copy/non-pixel reads anywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyPromotion;

impl PromotionPolicy for ReadOnlyPromotion {
    fn can_promote(&self, list: ListKind, _resource: &ArenaEntry, requested: ResourceState) -> bool {
        if !requested.is_read_only() {
            return false;
        }
        list == ListKind::Copy
            || (ResourceState::COPY_SOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE)
                .contains(requested)
    }
}

/// Buffer and simultaneous-access promotion rules of explicit APIs
///
/// Buffers and simultaneous-access textures promote to any non-depth state;
/// other textures only to shader reads and copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayPromotion;

impl PromotionPolicy for DecayPromotion {
    fn can_promote(&self, _list: ListKind, resource: &ArenaEntry, requested: ResourceState) -> bool {
        if requested.intersects(ResourceState::DEPTH) {
            return false;
        }
        if resource.is_simultaneous() {
            return !requested.is_write() || requested.bits().count_ones() == 1;
        }
        (ResourceState::SHADER_RESOURCE | ResourceState::COPY_SOURCE | ResourceState::COPY_DEST)
            .contains(requested)
            && (requested.is_read_only() || requested == ResourceState::COPY_DEST)
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tracker options
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Promotion rule
    pub policy: Arc<dyn PromotionPolicy>,
    /// Keep a history of decisions
    pub record_history: bool,
}

impl TrackerConfig {
    /// Use a promotion policy
    pub fn with_policy(mut self, policy: Arc<dyn PromotionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Keep or drop the decision history
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.record_history = enabled;
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            policy: Arc::new(ReadOnlyPromotion),
            record_history: false,
        }
    }
}

// =============================================================================
// HISTORY / STATS
// =============================================================================

/// Kind of tracker decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Promotion out of COMMON
    Promote,
    /// Widened promoted read state
    Merge,
    /// Full barrier
    Transition,
    /// Split begin
    SplitBegin,
    /// Split end
    SplitEnd,
}

/// One entry of the decision history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Resource
    pub resource: ResourceId,
    /// State before
    pub before: ResourceState,
    /// State after
    pub after: ResourceState,
    /// Decision taken
    pub decision: Decision,
}

/// Tracker counters
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    /// Promotions
    pub promotions: u32,
    /// Merged read states
    pub merges: u32,
    /// Full barriers
    pub transitions: u32,
    /// Split begins
    pub split_begins: u32,
    /// Split ends
    pub split_ends: u32,
    /// Non-empty flushes
    pub flushes: u32,
}

// =============================================================================
// STATE VALIDATION
// =============================================================================

/// Check that a resource may enter `requested` at all
pub fn validate_state(resource: ResourceId, entry: &ArenaEntry, requested: ResourceState) -> Result<()> {
    let forbid = |reason| {
        Err(Error::StateForbidden {
            resource,
            requested,
            reason,
        })
    };

    if requested.is_invalid() {
        return forbid("INVALID is not a transition target");
    }
    match entry.heap {
        HeapType::Upload if requested.is_empty() || !ResourceState::GENERIC_READ.contains(requested) => {
            return forbid("upload memory stays in GENERIC_READ");
        }
        HeapType::Readback if requested != ResourceState::COPY_DEST => {
            return forbid("readback memory stays in COPY_DEST");
        }
        _ => {}
    }
    if requested.is_write() && requested.bits().count_ones() > 1 {
        return forbid("write states are exclusive");
    }
    if requested.intersects(ResourceState::DEPTH) {
        if entry.is_simultaneous() {
            return forbid("buffers and simultaneous-access textures have no depth states");
        }
        if !entry.flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL) {
            return forbid("resource does not allow depth-stencil");
        }
    }
    if requested.contains(ResourceState::UNORDERED_ACCESS)
        && !entry.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS)
    {
        return forbid("resource does not allow unordered access");
    }
    if requested.contains(ResourceState::RENDER_TARGET)
        && !entry.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET)
    {
        return forbid("resource does not allow render target");
    }
    if requested.intersects(ResourceState::SHADER_RESOURCE)
        && entry.flags.contains(ResourceFlags::DENY_SHADER_RESOURCE)
    {
        return forbid("resource denies shader reads");
    }
    Ok(())
}

// =============================================================================
// STATE TRACKER
// =============================================================================

/// Per-list state tracker
pub struct StateTracker {
    arena: Arc<ResourceArena>,
    kind: ListKind,
    config: TrackerConfig,
    records: Vec<StateRecord>,
    index: HashMap<ResourceId, usize>,
    begin_states: Option<StateList>,
    batch: ArrayVec<Barrier, BARRIER_BATCH>,
    generation: u32,
    history: Vec<HistoryEntry>,
    stats: TrackerStats,
}

impl StateTracker {
    /// Tracker seeding records from resting states
    pub fn new(arena: Arc<ResourceArena>, kind: ListKind, config: TrackerConfig) -> Self {
        Self {
            arena,
            kind,
            config,
            records: Vec::new(),
            index: HashMap::new(),
            begin_states: None,
            batch: ArrayVec::new(),
            generation: 0,
            history: Vec::new(),
            stats: TrackerStats::default(),
        }
    }

    /// Tracker seeding records from a previous list's states first
    pub fn with_begin_states(
        arena: Arc<ResourceArena>,
        kind: ListKind,
        config: TrackerConfig,
        begin: StateList,
    ) -> Self {
        let mut tracker = Self::new(arena, kind, config);
        tracker.begin_states = Some(begin);
        tracker
    }

    /// Tier of the owning list
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Records in first-touch order
    pub fn records(&self) -> &[StateRecord] {
        &self.records
    }

    /// Record of a resource
    pub fn record(&self, resource: ResourceId) -> Option<&StateRecord> {
        self.index.get(&resource).map(|&slot| &self.records[slot])
    }

    /// Begin-state declaration, if any
    pub fn begin_states(&self) -> Option<&StateList> {
        self.begin_states.as_ref()
    }

    /// Counters
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Decision history (empty unless enabled)
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Barriers waiting for the next flush
    pub fn pending_barriers(&self) -> &[Barrier] {
        &self.batch
    }

    /// Check if a resource has a barrier waiting for the next flush
    pub fn needs_flush(&self, resource: ResourceId) -> bool {
        self.record(resource)
            .is_some_and(|r| r.flush_generation > self.generation)
    }

    fn slot(&mut self, resource: ResourceId) -> Result<usize> {
        if let Some(&slot) = self.index.get(&resource) {
            return Ok(slot);
        }

        let entry = self.arena.get(resource)?;
        let (seed, pending_split) = match self.begin_states.as_ref().and_then(|b| b.get(resource)) {
            Some(declared) => (declared.state, declared.pending_split),
            None => (entry.resting, entry.pending_split),
        };
        let slot = self.records.len();
        self.records.push(StateRecord {
            resource,
            current: seed,
            origin: seed,
            flush_generation: 0,
            status: RecordStatus::Tracked,
            pending_split,
            entry,
        });
        self.index.insert(resource, slot);
        Ok(slot)
    }

    fn note(&mut self, resource: ResourceId, before: ResourceState, after: ResourceState, decision: Decision) {
        log::trace!("{:?} {} {:?} -> {:?}", decision, resource, before, after);
        if self.config.record_history {
            self.history.push(HistoryEntry {
                resource,
                before,
                after,
                decision,
            });
        }
    }

    fn emit(&mut self, slot: usize, barrier: Barrier, sink: &mut Vec<Command>) {
        if self.batch.is_full() {
            self.flush(sink);
        }
        self.batch.push(barrier);
        self.records[slot].flush_generation = self.generation + 1;
    }

    /// Request `requested` for a resource
    ///
    /// Barriers go into the batch; `sink` only receives a flush if the batch
    /// is full.
    pub fn update_state(
        &mut self,
        resource: ResourceId,
        requested: ResourceState,
        flags: TransitionFlags,
        sink: &mut Vec<Command>,
    ) -> Result<TransitionOutcome> {
        if flags.contains(TransitionFlags::SPLIT_BEGIN | TransitionFlags::SPLIT_END) {
            return Err(Error::InvalidParameter("split begin and end in one request"));
        }
        let slot = self.slot(resource)?;
        let record = self.records[slot];
        validate_state(resource, &record.entry, requested)?;

        if flags.contains(TransitionFlags::SPLIT_END) {
            return self.end_split(slot, requested, sink);
        }
        if record.pending_split.is_some() {
            return Err(Error::SplitBarrierOpen(resource));
        }
        if record.current.satisfies(requested) {
            return Ok(TransitionOutcome::Unchanged);
        }
        if flags.contains(TransitionFlags::SPLIT_BEGIN) {
            return Ok(self.begin_split(slot, requested, sink));
        }

        let policy = &self.config.policy;
        if record.status == RecordStatus::Tracked
            && record.current.is_common()
            && policy.can_promote(self.kind, &record.entry, requested)
        {
            let rec = &mut self.records[slot];
            rec.current = requested;
            rec.status = RecordStatus::Promoted;
            self.stats.promotions += 1;
            self.note(resource, ResourceState::COMMON, requested, Decision::Promote);
            return Ok(TransitionOutcome::Promoted);
        }

        let widened = record.current | requested;
        if record.status == RecordStatus::Promoted
            && record.current.is_read_only()
            && requested.is_read_only()
            && policy.can_promote(self.kind, &record.entry, widened)
        {
            self.records[slot].current = widened;
            self.stats.merges += 1;
            self.note(resource, record.current, widened, Decision::Merge);
            return Ok(TransitionOutcome::Merged);
        }

        let barrier = Barrier::transition(resource, record.current, requested);
        self.emit(slot, barrier, sink);
        let rec = &mut self.records[slot];
        rec.current = requested;
        rec.status = RecordStatus::Transitioned;
        self.stats.transitions += 1;
        self.note(resource, barrier.before, barrier.after, Decision::Transition);
        Ok(TransitionOutcome::Transitioned(barrier))
    }

    fn begin_split(&mut self, slot: usize, requested: ResourceState, sink: &mut Vec<Command>) -> TransitionOutcome {
        let record = self.records[slot];
        let barrier = Barrier {
            resource: record.resource,
            before: record.current,
            after: requested,
            kind: BarrierKind::Begin,
        };
        self.emit(slot, barrier, sink);
        let rec = &mut self.records[slot];
        rec.pending_split = Some(requested);
        rec.status = RecordStatus::SplitBegin;
        self.stats.split_begins += 1;
        self.note(record.resource, record.current, requested, Decision::SplitBegin);
        TransitionOutcome::SplitBegun(barrier)
    }

    fn end_split(
        &mut self,
        slot: usize,
        requested: ResourceState,
        sink: &mut Vec<Command>,
    ) -> Result<TransitionOutcome> {
        let record = self.records[slot];
        if record.pending_split != Some(requested) {
            return Err(Error::SplitBarrierMissing(record.resource));
        }
        let barrier = Barrier {
            resource: record.resource,
            before: record.current,
            after: requested,
            kind: BarrierKind::End,
        };
        self.emit(slot, barrier, sink);
        let rec = &mut self.records[slot];
        rec.current = requested;
        rec.pending_split = None;
        rec.status = RecordStatus::SplitEnd;
        self.stats.split_ends += 1;
        self.note(record.resource, record.current, requested, Decision::SplitEnd);
        Ok(TransitionOutcome::SplitEnded(barrier))
    }

    /// Fail if a resource is not ready to be consumed by a command
    pub fn ensure_consumable(&mut self, resource: ResourceId) -> Result<()> {
        let slot = self.slot(resource)?;
        match self.records[slot].pending_split {
            Some(_) => Err(Error::SplitBarrierOpen(resource)),
            None => Ok(()),
        }
    }

    /// Move batched barriers into `sink`
    ///
    /// Does nothing when the batch is empty.
    pub fn flush(&mut self, sink: &mut Vec<Command>) {
        if self.batch.is_empty() {
            return;
        }
        sink.push(Command::Barriers(self.batch.drain(..).collect()));
        self.generation += 1;
        self.stats.flushes += 1;
    }

    /// Bring every touched resource to its declared state
    pub fn apply_end_states(&mut self, declared: &StateList, sink: &mut Vec<Command>) -> Result<()> {
        for slot in 0..self.records.len() {
            let resource = self.records[slot].resource;
            if let Some(target) = declared.get(resource) {
                self.update_state(resource, target.state, TransitionFlags::empty(), sink)?;
            }
        }
        Ok(())
    }

    /// Current state of every touched resource
    pub fn generate_state_list(&self) -> StateList {
        StateList {
            entries: self
                .records
                .iter()
                .map(|r| StateListEntry {
                    resource: r.resource,
                    state: r.current,
                    pending_split: r.pending_split,
                })
                .collect(),
        }
    }

    /// Resting states once the list has executed
    ///
    /// Promoted records decay back to COMMON.
    pub fn settled_states(&self) -> impl Iterator<Item = StateListEntry> + '_ {
        self.records.iter().map(|r| StateListEntry {
            resource: r.resource,
            state: match r.status {
                RecordStatus::Promoted => ResourceState::COMMON,
                _ => r.current,
            },
            pending_split: r.pending_split,
        })
    }

    /// Forget every record
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
        self.batch.clear();
        self.history.clear();
        self.begin_states = None;
        self.generation = 0;
        self.stats = TrackerStats::default();
    }

    /// Keep records for another recording after execution
    ///
    /// Each record restarts from its settled state.
    pub fn rebase(&mut self) {
        self.batch.clear();
        self.generation = 0;
        for record in &mut self.records {
            if record.status == RecordStatus::Promoted {
                record.current = ResourceState::COMMON;
            }
            record.origin = record.current;
            record.status = RecordStatus::Tracked;
            record.flush_generation = 0;
        }
    }

    /// Log the decision history
    pub fn dump_history(&self) {
        for (i, entry) in self.history.iter().enumerate() {
            log::debug!(
                "#{:<4} {:?} {} {:?} -> {:?}",
                i,
                entry.decision,
                entry.resource,
                entry.before,
                entry.after
            );
        }
    }
}

impl fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTracker")
            .field("kind", &self.kind)
            .field("records", &self.records.len())
            .field("pending", &self.batch.len())
            .field("generation", &self.generation)
            .finish()
    }
}
