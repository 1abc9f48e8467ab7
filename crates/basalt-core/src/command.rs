//! # Command Stream
//!
//! Backend-neutral commands recorded by command lists.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::hal::{RawBindingTable, RawMemory, RawQueryHeap};
use crate::state::ResourceState;
use crate::types::ResourceId;

// =============================================================================
// BARRIERS
// =============================================================================

/// Barrier flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// Complete transition
    Full,
    /// First half of a split transition
    Begin,
    /// Second half of a split transition
    End,
}

/// State transition of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
    /// Resource
    pub resource: ResourceId,
    /// State before
    pub before: ResourceState,
    /// State after
    pub after: ResourceState,
    /// Flavor
    pub kind: BarrierKind,
}

impl Barrier {
    /// Complete transition
    pub const fn transition(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
            kind: BarrierKind::Full,
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Recorded command
#[derive(Debug, Clone)]
pub enum Command {
    /// Batch of transitions
    Barriers(Vec<Barrier>),
    /// Buffer to buffer copy
    CopyBufferRegion {
        /// Destination memory
        dst: Arc<dyn RawMemory>,
        /// Destination offset
        dst_offset: u64,
        /// Source memory
        src: Arc<dyn RawMemory>,
        /// Source offset
        src_offset: u64,
        /// Bytes
        size: u64,
    },
    /// Write a query value
    EndQuery {
        /// Heap
        heap: Arc<dyn RawQueryHeap>,
        /// Query index in the heap
        index: u32,
    },
    /// Copy query values into memory
    ResolveQuery {
        /// Heap
        heap: Arc<dyn RawQueryHeap>,
        /// First query
        start: u32,
        /// Number of queries
        count: u32,
        /// Destination memory
        dst: Arc<dyn RawMemory>,
        /// Destination offset
        dst_offset: u64,
    },
    /// Bind a table for following dispatches
    SetBindingTable(Arc<dyn RawBindingTable>),
    /// Compute dispatch
    Dispatch {
        /// Groups in X
        x: u32,
        /// Groups in Y
        y: u32,
        /// Groups in Z
        z: u32,
    },
}

impl Command {
    /// Barriers carried by this command
    pub fn barriers(&self) -> &[Barrier] {
        match self {
            Self::Barriers(barriers) => barriers,
            _ => &[],
        }
    }

    /// Command name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Barriers(_) => "barriers",
            Self::CopyBufferRegion { .. } => "copy_buffer_region",
            Self::EndQuery { .. } => "end_query",
            Self::ResolveQuery { .. } => "resolve_query",
            Self::SetBindingTable(_) => "set_binding_table",
            Self::Dispatch { .. } => "dispatch",
        }
    }
}

/// Count the barriers of a command stream
pub fn count_barriers(commands: &[Command]) -> usize {
    commands.iter().map(|cmd| cmd.barriers().len()).sum()
}
