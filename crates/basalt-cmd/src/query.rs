//! # Query Pool
//!
//! Growable pool of fixed-capacity query blocks.
//!
//! ```text
//!   allocate ──▶ [block 0: 4/4] [block 1: 2/4] ◀── newest first
//!   finalize ──▶ base(block 0) = 0, base(block 1) = 4
//!   resolve  ──▶ readback: | timestamps ........ | occlusion .... |
//! ```
//!
//! Blocks of one kind are laid out back to back in the readback buffer,
//! kinds in the order they were first allocated.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Once;

use basalt_core::hal::RawQueryHeap;
use basalt_core::{
    BufferDesc, Command, CompletionPromise, Device, Error, HeapType, ListKind, MapAccess,
    OptionalSupport, QueryKind, Resource, Result,
};

use crate::list::CommandList;
use crate::queue::CommandQueue;

/// Handle of one allocated query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryToken {
    /// Block index in the pool
    pub block: u32,
    /// Query index inside the block
    pub index: u32,
}

/// Fixed-capacity block of queries
#[derive(Debug)]
pub struct QueryBlock {
    kind: QueryKind,
    heap: Arc<dyn RawQueryHeap>,
    capacity: u32,
    used: u32,
    base: Option<u32>,
}

impl QueryBlock {
    /// Query kind
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Number of queries
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocated queries
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Offset in the resolved layout, once finalized
    pub fn base(&self) -> Option<u32> {
        self.base
    }

    fn is_full(&self) -> bool {
        self.used >= self.capacity
    }
}

/// Growable pool of query blocks
#[derive(Debug)]
pub struct QueryPool {
    device: Device,
    blocks: Vec<QueryBlock>,
    finalized: bool,
}

impl QueryPool {
    /// Empty pool
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            blocks: Vec::new(),
            finalized: false,
        }
    }

    /// Blocks in allocation order
    pub fn blocks(&self) -> &[QueryBlock] {
        &self.blocks
    }

    /// Check if the layout is fixed
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Allocate one query
    ///
    /// Reuses the most recent block of `kind` with room, otherwise creates a
    /// block of `initial_capacity`.
    pub fn allocate(&mut self, kind: QueryKind, initial_capacity: u32) -> Result<QueryToken> {
        if self.finalized {
            return Err(Error::QueriesFinalized);
        }
        let found = self
            .blocks
            .iter()
            .rposition(|b| b.kind == kind && !b.is_full());
        let block = match found {
            Some(block) => block,
            None => {
                if initial_capacity == 0 {
                    return Err(Error::InvalidParameter("query block capacity is zero"));
                }
                let heap = self.device.raw().create_query_heap(kind, initial_capacity)?;
                log::debug!("query block {} ({:?} x{})", self.blocks.len(), kind, initial_capacity);
                self.blocks.push(QueryBlock {
                    kind,
                    heap,
                    capacity: initial_capacity,
                    used: 0,
                    base: None,
                });
                self.blocks.len() - 1
            }
        };

        let entry = &mut self.blocks[block];
        let index = entry.used;
        entry.used += 1;
        Ok(QueryToken {
            block: block as u32,
            index,
        })
    }

    /// Allocate a timestamp and record it into `list`
    pub fn record_timestamp(&mut self, list: &mut CommandList, initial_capacity: u32) -> Result<QueryToken> {
        if list.kind() == ListKind::Copy && !self.device.supports(OptionalSupport::COPY_QUEUE_TIMESTAMP) {
            return Err(Error::FeatureNotSupported("copy queue timestamps"));
        }
        let token = self.allocate(QueryKind::Timestamp, initial_capacity)?;
        let heap = self.blocks[token.block as usize].heap.clone();
        list.record_command(Command::EndQuery {
            heap,
            index: token.index,
        })?;
        Ok(token)
    }

    /// Fix the resolved layout
    ///
    /// Must be called exactly once, after the last allocation.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(Error::QueriesFinalized);
        }
        let mut kinds: Vec<QueryKind> = Vec::new();
        for block in &self.blocks {
            if !kinds.contains(&block.kind) {
                kinds.push(block.kind);
            }
        }

        let mut offset = 0u32;
        for kind in kinds {
            for block in self.blocks.iter_mut().filter(|b| b.kind == kind) {
                block.base = Some(offset);
                offset += block.used;
            }
        }
        self.finalized = true;
        log::trace!("finalized {} query blocks, {} queries", self.blocks.len(), offset);
        Ok(())
    }

    fn total(&self) -> u32 {
        self.blocks.iter().map(|b| b.used).sum()
    }

    /// Copy every query into one readback buffer
    pub fn resolve(&self, queue: &CommandQueue) -> Result<QueryResolve> {
        if !self.finalized {
            return Err(Error::QueriesNotFinalized);
        }
        let total = self.total();
        if total == 0 {
            return Err(Error::InvalidParameter("no queries to resolve"));
        }

        let has_timestamps = self.blocks.iter().any(|b| b.kind == QueryKind::Timestamp && b.used > 0);
        let ratio = if has_timestamps {
            1e9 / queue.timestamp_frequency()? as f64
        } else {
            1.0
        };

        let stride = QueryKind::Timestamp.result_size();
        let readback = self.device.create_buffer(
            &BufferDesc::new(u64::from(total) * stride)
                .with_heap_type(HeapType::Readback)
                .with_label("query readback"),
        )?;

        let mut list = queue.create_list(None);
        let mut layout = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let base = block.base.ok_or(Error::QueriesNotFinalized)?;
            layout.push(ResolvedBlock {
                kind: block.kind,
                base,
                used: block.used,
            });
            if block.used == 0 {
                continue;
            }
            list.record_command(Command::ResolveQuery {
                heap: block.heap.clone(),
                start: 0,
                count: block.used,
                dst: readback.raw().clone(),
                dst_offset: u64::from(base) * block.kind.result_size(),
            })?;
        }
        let completion = queue.execute(&mut list)?;

        Ok(QueryResolve {
            readback,
            completion,
            ratio,
            layout,
            values: Once::new(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedBlock {
    kind: QueryKind,
    base: u32,
    used: u32,
}

/// Resolved queries and their tick-to-nanosecond ratio
#[derive(Debug)]
pub struct QueryResolve {
    readback: Resource,
    completion: CompletionPromise,
    ratio: f64,
    layout: Vec<ResolvedBlock>,
    values: Once<Vec<u64>>,
}

impl QueryResolve {
    /// Completion of the resolve copy
    pub fn completion(&self) -> &CompletionPromise {
        &self.completion
    }

    /// Nanoseconds per timestamp tick
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Readback buffer
    pub fn readback(&self) -> &Resource {
        &self.readback
    }

    fn raw_values(&self) -> Result<&[u64]> {
        let values = self.values.try_call_once(|| {
            self.completion.wait().into_result()?;
            let mapping = self.readback.map_all(MapAccess::Read)?;
            Ok::<_, Error>(
                mapping
                    .chunks_exact(8)
                    .map(bytemuck::pod_read_unaligned::<u64>)
                    .collect(),
            )
        })?;
        Ok(values)
    }

    /// Raw counter of a query
    pub fn raw_value(&self, token: QueryToken) -> Result<u64> {
        let block = self
            .layout
            .get(token.block as usize)
            .filter(|b| token.index < b.used)
            .ok_or(Error::InvalidQueryToken)?;
        let values = self.raw_values()?;
        values
            .get((block.base + token.index) as usize)
            .copied()
            .ok_or(Error::InvalidQueryToken)
    }

    /// Normalized value of a query
    ///
    /// Timestamps are in nanoseconds; other kinds are returned as counted.
    /// Maps the readback buffer on first use and blocks until the resolve
    /// completes.
    pub fn read_value(&self, token: QueryToken) -> Result<f64> {
        let raw = self.raw_value(token)? as f64;
        match self.layout[token.block as usize].kind {
            QueryKind::Timestamp => Ok(raw * self.ratio),
            QueryKind::Occlusion => Ok(raw),
        }
    }

    /// Nanoseconds between two timestamps
    pub fn duration(&self, start: QueryToken, end: QueryToken) -> Result<f64> {
        Ok(self.read_value(end)? - self.read_value(start)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::soft::{SoftInstance, DEFAULT_TIMESTAMP_FREQUENCY, TICKS_PER_QUERY};

    #[test]
    fn test_allocate_grows_and_reuses() {
        let device = SoftInstance::new().open_device();
        let mut pool = QueryPool::new(&device);

        let tokens: Vec<_> = (0..3)
            .map(|_| pool.allocate(QueryKind::Timestamp, 2).unwrap())
            .collect();
        assert_eq!(
            tokens,
            alloc::vec![
                QueryToken { block: 0, index: 0 },
                QueryToken { block: 0, index: 1 },
                QueryToken { block: 1, index: 0 },
            ]
        );
        let occlusion = pool.allocate(QueryKind::Occlusion, 4).unwrap();
        assert_eq!(occlusion, QueryToken { block: 2, index: 0 });
        assert_eq!(
            pool.allocate(QueryKind::Timestamp, 2).unwrap(),
            QueryToken { block: 1, index: 1 }
        );
    }

    #[test]
    fn test_finalize_bases() {
        let device = SoftInstance::new().open_device();
        let mut pool = QueryPool::new(&device);
        for _ in 0..3 {
            pool.allocate(QueryKind::Timestamp, 2).unwrap();
        }
        pool.allocate(QueryKind::Occlusion, 4).unwrap();
        pool.allocate(QueryKind::Timestamp, 2).unwrap();

        pool.finalize().unwrap();
        let bases: Vec<_> = pool.blocks().iter().map(|b| b.base()).collect();
        assert_eq!(bases, alloc::vec![Some(0), Some(2), Some(4)]);
        assert_eq!(pool.finalize(), Err(Error::QueriesFinalized));
        assert_eq!(
            pool.allocate(QueryKind::Timestamp, 2),
            Err(Error::QueriesFinalized)
        );
    }

    #[test]
    fn test_resolve_requires_finalize() {
        let device = SoftInstance::new().open_device();
        let queue = CommandQueue::new(&device, ListKind::Direct).unwrap();
        let mut pool = QueryPool::new(&device);
        pool.allocate(QueryKind::Timestamp, 2).unwrap();
        assert!(matches!(pool.resolve(&queue), Err(Error::QueriesNotFinalized)));
    }

    #[test]
    fn test_timestamps_round_trip() {
        let device = SoftInstance::new().open_device();
        let queue = CommandQueue::new(&device, ListKind::Direct).unwrap();
        let mut pool = QueryPool::new(&device);

        let mut list = queue.create_list(None);
        let start = pool.record_timestamp(&mut list, 1).unwrap();
        let end = pool.record_timestamp(&mut list, 1).unwrap();
        queue.execute(&mut list).unwrap().wait();

        pool.finalize().unwrap();
        let resolved = pool.resolve(&queue).unwrap();
        let ns_per_tick = 1e9 / DEFAULT_TIMESTAMP_FREQUENCY as f64;
        assert_eq!(resolved.ratio(), ns_per_tick);
        assert_eq!(
            resolved.raw_value(end).unwrap() - resolved.raw_value(start).unwrap(),
            TICKS_PER_QUERY
        );
        let elapsed = resolved.duration(start, end).unwrap();
        assert!((elapsed - TICKS_PER_QUERY as f64 * ns_per_tick).abs() < 1e-6);
        assert_eq!(
            resolved.read_value(QueryToken { block: 0, index: 1 }),
            Err(Error::InvalidQueryToken)
        );
    }

    #[test]
    fn test_copy_timestamps_need_support() {
        let device = SoftInstance::empty()
            .with_adapter(SoftInstance::discrete_adapter("discrete"))
            .open_device();
        let mut pool = QueryPool::new(&device);
        let mut list = CommandList::new(&device, ListKind::Copy);
        assert_eq!(
            pool.record_timestamp(&mut list, 4),
            Err(Error::FeatureNotSupported("copy queue timestamps"))
        );
        assert!(pool.blocks().is_empty());
    }
}
