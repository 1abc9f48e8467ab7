//! # Staged Mapping
//!
//! CPU access to memory the CPU cannot see directly. A temporary staging
//! buffer in CPU-visible memory stands in for the target range and copies
//! move data in and out on the queue.
//!
//! ```text
//!   map_staged(read)            StagedMapping            finish / drop (write)
//!   target ──copy──▶ staging ──▶ &mut [u8] ──▶ staging ──copy──▶ target
//! ```

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use basalt_core::types::{CpuPageProperty, HeapProperties, HeapType, MemoryPool};
use basalt_core::{
    BufferDesc, CompletionPromise, Error, MapAccess, Mapping, Promise, Resource, Result,
};

use crate::queue::CommandQueue;

fn staging_heap(access: MapAccess) -> HeapProperties {
    let cpu_page = if access.reads() {
        CpuPageProperty::WriteBack
    } else {
        CpuPageProperty::WriteCombine
    };
    HeapProperties::custom(cpu_page, MemoryPool::PreferCpu)
}

fn copy_and_wait(queue: &CommandQueue, dst: &Resource, dst_offset: u64, src: &Resource, src_offset: u64, size: u64) -> Result<()> {
    let mut list = queue.create_list(None);
    list.copy_buffer_region(dst, dst_offset, src, src_offset, size)?;
    queue.execute(&mut list)?.wait().into_result()
}

/// Mapping of a range through a staging buffer
///
/// Writes reach the target when the mapping is finished or dropped.
#[derive(Debug)]
pub struct StagedMapping<'q> {
    queue: &'q CommandQueue,
    target: Resource,
    offset: u64,
    mapping: Option<Mapping>,
    access: MapAccess,
}

/// Map a range of a GPU-only buffer through a staging buffer
///
/// Blocks until the read copy (if any) completes.
pub fn map_staged<'q>(
    queue: &'q CommandQueue,
    target: &Resource,
    offset: u64,
    size: u64,
    access: MapAccess,
) -> Result<StagedMapping<'q>> {
    if !target.dimension().is_buffer() {
        return Err(Error::InvalidParameter("staged mapping needs a buffer"));
    }
    target.check_range(offset, size)?;

    let staging = queue.device().create_buffer(
        &BufferDesc::new(size)
            .with_heap(staging_heap(access))
            .with_label("staging"),
    )?;
    if access.reads() {
        copy_and_wait(queue, &staging, 0, target, offset, size)?;
    }
    let mapping = staging.map_all(access)?;
    log::trace!("staged map of {} at {} ({} bytes, {:?})", target.id(), offset, size, access);

    Ok(StagedMapping {
        queue,
        target: target.clone(),
        offset,
        mapping: Some(mapping),
        access,
    })
}

impl StagedMapping<'_> {
    /// Mapped target
    pub fn target(&self) -> &Resource {
        &self.target
    }

    /// Offset in the target
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Write back (if writable) and wait for the copy
    pub fn finish(mut self) -> Result<()> {
        self.write_back()
    }

    fn write_back(&mut self) -> Result<()> {
        let Some(mapping) = self.mapping.take() else {
            return Ok(());
        };
        if !self.access.writes() {
            return Ok(());
        }
        let staging = mapping.resource().clone();
        let size = mapping.len() as u64;
        mapping.commit()?;
        copy_and_wait(self.queue, &self.target, self.offset, &staging, 0, size)
    }
}

impl Deref for StagedMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.mapping.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for StagedMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self.mapping.as_mut() {
            Some(mapping) => &mut mapping[..],
            None => &mut [],
        }
    }
}

impl Drop for StagedMapping<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.write_back() {
            log::error!("staged write to {} failed: {}", self.target.id(), err);
        }
    }
}

// =============================================================================
// ASYNC TRANSFERS
// =============================================================================

/// Read a range, staging through readback memory when needed
pub fn read_bytes(queue: &CommandQueue, resource: &Resource, offset: u64, size: u64) -> Result<Promise<Vec<u8>>> {
    resource.check_range(offset, size)?;
    if resource.is_cpu_visible() {
        let mapping = resource.map(offset, size, MapAccess::Read)?;
        return Ok(Promise::ready(mapping.to_vec()));
    }

    let readback = queue
        .device()
        .create_buffer(&BufferDesc::new(size).with_heap_type(HeapType::Readback))?;
    let mut list = queue.create_list(None);
    list.copy_buffer_region(&readback, 0, resource, offset, size)?;
    let completion = queue.execute(&mut list)?;
    Ok(Promise::deferred(completion, move || {
        let mapping = readback.map_all(MapAccess::Read)?;
        Ok(mapping.to_vec())
    }))
}

/// Write bytes into a range, staging through upload memory when needed
///
/// The upload buffer is released by the first poll that observes completion.
pub fn write_bytes(queue: &CommandQueue, resource: &Resource, offset: u64, data: &[u8]) -> Result<CompletionPromise> {
    let size = data.len() as u64;
    resource.check_range(offset, size)?;
    if resource.is_cpu_visible() {
        let mut mapping = resource.map(offset, size, MapAccess::Write)?;
        mapping.copy_from_slice(data);
        mapping.commit()?;
        return Ok(CompletionPromise::completed());
    }

    let upload = queue
        .device()
        .create_buffer(&BufferDesc::new(size).with_heap_type(HeapType::Upload))?;
    let mut mapping = upload.map_all(MapAccess::Write)?;
    mapping.copy_from_slice(data);
    mapping.commit()?;

    let mut list = queue.create_list(None);
    list.copy_buffer_region(resource, offset, &upload, 0, size)?;
    let completion = queue.execute(&mut list)?;
    completion.on_complete(move |_| drop(upload));
    Ok(completion)
}
