//! # Software Backend
//!
//! In-memory implementation of the backend traits.
//!
//! Commands execute on the CPU at submission time. Completion of queue
//! timelines is controllable: a held queue records signals without
//! completing them until released, which models work still in flight. Tests
//! also inject submission failures and device loss through the queue.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::command::Command;
use crate::device::{AdapterInfo, Architecture, Device, OptionalSupport, ShaderDataTypes};
use crate::error::{DeviceError, Error, Result};
use crate::hal::{
    BindingTableDesc, Instance, MemoryDesc, QueryKind, RawBindingTable, RawDevice, RawMemory,
    RawQueryHeap, RawQueue, RawWaitHandle,
};
use crate::types::ListKind;

/// Timestamp frequency of software queues (ticks per second)
pub const DEFAULT_TIMESTAMP_FREQUENCY: u64 = 10_000_000;

/// Clock advance per recorded timestamp
pub const TICKS_PER_QUERY: u64 = 250;

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        fn relax() {
            std::thread::yield_now();
        }
    } else {
        fn relax() {
            core::hint::spin_loop();
        }
    }
}

// =============================================================================
// INSTANCE
// =============================================================================

/// Software instance
#[derive(Debug, Clone)]
pub struct SoftInstance {
    adapters: Vec<AdapterInfo>,
}

impl SoftInstance {
    /// Instance with one software adapter
    pub fn new() -> Self {
        Self {
            adapters: vec![Self::software_adapter()],
        }
    }

    /// Instance without adapters
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Add an adapter
    pub fn with_adapter(mut self, info: AdapterInfo) -> Self {
        self.adapters.push(info);
        self
    }

    /// Description of the built-in software adapter
    pub fn software_adapter() -> AdapterInfo {
        AdapterInfo {
            name: String::from("Basalt Soft Adapter"),
            vendor_id: 0x1414,
            software: true,
            architecture: Architecture::UMA | Architecture::CACHE_COHERENT_UMA,
            data_types: ShaderDataTypes::all(),
            optional: OptionalSupport::COPY_QUEUE_TIMESTAMP,
            shader_model: 60,
            wave_size: 32,
        }
    }

    /// Description of a discrete hardware-like adapter
    pub fn discrete_adapter(name: &str) -> AdapterInfo {
        AdapterInfo {
            name: String::from(name),
            vendor_id: 0x10de,
            software: false,
            architecture: Architecture::ISOLATED_MMU,
            data_types: ShaderDataTypes::FP16 | ShaderDataTypes::INT16 | ShaderDataTypes::INT64,
            optional: OptionalSupport::DEPTH_BOUNDS_TEST,
            shader_model: 66,
            wave_size: 32,
        }
    }

    /// Open the first adapter, or the built-in one if there is none
    pub fn open_device(&self) -> Device {
        let info = self
            .adapters
            .first()
            .cloned()
            .unwrap_or_else(Self::software_adapter);
        Device::new(info.clone(), Arc::new(SoftDevice::new(info)))
    }
}

impl Default for SoftInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl Instance for SoftInstance {
    fn adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.clone()
    }

    fn open(&self, index: usize) -> Result<Arc<dyn RawDevice>> {
        let info = self.adapters.get(index).cloned().ok_or(Error::NoDevice)?;
        Ok(Arc::new(SoftDevice::new(info)))
    }
}

// =============================================================================
// DEVICE
// =============================================================================

/// Software device
#[derive(Debug)]
pub struct SoftDevice {
    info: AdapterInfo,
    clock: Arc<AtomicU64>,
}

impl SoftDevice {
    /// Create a device for an adapter
    pub fn new(info: AdapterInfo) -> Self {
        Self {
            info,
            clock: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl RawDevice for SoftDevice {
    fn create_memory(&self, desc: &MemoryDesc) -> Result<Arc<dyn RawMemory>> {
        let len = usize::try_from(desc.size).map_err(|_| Error::InvalidParameter("allocation too large"))?;
        Ok(Arc::new(SoftMemory {
            bytes: Mutex::new(vec![0u8; len]),
        }))
    }

    fn create_queue(&self, kind: ListKind) -> Result<Arc<dyn RawQueue>> {
        Ok(Arc::new(SoftQueue {
            kind,
            timeline: Arc::new(SoftTimeline::default()),
            clock: self.clock.clone(),
            copy_timestamps: self.info.optional.contains(OptionalSupport::COPY_QUEUE_TIMESTAMP),
            fail_next: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        }))
    }

    fn create_query_heap(&self, kind: QueryKind, capacity: u32) -> Result<Arc<dyn RawQueryHeap>> {
        if capacity == 0 {
            return Err(Error::InvalidParameter("empty query heap"));
        }
        Ok(Arc::new(SoftQueryHeap {
            kind,
            values: Mutex::new(vec![0u64; capacity as usize]),
        }))
    }

    fn create_binding_table(&self, desc: &BindingTableDesc) -> Result<Arc<dyn RawBindingTable>> {
        Ok(Arc::new(SoftBindingTable { desc: desc.clone() }))
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// Software memory allocation
#[derive(Debug)]
pub struct SoftMemory {
    bytes: Mutex<Vec<u8>>,
}

impl SoftMemory {
    fn range(&self, offset: u64, len: usize) -> Result<core::ops::Range<usize>> {
        let size = self.bytes.lock().len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(Error::OutOfBounds {
                offset,
                size: len as u64,
                limit: size as u64,
            }),
        }
    }
}

impl RawMemory for SoftMemory {
    fn size(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let range = self.range(offset, dst.len())?;
        dst.copy_from_slice(&self.bytes.lock()[range]);
        Ok(())
    }

    fn write(&self, offset: u64, src: &[u8]) -> Result<()> {
        let range = self.range(offset, src.len())?;
        self.bytes.lock()[range].copy_from_slice(src);
        Ok(())
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Entry of a software queue's submission log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A batch of commands
    Execute {
        /// Commands in the batch
        commands: usize,
        /// Barriers in the batch
        barriers: usize,
    },
    /// Timeline signal
    Signal(u64),
    /// Wait on another queue's timeline
    Wait {
        /// Awaited value
        value: u64,
    },
}

#[derive(Debug, Default)]
struct SoftTimeline {
    completed: AtomicU64,
    signaled: AtomicU64,
    held: AtomicBool,
    lost: Mutex<Option<DeviceError>>,
}

impl SoftTimeline {
    fn lost(&self) -> Option<DeviceError> {
        self.lost.lock().clone()
    }
}

/// Software queue
#[derive(Debug)]
pub struct SoftQueue {
    kind: ListKind,
    timeline: Arc<SoftTimeline>,
    clock: Arc<AtomicU64>,
    copy_timestamps: bool,
    fail_next: Mutex<Option<DeviceError>>,
    log: Mutex<Vec<Submission>>,
}

impl SoftQueue {
    /// Downcast a backend queue
    pub fn of(raw: &dyn RawQueue) -> Option<&SoftQueue> {
        raw.as_any().downcast_ref::<SoftQueue>()
    }

    /// Stop completing signals until [`SoftQueue::release`]
    pub fn hold(&self) {
        self.timeline.held.store(true, Ordering::Release);
    }

    /// Complete every signal so far and stop holding
    pub fn release(&self) {
        self.timeline.held.store(false, Ordering::Release);
        let signaled = self.timeline.signaled.load(Ordering::Acquire);
        self.timeline.completed.fetch_max(signaled, Ordering::AcqRel);
    }

    /// Complete signals up to `value` while holding
    pub fn complete_up_to(&self, value: u64) {
        let signaled = self.timeline.signaled.load(Ordering::Acquire);
        self.timeline
            .completed
            .fetch_max(value.min(signaled), Ordering::AcqRel);
    }

    /// Reject the next submission
    pub fn fail_next_submit(&self, err: DeviceError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Lose the device: submissions, signals and waits fail from now on
    pub fn lose_device(&self, err: DeviceError) {
        *self.timeline.lost.lock() = Some(err);
    }

    /// Last signaled value
    pub fn signaled_value(&self) -> u64 {
        self.timeline.signaled.load(Ordering::Acquire)
    }

    /// Copy of the submission log
    pub fn submissions(&self) -> Vec<Submission> {
        self.log.lock().clone()
    }

    fn execute(&self, command: &Command) -> Result<()> {
        match command {
            Command::Barriers(_) | Command::SetBindingTable(_) | Command::Dispatch { .. } => Ok(()),
            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let len = usize::try_from(*size).map_err(|_| Error::InvalidParameter("copy too large"))?;
                let mut staging = vec![0u8; len];
                src.read(*src_offset, &mut staging)?;
                dst.write(*dst_offset, &staging)
            }
            Command::EndQuery { heap, index } => {
                let heap = SoftQueryHeap::of(heap.as_ref()).ok_or(Error::InvalidParameter("foreign query heap"))?;
                let tick = self.clock.fetch_add(TICKS_PER_QUERY, Ordering::AcqRel) + TICKS_PER_QUERY;
                heap.store(*index, tick)
            }
            Command::ResolveQuery {
                heap,
                start,
                count,
                dst,
                dst_offset,
            } => {
                let heap = SoftQueryHeap::of(heap.as_ref()).ok_or(Error::InvalidParameter("foreign query heap"))?;
                let values = heap.values(*start, *count)?;
                dst.write(*dst_offset, bytemuck::cast_slice(values.as_slice()))
            }
        }
    }
}

impl RawQueue for SoftQueue {
    fn kind(&self) -> ListKind {
        self.kind
    }

    fn submit(&self, commands: &[Command]) -> Result<()> {
        if let Some(err) = self.timeline.lost() {
            return Err(Error::Device(err));
        }
        if let Some(err) = self.fail_next.lock().take() {
            return Err(Error::Device(err));
        }
        for command in commands {
            self.execute(command)?;
        }
        self.log.lock().push(Submission::Execute {
            commands: commands.len(),
            barriers: crate::command::count_barriers(commands),
        });
        Ok(())
    }

    fn signal(&self, value: u64) -> Result<()> {
        if let Some(err) = self.timeline.lost() {
            return Err(Error::Device(err));
        }
        self.timeline.signaled.fetch_max(value, Ordering::AcqRel);
        if !self.timeline.held.load(Ordering::Acquire) {
            self.timeline.completed.fetch_max(value, Ordering::AcqRel);
        }
        self.log.lock().push(Submission::Signal(value));
        Ok(())
    }

    fn wait_for(&self, _other: &dyn RawQueue, value: u64) -> Result<()> {
        self.log.lock().push(Submission::Wait { value });
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.timeline.completed.load(Ordering::Acquire)
    }

    fn completion_handle(&self, value: u64) -> Result<Box<dyn RawWaitHandle>> {
        Ok(Box::new(SoftWaitHandle {
            timeline: self.timeline.clone(),
            target: value,
        }))
    }

    fn timestamp_frequency(&self) -> Result<u64> {
        if self.kind == ListKind::Copy && !self.copy_timestamps {
            return Err(Error::FeatureNotSupported("copy queue timestamps"));
        }
        Ok(DEFAULT_TIMESTAMP_FREQUENCY)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct SoftWaitHandle {
    timeline: Arc<SoftTimeline>,
    target: u64,
}

impl RawWaitHandle for SoftWaitHandle {
    fn poll(&self) -> Result<bool> {
        if self.timeline.completed.load(Ordering::Acquire) >= self.target {
            return Ok(true);
        }
        match self.timeline.lost() {
            Some(err) => Err(Error::Device(err)),
            None => Ok(false),
        }
    }

    fn wait(&self) -> Result<()> {
        while !self.poll()? {
            relax();
        }
        Ok(())
    }
}

// =============================================================================
// QUERY HEAP / BINDING TABLE
// =============================================================================

/// Software query heap
#[derive(Debug)]
pub struct SoftQueryHeap {
    kind: QueryKind,
    values: Mutex<Vec<u64>>,
}

impl SoftQueryHeap {
    /// Downcast a backend heap
    pub fn of(raw: &dyn RawQueryHeap) -> Option<&SoftQueryHeap> {
        raw.as_any().downcast_ref::<SoftQueryHeap>()
    }

    fn store(&self, index: u32, value: u64) -> Result<()> {
        let mut values = self.values.lock();
        let slot = values
            .get_mut(index as usize)
            .ok_or(Error::InvalidParameter("query index out of range"))?;
        *slot = value;
        Ok(())
    }

    fn values(&self, start: u32, count: u32) -> Result<Vec<u64>> {
        let values = self.values.lock();
        let (start, end) = (start as usize, start as usize + count as usize);
        values
            .get(start..end)
            .map(<[u64]>::to_vec)
            .ok_or(Error::InvalidParameter("query range out of range"))
    }
}

impl RawQueryHeap for SoftQueryHeap {
    fn kind(&self) -> QueryKind {
        self.kind
    }

    fn capacity(&self) -> u32 {
        self.values.lock().len() as u32
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Software binding table
#[derive(Debug)]
pub struct SoftBindingTable {
    desc: BindingTableDesc,
}

impl SoftBindingTable {
    /// Downcast a backend table
    pub fn of(raw: &dyn RawBindingTable) -> Option<&SoftBindingTable> {
        raw.as_any().downcast_ref::<SoftBindingTable>()
    }

    /// Descriptors written into the table
    pub fn desc(&self) -> &BindingTableDesc {
        &self.desc
    }
}

impl RawBindingTable for SoftBindingTable {
    fn resource_slots(&self) -> u32 {
        self.desc.resources.len() as u32
    }

    fn sampler_slots(&self) -> u32 {
        self.desc.samplers.len() as u32
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Barrier;
    use crate::state::ResourceState;
    use crate::types::ResourceId;

    fn queue() -> Arc<dyn RawQueue> {
        let device = SoftDevice::new(SoftInstance::software_adapter());
        device.create_queue(ListKind::Direct).unwrap()
    }

    #[test]
    fn test_signal_completes_unless_held() {
        let raw = queue();
        let soft = SoftQueue::of(raw.as_ref()).unwrap();
        raw.signal(1).unwrap();
        assert_eq!(raw.completed_value(), 1);

        soft.hold();
        raw.signal(2).unwrap();
        raw.signal(3).unwrap();
        assert_eq!(raw.completed_value(), 1);
        soft.complete_up_to(2);
        assert_eq!(raw.completed_value(), 2);
        soft.release();
        assert_eq!(raw.completed_value(), 3);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let raw = queue();
        let soft = SoftQueue::of(raw.as_ref()).unwrap();
        soft.fail_next_submit(DeviceError::new(-5, "rejected"));
        assert!(matches!(raw.submit(&[]), Err(Error::Device(_))));
        assert!(raw.submit(&[]).is_ok());
    }

    #[test]
    fn test_lost_device_fails_waits() {
        let raw = queue();
        let soft = SoftQueue::of(raw.as_ref()).unwrap();
        soft.hold();
        raw.signal(1).unwrap();
        let handle = raw.completion_handle(1).unwrap();
        assert_eq!(handle.poll(), Ok(false));
        soft.lose_device(DeviceError::new(-7, "removed"));
        assert!(matches!(handle.poll(), Err(Error::Device(_))));
        assert!(handle.wait().is_err());
    }

    #[test]
    fn test_copy_executes_at_submit() {
        let device = SoftDevice::new(SoftInstance::software_adapter());
        let desc = |size| MemoryDesc {
            resource: ResourceId(1),
            size,
            heap: crate::types::HeapProperties::default(),
            heap_flags: crate::types::HeapFlags::empty(),
            flags: crate::types::ResourceFlags::empty(),
            dimension: crate::types::ResourceDimension::Buffer,
        };
        let src = device.create_memory(&desc(8)).unwrap();
        let dst = device.create_memory(&desc(8)).unwrap();
        src.write(0, &[9, 8, 7, 6]).unwrap();

        let raw = device.create_queue(ListKind::Copy).unwrap();
        raw.submit(&[
            Command::Barriers(vec![Barrier::transition(
                ResourceId(1),
                ResourceState::COMMON,
                ResourceState::COPY_SOURCE,
            )]),
            Command::CopyBufferRegion {
                dst: dst.clone(),
                dst_offset: 4,
                src,
                src_offset: 0,
                size: 4,
            },
        ])
        .unwrap();

        let mut out = [0u8; 8];
        dst.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 9, 8, 7, 6]);
        assert_eq!(
            SoftQueue::of(raw.as_ref()).unwrap().submissions(),
            vec![Submission::Execute {
                commands: 2,
                barriers: 1
            }]
        );
    }

    #[test]
    fn test_copy_queue_timestamps_follow_adapter() {
        let device = SoftDevice::new(SoftInstance::discrete_adapter("dGPU"));
        let copy = device.create_queue(ListKind::Copy).unwrap();
        assert!(copy.timestamp_frequency().is_err());
        let direct = device.create_queue(ListKind::Direct).unwrap();
        assert_eq!(direct.timestamp_frequency().unwrap(), DEFAULT_TIMESTAMP_FREQUENCY);
    }
}
