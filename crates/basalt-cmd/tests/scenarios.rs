//! End-to-end recording and submission scenarios on the software backend.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use basalt_cmd::{CommandQueue, StateList, TransitionOutcome};
use basalt_core::soft::{SoftInstance, SoftQueue};
use basalt_core::{
    BufferDesc, CompletionPromise, Device, DeviceError, Error, ListKind, PromiseState, Resource,
    ResourceState,
};

fn setup(kind: ListKind) -> (Device, CommandQueue) {
    let device = SoftInstance::new().open_device();
    let queue = CommandQueue::new(&device, kind).unwrap();
    (device, queue)
}

fn buffer(device: &Device) -> Resource {
    device.create_buffer(&BufferDesc::new(256)).unwrap()
}

fn soft(queue: &CommandQueue) -> &SoftQueue {
    SoftQueue::of(queue.raw().as_ref()).unwrap()
}

#[test]
fn repeated_request_emits_one_transition() {
    let (device, queue) = setup(ListKind::Direct);
    let res = buffer(&device);
    let mut list = queue.create_list(None);

    for _ in 0..4 {
        list.transition(&res, ResourceState::COPY_DEST).unwrap();
    }
    list.close().unwrap();
    assert_eq!(list.barrier_count(), 1);
}

#[test]
fn promoted_read_needs_no_barrier() {
    let (device, queue) = setup(ListKind::Direct);
    let res = buffer(&device);
    let mut list = queue.create_list(None);

    assert_eq!(
        list.transition(&res, ResourceState::COPY_SOURCE).unwrap(),
        TransitionOutcome::Promoted
    );
    assert_eq!(
        list.transition(&res, ResourceState::COPY_SOURCE).unwrap(),
        TransitionOutcome::Unchanged
    );
    assert_eq!(
        list.transition(&res, ResourceState::NON_PIXEL_SHADER_RESOURCE).unwrap(),
        TransitionOutcome::Merged
    );
    list.close().unwrap();
    assert_eq!(list.barrier_count(), 0);
}

#[test]
fn handoff_between_parallel_lists() {
    let (device, queue) = setup(ListKind::Direct);
    let res = buffer(&device);

    let mut first = queue.create_list(None);
    first.transition(&res, ResourceState::COPY_DEST).unwrap();
    let states = first.generate_state_list();

    // The second list is recorded without the first having executed
    let mut second = queue.create_list(Some(&first));
    assert_eq!(
        second.transition(&res, ResourceState::COPY_DEST).unwrap(),
        TransitionOutcome::Unchanged
    );
    assert_eq!(states.get(res.id()).map(|e| e.state), Some(ResourceState::COPY_DEST));

    first.close().unwrap();
    second.close().unwrap();
    assert_eq!((first.barrier_count(), second.barrier_count()), (1, 0));
}

#[test]
fn split_barrier_must_end_before_use() {
    let (device, queue) = setup(ListKind::Direct);
    let src = buffer(&device);
    let dst = buffer(&device);

    let mut list = queue.create_list(None);
    list.begin_split(&dst, ResourceState::COPY_DEST).unwrap();
    assert_eq!(
        list.copy_buffer_region(&dst, 0, &src, 0, 16),
        Err(Error::SplitBarrierOpen(dst.id()))
    );

    let mut list = queue.create_list(None);
    list.begin_split(&dst, ResourceState::COPY_DEST).unwrap();
    list.end_split(&dst, ResourceState::COPY_DEST).unwrap();
    list.copy_buffer_region(&dst, 0, &src, 0, 16).unwrap();
    assert_eq!(queue.execute(&mut list).unwrap().wait(), PromiseState::Completed);
}

#[test]
fn split_barrier_spans_lists() {
    let (device, queue) = setup(ListKind::Direct);
    let res = buffer(&device);

    let mut first = queue.create_list(None);
    first.begin_split(&res, ResourceState::COPY_DEST).unwrap();
    queue.execute(&mut first).unwrap().wait();
    assert_eq!(
        device.arena().get(res.id()).unwrap().pending_split,
        Some(ResourceState::COPY_DEST)
    );

    let mut second = queue.create_list(None);
    assert!(matches!(
        second.end_split(&res, ResourceState::COPY_DEST).unwrap(),
        TransitionOutcome::SplitEnded(_)
    ));
    queue.execute(&mut second).unwrap().wait();
    assert_eq!(res.resting_state(), ResourceState::COPY_DEST);
    assert_eq!(device.arena().get(res.id()).unwrap().pending_split, None);
}

#[test]
fn promises_resolve_in_counter_order() {
    let (_device, queue) = setup(ListKind::Direct);
    soft(&queue).hold();

    let promises: Vec<CompletionPromise> = (0..3).map(|_| queue.signal()).collect();
    assert!(promises.iter().all(|p| p.state() == PromiseState::Pending));

    soft(&queue).complete_up_to(2);
    let states: Vec<_> = promises.iter().map(|p| p.state()).collect();
    assert_eq!(
        states,
        vec![PromiseState::Completed, PromiseState::Completed, PromiseState::Pending]
    );

    soft(&queue).release();
    assert_eq!(promises[2].wait(), PromiseState::Completed);
}

#[test]
fn reached_counter_resolves_without_blocking() {
    let (_device, queue) = setup(ListKind::Compute);
    queue.signal().wait();
    let late = CompletionPromise::for_value(queue.raw().clone(), 1);
    assert_eq!(late.state(), PromiseState::Completed);
}

#[test]
fn declared_end_state_carries_into_next_list() {
    let (device, queue) = setup(ListKind::Direct);
    let res = buffer(&device);

    let mut list = queue.create_list(None);
    list.declare_end_states(StateList::new().with(res.id(), ResourceState::COPY_SOURCE))
        .unwrap();
    let out = list.transition(&res, ResourceState::COPY_DEST).unwrap();
    assert_eq!(
        out.barrier().map(|b| (b.before, b.after)),
        Some((ResourceState::COMMON, ResourceState::COPY_DEST))
    );
    assert_eq!(list.barrier_count(), 0);

    list.close().unwrap();
    let barriers: Vec<_> = list
        .commands()
        .iter()
        .flat_map(|c| c.barriers().iter())
        .map(|b| (b.before, b.after))
        .collect();
    assert_eq!(
        barriers,
        vec![
            (ResourceState::COMMON, ResourceState::COPY_DEST),
            (ResourceState::COPY_DEST, ResourceState::COPY_SOURCE),
        ]
    );

    let mut next = queue.create_list(Some(&list));
    next.transition(&res, ResourceState::COPY_SOURCE).unwrap();
    next.close().unwrap();
    assert_eq!(next.barrier_count(), 0);
}

#[test]
fn promise_created_before_signal_completes_after_release() {
    let (_device, queue) = setup(ListKind::Direct);
    let raw = queue.raw().clone();
    soft(&queue).hold();

    let p5 = CompletionPromise::for_value(raw.clone(), 5);
    for _ in 0..5 {
        queue.signal();
    }
    assert_eq!(p5.state(), PromiseState::Pending);

    let releaser = {
        let raw = Arc::clone(&raw);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            SoftQueue::of(raw.as_ref()).unwrap().release();
        })
    };
    assert_eq!(p5.wait(), PromiseState::Completed);
    releaser.join().unwrap();

    assert!(queue.completed_value() >= 5);
    let fresh = CompletionPromise::for_value(raw, 5);
    assert_eq!(fresh.state(), PromiseState::Completed);
}

#[test]
fn lost_device_fails_waits() {
    let (_device, queue) = setup(ListKind::Direct);
    soft(&queue).hold();
    let pending = queue.signal();
    assert_eq!(pending.state(), PromiseState::Pending);

    let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = failures.clone();
    pending.on_complete(move |state| {
        assert!(matches!(state, PromiseState::Failed(Error::Device(_))));
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    soft(&queue).lose_device(DeviceError::new(-7, "removed"));

    assert!(matches!(pending.state(), PromiseState::Failed(Error::Device(_))));
    assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(matches!(pending.state(), PromiseState::Failed(Error::Device(_))));
    assert!(matches!(pending.wait(), PromiseState::Failed(Error::Device(_))));
    assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(matches!(queue.signal().state(), PromiseState::Failed(Error::Device(_))));
}

#[test]
fn continuations_run_once_on_resolution() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let (_device, queue) = setup(ListKind::Direct);
    soft(&queue).hold();
    let promise = queue.signal();

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let hits = hits.clone();
        promise.on_complete(move |state| {
            assert_eq!(*state, PromiseState::Completed);
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(promise.pending_continuations(), 2);

    soft(&queue).release();
    promise.wait();
    promise.wait();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
