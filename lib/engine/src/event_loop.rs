// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The virtual-time event loop.
//!
//! The loop owns a min-heap of `(wake_time, seq)` entries, the task table,
//! the stream table and the exclusive-section table. Each iteration pops the
//! earliest entry, advances the clock to its wake time and resumes the task,
//! interpreting the [`Step`] it returns. Ties on wake time resolve in issue
//! order — strict FIFO — which keeps measurements reproducible run to run.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::clock::VirtualClock;
use crate::error::EngineError;
use crate::section::SectionTable;
use crate::stream::StreamTable;
use crate::task::{
    BoxTask, ResultCell, SimTask, Step, TaskContext, TaskHandle, TaskId, TaskResult, TaskStatus,
    Wake,
};

/// A queued wake-up. Min-ordered by `(at, seq)`.
#[derive(Debug)]
struct QueueEntry {
    at: f64,
    seq: u64,
    id: TaskId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at.total_cmp(&other.at) == Ordering::Equal && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert for earliest-first.
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TaskSlot<M> {
    /// Present while the task is inert; taken out for the duration of a
    /// resume so the loop and the body never alias.
    body: Option<BoxTask<M>>,
    status: TaskStatus,
    /// The single task awaiting this one's result, if any. At most one, set
    /// at creation, never re-pointed.
    waiter: Option<TaskId>,
    /// Result slot backing a [`TaskHandle`], for top-level tasks.
    result: Option<ResultCell<M>>,
    /// Payload for the next resume, staged when the wake-up is queued.
    wake: Option<Wake<M>>,
}

/// Deterministic single-threaded discrete-event scheduler.
///
/// All state lives in this value; independent loops can coexist without
/// interfering. The loop is intentionally `!Send`: simulated time has exactly
/// one driver.
pub struct EventLoop<M> {
    clock: VirtualClock,
    queue: BinaryHeap<QueueEntry>,
    tasks: HashMap<TaskId, TaskSlot<M>>,
    streams: StreamTable,
    sections: SectionTable,
    next_seq: u64,
    next_task: u64,
}

impl<M: 'static> Default for EventLoop<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> EventLoop<M> {
    pub fn new() -> Self {
        Self {
            clock: VirtualClock::new(),
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            streams: StreamTable::default(),
            sections: SectionTable::default(),
            next_seq: 0,
            next_task: 0,
        }
    }

    /// Current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Busy-until mark of a device stream (0 if never referenced).
    pub fn stream_mark(&self, name: &str) -> f64 {
        self.streams.mark(name)
    }

    /// Whether the loop has no pending wake-ups.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Create a Pending task woken at virtual time `at`.
    ///
    /// Panics if `at` is not finite or lies strictly before the current
    /// clock; scheduling into the past is a scheduler bug, not a recoverable
    /// condition.
    pub fn schedule(&mut self, at: f64, task: impl SimTask<M> + 'static) -> TaskHandle<M> {
        assert!(at.is_finite(), "scheduled at non-finite time {at}");
        assert!(
            at >= self.clock.now(),
            "scheduled at {at}, behind the clock {}",
            self.clock.now()
        );
        let id = self.alloc_id();
        let cell: ResultCell<M> = ResultCell::default();
        self.tasks.insert(
            id,
            TaskSlot {
                body: Some(Box::new(task)),
                status: TaskStatus::Pending,
                waiter: None,
                result: Some(cell.clone()),
                wake: Some(Wake::Start),
            },
        );
        self.enqueue(id, at);
        TaskHandle::new(id, cell)
    }

    /// Drive the simulation until the queue is empty.
    ///
    /// Tasks complete in non-decreasing wake-time order, FIFO among equal
    /// wake times. The clock is left at the last processed wake time, so the
    /// loop can be topped up with further work and run again.
    pub fn run(&mut self) {
        while let Some(entry) = self.queue.pop() {
            self.clock.advance_to(entry.at);
            self.step_task(entry.id);
        }
    }

    fn alloc_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    fn enqueue(&mut self, id: TaskId, at: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueueEntry { at, seq, id });
    }

    fn spawn_child(&mut self, at: f64, child: BoxTask<M>, waiter: TaskId) -> TaskId {
        let id = self.alloc_id();
        self.tasks.insert(
            id,
            TaskSlot {
                body: Some(child),
                status: TaskStatus::Pending,
                waiter: Some(waiter),
                result: None,
                wake: Some(Wake::Start),
            },
        );
        self.enqueue(id, at);
        id
    }

    /// Resume one task and interpret the step it suspends with.
    fn step_task(&mut self, id: TaskId) {
        let slot = self.tasks.get_mut(&id).expect("woken task not in table");
        let mut body = slot.body.take().expect("woken task has no body");
        let mut wake = slot.wake.take().expect("woken task has no staged wake");

        loop {
            let mut releases = Vec::new();
            let outcome = {
                let mut cx = TaskContext::new(self.clock.now(), &mut releases);
                body.resume(&mut cx, wake)
            };
            for key in &releases {
                self.release_section(key);
            }

            match outcome {
                Err(err) => {
                    self.finish(id, Err(err));
                    return;
                }
                Ok(Step::Done(value)) => {
                    self.finish(id, Ok(value));
                    return;
                }
                Ok(Step::Sleep(duration)) => {
                    if duration < 0.0 {
                        self.finish(id, Err(EngineError::NegativeDuration { duration }.into()));
                        return;
                    }
                    let at = self.clock.now() + duration;
                    self.suspend(id, body, Some((at, Wake::Resumed)));
                    return;
                }
                Ok(Step::HoldStreams { names, durations }) => {
                    if names.len() != durations.len() {
                        self.finish(
                            id,
                            Err(EngineError::StreamArityMismatch {
                                names: names.len(),
                                durations: durations.len(),
                            }
                            .into()),
                        );
                        return;
                    }
                    if let Some(&duration) = durations.iter().find(|d| **d < 0.0) {
                        self.finish(id, Err(EngineError::NegativeDuration { duration }.into()));
                        return;
                    }
                    let now = self.clock.now();
                    // Each stream advances to its own mark; the task resumes
                    // once the slowest lane drains.
                    let mut resume_at = now;
                    for (name, duration) in names.iter().zip(&durations) {
                        resume_at = resume_at.max(self.streams.advance(name, now, *duration));
                    }
                    self.suspend(id, body, Some((resume_at, Wake::Resumed)));
                    return;
                }
                Ok(Step::Call { at, child }) => {
                    let now = self.clock.now();
                    assert!(at.is_finite(), "call scheduled at non-finite time {at}");
                    assert!(at >= now, "call scheduled at {at}, behind the clock {now}");
                    let child_id = self.spawn_child(at, child, id);
                    tracing::trace!(parent = %id, child = %child_id, at, "issued call");
                    // The caller's resumption path is the child's completion.
                    self.suspend(id, body, None);
                    return;
                }
                Ok(Step::Acquire(key)) => {
                    if self.sections.try_enter(&key) {
                        // Free section: continue synchronously, no trip
                        // through the time queue.
                        wake = Wake::Resumed;
                        continue;
                    }
                    tracing::trace!(task = %id, section = %key, "parked on held section");
                    self.sections.park(key, id);
                    self.suspend(id, body, None);
                    return;
                }
            }
        }
    }

    fn suspend(&mut self, id: TaskId, body: BoxTask<M>, wake_up: Option<(f64, Wake<M>)>) {
        let slot = self.tasks.get_mut(&id).expect("suspended task not in table");
        slot.body = Some(body);
        slot.status = TaskStatus::Suspended;
        if let Some((at, wake)) = wake_up {
            slot.wake = Some(wake);
            self.enqueue(id, at);
        }
    }

    /// Complete a task: fulfil its result slot or wake its waiter with the
    /// value, at the current clock.
    fn finish(&mut self, id: TaskId, result: TaskResult<M>) {
        tracing::trace!(task = %id, ok = result.is_ok(), at = self.clock.now(), "task finished");
        let slot = self.tasks.remove(&id).expect("finished task not in table");
        if let Some(cell) = slot.result {
            let mut cell = cell.borrow_mut();
            assert!(cell.is_none(), "result slot fulfilled twice for {id}");
            *cell = Some(result);
        } else if let Some(waiter) = slot.waiter {
            let now = self.clock.now();
            let wslot = self
                .tasks
                .get_mut(&waiter)
                .expect("waiter of finished task vanished");
            debug_assert_eq!(wslot.status, TaskStatus::Suspended);
            debug_assert!(wslot.wake.is_none(), "waiter woken twice");
            wslot.wake = Some(Wake::Call(result));
            self.enqueue(waiter, now);
        } else {
            panic!("finished {id} has neither a result slot nor a waiter");
        }
    }

    fn release_section(&mut self, key: &str) {
        if let Some(next) = self.sections.leave(key) {
            tracing::trace!(task = %next, section = %key, "section handed off");
            let slot = self
                .tasks
                .get_mut(&next)
                .expect("section waiter not in table");
            debug_assert!(slot.wake.is_none());
            slot.wake = Some(Wake::Resumed);
            self.enqueue(next, self.clock.now());
        }
    }
}
