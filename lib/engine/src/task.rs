// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Timed tasks and their suspension vocabulary.
//!
//! A task is an explicit state machine rather than a stackful coroutine: the
//! event loop calls [`SimTask::resume`] with a [`Wake`] describing why the
//! task is running, and the task answers with a [`Step`] describing how it
//! suspends next (or the value it finished with). All suspension points are
//! explicit; there is no implicit yielding anywhere.

use std::cell::RefCell;
use std::rc::Rc;

/// Identifier of a task within one event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Completion value of a task, delivered to its handle or its waiter.
pub type TaskResult<M> = anyhow::Result<M>;

/// Why a task is being resumed.
pub enum Wake<M> {
    /// First entry into the task body.
    Start,
    /// A sleep elapsed, a stream hold drained, or an exclusive section was
    /// entered.
    Resumed,
    /// The awaited child task completed with this result.
    Call(TaskResult<M>),
}

/// How a task suspends, or the value it finished with.
pub enum Step<M> {
    /// The task is done.
    Done(M),
    /// Suspend for `duration` seconds of virtual time.
    Sleep(f64),
    /// Occupy the named streams for the paired durations; resume once every
    /// named stream has reached its new mark. Lanes run concurrently, the
    /// hold as a whole is gated by the slowest lane.
    HoldStreams {
        names: Vec<String>,
        durations: Vec<f64>,
    },
    /// Schedule `child` at virtual time `at` and resume with its result.
    Call { at: f64, child: BoxTask<M> },
    /// Enter the keyed exclusive section, parking FIFO if it is held.
    Acquire(String),
}

impl<M> Step<M> {
    /// Hold a single stream: the one-element case of [`Step::HoldStreams`].
    pub fn hold_stream(name: impl Into<String>, duration: f64) -> Self {
        Step::HoldStreams {
            names: vec![name.into()],
            durations: vec![duration],
        }
    }
}

/// A suspendable unit of simulated work.
pub trait SimTask<M> {
    /// Advance the task to its next suspension point.
    ///
    /// Returning `Err` fails this task; the error is delivered verbatim to
    /// whoever awaits it.
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<M>) -> anyhow::Result<Step<M>>;
}

/// Boxed task, the form in which children are handed to [`Step::Call`].
pub type BoxTask<M> = Box<dyn SimTask<M>>;

impl<M> SimTask<M> for BoxTask<M> {
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<M>) -> anyhow::Result<Step<M>> {
        (**self).resume(cx, wake)
    }
}

/// Adapter turning a closure into a [`SimTask`]; captured state carries the
/// machine between resumes.
pub struct TaskFn<F>(F);

/// Wrap a closure as a task.
pub fn task_fn<F>(f: F) -> TaskFn<F> {
    TaskFn(f)
}

impl<M, F> SimTask<M> for TaskFn<F>
where
    F: FnMut(&mut TaskContext<'_>, Wake<M>) -> anyhow::Result<Step<M>>,
{
    fn resume(&mut self, cx: &mut TaskContext<'_>, wake: Wake<M>) -> anyhow::Result<Step<M>> {
        (self.0)(cx, wake)
    }
}

/// Per-resume view of the engine handed to a task body.
///
/// Section releases are recorded here and applied by the loop before the
/// task's next suspension takes effect, so a release never suspends the
/// releaser.
pub struct TaskContext<'a> {
    now: f64,
    releases: &'a mut Vec<String>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(now: f64, releases: &'a mut Vec<String>) -> Self {
        Self { now, releases }
    }

    /// Current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Leave a keyed exclusive section previously entered via
    /// [`Step::Acquire`]. Releasing a section that is not held is a fatal
    /// engine misuse.
    pub fn release(&mut self, key: impl Into<String>) {
        self.releases.push(key.into());
    }
}

pub(crate) type ResultCell<M> = Rc<RefCell<Option<TaskResult<M>>>>;

/// Handle to a top-level scheduled task.
///
/// The slot is fulfilled exactly once, when the task completes; polling it
/// before [`crate::EventLoop::run`] has driven the task to completion yields
/// `None`.
pub struct TaskHandle<M> {
    id: TaskId,
    slot: ResultCell<M>,
}

impl<M> TaskHandle<M> {
    pub(crate) fn new(id: TaskId, slot: ResultCell<M>) -> Self {
        Self { id, slot }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task has completed (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Take the completion value out of the slot, if fulfilled.
    pub fn take(&self) -> Option<TaskResult<M>> {
        self.slot.borrow_mut().take()
    }
}

/// Lifecycle of a task inside the loop.
///
/// Transitions run exactly `Pending -> (Suspended)* -> Finished`; a finished
/// task is never re-queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    Pending,
    Suspended,
}
