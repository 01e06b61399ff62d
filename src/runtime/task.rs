// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tasks and the trampoline engine.
//!
//! A task is one logical thread of control: a stack of suspended [Frame]s plus the value it will be
//! resumed with. Nested suspending operations are driven through the explicit frame stack (the
//! "trampoline") instead of the host call stack, so only the outermost dispatch step is visible to
//! the scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    syscall::Syscall,
};
use ::std::{
    any::Any,
    rc::Rc,
};

//======================================================================================================================
// Types
//======================================================================================================================

/// Dynamically-typed payload carried between frames, system calls and events. Reference-counted so
/// that firing an event can hand the same value to every waiter.
pub type Value = Rc<dyn Any>;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier. Unique and monotonically assigned by the scheduler.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TaskId(pub u64);

/// What a frame is resumed with: the value produced by whatever it suspended on, or a fault raised
/// by a nested frame. Faults travel upward through resumption so that an intermediate frame may
/// intercept them; unhandled, they unwind the whole task.
pub enum Resume {
    Value(Value),
    Fault(Fail),
}

/// Outcome of resuming a frame once.
pub enum Step {
    /// Request a scheduler service. The task suspends until the call is satisfied.
    Trap(Syscall),
    /// Delegate to a nested suspendable operation. Its final value becomes this frame's next
    /// resume value.
    Call(Box<dyn Frame>),
    /// Cooperatively yield a plain value. At the bottom of the stack this requeues the task; above
    /// it, the value is delivered to the caller and this frame is discarded.
    Yield(Value),
    /// This frame is finished with the given result.
    Return(Value),
    /// This frame failed.
    Fault(Fail),
}

/// One suspendable execution frame: an explicit state machine resumed with a [Resume] until it
/// returns or faults.
pub trait Frame {
    /// Resumes the frame and runs it until its next suspension point.
    fn resume(&mut self, resume: Resume) -> Step;

    /// Cancellation hook, invoked when the owning task is forcibly closed.
    fn cancel(&mut self) {}
}

/// Outcome of driving a task through one full trampoline step.
pub enum RunResult {
    /// The task issued a system call and is suspended until the scheduler satisfies it.
    Trap(Syscall),
    /// The task yielded cooperatively and should be requeued at the tail.
    Yielded,
    /// The bottom frame completed; the task is done.
    Done,
    /// An unhandled fault unwound the whole frame stack.
    Faulted(Fail),
}

/// A task: a possibly-nested chain of suspended frames plus the pending resume value.
pub struct Task {
    /// Task identifier.
    id: TaskId,
    /// Task name, for diagnostics only.
    name: String,
    /// Frame stack. The top is the currently active frame; lower frames are callers awaiting the
    /// top frame's final result.
    frames: Vec<Box<dyn Frame>>,
    /// Value carried into the next resumption.
    pending: Option<Resume>,
    /// Daemon tasks do not keep the scheduler's main loop alive.
    daemon: bool,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Wraps `v` into a [Value].
pub fn value<T: Any>(v: T) -> Value {
    Rc::new(v)
}

/// The unit [Value], used where a resumption carries no payload.
pub fn unit() -> Value {
    Rc::new(())
}

/// Extracts a `T` out of a [Value]. Returns [None] on a type mismatch.
pub fn downcast<T: Any + Clone>(v: &Value) -> Option<T> {
    v.downcast_ref::<T>().cloned()
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Resume {
    /// The unit resumption.
    pub fn unit() -> Self {
        Resume::Value(unit())
    }

    /// Converts into a result, turning a delivered fault into an error. The common leaf-frame
    /// pattern is to propagate the error as a [Step::Fault].
    pub fn into_result(self) -> Result<Value, Fail> {
        match self {
            Resume::Value(value) => Ok(value),
            Resume::Fault(e) => Err(e),
        }
    }
}

/// Associate Functions for Tasks
impl Task {
    /// Instantiates a new task around its bottom frame.
    pub(crate) fn new(id: TaskId, name: &str, body: Box<dyn Frame>, daemon: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            frames: vec![body],
            pending: None,
            daemon,
        }
    }

    pub fn get_id(&self) -> TaskId {
        self.id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Sets the value the task will see on its next resumption.
    pub(crate) fn set_resume(&mut self, resume: Resume) {
        self.pending = Some(resume);
    }

    /// Resumes the task's active frame and trampolines through delegations, returns and faults
    /// until a system call surfaces, the task yields cooperatively, or the bottom frame completes.
    pub(crate) fn run(&mut self) -> RunResult {
        loop {
            let resume: Resume = self.pending.take().unwrap_or_else(Resume::unit);
            let frame: &mut Box<dyn Frame> = match self.frames.last_mut() {
                Some(frame) => frame,
                None => return RunResult::Done,
            };
            match frame.resume(resume) {
                // Only traps are visible to the scheduler.
                Step::Trap(call) => return RunResult::Trap(call),
                // Delegation: the nested operation becomes the active frame and runs immediately.
                Step::Call(body) => self.frames.push(body),
                Step::Yield(result) => {
                    if self.frames.len() == 1 {
                        // Plain cooperative yield: requeue, value discarded.
                        return RunResult::Yielded;
                    }
                    // A nested frame yielding a plain value returns it to its caller and is done.
                    self.frames.pop();
                    self.pending = Some(Resume::Value(result));
                },
                Step::Return(result) => {
                    self.frames.pop();
                    if self.frames.is_empty() {
                        return RunResult::Done;
                    }
                    self.pending = Some(Resume::Value(result));
                },
                Step::Fault(e) => {
                    self.frames.pop();
                    if self.frames.is_empty() {
                        return RunResult::Faulted(e);
                    }
                    // Hand the fault to the caller frame; it may handle or re-raise it.
                    self.pending = Some(Resume::Fault(e));
                },
            }
        }
    }

    /// Forcibly terminates the task: unwinds every frame, innermost first, invoking each frame's
    /// cancellation hook. After closing, the next [Self::run] completes immediately.
    pub(crate) fn close(&mut self) {
        while let Some(mut frame) = self.frames.pop() {
            frame.cancel();
        }
        self.pending = None;
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

/// Convenience implementation so that simple task bodies can be written as closures.
impl<F: FnMut(Resume) -> Step> Frame for F {
    fn resume(&mut self, resume: Resume) -> Step {
        (self)(resume)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
