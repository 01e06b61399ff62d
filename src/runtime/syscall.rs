// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The system-call set: the closed set of traps a task may issue to request scheduler services.
//! Tasks never touch the scheduler directly; yielding one of these requests is their only
//! interface to it.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::task::{
    Frame,
    TaskId,
    Value,
};
use ::std::{
    fmt,
    os::fd::RawFd,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A request issued by a task to the scheduler. Calls that complete synchronously re-enqueue the
/// issuing task with a result; calls that block park it in the matching wait registry.
pub enum Syscall {
    /// Returns the issuing task's identifier.
    GetTaskId,
    /// Creates and enqueues a new task; returns its [TaskId].
    NewTask {
        name: String,
        body: Box<dyn Frame>,
    },
    /// Force-closes each existing id; returns the subset actually killed (`Vec<TaskId>`).
    KillTask(Vec<TaskId>),
    /// Suspends the caller until the given task exits. Returns `false` immediately when the id
    /// does not exist, `true` otherwise.
    WaitTask(TaskId),
    /// Suspends the caller for at least the given duration. A zero duration re-enqueues
    /// immediately, yielding to other runnable tasks.
    Sleep(Duration),
    /// Suspends the caller until the descriptor is readable.
    ReadWait(RawFd),
    /// Suspends the caller until the descriptor is writable.
    WriteWait(RawFd),
    /// Suspends the caller until the named event is fired.
    Wait(String),
    /// Wakes every task currently waiting on the named event, delivering the value to all of
    /// them. The caller itself is rescheduled immediately.
    Fire(String, Value),
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syscall::GetTaskId => write!(f, "GetTaskId"),
            Syscall::NewTask { name, .. } => write!(f, "NewTask {{ name: {:?} }}", name),
            Syscall::KillTask(ids) => write!(f, "KillTask({:?})", ids),
            Syscall::WaitTask(id) => write!(f, "WaitTask({:?})", id),
            Syscall::Sleep(duration) => write!(f, "Sleep({:?})", duration),
            Syscall::ReadWait(fd) => write!(f, "ReadWait({:?})", fd),
            Syscall::WriteWait(fd) => write!(f, "WriteWait({:?})", fd),
            Syscall::Wait(event) => write!(f, "Wait({:?})", event),
            Syscall::Fire(event, _) => write!(f, "Fire({:?}, ..)", event),
        }
    }
}
