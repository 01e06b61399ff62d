// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A cooperative task runtime for a single OS thread. Tasks are explicit state machines driven by
//! a trampoline; they suspend by trapping into the scheduler with a system call and are resumed
//! when the call is satisfied. On top of the scheduler sit a buffered non-blocking socket wrapper
//! and a bounded resource pool.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod net;
pub mod pool;
pub mod runtime;

pub use self::{
    net::Socket,
    pool::Pool,
    runtime::{
        fail::Fail,
        scheduler::SharedScheduler,
        syscall::Syscall,
        task::{
            downcast,
            unit,
            value,
            Frame,
            Resume,
            Step,
            TaskId,
            Value,
        },
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling test with a descriptive
/// error when they are not.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        let left_val = &$left;
        let right_val = &$right;
        if *left_val != *right_val {
            anyhow::bail!(
                "ensure failed: `(left == right)`\n  left: `{:?}`\n right: `{:?}`",
                left_val,
                right_val
            );
        }
    }};
}
