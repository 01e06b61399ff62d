// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The event hub: a pluggable readiness multiplexer. Tracks per-descriptor interest and produces
//! batches of `(descriptor, readiness)` pairs. Two backends exist: an epoll-backed hub (preferred)
//! and a portable `poll(2)` fallback; [create_hub] probes for epoll once at startup and silently
//! falls back.

//======================================================================================================================
// Exports
//======================================================================================================================

#[cfg(target_os = "linux")]
mod epoll;
mod poll;

#[cfg(target_os = "linux")]
pub use self::epoll::EpollHub;
pub use self::poll::PollHub;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fmt,
    ops::{
        BitOr,
        BitOrAssign,
    },
    os::fd::RawFd,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Readiness interest bitmask. The bit values map exactly to the epoll events, so the epoll
/// backend passes them through unchanged and the poll backend translates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

//======================================================================================================================
// Constants
//======================================================================================================================

// Constants from the epoll interface.
const EPOLLIN: u32 = 0x001;
const EPOLLPRI: u32 = 0x002;
const EPOLLOUT: u32 = 0x004;
const EPOLLERR: u32 = 0x008;
const EPOLLHUP: u32 = 0x010;
const EPOLLRDHUP: u32 = 0x2000;

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(EPOLLIN | EPOLLPRI);
    pub const WRITE: Interest = Interest(EPOLLOUT);
    /// Error conditions are always of interest; backends report them regardless of registration.
    pub const ERROR: Interest = Interest(EPOLLERR | EPOLLHUP | EPOLLRDHUP);
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// A readiness multiplexer.
pub trait EventHub {
    /// Adds or updates interest for a descriptor. Error-condition interest is always included.
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<(), Fail>;

    /// Removes a descriptor entirely. Unknown descriptors are ignored.
    fn unregister(&mut self, fd: RawFd) -> Result<(), Fail>;

    /// Harvests the batch of `(descriptor, readiness)` pairs ready within `timeout`.
    /// `Some(Duration::ZERO)` returns immediately; [None] blocks until at least one descriptor is
    /// ready.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Interest)>, Fail>;
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Interest {
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates the event hub for this platform: epoll when available, otherwise the `poll(2)`
/// fallback. The capability probe runs once; it is not re-checked per call.
pub fn create_hub() -> Box<dyn EventHub> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            match EpollHub::new(limits::HUB_SIZE_HINT) {
                Ok(hub) => return Box::new(hub),
                Err(e) => debug!("create_hub(): epoll unavailable, falling back to poll ({:?})", e),
            }
        }
    }
    Box::new(PollHub::new())
}

/// Translates a poll timeout into the millisecond convention shared by `epoll_wait` and `poll`:
/// `-1` blocks indefinitely.
pub(self) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(duration) => duration.as_millis() as i32,
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interest(0x{:X})", self.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
