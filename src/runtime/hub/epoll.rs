// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    hub::{
        timeout_millis,
        EventHub,
        Interest,
    },
    limits,
};
use ::libc::{
    epoll_create,
    epoll_ctl,
    epoll_event,
    epoll_wait,
    EPOLL_CTL_ADD,
    EPOLL_CTL_DEL,
    EPOLL_CTL_MOD,
};
use ::std::{
    collections::HashMap,
    os::fd::RawFd,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// An epoll-backed event hub.
pub struct EpollHub {
    /// The epoll instance.
    epfd: RawFd,
    /// Descriptor-interest map, mirroring the kernel-side registrations.
    fds: HashMap<RawFd, Interest>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl EpollHub {
    /// Creates a new epoll instance. `size_hint` bounds the expected number of descriptors; Linux
    /// ignores the value beyond requiring it to be positive.
    pub fn new(size_hint: usize) -> Result<Self, Fail> {
        let epfd: RawFd = match unsafe { epoll_create(size_hint as i32) } {
            fd if fd >= 0 => fd,
            _ => return Err(Fail::last_os_error("could not create epoll instance")),
        };
        Ok(Self {
            epfd,
            fds: HashMap::<RawFd, Interest>::new(),
        })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl EventHub for EpollHub {
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<(), Fail> {
        let op: i32 = if self.fds.contains_key(&fd) { EPOLL_CTL_MOD } else { EPOLL_CTL_ADD };
        let mut event: epoll_event = epoll_event {
            events: (interest | Interest::ERROR).bits(),
            u64: fd as u64,
        };
        match unsafe { epoll_ctl(self.epfd, op, fd, &mut event) } {
            0 => {
                self.fds.insert(fd, interest);
                Ok(())
            },
            _ => Err(Fail::last_os_error("failed to register descriptor with epoll")),
        }
    }

    fn unregister(&mut self, fd: RawFd) -> Result<(), Fail> {
        if self.fds.remove(&fd).is_none() {
            return Ok(());
        }
        let mut event: epoll_event = epoll_event { events: 0, u64: fd as u64 };
        match unsafe { epoll_ctl(self.epfd, EPOLL_CTL_DEL, fd, &mut event) } {
            0 => Ok(()),
            _ => Err(Fail::last_os_error("failed to unregister descriptor from epoll")),
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Interest)>, Fail> {
        if self.fds.is_empty() {
            return Ok(vec![]);
        }
        let mut events: Vec<epoll_event> = vec![epoll_event { events: 0, u64: 0 }; limits::POLL_BATCH_MAX];
        let nready: i32 = unsafe {
            epoll_wait(
                self.epfd,
                events.as_mut_ptr(),
                limits::POLL_BATCH_MAX as i32,
                timeout_millis(timeout),
            )
        };
        if nready < 0 {
            let e: Fail = Fail::last_os_error("epoll_wait failed");
            // A signal interrupting the wait is not an error; report no readiness.
            if e.errno == libc::EINTR {
                return Ok(vec![]);
            }
            return Err(e);
        }
        // epoll_wait filled in the first `nready` entries.
        events.truncate(nready as usize);
        Ok(events
            .iter()
            .map(|event| (event.u64 as RawFd, Interest::from_bits(event.events)))
            .collect())
    }
}

impl Drop for EpollHub {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
