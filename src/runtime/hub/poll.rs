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
};
use ::libc::{
    nfds_t,
    pollfd,
    POLLERR,
    POLLHUP,
    POLLIN,
    POLLNVAL,
    POLLOUT,
    POLLPRI,
};
use ::std::{
    collections::HashMap,
    os::fd::RawFd,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Portable `poll(2)`-backed event hub, used when epoll is unavailable.
#[derive(Default)]
pub struct PollHub {
    /// Descriptor-interest map; the poll set is rebuilt from it on every call.
    fds: HashMap<RawFd, Interest>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PollHub {
    pub fn new() -> Self {
        Self {
            fds: HashMap::<RawFd, Interest>::new(),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl EventHub for PollHub {
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<(), Fail> {
        // Error conditions are implicit: poll always reports them.
        self.fds.insert(fd, interest);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<(), Fail> {
        self.fds.remove(&fd);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Interest)>, Fail> {
        if self.fds.is_empty() {
            return Ok(vec![]);
        }
        let mut pollfds: Vec<pollfd> = self
            .fds
            .iter()
            .map(|(&fd, &interest)| {
                let mut events: i16 = 0;
                if interest.contains(Interest::READ) {
                    events |= POLLIN;
                }
                if interest.contains(Interest::WRITE) {
                    events |= POLLOUT;
                }
                pollfd { fd, events, revents: 0 }
            })
            .collect();
        let nready: i32 =
            unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as nfds_t, timeout_millis(timeout)) };
        if nready < 0 {
            let e: Fail = Fail::last_os_error("poll failed");
            if e.errno == libc::EINTR {
                return Ok(vec![]);
            }
            return Err(e);
        }
        let mut eventpairs: Vec<(RawFd, Interest)> = Vec::with_capacity(nready as usize);
        for entry in pollfds.iter().filter(|entry| entry.revents != 0) {
            let mut readiness: Interest = Interest::NONE;
            if entry.revents & (POLLIN | POLLPRI) != 0 {
                readiness |= Interest::READ;
            }
            if entry.revents & POLLOUT != 0 {
                readiness |= Interest::WRITE;
            }
            if entry.revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
                readiness |= Interest::ERROR;
            }
            if !readiness.is_empty() {
                eventpairs.push((entry.fd, readiness));
            }
        }
        Ok(eventpairs)
    }
}

