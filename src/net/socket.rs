// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A buffered, non-blocking TCP socket for use inside tasks. Every potentially blocking operation
//! is a [Frame]: it traps into the scheduler for readiness and retries the non-blocking call, so a
//! slow peer suspends only the task that is talking to it.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
    task::{
        value,
        Frame,
        Resume,
        Step,
    },
    syscall::Syscall,
    SharedObject,
};
use ::socket2::{
    Domain,
    SockAddr,
    Type,
};
use ::std::{
    mem,
    mem::MaybeUninit,
    net::{
        Shutdown,
        SocketAddr,
    },
    os::fd::{
        AsRawFd,
        RawFd,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct SocketInner {
    /// The underlying non-blocking socket.
    socket: socket2::Socket,
    /// Receive buffer: bytes read from the wire but not yet consumed by `read_until`/`read_bytes`.
    buffer: Vec<u8>,
}

/// A shared handle to one socket. Clones refer to the same descriptor and receive buffer; the
/// descriptor is released when the last clone drops.
#[derive(Clone)]
pub struct Socket(SharedObject<SocketInner>);

/// Suspends until the listening socket has a pending connection, then accepts it. Resolves to the
/// accepted `(Socket, SocketAddr)` pair.
pub struct AcceptFrame {
    socket: Socket,
    waited: bool,
}

/// Drives a non-blocking connect to completion. Resolves to the connected [Socket] itself, so a
/// task can delegate straight from creation to use.
pub struct ConnectFrame {
    socket: Socket,
    addr: SockAddr,
    started: bool,
}

/// Sends an entire byte string, suspending for writability between partial sends. Resolves to the
/// number of bytes written.
pub struct SendFrame {
    socket: Socket,
    data: Vec<u8>,
    offset: usize,
    waited: bool,
}

/// Receives at most `max` bytes, suspending until some arrive. Resolves to a non-empty `Vec<u8>`.
pub struct RecvFrame {
    socket: Socket,
    max: usize,
    waited: bool,
}

/// Receives until the delimiter appears, resolving to everything up to and including it. Surplus
/// bytes stay in the receive buffer for the next read.
pub struct ReadUntilFrame {
    socket: Socket,
    delimiter: Vec<u8>,
    waited: bool,
}

/// Receives until exactly `count` bytes are available, resolving to precisely that many.
pub struct ReadBytesFrame {
    socket: Socket,
    count: usize,
    waited: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Socket {
    /// Creates a new non-blocking TCP socket.
    pub fn new() -> Result<Self, Fail> {
        let socket: socket2::Socket = socket2::Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        Ok(Self::wrap(socket))
    }

    /// Wraps an already-open socket. The caller is responsible for it being non-blocking.
    pub(crate) fn wrap(socket: socket2::Socket) -> Self {
        Self(SharedObject::new(SocketInner {
            socket,
            buffer: Vec::<u8>::new(),
        }))
    }

    /// Binds to a local address, enabling address reuse first so that short-lived servers can
    /// restart without waiting out TIME_WAIT.
    pub fn bind(&mut self, local: SocketAddr) -> Result<(), Fail> {
        let inner: &mut SocketInner = &mut self.0;
        inner.socket.set_reuse_address(true)?;
        inner.socket.bind(&SockAddr::from(local))?;
        Ok(())
    }

    /// Puts the socket into listening mode.
    pub fn listen(&mut self) -> Result<(), Fail> {
        self.0.socket.listen(limits::LISTEN_BACKLOG)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Fail> {
        match self.0.socket.local_addr()?.as_socket() {
            Some(addr) => Ok(addr),
            None => Err(Fail::new(libc::EAFNOSUPPORT, "socket has a non-IP local address")),
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, Fail> {
        match self.0.socket.peer_addr()?.as_socket() {
            Some(addr) => Ok(addr),
            None => Err(Fail::new(libc::EAFNOSUPPORT, "socket has a non-IP peer address")),
        }
    }

    /// The raw descriptor, as handed to [Syscall::ReadWait]/[Syscall::WriteWait].
    pub fn raw_fd(&self) -> RawFd {
        self.0.socket.as_raw_fd()
    }

    /// Shuts down both directions. The descriptor itself is released when the last clone of this
    /// handle drops.
    pub fn close(&mut self) -> Result<(), Fail> {
        match self.0.socket.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Shutting down a never-connected or already-reset socket is not an error here.
            Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Suspends until a pending connection can be accepted.
    pub fn accept(&self) -> AcceptFrame {
        AcceptFrame {
            socket: self.clone(),
            waited: false,
        }
    }

    /// Connects to a remote address, suspending while the connection is in progress.
    pub fn connect(&self, remote: SocketAddr) -> ConnectFrame {
        ConnectFrame {
            socket: self.clone(),
            addr: SockAddr::from(remote),
            started: false,
        }
    }

    /// Sends all of `data`, suspending between partial sends.
    pub fn send(&self, data: Vec<u8>) -> SendFrame {
        SendFrame {
            socket: self.clone(),
            data,
            offset: 0,
            waited: false,
        }
    }

    /// Receives at most `max` bytes. Bytes already sitting in the receive buffer are returned
    /// first, without touching the wire.
    pub fn recv(&self, max: usize) -> RecvFrame {
        RecvFrame {
            socket: self.clone(),
            max,
            waited: false,
        }
    }

    /// Receives until `delimiter` appears in the stream.
    pub fn read_until(&self, delimiter: &[u8]) -> ReadUntilFrame {
        ReadUntilFrame {
            socket: self.clone(),
            delimiter: delimiter.to_vec(),
            waited: false,
        }
    }

    /// Receives until exactly `count` bytes are available.
    pub fn read_bytes(&self, count: usize) -> ReadBytesFrame {
        ReadBytesFrame {
            socket: self.clone(),
            count,
            waited: false,
        }
    }

    /// Performs one non-blocking read of at most `max` bytes. Returns [None] when the socket has
    /// nothing to deliver yet. A zero-length read means the peer closed the connection, which this
    /// wrapper treats as an error.
    fn do_recv(&mut self, max: usize) -> Result<Option<Vec<u8>>, Fail> {
        let inner: &mut SocketInner = &mut self.0;
        let mut chunk: Vec<MaybeUninit<u8>> = vec![MaybeUninit::<u8>::uninit(); max];
        match inner.socket.recv(&mut chunk) {
            Ok(0) => Err(Fail::new(libc::ECONNRESET, "connection closed by peer")),
            Ok(nbytes) => {
                // The kernel initialized the first `nbytes` bytes.
                let bytes: Vec<u8> = chunk[..nbytes]
                    .iter()
                    .map(|byte| unsafe { byte.assume_init() })
                    .collect();
                Ok(Some(bytes))
            },
            Err(e) => {
                let e: Fail = e.into();
                if e.is_would_block() {
                    Ok(None)
                } else {
                    Err(e)
                }
            },
        }
    }

    /// Takes up to `max` buffered bytes, if any.
    fn take_buffered(&mut self, max: usize) -> Option<Vec<u8>> {
        let inner: &mut SocketInner = &mut self.0;
        if inner.buffer.is_empty() {
            return None;
        }
        if inner.buffer.len() <= max {
            return Some(mem::take(&mut inner.buffer));
        }
        let rest: Vec<u8> = inner.buffer.split_off(max);
        Some(mem::replace(&mut inner.buffer, rest))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Frame for AcceptFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        if let Err(e) = resume.into_result() {
            return Step::Fault(e);
        }
        if !self.waited {
            self.waited = true;
            return Step::Trap(Syscall::ReadWait(self.socket.raw_fd()));
        }
        match self.socket.0.socket.accept() {
            Ok((accepted, addr)) => {
                if let Err(e) = accepted.set_nonblocking(true) {
                    return Step::Fault(e.into());
                }
                let addr: SocketAddr = match addr.as_socket() {
                    Some(addr) => addr,
                    None => return Step::Fault(Fail::new(libc::EAFNOSUPPORT, "peer has a non-IP address")),
                };
                trace!("accept(): fd={:?}, peer={:?}", accepted.as_raw_fd(), addr);
                Step::Return(value((Socket::wrap(accepted), addr)))
            },
            Err(e) => {
                let e: Fail = e.into();
                if e.is_would_block() {
                    // Readiness was stolen by a racing accept; wait again.
                    Step::Trap(Syscall::ReadWait(self.socket.raw_fd()))
                } else {
                    Step::Fault(e)
                }
            },
        }
    }
}

impl Frame for ConnectFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        if let Err(e) = resume.into_result() {
            return Step::Fault(e);
        }
        if !self.started {
            self.started = true;
            return match self.socket.0.socket.connect(&self.addr) {
                Ok(()) => Step::Return(value(self.socket.clone())),
                Err(e) => {
                    let e: Fail = e.into();
                    if e.is_would_block() {
                        // Connection in progress; completion is signaled by writability.
                        Step::Trap(Syscall::WriteWait(self.socket.raw_fd()))
                    } else {
                        Step::Fault(e)
                    }
                },
            };
        }
        // Writable now: the connect either completed or failed with a pending error.
        match self.socket.0.socket.take_error() {
            Ok(None) => Step::Return(value(self.socket.clone())),
            Ok(Some(e)) => Step::Fault(e.into()),
            Err(e) => Step::Fault(e.into()),
        }
    }
}

impl Frame for SendFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        if let Err(e) = resume.into_result() {
            return Step::Fault(e);
        }
        if !self.waited {
            self.waited = true;
            return Step::Trap(Syscall::WriteWait(self.socket.raw_fd()));
        }
        while self.offset < self.data.len() {
            match self.socket.0.socket.send(&self.data[self.offset..]) {
                Ok(nbytes) => self.offset += nbytes,
                Err(e) => {
                    let e: Fail = e.into();
                    if e.is_would_block() {
                        return Step::Trap(Syscall::WriteWait(self.socket.raw_fd()));
                    }
                    return Step::Fault(e);
                },
            }
        }
        Step::Return(value(self.offset))
    }
}

impl Frame for RecvFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        if let Err(e) = resume.into_result() {
            return Step::Fault(e);
        }
        if let Some(bytes) = self.socket.take_buffered(self.max) {
            return Step::Return(value(bytes));
        }
        if !self.waited {
            self.waited = true;
            return Step::Trap(Syscall::ReadWait(self.socket.raw_fd()));
        }
        match self.socket.do_recv(self.max) {
            Ok(Some(bytes)) => Step::Return(value(bytes)),
            Ok(None) => Step::Trap(Syscall::ReadWait(self.socket.raw_fd())),
            Err(e) => Step::Fault(e),
        }
    }
}

impl Frame for ReadUntilFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        if let Err(e) = resume.into_result() {
            return Step::Fault(e);
        }
        loop {
            // The delimiter may straddle chunk boundaries, so search the whole buffer each time.
            let buffer: &Vec<u8> = &self.socket.0.buffer;
            if let Some(at) = buffer
                .windows(self.delimiter.len().max(1))
                .position(|window| window == self.delimiter.as_slice())
            {
                let split: usize = at + self.delimiter.len();
                let rest: Vec<u8> = self.socket.0.buffer.split_off(split);
                let line: Vec<u8> = mem::replace(&mut self.socket.0.buffer, rest);
                return Step::Return(value(line));
            }
            if !self.waited {
                self.waited = true;
                return Step::Trap(Syscall::ReadWait(self.socket.raw_fd()));
            }
            match self.socket.do_recv(limits::RECVBUF_SIZE_MAX) {
                Ok(Some(bytes)) => self.socket.0.buffer.extend_from_slice(&bytes),
                Ok(None) => return Step::Trap(Syscall::ReadWait(self.socket.raw_fd())),
                Err(e) => return Step::Fault(e),
            }
        }
    }
}

impl Frame for ReadBytesFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        if let Err(e) = resume.into_result() {
            return Step::Fault(e);
        }
        loop {
            if self.socket.0.buffer.len() >= self.count {
                let rest: Vec<u8> = self.socket.0.buffer.split_off(self.count);
                let bytes: Vec<u8> = mem::replace(&mut self.socket.0.buffer, rest);
                return Step::Return(value(bytes));
            }
            if !self.waited {
                self.waited = true;
                return Step::Trap(Syscall::ReadWait(self.socket.raw_fd()));
            }
            match self.socket.do_recv(limits::RECVBUF_SIZE_MAX) {
                Ok(Some(bytes)) => self.socket.0.buffer.extend_from_slice(&bytes),
                Ok(None) => return Step::Trap(Syscall::ReadWait(self.socket.raw_fd())),
                Err(e) => return Step::Fault(e),
            }
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
