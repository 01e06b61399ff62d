// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::std::{
    cell::RefCell,
    net::SocketAddr,
    rc::Rc,
};
use ::weft::{
    downcast,
    unit,
    Frame,
    Resume,
    SharedScheduler,
    Socket,
    Step,
};

//==============================================================================
// Structures
//==============================================================================

/// Accepts one connection, reads one CRLF-terminated line and echoes it back.
struct EchoServer {
    listener: Socket,
    conn: Option<Socket>,
    state: u8,
}

/// Connects, sends one line and records the echoed reply.
struct EchoClient {
    socket: Socket,
    remote: SocketAddr,
    conn: Option<Socket>,
    reply: Rc<RefCell<Option<Vec<u8>>>>,
    state: u8,
}

/// Connects and reads a fixed-size payload in two exact-count reads.
struct ChunkReader {
    socket: Socket,
    remote: SocketAddr,
    conn: Option<Socket>,
    chunks: Rc<RefCell<Vec<Vec<u8>>>>,
    state: u8,
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Frame for EchoServer {
    fn resume(&mut self, resume: Resume) -> Step {
        let v = match resume.into_result() {
            Ok(v) => v,
            Err(e) => return Step::Fault(e),
        };
        match self.state {
            0 => {
                self.state = 1;
                Step::Call(Box::new(self.listener.accept()))
            },
            1 => {
                let (conn, _peer): (Socket, SocketAddr) = downcast::<(Socket, SocketAddr)>(&v).unwrap();
                self.state = 2;
                let read = conn.read_until(b"\r\n");
                self.conn = Some(conn);
                Step::Call(Box::new(read))
            },
            2 => {
                let line: Vec<u8> = downcast::<Vec<u8>>(&v).unwrap();
                self.state = 3;
                Step::Call(Box::new(self.conn.as_ref().unwrap().send(line)))
            },
            _ => Step::Return(unit()),
        }
    }
}

impl Frame for EchoClient {
    fn resume(&mut self, resume: Resume) -> Step {
        let v = match resume.into_result() {
            Ok(v) => v,
            Err(e) => return Step::Fault(e),
        };
        match self.state {
            0 => {
                self.state = 1;
                Step::Call(Box::new(self.socket.connect(self.remote)))
            },
            1 => {
                let conn: Socket = downcast::<Socket>(&v).unwrap();
                self.state = 2;
                let send = conn.send(b"hello\r\n".to_vec());
                self.conn = Some(conn);
                Step::Call(Box::new(send))
            },
            2 => {
                self.state = 3;
                Step::Call(Box::new(self.conn.as_ref().unwrap().read_until(b"\r\n")))
            },
            _ => {
                *self.reply.borrow_mut() = downcast::<Vec<u8>>(&v);
                Step::Return(unit())
            },
        }
    }
}

impl Frame for ChunkReader {
    fn resume(&mut self, resume: Resume) -> Step {
        let v = match resume.into_result() {
            Ok(v) => v,
            Err(e) => return Step::Fault(e),
        };
        match self.state {
            0 => {
                self.state = 1;
                Step::Call(Box::new(self.socket.connect(self.remote)))
            },
            1 => {
                let conn: Socket = downcast::<Socket>(&v).unwrap();
                self.state = 2;
                let read = conn.read_bytes(3);
                self.conn = Some(conn);
                Step::Call(Box::new(read))
            },
            2 => {
                self.chunks.borrow_mut().push(downcast::<Vec<u8>>(&v).unwrap());
                self.state = 3;
                Step::Call(Box::new(self.conn.as_ref().unwrap().read_bytes(3)))
            },
            _ => {
                self.chunks.borrow_mut().push(downcast::<Vec<u8>>(&v).unwrap());
                Step::Return(unit())
            },
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Creates a listening socket on an ephemeral loopback port.
fn listener() -> Result<(Socket, SocketAddr)> {
    let mut socket: Socket = Socket::new()?;
    socket.bind("127.0.0.1:0".parse()?)?;
    socket.listen()?;
    let local: SocketAddr = socket.local_addr()?;
    Ok((socket, local))
}

//==============================================================================
// Tests for Sockets
//==============================================================================

/// Tests a full echo round trip between two tasks over loopback TCP.
#[test]
fn echo_round_trip() -> Result<()> {
    let mut scheduler: SharedScheduler = SharedScheduler::new();
    let (listener, remote): (Socket, SocketAddr) = listener()?;
    let reply: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));

    scheduler.spawn(
        "server",
        Box::new(EchoServer {
            listener,
            conn: None,
            state: 0,
        }),
    );
    scheduler.spawn(
        "client",
        Box::new(EchoClient {
            socket: Socket::new()?,
            remote,
            conn: None,
            reply: reply.clone(),
            state: 0,
        }),
    );
    scheduler.run();

    weft::ensure_eq!(*reply.borrow(), Some(b"hello\r\n".to_vec()));
    Ok(())
}

/// Tests that exact-count reads split a single wire payload correctly.
#[test]
fn read_bytes_splits_payload() -> Result<()> {
    let mut scheduler: SharedScheduler = SharedScheduler::new();
    let (listener, remote): (Socket, SocketAddr) = listener()?;
    let chunks: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(vec![]));

    /// Accepts one connection and pushes six bytes at once.
    struct Pusher {
        listener: Socket,
        state: u8,
    }
    impl Frame for Pusher {
        fn resume(&mut self, resume: Resume) -> Step {
            let v = match resume.into_result() {
                Ok(v) => v,
                Err(e) => return Step::Fault(e),
            };
            match self.state {
                0 => {
                    self.state = 1;
                    Step::Call(Box::new(self.listener.accept()))
                },
                1 => {
                    let (conn, _peer): (Socket, SocketAddr) = downcast::<(Socket, SocketAddr)>(&v).unwrap();
                    self.state = 2;
                    Step::Call(Box::new(conn.send(b"abcdef".to_vec())))
                },
                _ => Step::Return(unit()),
            }
        }
    }

    scheduler.spawn("pusher", Box::new(Pusher { listener, state: 0 }));
    scheduler.spawn(
        "reader",
        Box::new(ChunkReader {
            socket: Socket::new()?,
            remote,
            conn: None,
            chunks: chunks.clone(),
            state: 0,
        }),
    );
    scheduler.run();

    weft::ensure_eq!(*chunks.borrow(), vec![b"abc".to_vec(), b"def".to_vec()]);
    Ok(())
}
