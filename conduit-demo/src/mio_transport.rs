use conduit::{ProtoError, ProtoResult};
use mio::net::TcpStream;
use mio::{Poll, PollOpt, Ready, Token};
use slog::{debug, Logger};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const READ_CHUNK: usize = 65536;

/// A single live TCP connection as seen by the demo's mio event loop. Implements
/// `conduit::ConnectionHandle` so the core's Manager can write through it without knowing
/// anything about mio or sockets.
pub struct TcpConn {
    id: String,
    stream: Mutex<TcpStream>,
    connected: AtomicBool,
    out_buffer: Mutex<VecDeque<u8>>,
    log: Logger,
}

impl TcpConn {
    pub fn new(id: String, stream: TcpStream, log: Logger) -> TcpConn {
        TcpConn {
            id,
            stream: Mutex::new(stream),
            connected: AtomicBool::new(true),
            out_buffer: Mutex::new(VecDeque::new()),
            log,
        }
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Registers the underlying socket on `poll`. Only needs the stream for the duration of
    /// the call, so the lock is never held across an event-loop iteration.
    pub fn register_with(&self, poll: &Poll, token: Token, ready: Ready, opts: PollOpt) -> io::Result<()> {
        let stream = self.stream.lock().unwrap();
        poll.register(&*stream, token, ready, opts)
    }

    /// Reads whatever is available off the socket. Returns the bytes read, or `Ok(vec![])`
    /// on `WouldBlock` (nothing to do right now, not an error).
    pub fn read_available(&self) -> io::Result<Vec<u8>> {
        let mut stream = self.stream.lock().unwrap();
        let mut buf = [0u8; READ_CHUNK];
        let mut out = Vec::new();

        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.mark_disconnected();
                    break;
                }
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    /// Drains as much of the outbound buffer to the socket as the kernel will currently
    /// accept. Call on every writable readiness event.
    pub fn flush(&self) -> io::Result<()> {
        let mut out_buffer = self.out_buffer.lock().unwrap();
        let mut stream = self.stream.lock().unwrap();

        while !out_buffer.is_empty() {
            let (front, _) = out_buffer.as_slices();
            match stream.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    for _ in 0..n {
                        out_buffer.pop_front();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl conduit::ConnectionHandle for TcpConn {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn write(&self, bytes: &[u8]) -> ProtoResult<()> {
        if !self.is_connected() {
            return Err(ProtoError::Wait);
        }

        self.out_buffer.lock().unwrap().extend(bytes);
        debug!(self.log, "queued outbound bytes"; "connection_id" => &self.id, "count" => bytes.len());

        Ok(())
    }
}
