//! The data service's socket event loop (E1, §4.6).
//!
//! Single-threaded, cooperative, non-blocking: one `mio` poll loop reads
//! framed requests off the inherited data socket, dispatches them
//! through `dataservice-core`, and writes framed replies back. Signal
//! delivery is folded into the same poll loop via `signal-hook-mio`, so
//! there is exactly one suspension point (`Poll::poll`) for the whole
//! process.

use dataservice_admin::Config;
use dataservice_base::{err, Cap, CapSet, Result};
use dataservice_core::{dispatch, RootContext};
use dataservice_proto::{take_frame, Request, Response};
use mio::net::UnixStream as MioUnixStream;
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::{SIGHUP, SIGQUIT, SIGTERM};
use signal_hook_mio::v0_8::Signals;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use tracing::{debug, info, warn};

const SOCKET_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);

/// The capability set a freshly-started service process requests for
/// its own root context: only [`Cap::RootContextCreate`] need be set on
/// the way in, since [`RootContext::create`] always grants every other
/// bit regardless (§4.1).
fn startup_root_caps() -> CapSet {
    let mut caps = CapSet::init_false();
    caps.set(Cap::RootContextCreate);
    caps
}

/// Runs the data service to completion: opens the environment, wraps
/// the inherited data socket, and services requests until a signal or
/// fatal protocol error breaks the loop. Returns once the loop has
/// exited cleanly; the environment is synced and closed as the
/// returned [`RootContext`] (and the `Env`/`Database` it owns) drops.
pub fn run(config: Config) -> Result<()> {
    let mut root = RootContext::create(&startup_root_caps(), &config.data_dir)
        .map_err(|status| err(format!("root context create failed: {status}")))?;

    let std_stream = unsafe { StdUnixStream::from_raw_fd(config.request_fd) };
    std_stream.set_nonblocking(true)?;
    let mut conn = Connection::new(MioUnixStream::from_std(std_stream));

    let mut signals = Signals::new([SIGHUP, SIGTERM, SIGQUIT])?;
    let mut poll = Poll::new()?;
    poll.registry().register(
        &mut conn.sock,
        SOCKET_TOKEN,
        Interest::READABLE | Interest::WRITABLE,
    )?;
    poll.registry()
        .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;

    let mut events = Events::with_capacity(128);
    let mut force_exit = false;

    info!(target: "dataservice", "event loop starting");
    while !force_exit {
        poll.poll(&mut events, None)?;

        for event in events.iter() {
            match event.token() {
                SOCKET_TOKEN => {
                    if event.is_readable() && conn.read_ready(&mut root) {
                        force_exit = true;
                    }
                    if !force_exit && event.is_writable() && conn.write_ready() {
                        force_exit = true;
                    }
                    if !force_exit {
                        let interest = if conn.has_pending_output() {
                            Interest::READABLE | Interest::WRITABLE
                        } else {
                            Interest::READABLE
                        };
                        poll.registry().reregister(&mut conn.sock, SOCKET_TOKEN, interest)?;
                    }
                }
                SIGNAL_TOKEN => {
                    for signal in signals.pending() {
                        warn!(target: "dataservice", signal, "exit signal received");
                        force_exit = true;
                    }
                }
                _ => unreachable!("no other token is ever registered"),
            }
        }
    }

    info!(target: "dataservice", "event loop exiting");
    Ok(())
}

/// Owns the data socket plus its read and write buffers. The read
/// buffer accumulates bytes until whole frames can be peeled off; the
/// write buffer accumulates encoded replies until the socket accepts
/// them.
struct Connection {
    sock: MioUnixStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    write_pos: usize,
}

impl Connection {
    fn new(sock: MioUnixStream) -> Connection {
        Connection {
            sock,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            write_pos: 0,
        }
    }

    fn has_pending_output(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    /// Read callback (§4.6): drains the socket into `read_buf`, then
    /// decodes and dispatches every complete frame found. Returns
    /// `true` if the loop must exit (EOF or I/O error).
    fn read_ready(&mut self, root: &mut RootContext) -> bool {
        let mut chunk = [0u8; 8192];
        loop {
            match self.sock.read(&mut chunk) {
                Ok(0) => return true,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(target: "dataservice", error = %e, "read failed");
                    return true;
                }
            }
        }
        self.drain_frames(root);
        false
    }

    fn drain_frames(&mut self, root: &mut RootContext) {
        loop {
            let consumed = match take_frame(&self.read_buf) {
                Some((frame, consumed)) => {
                    let resp = match Request::decode(frame) {
                        Ok(req) => dispatch(root, &req),
                        Err(status) => Response::error(0, 0, status),
                    };
                    self.write_buf.extend_from_slice(&resp.encode());
                    consumed
                }
                None => break,
            };
            self.read_buf.drain(0..consumed);
        }
    }

    /// Write callback (§4.6): drains `write_buf` onto the socket,
    /// re-arming on `EWOULDBLOCK` and reporting fatal on a zero-byte
    /// write or any other I/O error.
    fn write_ready(&mut self) -> bool {
        loop {
            if !self.has_pending_output() {
                self.write_buf.clear();
                self.write_pos = 0;
                return false;
            }
            match self.sock.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => {
                    warn!(target: "dataservice", "zero-byte write");
                    return true;
                }
                Ok(n) => {
                    self.write_pos += n;
                    debug!(target: "dataservice", bytes = n, "wrote reply bytes");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(target: "dataservice", error = %e, "write failed");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dataservice_base::{Cap, CapSet};
    use std::os::unix::net::UnixStream as StdPairStream;
    use test_log::test;

    fn tmp_root() -> (tempfile::TempDir, RootContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut caps = CapSet::init_false();
        caps.set(Cap::RootContextCreate);
        let root = RootContext::create(&caps, dir.path()).unwrap();
        (dir, root)
    }

    fn frame(method: u32, payload: &[u8]) -> Vec<u8> {
        let body_len = 4 + payload.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.extend_from_slice(&method.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn unknown_method_gets_a_reply_without_closing_the_connection() {
        let (_dir, mut root) = tmp_root();
        let (mut driver, svc) = StdPairStream::pair().unwrap();
        svc.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(MioUnixStream::from_std(svc));

        driver.write_all(&frame(999, &[])).unwrap();

        let fatal = conn.read_ready(&mut root);
        assert!(!fatal);
        assert!(conn.has_pending_output());

        let fatal = conn.write_ready();
        assert!(!fatal);
        assert!(!conn.has_pending_output());

        let mut reply = [0u8; 64];
        let n = driver.read(&mut reply).unwrap();
        let resp = Response::error(999, 0, dataservice_base::StatusCode::RequestPacketBad);
        assert_eq!(&reply[..n], &resp.encode()[..]);
    }

    #[test]
    fn peer_shutdown_is_reported_as_fatal() {
        let (_dir, mut root) = tmp_root();
        let (driver, svc) = StdPairStream::pair().unwrap();
        svc.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(MioUnixStream::from_std(svc));

        drop(driver);

        assert!(conn.read_ready(&mut root));
    }
}
