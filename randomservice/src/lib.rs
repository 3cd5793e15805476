//! The random service: a second, far simpler instance of the same
//! request/response event-loop pattern as the data service (§2, E2).
//!
//! One method, `get_random_bytes(offset, size)` with `1 <= size <=
//! 1024`, replies with `size` bytes read fresh from the supplied
//! random device on every call. `offset` is accepted and logged but
//! never used to seek — each reply is freshly drawn, not addressed
//! into a fixed stream (§6).

use dataservice_base::{err, Result, StatusCode, StatusResult};
use dataservice_proto::{take_frame, Request, Response};
use mio::net::UnixStream as MioUnixStream;
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::{SIGHUP, SIGQUIT, SIGTERM};
use signal_hook_mio::v0_8::Signals;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use tracing::{debug, info, warn};

/// The sole method this service exposes.
pub const METHOD_GET_RANDOM_BYTES: u32 = 0;

/// The maximum number of bytes a single request may ask for (§6).
pub const MAX_RANDOM_SIZE: u32 = 1024;

/// The process-boundary configuration this binary is started with: the
/// random device, the protocol-service connection, and the log socket,
/// all inherited file descriptors (§6). Mirrors
/// `dataservice_admin::Config`'s shape but carries the three fds this
/// service's original signature actually takes, rather than a data
/// directory.
#[derive(Clone, Debug)]
pub struct Config {
    pub random_fd: RawFd,
    pub proto_fd: RawFd,
    pub log_fd: RawFd,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Self::from_args(std::env::args().skip(1))
    }

    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Config> {
        let random_fd = args
            .next()
            .ok_or_else(|| err("missing argument: random_fd"))?
            .parse::<RawFd>()
            .map_err(|_| err("random_fd is not a valid file descriptor"))?;
        let proto_fd = args
            .next()
            .ok_or_else(|| err("missing argument: proto_fd"))?
            .parse::<RawFd>()
            .map_err(|_| err("proto_fd is not a valid file descriptor"))?;
        let log_fd = args
            .next()
            .ok_or_else(|| err("missing argument: log_fd"))?
            .parse::<RawFd>()
            .map_err(|_| err("log_fd is not a valid file descriptor"))?;
        Ok(Config { random_fd, proto_fd, log_fd })
    }
}

/// Validates and services one `get_random_bytes` request against any
/// byte source. Production code supplies the random device; tests
/// supply a deterministic in-memory reader.
pub fn get_random_bytes(source: &mut impl Read, payload: &[u8]) -> StatusResult<Vec<u8>> {
    if payload.len() != 8 {
        return Err(StatusCode::RequestPacketInvalidSize);
    }
    let offset = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let size = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    debug!(target: "randomservice", offset, size, "get_random_bytes");
    if size == 0 || size > MAX_RANDOM_SIZE {
        return Err(StatusCode::InvalidSize);
    }
    let mut buf = vec![0u8; size as usize];
    source.read_exact(&mut buf).map_err(|e| {
        warn!(target: "randomservice", error = %e, "random device read failed");
        StatusCode::ReadFailed
    })?;
    Ok(buf)
}

/// Decodes and dispatches one request. Unknown methods are a non-fatal
/// protocol error, matching the data service's dispatcher (§4.5).
pub fn dispatch(source: &mut impl Read, req: &Request) -> Response {
    if req.method != METHOD_GET_RANDOM_BYTES {
        warn!(target: "randomservice", method = req.method, "unknown method");
        return Response::error(req.method, 0, StatusCode::RequestPacketBad);
    }
    match get_random_bytes(source, &req.payload) {
        Ok(bytes) => Response::success(req.method, 0, bytes),
        Err(status) => Response::error(req.method, 0, status),
    }
}

const SOCKET_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);

/// Runs the random service to completion: opens the random device,
/// wraps the inherited protocol socket, and services requests until a
/// signal or fatal I/O error breaks the loop (§4.6, shared pattern with
/// the data service's E1 loop).
pub fn run(config: Config) -> Result<()> {
    let mut random = unsafe { File::from_raw_fd(config.random_fd) };

    let std_stream = unsafe { StdUnixStream::from_raw_fd(config.proto_fd) };
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

    info!(target: "randomservice", "event loop starting");
    while !force_exit {
        poll.poll(&mut events, None)?;

        for event in events.iter() {
            match event.token() {
                SOCKET_TOKEN => {
                    if event.is_readable() && conn.read_ready(&mut random) {
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
                        warn!(target: "randomservice", signal, "exit signal received");
                        force_exit = true;
                    }
                }
                _ => unreachable!("no other token is ever registered"),
            }
        }
    }

    info!(target: "randomservice", "event loop exiting");
    Ok(())
}

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

    fn read_ready(&mut self, random: &mut File) -> bool {
        let mut chunk = [0u8; 4096];
        loop {
            match self.sock.read(&mut chunk) {
                Ok(0) => return true,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(target: "randomservice", error = %e, "read failed");
                    return true;
                }
            }
        }
        self.drain_frames(random);
        false
    }

    fn drain_frames(&mut self, random: &mut File) {
        loop {
            let consumed = match take_frame(&self.read_buf) {
                Some((frame, consumed)) => {
                    let resp = match Request::decode(frame) {
                        Ok(req) => dispatch(random, &req),
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

    fn write_ready(&mut self) -> bool {
        loop {
            if !self.has_pending_output() {
                self.write_buf.clear();
                self.write_pos = 0;
                return false;
            }
            match self.sock.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => {
                    warn!(target: "randomservice", "zero-byte write");
                    return true;
                }
                Ok(n) => self.write_pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(target: "randomservice", error = %e, "write failed");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn rejects_zero_size() {
        let mut source = std::io::Cursor::new(vec![0xAAu8; 16]);
        let payload = [0u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            get_random_bytes(&mut source, &payload).unwrap_err(),
            StatusCode::InvalidSize
        );
    }

    #[test]
    fn rejects_oversized_request() {
        let mut source = std::io::Cursor::new(vec![0u8; 4096]);
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&1025u32.to_be_bytes());
        assert_eq!(
            get_random_bytes(&mut source, &payload).unwrap_err(),
            StatusCode::InvalidSize
        );
    }

    #[test]
    fn returns_exactly_the_requested_size() {
        let data: Vec<u8> = (0..32).collect();
        let mut source = std::io::Cursor::new(data.clone());
        let mut payload = 7u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&16u32.to_be_bytes());
        let bytes = get_random_bytes(&mut source, &payload).unwrap();
        assert_eq!(bytes, &data[..16]);
    }

    #[test]
    fn short_read_is_reported_as_read_failed() {
        let mut source = std::io::Cursor::new(vec![1u8; 4]);
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&16u32.to_be_bytes());
        assert_eq!(
            get_random_bytes(&mut source, &payload).unwrap_err(),
            StatusCode::ReadFailed
        );
    }

    #[test]
    fn dispatch_unknown_method_is_non_fatal() {
        let mut source = std::io::Cursor::new(vec![0u8; 16]);
        let resp = dispatch(&mut source, &Request { method: 7, payload: Vec::new() });
        assert_eq!(resp.status, StatusCode::RequestPacketBad);
    }

    #[test]
    fn dispatch_success_round_trip() {
        let mut source = std::io::Cursor::new(vec![9u8; 16]);
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&4u32.to_be_bytes());
        let resp = dispatch(
            &mut source,
            &Request { method: METHOD_GET_RANDOM_BYTES, payload },
        );
        assert_eq!(resp.status, StatusCode::Success);
        assert_eq!(resp.payload, vec![9u8; 4]);
    }

    #[test]
    fn connection_read_write_round_trip_over_a_socket_pair() {
        let (mut driver, svc) = std::os::unix::net::UnixStream::pair().unwrap();
        svc.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(MioUnixStream::from_std(svc));
        let mut random = tempfile_with(&[5u8; 64]);

        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&8u32.to_be_bytes());
        let body_len = 4 + payload.len();
        let mut frame_bytes = (body_len as u32).to_be_bytes().to_vec();
        frame_bytes.extend_from_slice(&METHOD_GET_RANDOM_BYTES.to_be_bytes());
        frame_bytes.extend_from_slice(&payload);
        driver.write_all(&frame_bytes).unwrap();

        assert!(!conn.read_ready(&mut random));
        assert!(conn.has_pending_output());
        assert!(!conn.write_ready());

        let mut reply = [0u8; 64];
        let n = driver.read(&mut reply).unwrap();
        let resp = Response::success(METHOD_GET_RANDOM_BYTES, 0, vec![5u8; 8]);
        assert_eq!(&reply[..n], &resp.encode()[..]);
    }

    fn tempfile_with(data: &[u8]) -> File {
        use std::io::Seek;
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(data).unwrap();
        f.seek(std::io::SeekFrom::Start(0)).unwrap();
        f
    }
}
