//! Ambient process setup shared by both binaries: logging and the
//! minimal process-boundary configuration (§2, §6).

use dataservice_base::{err, Result};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Level filtering comes from
/// `RUST_LOG`, defaulting to `info` when unset or invalid.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// The process-boundary configuration every binary is handed at startup
/// (§6). No flags or environment variables are consumed; the supervisor
/// passes the two inherited file descriptors and the data directory as
/// positional arguments, in the same spirit as the original's
/// `dataservice_event_loop(datasock, logsock)` call taking its fds as
/// plain parameters rather than parsed options.
#[derive(Clone, Debug)]
pub struct Config {
    /// The duplex, stream-oriented socket this process accepts
    /// requests on.
    pub request_fd: RawFd,
    /// A socket diagnostic messages may additionally be written to.
    pub log_fd: RawFd,
    pub data_dir: PathBuf,
}

impl Config {
    /// Reads `argv[1..=3]` as `{ request_fd, log_fd, data_dir }`. Any
    /// failure here is fatal: there is no request in flight yet to
    /// report a status code against.
    pub fn from_env() -> Result<Config> {
        Self::from_args(std::env::args().skip(1))
    }

    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Config> {
        let request_fd = args
            .next()
            .ok_or_else(|| err("missing argument: request_fd"))?
            .parse::<RawFd>()
            .map_err(|_| err("request_fd is not a valid file descriptor"))?;
        let log_fd = args
            .next()
            .ok_or_else(|| err("missing argument: log_fd"))?
            .parse::<RawFd>()
            .map_err(|_| err("log_fd is not a valid file descriptor"))?;
        let data_dir = args
            .next()
            .ok_or_else(|| err("missing argument: data_dir"))?
            .into();
        Ok(Config { request_fd, log_fd, data_dir })
    }
}
