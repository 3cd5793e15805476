// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system

use backtrace_error::DynBacktraceError;
use std::borrow::Cow;
use tracing::error;

#[cfg(test)]
use test_log::test;

/// A fatal, process-ending error: I/O failure, framing corruption, or
/// anything else that compromises the socket stream and forces the event
/// loop to exit. Non-fatal, data-dependent outcomes are reported on the
/// wire with a [`crate::StatusCode`] instead of this type.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FatalError(DynBacktraceError);
pub type Result<T> = std::result::Result<T, FatalError>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for FatalError {
    fn from(err: E) -> FatalError {
        FatalError::new(err)
    }
}

impl FatalError {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> FatalError {
        error!(target: "dataservice", "{:?}", err);
        let dbe = DynBacktraceError::from(err);
        FatalError(dbe)
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> FatalError {
    let err = SimpleErr(msg.into());
    FatalError::new(err)
}

#[test]
fn test_error() {
    let _err = err("test error");
}
