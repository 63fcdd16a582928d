use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;

use crate::status::ScanStatus;

/// Error information returned by the Model and Action API in case of errors.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.get_context().clone()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "pod {}/{} not found", _0, _1)]
    PodNotFound(String, String),

    #[fail(display = "image {} not found", _0)]
    ImageNotFound(String),

    #[fail(display = "layer {} not found", _0)]
    LayerNotFound(String),

    #[fail(display = "digest {} not found", _0)]
    DigestNotFound(String),

    #[fail(display = "{} status is unknown", _0)]
    ScanStatusUnknown(String),

    #[fail(display = "illegal transition for {} from {:?} to {:?}", _0, _1, _2)]
    IllegalTransition(String, ScanStatus, ScanStatus),

    #[fail(display = "scan-lifecycle reducer has shut down")]
    Shutdown,

    #[fail(display = "unable to spawn thread for '{}'", _0)]
    SpawnThread(&'static str),
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;
