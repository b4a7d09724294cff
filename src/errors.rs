use std::io;

use thiserror::Error;

use crate::select::BackendKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not supported: {0}")]
    Unsupported(&'static str),
    #[error("insufficient privileges for {0}")]
    Privilege(&'static str),
    #[error("out of {0}")]
    ResourceExhausted(&'static str),
    #[error("{0}")]
    InvalidArgument(&'static str),
    #[error("too big packet: {0}")]
    TooBigPacket(usize),
    #[error("no such interface: {0}")]
    NoSuchInterface(String),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{backend} backend failed to initialize: {source}")]
    BackendInit {
        backend: BackendKind,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Classify the current OS error from a failed socket or device call.
    pub(crate) fn from_errno(what: &'static str) -> Error {
        Error::classify_io(io::Error::last_os_error(), what)
    }

    pub(crate) fn classify_io(err: io::Error, what: &'static str) -> Error {
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => Error::Privilege(what),
            Some(libc::ENOMEM) | Some(libc::ENOBUFS) => Error::ResourceExhausted(what),
            _ => Error::Io(err),
        }
    }
}
