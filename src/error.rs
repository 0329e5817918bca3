use std::fmt;
use std::io;

/// Errors produced while creating, opening, inserting into, or querying
/// a relation.
#[derive(Debug)]
pub enum Error {
    /// A choice-vector specification failed to parse.
    InvalidChoiceVector(String),
    /// An underlying file operation failed; fatal to the current operation.
    Io(io::Error),
    /// A tuple did not fit even in a freshly emptied page.
    OversizeTuple,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidChoiceVector(msg) => write!(f, "invalid choice vector: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::OversizeTuple => write!(f, "tuple does not fit in an empty page"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
