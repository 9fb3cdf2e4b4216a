use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the repository parser.
///
/// `InvalidDatabase`, `ReferenceNotFound` and `UnmappedPage` are the
/// recoverable/navigation taxonomy; everything else is either a usage
/// error (`InvalidPath`) or a hard stop while decoding.
#[derive(Debug, Error)]
pub enum Error {
    /// The on-disk data violates a format invariant.
    #[error("invalid CIM database: {0}")]
    InvalidDatabase(String),

    /// A key resolved to no reference in the index.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// A logical page has no physical backing in the current mapping.
    #[error("unmapped logical page {0:#x}")]
    UnmappedPage(u32),

    /// A named object (namespace, instance, TOC record) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object path string cannot be interpreted.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// A value type the reader does not implement.
    #[error("unsupported CIM type: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        match *value {
            bincode::ErrorKind::Io(io) => Error::Io(io),
            other => Error::InvalidDatabase(other.to_string()),
        }
    }
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidDatabase(msg.into())
    }
}
