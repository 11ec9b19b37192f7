use std::{error, fmt, io};

/// Failures raised by the encoder, decoder, and binding layer.
///
/// Everything except `TypeMismatch` is fatal to the stream: once raised,
/// the cursor position is unreliable and the reader or writer should be
/// discarded. Typed reads check the token family against the peeked
/// marker before consuming it, so a family-level `TypeMismatch` leaves
/// the cursor at the token start; this is what lets the record binder
/// recover by skipping the value. A mismatch discovered only after the
/// payload is read (an out-of-range widening) leaves the cursor past
/// the token instead.
#[derive(Debug)]
pub enum Error {
    /// End of stream inside a token.
    Truncated,
    /// Unknown or reserved marker, impossible varint, or a payload that
    /// cannot be decoded (invalid UTF-8, malformed literal).
    MalformedToken(String),
    /// A typed read was called for a marker of another family.
    TypeMismatch(String),
    /// `USE_KEY` referenced an id with no prior `SET_KEY`.
    UnknownKeyId(u32),
    /// `USE_STRUCT` referenced an id with no prior `DEFINE_STRUCT`.
    UnknownStructId(u32),
    /// One of the reader limits would be breached; raised before any
    /// allocation takes place.
    LimitExceeded(String),
    /// `END` with no open `BEGIN_*`, or an unbounded collection was
    /// decoded into a target that requires a known length.
    InvalidNesting(String),
    /// The binder was asked for a shape the format cannot express.
    UnsupportedTarget(String),
    IOError(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // read_exact reports EOF mid-token as UnexpectedEof
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::Truncated;
        }
        Error::IOError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "unexpected end of stream inside a token"),
            Error::MalformedToken(msg) => write!(f, "malformed token: {}", msg),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {}", msg),
            Error::UnknownKeyId(id) => write!(f, "key id {} has no prior definition", id),
            Error::UnknownStructId(id) => write!(f, "struct id {} has no prior definition", id),
            Error::LimitExceeded(msg) => write!(f, "limit exceeded: {}", msg),
            Error::InvalidNesting(msg) => write!(f, "invalid nesting: {}", msg),
            Error::UnsupportedTarget(msg) => write!(f, "unsupported target: {}", msg),
            Error::IOError(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IOError(err) => Some(err),
            _ => None,
        }
    }
}
