//! Central error types for the wick engine.
use std::io;

/// Failure modes of the byte-level HTTP request parser (§4.1, §4.2).
#[derive(Debug)]
pub enum ParseError {
    /// Not enough bytes have arrived yet to finish parsing.
    Incomplete,
    /// The bytes present do not form a well-formed request/part.
    InvalidFormat,
    /// A declared or accumulated size exceeds a configured limit.
    TooLarge,
    /// The method token is not one of the fixed set.
    UnsupportedMethod,
    /// The decoded path contains a `..` segment.
    PathTraversal,
}

/// Failure modes that are policy decisions rather than malformed bytes (§7).
#[derive(Debug)]
pub enum PolicyError {
    /// An uploaded filename contains `..`, `/`, or `\`, or has a blocked extension.
    RejectedUpload(String),
}

/// Central error type for the wick engine.
#[derive(Debug)]
pub enum WickError {
    /// Underlying I/O error from the OS or network.
    Io(io::Error),
    /// Error while parsing an HTTP request or multipart body.
    Parse(ParseError),
    /// A request was rejected by policy (path traversal, blocked upload).
    Policy(PolicyError),
    /// A background worker thread panicked.
    WorkerPanic(String),
    /// Generic or miscellaneous error.
    Other(String),
}

impl std::fmt::Display for WickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WickError::Io(e) => write!(f, "I/O error: {}", e),
            WickError::Parse(e) => write!(f, "parse error: {:?}", e),
            WickError::Policy(e) => write!(f, "policy error: {:?}", e),
            WickError::WorkerPanic(msg) => write!(f, "worker panic: {}", msg),
            WickError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for WickError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WickError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WickError {
    fn from(e: io::Error) -> Self {
        WickError::Io(e)
    }
}

impl From<ParseError> for WickError {
    fn from(e: ParseError) -> Self {
        WickError::Parse(e)
    }
}

impl From<PolicyError> for WickError {
    fn from(e: PolicyError) -> Self {
        WickError::Policy(e)
    }
}

/// Status code this error should be rendered as when it escapes the parser,
/// before any route or exception handler has had a chance to run.
impl WickError {
    pub fn status_code(&self) -> u16 {
        match self {
            WickError::Parse(ParseError::UnsupportedMethod) => 400,
            WickError::Parse(ParseError::PathTraversal) => 403,
            WickError::Parse(_) => 400,
            WickError::Policy(_) => 403,
            WickError::Io(_) => 400,
            WickError::WorkerPanic(_) | WickError::Other(_) => 500,
        }
    }
}

pub type WickResult<T> = Result<T, WickError>;
