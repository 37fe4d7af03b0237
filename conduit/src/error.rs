use std::io;

/// Result alias used throughout the core. `Wait` is not really an error — it lets
/// non-blocking call sites use `?` and still distinguish "try again" from "give up".
pub type ProtoResult<T> = Result<T, ProtoError>;

#[derive(Debug, Eq, PartialEq)]
pub enum ProtoError {
    /// Non-fatal: the operation could not complete right now (e.g. `WouldBlock`, or a
    /// partial frame still sitting in the decoder's accumulator). Callers should retry later.
    Wait,
    /// Fatal: the connection carrying this error must be torn down.
    Fatal(ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// `len` field outside `[HEAD_SIZE, MAX_FRAME_SIZE]`.
    LengthOutOfRange,
    /// Computed CRC did not match the transmitted one.
    CrcMismatch,
    /// Body bytes did not parse as JSON.
    MalformedBody,
    Io(io::ErrorKind),
}

impl From<io::Error> for ProtoError {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => ProtoError::Wait,
            kind => ProtoError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

/// Mirrors the source's `has_failed()` helper: lets a `Result` be used directly as event-loop
/// control flow without matching on `Wait` everywhere.
pub trait ResultExt {
    fn has_failed(&self) -> bool;
}

impl<T> ResultExt for ProtoResult<T> {
    #[inline]
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(ProtoError::Wait))
    }
}
