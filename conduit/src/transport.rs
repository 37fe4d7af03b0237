use crate::error::ProtoResult;

/// Interface the core depends on but never implements: a single live TCP connection as seen
/// by whatever event loop owns the socket. The Manager never stores `Arc<dyn ConnectionHandle>`
/// directly — only `Weak` handles keyed by connection id — so a disconnected connection is
/// free to drop the moment the transport gives it up (§4.6 of the design notes).
pub trait ConnectionHandle: Send + Sync {
    /// Stable for the lifetime of the connection; used as the key into all Manager state.
    fn id(&self) -> &str;

    /// Whether the underlying socket is still usable. A handle whose connection has closed
    /// should keep returning `false` rather than being dropped out from under callers.
    fn is_connected(&self) -> bool;

    /// Enqueues `bytes` for non-blocking transmission. Implementations buffer internally and
    /// flush on their own schedule; this call must never block on I/O.
    fn write(&self, bytes: &[u8]) -> ProtoResult<()>;
}
