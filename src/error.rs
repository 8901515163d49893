//! Error types shared by the encoder and decoder halves of the engine.

use thiserror::Error;

/// Every failure mode the core can raise.
///
/// Recovery policy is documented per-variant at the call sites that raise it;
/// none of these roll back partial engine state beyond what is locally atomic.
#[derive(Debug, Error)]
pub enum Error {
    /// A media packet failed the V/P/PT shape check, was shorter than the
    /// RTP header, or changed size mid-stream.
    #[error("invalid packet format: {0}")]
    InvalidFormat(String),

    /// A caller-supplied parameter (matrix shape, port, read buffer) was
    /// outside the bounds this engine accepts.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A store insertion could not be satisfied. Reachable only when a
    /// caller configures zero capacity; `Vec`/`BTreeMap` growth itself does
    /// not fail on this crate's supported targets.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The decoder has nothing to emit yet; call again once more packets
    /// have arrived.
    #[error("would block")]
    WouldBlock,

    /// The caller's transport signalled an interrupt.
    #[error("interrupted")]
    Interrupted,

    /// A sink supplied by the caller failed.
    #[error("transport error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),
}
