//! Error types for the pack format.

/// Errors that can occur while encoding or decoding a pack.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Malformed wire data: unexpected EOF, unterminated varint, type
    /// mismatch, out-of-order field id, or an `end` call outside the
    /// matching container. A pack that produced this error is untrusted
    /// from that point on.
    #[error("format error: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error codes reported by the archival tooling layered on the
/// format. Not used by the codec itself.
pub mod code {
    /// The restore target directory contained files.
    pub const RESTORE_PATH_NOT_EMPTY: i32 = 100;
}
