//! Error types for the AstroLink driver.
//!
//! [`AstroLinkError`] separates link-level failures (I/O, timeout, short
//! read) from protocol-level ones (echo mismatch, identity rejection,
//! truncated records) so callers and log output can tell a flaky cable
//! apart from a confused device.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, AstroLinkError>;

/// Primary error type for the AstroLink driver.
#[derive(Error, Debug)]
pub enum AstroLinkError {
    /// Serial I/O failed (write error, port gone, unexpected EOF).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device did not answer within the transport timeout.
    #[error("timed out waiting for response to '{command}'")]
    Timeout { command: String },

    /// The device returned a bare line terminator with no payload.
    ///
    /// Line noise can produce a lone newline; it is never a valid
    /// response, so it is reported as a failed exchange rather than an
    /// empty one.
    #[error("short read: device returned a bare line terminator")]
    ShortRead,

    /// Command line exceeds the device receive buffer.
    #[error("command line is {len} bytes, device accepts at most {max}")]
    CommandTooLong { len: usize, max: usize },

    /// The first response field did not echo the sent command code.
    ///
    /// The device shares one delimiter grammar between normal replies and
    /// error records, so the echoed code is the only way to know the
    /// response belongs to the command that was sent.
    #[error("protocol mismatch: sent '{sent}', device answered '{got}'")]
    ProtocolMismatch { sent: String, got: String },

    /// Handshake response does not carry the expected model prefix.
    /// Fatal to the connection attempt; never retried by the driver.
    #[error("device not recognized: '{response}'")]
    IdentityRejected { response: String },

    /// A record is shorter than a referenced field position.
    #[error("record has {len} fields, position {index} requested")]
    RecordTruncated { len: usize, index: usize },

    /// A record field did not parse as a number.
    #[error("field {index} ('{value}') is not numeric")]
    FieldParse { index: usize, value: String },

    /// Channel index outside the configured channel count.
    #[error("invalid channel {channel}, device has {count}")]
    InvalidChannel { channel: u8, count: u8 },
}
