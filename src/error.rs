use thiserror::Error;

use crate::cmd::status_message;

/// Error type for this crate.
#[derive(Error, Debug)]
pub enum NxtError {
    /// No device matching the requested filters is on the bus.
    #[error("NXT not found on USB bus")]
    NotPresent,
    /// The SAM-BA bootloader did not acknowledge the handshake.
    #[error("NXT handshake failed")]
    HandshakeFailed,
    /// Local I/O failure around a firmware image.
    #[error("file open/handling error: {0}")]
    File(#[from] std::io::Error),
    /// Firmware image rejected before it reached the device.
    #[error("invalid firmware image: {0}")]
    InvalidFirmware(String),
    /// Could not allocate a transfer buffer.
    #[error("exhausted virtual memory")]
    OutOfMemory,
    /// USB backend failure, carrying the backend error code.
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
    /// Reply from the brick is malformed or does not answer the request.
    #[error("protocol error")]
    Protocol,
    /// Brick answered with a non zero status byte.
    #[error("{msg} (0x{0:02x})", msg = status_message(*.0))]
    Command(u8),

    /// Failed to encode or decode a brick command frame.
    #[error("cmd failed to binary (de)serialize: {0}")]
    Codec(#[from] bincode::Error),

    /// Connection is not open, or was closed.
    #[error("connection is not open")]
    NotOpen,
    /// Connection is already open.
    #[error("connection is already open")]
    AlreadyOpen,
    /// Operation is not available for this firmware kind.
    #[error("operation not supported by this firmware")]
    NotSupported,
}

pub type Result<T> = ::std::result::Result<T, NxtError>;
