use thiserror::Error;

/// Protocol-level decode/encode failures.
///
/// On the server every variant is handled the same way: the offending
/// connection is cancelled and closed without a reply.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    #[error("field does not fit the remaining buffer space")]
    FieldOverflow,
    #[error("field length prefix exceeds the remaining frame data")]
    TruncatedField,
    #[error("field is not a key=value pair")]
    MissingSeparator,
    #[error("field value exceeds the receiving buffer capacity")]
    ValueTooLong,
    #[error("frame length {0} is below the header size")]
    UndersizedFrame(u16),
}

impl From<fencehub_utils::CapacityExceeded> for ProtoError {
    fn from(_: fencehub_utils::CapacityExceeded) -> Self {
        ProtoError::ValueTooLong
    }
}
