//! Wire protocol shared by the fencing server and agent.
//!
//! A frame is a 4-byte header (`msg_type: u16 BE`, `length: u16 BE`,
//! length counts the header) followed by a payload of length-prefixed
//! `key=value` fields.

pub mod addr;
mod error;
mod field;
mod msg;

pub use error::ProtoError;
pub use field::{read_field, split_key_value, write_field};
pub use msg::{MsgHeader, MsgType};

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 4;

/// Per-connection I/O buffer size; also the hard cap on frame length.
pub const IO_BUFFER_SIZE: usize = 1024;

/// Upper bound on a single payload field, including its `key=` prefix.
pub const FIELD_SIZE: usize = 1024;

/// Longest accepted node name, in bytes.
pub const MAX_NODENAME_LEN: usize = 255;

/// Longest accepted shared secret, in bytes.
pub const MAX_SECRET_LEN: usize = 64;

/// Field key carrying the name of the node to fence.
pub const KEY_NODENAME: &[u8] = b"NODENAME";

/// Field key carrying the shared secret.
pub const KEY_SECRET: &[u8] = b"SECRET";

/// Separator between a field's key and value.
pub const KEY_VALUE_SEPARATOR: u8 = b'=';
