use std::io;

use fencehub_proto::{ProtoError, addr::AddrError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("the following required parameters were not specified: {0}")]
    MissingParameters(String),
    #[error("conflicting duplicate parameter {0:?}")]
    ConflictingParameter(String),
    #[error("request for invalid action {0:?}")]
    InvalidAction(String),
    #[error("the value of parameter {key:?} exceeds {max} bytes")]
    ParamTooLong { key: &'static str, max: usize },
    #[error(transparent)]
    Addr(#[from] AddrError),
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    #[error("network communication failed: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: unexpected reply type {0:#06x}")]
    UnexpectedReply(u16),
    #[error("protocol error: invalid reply length {0}")]
    InvalidReplyLength(u16),
    #[error("failed to read parameters: {0}")]
    ParamInput(io::Error),
}
