use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
};

use fencehub_proto::{
    HEADER_SIZE, IO_BUFFER_SIZE, KEY_NODENAME, KEY_SECRET, MAX_NODENAME_LEN, MAX_SECRET_LEN,
    MsgHeader, MsgType, addr, write_field,
};
use tracing::debug;

use crate::{
    AgentError,
    params::{Action, FenceParams},
};

/// Resolved server endpoint. Connecting yields a [`ServerLink`] that
/// exchanges exactly one frame per request, blocking throughout.
pub struct Connector {
    addr: SocketAddr,
}

impl Connector {
    pub fn new(protocol: &str, ip_address: &str, tcp_port: &str) -> Result<Self, AgentError> {
        let family = addr::AddrFamily::from_keyword(protocol)?;
        Ok(Self { addr: addr::resolve(family, ip_address, tcp_port)? })
    }

    pub fn from_params(params: &FenceParams) -> Result<Self, AgentError> {
        Self::new(
            params.protocol.as_deref().unwrap_or_default(),
            params.ip_address.as_deref().unwrap_or_default(),
            params.tcp_port.as_deref().unwrap_or_default(),
        )
    }

    pub fn connect(&self) -> Result<ServerLink, AgentError> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "connected to fencing hub");
        Ok(ServerLink { stream, io_buffer: [0; IO_BUFFER_SIZE] })
    }
}

/// An established connection speaking the request/reply protocol.
pub struct ServerLink {
    stream: TcpStream,
    io_buffer: [u8; IO_BUFFER_SIZE],
}

impl ServerLink {
    /// Sends an echo request and waits for the echo reply. Any other
    /// reply kind is a protocol error.
    pub fn check_connection(&mut self) -> Result<bool, AgentError> {
        self.send_frame(MsgType::EchoRequest, HEADER_SIZE)?;
        let reply = self.recv_frame()?;
        if reply.is_type(MsgType::EchoReply) {
            Ok(true)
        } else {
            Err(AgentError::UnexpectedReply(reply.msg_type))
        }
    }

    /// Runs one fencing action and maps the reply to the back-end's
    /// verdict.
    pub fn fence_action(
        &mut self,
        action: Action,
        nodename: &str,
        secret: &str,
    ) -> Result<bool, AgentError> {
        let msg_type = match action {
            Action::Off => MsgType::FenceOff,
            Action::On => MsgType::FenceOn,
            Action::Reboot => MsgType::FenceReboot,
            other => return Err(AgentError::InvalidAction(format!("{other:?}"))),
        };
        if nodename.len() > MAX_NODENAME_LEN {
            return Err(AgentError::ParamTooLong { key: "nodename", max: MAX_NODENAME_LEN });
        }
        if secret.len() > MAX_SECRET_LEN {
            return Err(AgentError::ParamTooLong { key: "secret", max: MAX_SECRET_LEN });
        }

        let mut offset = HEADER_SIZE;
        let nodename_field = [KEY_NODENAME, b"=", nodename.as_bytes()].concat();
        let secret_field = [KEY_SECRET, b"=", secret.as_bytes()].concat();
        write_field(&mut self.io_buffer, &mut offset, &nodename_field)?;
        write_field(&mut self.io_buffer, &mut offset, &secret_field)?;

        self.send_frame(msg_type, offset)?;
        let reply = self.recv_frame()?;
        match MsgType::from_u16(reply.msg_type) {
            Some(MsgType::FenceSuccess) => Ok(true),
            Some(MsgType::FenceFail) => Ok(false),
            _ => Err(AgentError::UnexpectedReply(reply.msg_type)),
        }
    }

    fn send_frame(&mut self, msg_type: MsgType, length: usize) -> Result<(), AgentError> {
        let header = MsgHeader { msg_type: msg_type.code(), length: length as u16 };
        header.encode(&mut self.io_buffer);
        self.stream.write_all(&self.io_buffer[..length])?;
        Ok(())
    }

    /// Blocks until one full reply frame is in, validating the length
    /// field against the protocol bounds.
    fn recv_frame(&mut self) -> Result<MsgHeader, AgentError> {
        self.stream.read_exact(&mut self.io_buffer[..HEADER_SIZE])?;
        let header = MsgHeader::decode(&self.io_buffer);
        let length = header.length as usize;
        if length < HEADER_SIZE || length > IO_BUFFER_SIZE {
            return Err(AgentError::InvalidReplyLength(header.length));
        }
        self.stream.read_exact(&mut self.io_buffer[HEADER_SIZE..length])?;
        Ok(header)
    }
}
