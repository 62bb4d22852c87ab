use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::{ArgAction, Parser, ValueEnum};
use fencehub_proto::addr::{AddrError, AddrFamily};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate command line parameter key {0:?}")]
    DuplicateKey(&'static str),
    #[error(transparent)]
    Addr(#[from] AddrError),
}

/// Listening-socket address family.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    #[value(name = "IPV4")]
    Ipv4,
    #[value(name = "IPV6")]
    Ipv6,
}

impl From<Protocol> for AddrFamily {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Ipv4 => Self::Ipv4,
            Protocol::Ipv6 => Self::Ipv6,
        }
    }
}

/// Server command line.
///
/// All four keys are required and clap rejects unknown keys. Every
/// occurrence of a key is collected so that a repeated key is a fatal
/// init error rather than a silent last-wins override.
#[derive(Parser, Debug)]
#[command(name = "fencehub-server", version, about = "Clustered node-fencing hub server")]
pub struct ServerConfig {
    /// Address family of the listening socket.
    #[arg(long = "protocol", value_enum, required = true, action = ArgAction::Append)]
    protocol: Vec<Protocol>,

    /// Address to bind, as a literal of the selected family.
    #[arg(long = "bind_address", required = true, action = ArgAction::Append)]
    bind_address: Vec<String>,

    /// TCP port to listen on.
    #[arg(long = "tcp_port", required = true, action = ArgAction::Append)]
    tcp_port: Vec<String>,

    /// Path to the fence module shared object.
    #[arg(long = "fence_module", required = true, action = ArgAction::Append)]
    fence_module: Vec<PathBuf>,
}

/// The single value of a key, or the duplicate-key init error.
/// `required = true` makes an empty list unrepresentable here.
fn single<'a, T>(values: &'a [T], key: &'static str) -> Result<&'a T, ConfigError> {
    match values {
        [value] => Ok(value),
        _ => Err(ConfigError::DuplicateKey(key)),
    }
}

impl ServerConfig {
    /// Resolves the configured endpoint, rejecting repeated keys, an
    /// address literal that does not match the selected family, and a
    /// zero port.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let protocol = *single(&self.protocol, "protocol")?;
        let bind_address = single(&self.bind_address, "bind_address")?;
        let tcp_port = single(&self.tcp_port, "tcp_port")?;
        let family = AddrFamily::from(protocol);
        Ok(fencehub_proto::addr::resolve(family, bind_address, tcp_port)?)
    }

    /// Path of the fence module shared object, rejecting a repeated
    /// key.
    pub fn fence_module(&self) -> Result<&Path, ConfigError> {
        Ok(single(&self.fence_module, "fence_module")?.as_path())
    }
}
