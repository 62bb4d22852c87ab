use std::io::BufRead;

use tracing::warn;

use crate::AgentError;

pub const KEY_ACTION: &str = "action";
pub const KEY_PROTOCOL: &str = "protocol";
pub const KEY_IP_ADDRESS: &str = "ip_address";
pub const KEY_TCP_PORT: &str = "tcp_port";
pub const KEY_SECRET: &str = "secret";
pub const KEY_NODENAME: &str = "nodename";

const KEY_VALUE_SEPARATOR: char = '=';

/// Actions a cluster manager may request from the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Off,
    On,
    Reboot,
    Metadata,
    Status,
    List,
    Monitor,
    Start,
    Stop,
}

impl Action {
    pub fn from_name(name: &str) -> Result<Self, AgentError> {
        match name {
            "off" => Ok(Self::Off),
            "on" => Ok(Self::On),
            "reboot" => Ok(Self::Reboot),
            "metadata" => Ok(Self::Metadata),
            "status" => Ok(Self::Status),
            "list" => Ok(Self::List),
            "monitor" => Ok(Self::Monitor),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(AgentError::InvalidAction(other.to_owned())),
        }
    }
}

/// Parameters accumulated from stdin lines or command-line tokens.
///
/// A repeated key with the same value is only a warning; a repeated key
/// with a different value aborts before any network traffic.
#[derive(Debug, Default)]
pub struct FenceParams {
    pub action: Option<String>,
    pub protocol: Option<String>,
    pub ip_address: Option<String>,
    pub tcp_port: Option<String>,
    pub secret: Option<String>,
    pub nodename: Option<String>,
}

impl FenceParams {
    /// Reads `key=value` lines (LF or CRLF terminated) until EOF.
    pub fn read_from_lines(reader: impl BufRead) -> Result<Self, AgentError> {
        let mut params = Self::default();
        for line in reader.lines() {
            let line = line.map_err(AgentError::ParamInput)?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            params.apply(line)?;
        }
        Ok(params)
    }

    /// Accepts the same `key=value` tokens from the command line.
    pub fn read_from_args(args: impl Iterator<Item = String>) -> Result<Self, AgentError> {
        let mut params = Self::default();
        for arg in args {
            params.apply(&arg)?;
        }
        Ok(params)
    }

    fn apply(&mut self, input: &str) -> Result<(), AgentError> {
        let Some((key, value)) = input.split_once(KEY_VALUE_SEPARATOR) else {
            warn!(input, "ignoring malformed parameter without a key=value separator");
            return Ok(());
        };
        let slot = match key {
            KEY_ACTION => &mut self.action,
            KEY_PROTOCOL => &mut self.protocol,
            KEY_IP_ADDRESS => &mut self.ip_address,
            KEY_TCP_PORT => &mut self.tcp_port,
            KEY_SECRET => &mut self.secret,
            KEY_NODENAME => &mut self.nodename,
            unknown => {
                warn!(key = unknown, "ignoring unknown parameter key");
                return Ok(());
            }
        };
        match slot {
            None => {
                *slot = Some(value.to_owned());
                Ok(())
            }
            Some(existing) if existing == value => {
                warn!(key, "duplicate parameter");
                Ok(())
            }
            Some(_) => Err(AgentError::ConflictingParameter(key.to_owned())),
        }
    }

    /// The requested action; always required.
    pub fn action(&self) -> Result<Action, AgentError> {
        match &self.action {
            Some(name) => Action::from_name(name),
            None => Err(AgentError::MissingParameters(KEY_ACTION.to_owned())),
        }
    }

    /// Keys needed to reach the server at all.
    pub fn check_connection_parameters(&self) -> Result<(), AgentError> {
        self.check_required(&[
            (KEY_ACTION, self.action.is_some()),
            (KEY_PROTOCOL, self.protocol.is_some()),
            (KEY_IP_ADDRESS, self.ip_address.is_some()),
            (KEY_TCP_PORT, self.tcp_port.is_some()),
            (KEY_SECRET, self.secret.is_some()),
        ])
    }

    /// Keys needed for an actual fencing action.
    pub fn check_fence_parameters(&self) -> Result<(), AgentError> {
        self.check_required(&[
            (KEY_ACTION, self.action.is_some()),
            (KEY_PROTOCOL, self.protocol.is_some()),
            (KEY_IP_ADDRESS, self.ip_address.is_some()),
            (KEY_TCP_PORT, self.tcp_port.is_some()),
            (KEY_NODENAME, self.nodename.is_some()),
            (KEY_SECRET, self.secret.is_some()),
        ])
    }

    fn check_required(&self, keys: &[(&str, bool)]) -> Result<(), AgentError> {
        let missing: Vec<&str> =
            keys.iter().filter(|(_, present)| !present).map(|(key, _)| *key).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::MissingParameters(missing.join(", ")))
        }
    }
}
