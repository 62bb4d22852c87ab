//! Fencing agent: the short-lived client a cluster manager invokes for
//! one power-control action. Reads `key=value` parameters from stdin or
//! the command line, speaks the fencing hub wire protocol, exits 0/1.

pub mod connector;
mod error;
pub mod metadata;
pub mod params;

use tracing::info;

pub use crate::error::AgentError;
use crate::{
    connector::Connector,
    params::{Action, FenceParams},
};

/// Human-readable release version.
pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

/// Executes the requested action. `Ok(true)` means success and maps to
/// exit code 0; `Ok(false)` and `Err(_)` map to exit code 1.
pub fn dispatch(params: &FenceParams) -> Result<bool, AgentError> {
    let action = params.action()?;
    match action {
        Action::Off | Action::On | Action::Reboot => {
            params.check_fence_parameters()?;
            let mut link = Connector::from_params(params)?.connect()?;
            link.fence_action(
                action,
                params.nodename.as_deref().unwrap_or_default(),
                params.secret.as_deref().unwrap_or_default(),
            )
        }
        Action::Metadata => {
            print!("{}", metadata::RESOURCE_AGENT_XML);
            Ok(true)
        }
        Action::Status | Action::List | Action::Monitor => {
            params.check_connection_parameters()?;
            let mut link = Connector::from_params(params)?.connect()?;
            let reachable = link.check_connection()?;
            info!(reachable, "server reachability probe");
            Ok(reachable)
        }
        Action::Start | Action::Stop => Ok(true),
    }
}
