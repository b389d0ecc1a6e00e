//! Command dispatch: bridges CLI args -> session operations -> output formatting.

pub mod auth;
pub mod command;
pub mod config_cmd;
pub mod devices;
pub mod status;
pub mod util;
pub mod watch;

use olarm_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a session-bound command to its handler.
pub async fn dispatch(cmd: Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(session, args, global).await,
        Command::Devices(args) => devices::handle(session, args, global),
        Command::Status(args) => status::handle(session, args, global).await,
        Command::Command(args) => command::handle(session, args, global).await,
        // Handled before a session is opened.
        Command::Login(_) | Command::Logout | Command::Config(_) | Command::Completions(_) => {
            Err(CliError::Other {
                message: "command does not run against a session".into(),
            })
        }
    }
}
