//! Dispatch of exec commands and global requests
//!
//! Exec commands are matched on the first whitespace-separated token of
//! the command line. Global requests arrive already decoded by the SSH
//! transport.

use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use burrow_protocol::{GlobalRequest, StreamLocalForward};

use crate::forward::{ForwardHandler, Tunnel};
use crate::lease::{LeaseRegistry, RegisterArgs, EXIT_OK};
use crate::output::{emit, CommandOutput};
use crate::session::SessionContext;

/// Exit status of a command that was invoked incorrectly
pub const EXIT_USAGE: u32 = 2;

/// Commands a peer may exec
pub const KNOWN_COMMANDS: &[&str] = &["forward", "help"];

/// A parsed exec command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register the connection as a runtime
    Forward(RegisterArgs),
    /// Print usage
    Help,
    /// Flags did not parse; carries the rendered diagnostic and exit status
    Invalid { message: String, exit_code: u32 },
    /// Not a known command
    Unknown(String),
}

impl Command {
    /// Parse a raw exec command line
    pub fn parse(command_line: &str) -> Self {
        let argv: Vec<&str> = command_line.split_whitespace().collect();
        let Some(&name) = argv.first() else {
            return Self::Unknown(String::new());
        };

        match name {
            "forward" => match RegisterArgs::try_parse_from(argv.iter().copied()) {
                Ok(args) => Self::Forward(args),
                Err(e) => {
                    let exit_code = match e.kind() {
                        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                        _ => EXIT_USAGE,
                    };
                    Self::Invalid {
                        message: e.render().to_string(),
                        exit_code,
                    }
                }
            },
            "help" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Usage text listing the known commands
pub fn usage() -> String {
    let mut text = String::from("usage: ssh <coordinator> <command> [flags]\n\ncommands:\n");
    text.push_str("  forward [-p|--priority <int>] [--os <os>] [--arch <arch>]\n");
    text.push_str("          register this connection as a runtime until it disconnects\n");
    text.push_str("  help    show this message\n\n");
    text.push_str("Unix sockets are forwarded with: ssh -R /path/to/service.sock:/path/to/service.sock\n");
    text
}

fn known_commands() -> String {
    let quoted: Vec<String> = KNOWN_COMMANDS.iter().map(|c| format!("{:?}", c)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Routes a session's commands and global requests to their handlers
pub struct Router {
    forwards: Arc<ForwardHandler>,
    leases: Arc<LeaseRegistry>,
}

impl Router {
    pub fn new(forwards: Arc<ForwardHandler>, leases: Arc<LeaseRegistry>) -> Self {
        Self { forwards, leases }
    }

    /// The forward handler
    pub fn forwards(&self) -> &Arc<ForwardHandler> {
        &self.forwards
    }

    /// Run an exec command line to completion and return its exit status
    ///
    /// `cancel` fires when the command's channel or the session ends.
    pub async fn run_command<O>(
        &self,
        session: &SessionContext,
        command_line: &str,
        out: &mut O,
        cancel: &CancellationToken,
    ) -> u32
    where
        O: CommandOutput + ?Sized,
    {
        match Command::parse(command_line) {
            Command::Forward(args) => self.leases.run(session, &args, out, cancel).await,
            Command::Help => {
                for line in usage().lines() {
                    emit(out, line).await;
                }
                EXIT_OK
            }
            Command::Invalid { message, exit_code } => {
                for line in message.lines() {
                    emit(out, line).await;
                }
                exit_code
            }
            Command::Unknown(name) => {
                tracing::warn!(command = %name, "Unknown command");
                emit(out, &format!("unknown command: {:?}", name)).await;
                emit(out, &format!("known commands: {}", known_commands())).await;
                EXIT_USAGE
            }
        }
    }

    /// Handle a global request; returns the reply (true = success)
    ///
    /// A cancel is answered at once; the forward's teardown continues in
    /// the background.
    pub async fn global_request<T: Tunnel>(
        &self,
        session: &SessionContext,
        request: GlobalRequest,
        tunnel: T,
    ) -> bool {
        match request {
            GlobalRequest::StreamLocalForward(StreamLocalForward { socket_path }) => {
                match self.forwards.forward(session, &socket_path, tunnel).await {
                    Ok(_) => true,
                    Err(e) => {
                        if e.is_session_fatal() {
                            tracing::error!(socket = %socket_path, "Forward failed, closing session: {}", e);
                            session.cancel.cancel();
                        } else {
                            tracing::warn!(socket = %socket_path, "Forward refused: {}", e);
                        }
                        false
                    }
                }
            }
            GlobalRequest::CancelStreamLocalForward(StreamLocalForward { socket_path }) => {
                self.forwards.cancel(&session.id, &socket_path);
                true
            }
        }
    }
}
