//! Command registry - Host actions dispatched to the service.

use crate::client::{ConnectionManager, RemoteResult};
use crate::error::{BridgeError, Result};
use lsp_types::ExecuteCommandParams;
use ls_bridge_core::CommandIds;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Turns host arguments into an `executeCommand` request.
pub type CommandHandler = Arc<dyn Fn(Vec<Value>) -> ExecuteCommandParams + Send + Sync>;

/// A handler that forwards its arguments unchanged to `command_id`.
pub fn forward_to_service(command_id: impl Into<String>) -> CommandHandler {
    let command_id = command_id.into();
    Arc::new(move |arguments| ExecuteCommandParams {
        command: command_id.clone(),
        arguments,
        work_done_progress_params: Default::default(),
    })
}

/// Commands every session registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    RestartServer,
    OrganizeImports,
}

impl BuiltinCommand {
    pub const ALL: [BuiltinCommand; 2] = [BuiltinCommand::RestartServer, BuiltinCommand::OrganizeImports];

    /// Name the host uses to invoke the command.
    pub fn host_name(self) -> &'static str {
        match self {
            BuiltinCommand::RestartServer => "restartServer",
            BuiltinCommand::OrganizeImports => "organizeImports",
        }
    }

    pub fn from_host_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.host_name() == name)
    }

    /// Service-side command id.
    pub fn command_id(self, ids: &CommandIds) -> &str {
        match self {
            BuiltinCommand::RestartServer => &ids.restart_server,
            BuiltinCommand::OrganizeImports => &ids.organize_imports,
        }
    }
}

/// Registered commands, keyed by command id.
#[derive(Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` unless `name` is already known to the registry or
    /// to the connection. Returns true if the entry was added.
    pub fn register_if_absent(
        &mut self,
        name: &str,
        handler: CommandHandler,
        connection: &ConnectionManager,
    ) -> bool {
        let known = self.entries.contains_key(name)
            || connection.server_commands().iter().any(|id| id == name);
        if known {
            log::debug!("Command {} already registered", name);
            return false;
        }

        self.entries.insert(name.to_string(), handler);
        log::debug!("Registered command {}", name);
        true
    }

    /// Adds forwarding entries for commands the service advertised.
    pub fn adopt_server_commands(&mut self, connection: &ConnectionManager) -> usize {
        let mut adopted = 0;
        for id in connection.server_commands() {
            if !self.entries.contains_key(id) {
                self.entries.insert(id.clone(), forward_to_service(id.clone()));
                adopted += 1;
            }
        }
        adopted
    }

    /// Invokes a command on the service. Only valid while the connection
    /// is ready.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Vec<Value>,
        connection: &mut ConnectionManager,
    ) -> Result<oneshot::Receiver<RemoteResult>> {
        if !connection.is_ready() {
            return Err(BridgeError::Precondition {
                operation: "invoke a command",
                state: connection.state(),
            });
        }
        let handler = self
            .entries
            .get(name)
            .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))?;

        connection.execute_command((handler.as_ref())(arguments)).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
