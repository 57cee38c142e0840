//! Handshake options negotiated when the connection opens.

use crate::error::Result;
use crate::policy::{Disposition, ErrorPolicy, FailureClass};
use crate::types::parse_uri;
use globset::{Glob, GlobMatcher};
use lsp_types::{
    ClientCapabilities, ClientInfo, DidChangeWatchedFilesClientCapabilities,
    DynamicRegistrationClientCapabilities, InitializeParams, PublishDiagnosticsClientCapabilities,
    TextDocumentClientCapabilities, TextDocumentSyncClientCapabilities, Uri,
    WorkspaceClientCapabilities, WorkspaceFolder,
};
use ls_bridge_core::SessionConfig;

/// The single workspace folder a session exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFolderDescriptor {
    pub index: u32,
    pub name: String,
    pub uri: String,
}

/// Options the client is started with.
#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    pub client_name: String,
    /// Language ids whose documents are synchronized.
    pub document_selector: Vec<String>,
    pub workspace_folder: WorkspaceFolderDescriptor,
    pub file_watch_glob: String,
    pub policy: ErrorPolicy,
    workspace_uri: Uri,
    watcher: GlobMatcher,
}

impl HandshakeOptions {
    /// Builds the options for a session configuration.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let workspace = config.workspace_uri();
        let workspace_uri = parse_uri(&workspace)?;
        let watcher = Glob::new(&config.file_watch_glob)?.compile_matcher();
        let mut policy = ErrorPolicy::default();
        if config.close_on_transport_error {
            policy = policy.with(FailureClass::Transport, Disposition::DoNotRestart);
        }

        Ok(Self {
            client_name: config.client_name.clone(),
            document_selector: vec![config.language_id.clone()],
            workspace_folder: WorkspaceFolderDescriptor {
                index: 0,
                name: "workspace".to_string(),
                uri: workspace,
            },
            file_watch_glob: config.file_watch_glob.clone(),
            policy,
            workspace_uri,
            watcher,
        })
    }

    /// Returns true if documents of `language_id` are synchronized.
    pub fn selects(&self, language_id: &str) -> bool {
        self.document_selector.iter().any(|id| id == language_id)
    }

    /// Returns true if a file change at `uri` should be forwarded.
    pub fn watches(&self, uri: &str) -> bool {
        let root = self.workspace_folder.uri.trim_end_matches('/');
        let Some(rest) = uri.strip_prefix(root) else {
            return false;
        };
        let Some(relative) = rest.strip_prefix('/') else {
            return false;
        };
        !relative.is_empty() && self.watcher.is_match(relative)
    }

    /// Builds the `initialize` request parameters.
    #[allow(deprecated)]
    pub fn initialize_params(&self) -> InitializeParams {
        InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(self.workspace_uri.clone()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: self.workspace_uri.clone(),
                name: self.workspace_folder.name.clone(),
            }]),
            client_info: Some(ClientInfo {
                name: self.client_name.clone(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ClientCapabilities {
                workspace: Some(WorkspaceClientCapabilities {
                    workspace_folders: Some(true),
                    configuration: Some(true),
                    did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                        dynamic_registration: Some(true),
                        ..Default::default()
                    }),
                    execute_command: Some(DynamicRegistrationClientCapabilities {
                        dynamic_registration: Some(false),
                    }),
                    ..Default::default()
                }),
                text_document: Some(TextDocumentClientCapabilities {
                    synchronization: Some(TextDocumentSyncClientCapabilities {
                        dynamic_registration: Some(false),
                        ..Default::default()
                    }),
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                        related_information: Some(true),
                        version_support: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
