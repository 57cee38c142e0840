//! Document bridge - Keeps the service's view of the document in sync.
//!
//! Synchronization is full-document: every change notification carries the
//! whole text. Edits made before the connection is ready only update the
//! local document; the latest snapshot is sent once the document is open.

use crate::client::ConnectionManager;
use crate::error::{BridgeError, Result};
use crate::types::parse_uri;
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem, Uri,
    VersionedTextDocumentIdentifier,
};
use ls_bridge_core::{Document, OverlayFileSystem, DEFAULT_CONTENT};

/// Bridges the local buffer and the service-side document.
pub struct DocumentBridge {
    document: Document,
    uri: Uri,
    overlay: OverlayFileSystem,
    opened: bool,
}

impl DocumentBridge {
    /// Registers the overlay file and creates the document at version 0.
    ///
    /// Absent or empty content is replaced by a placeholder line. Fails if
    /// the overlay already holds a file at `uri`.
    pub fn initialize(
        uri: &str,
        initial_content: Option<&str>,
        language_id: &str,
        overlay: &OverlayFileSystem,
    ) -> Result<Self> {
        let parsed = parse_uri(uri)?;
        let content = match initial_content {
            Some(text) if !text.is_empty() => text,
            _ => DEFAULT_CONTENT,
        };

        if !overlay.register_file(uri, content) {
            return Err(BridgeError::DocumentInUse(uri.to_string()));
        }

        Ok(Self {
            document: Document::new(uri, language_id, content),
            uri: parsed,
            overlay: overlay.clone(),
            opened: false,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Returns true once `didOpen` has been sent.
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// Opens the document on the service once the connection is ready.
    pub async fn on_ready(&mut self, connection: &mut ConnectionManager) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        if !connection.options().selects(self.document.language_id()) {
            log::info!(
                "Language {} is not selected; document stays local",
                self.document.language_id()
            );
            return Ok(());
        }

        let text = self
            .overlay
            .read_file(self.document.uri())
            .unwrap_or_else(|| DEFAULT_CONTENT.to_string());

        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: self.uri.clone(),
                language_id: self.document.language_id().to_string(),
                version: self.document.version(),
                text: text.clone(),
            },
        };
        connection
            .notify("textDocument/didOpen", serde_json::to_value(params)?)
            .await?;
        self.opened = true;
        log::debug!("Opened {} at version {}", self.document.uri(), self.document.version());

        if self.document.content() != text {
            self.send_snapshot(connection).await?;
        }
        Ok(())
    }

    /// Applies a new full buffer text.
    ///
    /// Returns the transmitted version, or `None` when the change was only
    /// recorded locally.
    pub async fn on_buffer_changed(
        &mut self,
        content: String,
        connection: &mut ConnectionManager,
    ) -> Result<Option<i32>> {
        self.document.set_content(content);

        if !(connection.is_ready() && self.opened) {
            log::trace!("Buffer changed before open; keeping it local");
            return Ok(None);
        }

        self.send_snapshot(connection).await.map(Some)
    }

    /// Sends the current content as the next version.
    async fn send_snapshot(&mut self, connection: &mut ConnectionManager) -> Result<i32> {
        let version = self.document.version() + 1;
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: self.uri.clone(),
                version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: self.document.content().to_string(),
            }],
        };

        connection
            .notify("textDocument/didChange", serde_json::to_value(params)?)
            .await?;
        Ok(self.document.advance_version())
    }

    /// Closes the document on the service and drops the overlay file.
    pub async fn close(&mut self, connection: &mut ConnectionManager) {
        if self.opened && connection.is_ready() {
            let params = DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier {
                    uri: self.uri.clone(),
                },
            };
            match serde_json::to_value(params) {
                Ok(params) => {
                    if let Err(e) = connection.notify("textDocument/didClose", params).await {
                        log::debug!("Failed to send didClose: {}", e);
                    }
                }
                Err(e) => log::debug!("Failed to encode didClose: {}", e),
            }
        }
        self.opened = false;
        self.overlay.unregister_file(self.document.uri());
    }
}
