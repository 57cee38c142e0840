//! The single document a session edits.

/// A versioned text document.
///
/// `version` starts at 0 for the initial open and only moves forward when a
/// change has actually been handed to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    uri: String,
    language_id: String,
    content: String,
    version: i32,
}

impl Document {
    /// Creates a document at version 0.
    pub fn new(uri: impl Into<String>, language_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            content: content.into(),
            version: 0,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Replaces the content with a new full snapshot.
    pub fn set_content(&mut self, content: String) {
        self.content = content;
    }

    /// Records one transmitted change and returns the new version.
    pub fn advance_version(&mut self) -> i32 {
        self.version += 1;
        self.version
    }
}
