//! Session configuration.
//!
//! A [`SessionConfig`] describes one editor-to-service pairing: where the
//! service listens, which document is edited, and how the editing surface
//! should look. It is built once per mount and handed to the session by
//! value; nothing mutates it afterwards.

use crate::contribution::{CommandIds, Contributions};
use crate::theme::EditorTheme;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use url::Url;

/// Overlay content used when the host supplies no initial text.
pub const DEFAULT_CONTENT: &str = "# start your code here";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> String {
    format!("session-{}", NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Errors raised while loading or interpreting a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

/// A query parameter value. Lists are sent comma-joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    List(Vec<String>),
}

impl QueryValue {
    fn encoded(&self) -> String {
        match self {
            QueryValue::Single(value) => value.clone(),
            QueryValue::List(values) => values.join(","),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_string())
    }
}

/// Where the language service listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Use `wss` instead of `ws`. Set when the host itself is served securely.
    pub secure: bool,
    /// Query parameters; `authorization` carries the auth token.
    pub params: BTreeMap<String, QueryValue>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let mut params = BTreeMap::new();
        params.insert("authorization".to_string(), QueryValue::from("UserAuth"));
        Self {
            host: "localhost".to_string(),
            port: 30000,
            path: "/pyright".to_string(),
            secure: false,
            params,
        }
    }
}

impl EndpointConfig {
    /// Builds `{ws|wss}://host:port/path?query`. Empty parameter values are
    /// left out of the query.
    pub fn url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{}://{}:{}{}", scheme, self.host, self.port, self.path))?;

        let pairs: Vec<(&str, String)> = self
            .params
            .iter()
            .map(|(key, value)| (key.as_str(), value.encoded()))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        Ok(url)
    }

    /// Returns the endpoint without its query, safe to log.
    pub fn display_address(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// What the embedding component needs to render the editing surface.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorOptions {
    pub theme: EditorTheme,
    pub read_only: bool,
    pub width: Option<String>,
    pub font_size: u32,
}

impl EditorOptions {
    /// User configuration document for the editing surface.
    pub fn user_configuration(&self) -> serde_json::Value {
        self.theme.user_configuration(self.font_size)
    }
}

/// Immutable description of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(skip)]
    pub id: String,
    pub endpoint: EndpointConfig,
    pub language_id: String,
    /// Workspace root as a path or URI.
    pub workspace_root: String,
    /// Path or URI of the overlay file holding the edited buffer.
    pub document_path: String,
    pub initial_content: Option<String>,
    pub theme: String,
    pub read_only: bool,
    pub width: Option<String>,
    pub font_size: u32,
    pub client_name: String,
    /// Glob of workspace files whose changes are forwarded to the service.
    pub file_watch_glob: String,
    /// Give the connection up on a transport error while ready instead of
    /// reporting it and carrying on.
    pub close_on_transport_error: bool,
    pub commands: CommandIds,
    pub contributions: Contributions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: next_session_id(),
            endpoint: EndpointConfig::default(),
            language_id: "python".to_string(),
            workspace_root: "/tmp".to_string(),
            document_path: "/tmp/hello.py".to_string(),
            initial_content: None,
            theme: "vs".to_string(),
            read_only: false,
            width: None,
            font_size: 14,
            client_name: "Pyright Language Client".to_string(),
            file_watch_glob: "**".to_string(),
            close_on_transport_error: false,
            commands: CommandIds::default(),
            contributions: Contributions::default(),
        }
    }
}

impl SessionConfig {
    /// Loads a configuration from a TOML file. Missing keys keep defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: SessionConfig = toml::from_str(text)?;
        if config.id.is_empty() {
            config.id = next_session_id();
        }
        Ok(config)
    }

    /// Sets the initial buffer text.
    pub fn with_initial_content(mut self, content: impl Into<String>) -> Self {
        self.initial_content = Some(content.into());
        self
    }

    /// Sets the theme name (`vs`, `vs-dark`, `hc-black`).
    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = theme.into();
        self
    }

    /// Marks the session read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Workspace root as a URI.
    pub fn workspace_uri(&self) -> String {
        path_to_uri(&self.workspace_root)
    }

    /// Overlay document as a URI.
    pub fn document_uri(&self) -> String {
        path_to_uri(&self.document_path)
    }

    /// Options for the embedding editing surface.
    pub fn editor_options(&self) -> EditorOptions {
        EditorOptions {
            theme: EditorTheme::from_name(&self.theme),
            read_only: self.read_only,
            width: self.width.clone(),
            font_size: self.font_size,
        }
    }
}

/// Converts a path to a `file://` URI. Values that already carry a scheme
/// are returned unchanged.
pub fn path_to_uri(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    if cfg!(windows) {
        format!("file:///{}", path.replace('\\', "/").trim_start_matches('/'))
    } else {
        format!("file://{}", path)
    }
}
