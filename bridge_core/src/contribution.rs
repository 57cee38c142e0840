//! Static contribution bundle: languages, commands and keybindings.
//!
//! The bundle is declared once per session and consumed when the session
//! starts. Nothing registers into it afterwards.

use serde::{Deserialize, Serialize};

/// Remote command ids behind the two built-in host commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandIds {
    pub restart_server: String,
    pub organize_imports: String,
}

impl Default for CommandIds {
    fn default() -> Self {
        Self {
            restart_server: "pyright.restartserver".to_string(),
            organize_imports: "pyright.organizeimports".to_string(),
        }
    }
}

/// A language the session edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageContribution {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// A command shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContribution {
    pub command: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// A key chord bound to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeybindingContribution {
    pub key: String,
    pub command: String,
    #[serde(default)]
    pub when: Option<String>,
}

/// The contribution bundle for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contributions {
    pub name: String,
    pub publisher: String,
    pub version: String,
    pub languages: Vec<LanguageContribution>,
    pub commands: Vec<CommandContribution>,
    pub keybindings: Vec<KeybindingContribution>,
}

impl Default for Contributions {
    fn default() -> Self {
        Self::python(&CommandIds::default())
    }
}

impl Contributions {
    /// The Pyright bundle: python files, restart/organize commands and
    /// `ctrl+k` to restart the server.
    pub fn python(ids: &CommandIds) -> Self {
        Self {
            name: "python-client".to_string(),
            publisher: "ls-bridge".to_string(),
            version: "1.0.0".to_string(),
            languages: vec![LanguageContribution {
                id: "python".to_string(),
                aliases: vec!["Python".to_string()],
                extensions: vec![".py".to_string(), ".pyi".to_string()],
            }],
            commands: vec![
                CommandContribution {
                    command: ids.restart_server.clone(),
                    title: "Pyright: Restart Server".to_string(),
                    category: Some("Pyright".to_string()),
                },
                CommandContribution {
                    command: ids.organize_imports.clone(),
                    title: "Pyright: Organize Imports".to_string(),
                    category: Some("Pyright".to_string()),
                },
            ],
            keybindings: vec![KeybindingContribution {
                key: "ctrl+k".to_string(),
                command: ids.restart_server.clone(),
                when: Some("editorTextFocus".to_string()),
            }],
        }
    }

    /// Returns the command bound to a key chord. Chords compare
    /// case-insensitively.
    pub fn command_for_key(&self, key: &str) -> Option<&str> {
        self.keybindings
            .iter()
            .find(|binding| binding.key.eq_ignore_ascii_case(key))
            .map(|binding| binding.command.as_str())
    }

    /// Returns the declared command with the given id.
    pub fn command(&self, id: &str) -> Option<&CommandContribution> {
        self.commands.iter().find(|c| c.command == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bundle() {
        let bundle = Contributions::default();
        assert_eq!(bundle.commands.len(), 2);
        assert_eq!(
            bundle.command("pyright.organizeimports").map(|c| c.title.as_str()),
            Some("Pyright: Organize Imports")
        );
    }

    #[test]
    fn test_keybinding_lookup() {
        let bundle = Contributions::default();
        assert_eq!(bundle.command_for_key("ctrl+k"), Some("pyright.restartserver"));
        assert_eq!(bundle.command_for_key("Ctrl+K"), Some("pyright.restartserver"));
        assert_eq!(bundle.command_for_key("ctrl+j"), None);
    }

    #[test]
    fn test_bundle_follows_command_ids() {
        let ids = CommandIds {
            restart_server: "custom.restart".to_string(),
            organize_imports: "custom.organize".to_string(),
        };
        let bundle = Contributions::python(&ids);
        assert_eq!(bundle.command_for_key("ctrl+k"), Some("custom.restart"));
        assert!(bundle.command("custom.organize").is_some());
    }
}
