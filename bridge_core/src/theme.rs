//! Editor theme selection.
//!
//! The host passes a short theme name; the editing surface wants a
//! workbench color theme plus a small user-configuration document.

use serde_json::{json, Value};

/// Color theme families understood by the editing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorTheme {
    Light,
    Dark,
    HighContrast,
}

impl EditorTheme {
    /// Maps a host theme name. Unknown names fall back to the light theme.
    pub fn from_name(name: &str) -> Self {
        match name {
            "vs-dark" => Self::Dark,
            "hc-black" => Self::HighContrast,
            _ => Self::Light,
        }
    }

    /// Returns the workbench color theme name.
    pub fn workbench_theme(&self) -> &'static str {
        match self {
            Self::Light => "Default Light+",
            Self::Dark => "Default Dark+",
            Self::HighContrast => "Default High Contrast",
        }
    }

    /// Builds the user configuration handed to the editing surface.
    pub fn user_configuration(&self, font_size: u32) -> Value {
        json!({
            "editor.fontSize": font_size,
            "workbench.colorTheme": self.workbench_theme(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_names() {
        assert_eq!(EditorTheme::from_name("vs-dark"), EditorTheme::Dark);
        assert_eq!(EditorTheme::from_name("hc-black"), EditorTheme::HighContrast);
        assert_eq!(EditorTheme::from_name("vs"), EditorTheme::Light);
        assert_eq!(EditorTheme::from_name(""), EditorTheme::Light);
    }

    #[test]
    fn test_user_configuration() {
        let config = EditorTheme::Dark.user_configuration(14);
        assert_eq!(config["editor.fontSize"], 14);
        assert_eq!(config["workbench.colorTheme"], "Default Dark+");
    }
}
