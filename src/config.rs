use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TemplateError};

/// Engine options. Deserializes from camelCase JSON:
/// `{ "debug": true, "throwError": false, "printExecTime": false, "language": "de" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Keep template text and generated source; warn about missing lazy targets.
    pub debug: bool,
    /// Fail fast on compile/render/directive errors instead of degrading.
    pub throw_error: bool,
    /// Log compile and render durations.
    pub print_exec_time: bool,
    /// Initial document language used for i18n resolution.
    pub language: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            throw_error: false,
            print_exec_time: false,
            language: "en".to_string(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TemplateError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn strict() -> Self {
        Self {
            throw_error: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = Config::from_json(r#"{ "throwError": true }"#).unwrap();
        assert!(config.throw_error);
        assert!(!config.debug);
        assert_eq!(config.language, "en");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "debug": true, "printExecTime": true, "language": "de" }}"#).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(config.debug && config.print_exec_time);
        assert_eq!(config.language, "de");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            Config::from_json("{ nope"),
            Err(TemplateError::Config(_))
        ));
        assert!(matches!(
            Config::from_file("/definitely/missing/config.json"),
            Err(TemplateError::Io(_))
        ));
    }
}
