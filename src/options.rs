//! Compiler options, loadable from a JSON file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::program::datatype::DataType;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum OptionsError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsError::Io(e) => write!(f, "I/O error: {e}"),
            OptionsError::Json(e) => write!(f, "JSON error: {e}"),
            OptionsError::Invalid(msg) => write!(f, "Invalid options: {msg}"),
        }
    }
}

impl std::error::Error for OptionsError {}

impl From<std::io::Error> for OptionsError {
    fn from(e: std::io::Error) -> Self {
        OptionsError::Io(e)
    }
}

impl From<serde_json::Error> for OptionsError {
    fn from(e: serde_json::Error) -> Self {
        OptionsError::Json(e)
    }
}

// ── Options ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Write the preprocessed, include-expanded source here before compiling.
    pub output_combined_source: Option<PathBuf>,
    /// Write a listing of every compiled function's opcodes here.
    pub output_translated_source: Option<PathBuf>,
    /// Type that `call <expr>` / `jump <expr>` targets are converted to.
    pub external_address_type: DataType,
    pub preprocessor_definitions: BTreeMap<String, i64>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_combined_source: None,
            output_translated_source: None,
            external_address_type: DataType::U32,
            preprocessor_definitions: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let data = fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&data)?;
        options.validate()?;
        Ok(options)
    }

    pub fn save(&self, path: &Path) -> Result<(), OptionsError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if !matches!(self.external_address_type, DataType::U32 | DataType::U64) {
            return Err(OptionsError::Invalid(format!(
                "external_address_type must be u32 or u64, not {}",
                self.external_address_type
            )));
        }
        Ok(())
    }

    pub fn with_definition(mut self, name: impl Into<String>, value: i64) -> Self {
        self.preprocessor_definitions.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{ "preprocessor_definitions": { "DEBUG": 1 } }"#).unwrap();

        let options = CompileOptions::load(&path).unwrap();
        assert_eq!(options.external_address_type, DataType::U32);
        assert_eq!(options.preprocessor_definitions.get("DEBUG"), Some(&1));
        assert!(options.output_combined_source.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        let mut options = CompileOptions::default().with_definition("PLATFORM", 3);
        options.external_address_type = DataType::U64;
        options.save(&path).unwrap();
        assert_eq!(CompileOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn rejects_bad_address_type_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{ "external_address_type": "float" }"#).unwrap();
        assert!(matches!(CompileOptions::load(&path), Err(OptionsError::Invalid(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CompileOptions::load(&path), Err(OptionsError::Json(_))));
        assert!(matches!(
            CompileOptions::load(&dir.path().join("missing.json")),
            Err(OptionsError::Io(_))
        ));
    }
}
