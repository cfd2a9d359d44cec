//! VM configuration.
//!
//! Settings are layered: built-in defaults, then `~/.config/lpcvm/config.json`
//! (if present), then `LPCVM_*` environment variables. The CLI applies its
//! flags on top of whatever [`VmConfig::load`] returns.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Runtime settings for a [`crate::vm::Vm`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum call depth before a stack overflow is reported.
    pub max_frames: usize,
    /// Initial capacity of the value stack.
    pub stack_capacity: usize,
    /// Directory object paths are resolved against.
    pub object_root: PathBuf,
    /// Extension of object source files, without the dot.
    pub object_extension: String,
    /// Log every executed instruction at trace level.
    pub trace_execution: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 256,
            stack_capacity: 256,
            object_root: PathBuf::from("."),
            object_extension: "c".to_string(),
            trace_execution: false,
        }
    }
}

/// Path of the user config file (~/.config/lpcvm/config.json on Linux).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lpcvm").join("config.json"))
}

impl VmConfig {
    /// Defaults, overridden by the user config file and then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Read a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `LPCVM_MAX_FRAMES`, `LPCVM_OBJECT_ROOT` and `LPCVM_TRACE` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LPCVM_MAX_FRAMES") {
            self.max_frames = value
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: "LPCVM_MAX_FRAMES".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("LPCVM_OBJECT_ROOT") {
            self.object_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("LPCVM_TRACE") {
            self.trace_execution = match value.trim() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "LPCVM_TRACE".to_string(),
                        value,
                    })
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_frames": 64, "object_extension": "lpc" }}"#).unwrap();
        let config = VmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_frames, 64);
        assert_eq!(config.object_extension, "lpc");
        assert_eq!(config.stack_capacity, 256);
        assert!(!config.trace_execution);
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = VmConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LPCVM_MAX_FRAMES", "32"),
            ("LPCVM_OBJECT_ROOT", "/srv/mud"),
            ("LPCVM_TRACE", "1"),
        ]
        .into_iter()
        .collect();
        let mut config = VmConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_frames, 32);
        assert_eq!(config.object_root, PathBuf::from("/srv/mud"));
        assert!(config.trace_execution);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = VmConfig::default();
        let err = config
            .apply_env(|name| (name == "LPCVM_MAX_FRAMES").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value 'lots' for LPCVM_MAX_FRAMES");
    }
}
