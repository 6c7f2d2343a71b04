//! Configuration for the `fusebridge` binary.
//!
//! Settings come from an optional JSON file; command-line arguments take
//! precedence over it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::TTL;

/// A file placed into the in-memory filesystem before mounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFile {
    /// Path relative to the mount root.
    pub path: PathBuf,
    /// File contents.
    #[serde(default)]
    pub content: String,
}

/// Settings read from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where to mount when no mountpoint is given on the command line.
    pub mountpoint: Option<PathBuf>,
    /// `env_logger` filter, e.g. `"debug"` or `"fusebridge=trace"`.
    pub log_level: Option<String>,
    /// Attribute and entry cache timeout in seconds.
    pub attr_timeout_secs: Option<f64>,
    /// Files to create before mounting.
    pub files: Vec<SeedFile>,
}

impl Config {
    /// Reads and parses a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Cache timeout for the kernel, falling back to the default TTL for
    /// missing, negative or non-finite values.
    pub fn ttl(&self) -> Duration {
        self.attr_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(contents.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn test_empty_config_uses_defaults() -> Result<()> {
        let file = write_config("{}")?;
        let config = Config::from_file(file.path())?;
        assert_eq!(config, Config::default());
        assert_eq!(config.ttl(), TTL);
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<()> {
        let file = write_config(
            r#"{
                "mountpoint": "/mnt/bridge",
                "log_level": "debug",
                "attr_timeout_secs": 2.5,
                "files": [
                    { "path": "hello.txt", "content": "hi\n" },
                    { "path": "empty/file" }
                ]
            }"#,
        )?;
        let config = Config::from_file(file.path())?;
        assert_eq!(config.mountpoint, Some(PathBuf::from("/mnt/bridge")));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.ttl(), Duration::from_millis(2500));
        assert_eq!(config.files.len(), 2);
        assert_eq!(config.files[0].content, "hi\n");
        assert_eq!(config.files[1].path, PathBuf::from("empty/file"));
        assert!(config.files[1].content.is_empty());
        Ok(())
    }

    #[test]
    fn test_negative_timeout_falls_back() {
        let config = Config {
            attr_timeout_secs: Some(-1.0),
            ..Default::default()
        };
        assert_eq!(config.ttl(), TTL);
    }

    #[test]
    fn test_unknown_field_is_rejected() -> Result<()> {
        let file = write_config(r#"{ "mountpoint": "/mnt", "bogus": true }"#)?;
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/fusebridge.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
