use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use lockprobe_raw::RegisterDefinition;

use crate::common::PollPolicy;
use crate::error::{LockprobeError, Result};

/// Environment variable overriding the native backend's filesystem root
pub const ROOT_ENV: &str = "LOCKPROBE_ROOT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Linux device nodes (/dev/cpu/*/msr, /dev/mem, /dev/port, procfs)
    #[default]
    Native,
    /// Built-in simulated Coffee Lake platform
    Sim,
}

/// Scan settings, read from a JSON file and/or the command line
///
/// ```json
/// {
///     "backend": "sim",
///     "modules": ["cf9_lock", "bios_wp"],
///     "poll": { "attempts": 50, "interval": 20 },
///     "listen": "127.0.0.1:9100"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub backend: BackendKind,
    /// Chipset code to force instead of detecting from the host bridge
    pub chipset: Option<String>,
    /// Modules to run; empty runs all
    pub modules: Vec<String>,
    /// Logical thread used for MSR registers
    pub thread: u32,
    pub poll: PollPolicy,
    /// Serve `/metrics` here after the scan
    pub listen: Option<SocketAddr>,
    pub root: PathBuf,
    /// JSON array of register definitions layered over the chipset profile
    pub definitions: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            chipset: None,
            modules: Vec::new(),
            thread: 0,
            poll: PollPolicy::default(),
            listen: None,
            root: Self::detect_root(),
            definitions: None,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        LockprobeError::ConfigError(format!("Cannot read {} {}: {}", what, path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        LockprobeError::ConfigError(format!("Invalid {} {}: {}", what, path.display(), e))
    })
}

impl ScanConfig {
    /// Load a JSON config file; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_json(path, "config file")?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Filesystem root for device nodes, `/` unless `LOCKPROBE_ROOT` is set
    pub fn detect_root() -> PathBuf {
        match std::env::var_os(ROOT_ENV) {
            Some(root) if !root.is_empty() => {
                let root = PathBuf::from(root);
                tracing::info!("Using device root {} from {}", root.display(), ROOT_ENV);
                root
            }
            _ => PathBuf::from("/"),
        }
    }

    pub fn msr_device_path(&self) -> PathBuf {
        lockprobe_raw::devnode::msr_path(&self.root, self.thread)
    }

    /// Site register definitions, empty when none are configured
    pub fn load_definitions(&self) -> Result<Vec<RegisterDefinition>> {
        let Some(path) = &self.definitions else {
            return Ok(Vec::new());
        };
        let definitions: Vec<RegisterDefinition> = read_json(path, "register definitions")?;
        tracing::info!(
            "Loaded {} register definitions from {}",
            definitions.len(),
            path.display()
        );
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lockprobe_raw::AccessWidth;

    use super::*;

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "lockprobe-config-{}-{name}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.backend, BackendKind::Native);
        assert!(config.modules.is_empty());
        assert_eq!(config.poll, PollPolicy::default());
        assert!(config.listen.is_none());
        assert!(config.load_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_msr_device_path() {
        let config = ScanConfig {
            root: PathBuf::from("/host"),
            thread: 3,
            ..ScanConfig::default()
        };
        assert_eq!(config.msr_device_path(), PathBuf::from("/host/dev/cpu/3/msr"));
    }

    #[test]
    fn test_load_config_file() {
        let path = scratch(
            "full",
            r#"{
                "backend": "sim",
                "chipset": "cfl",
                "modules": ["cf9_lock"],
                "thread": 2,
                "poll": { "attempts": 50, "interval": 20 },
                "listen": "127.0.0.1:9100"
            }"#,
        );
        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Sim);
        assert_eq!(config.chipset.as_deref(), Some("cfl"));
        assert_eq!(config.modules, vec!["cf9_lock".to_string()]);
        assert_eq!(config.thread, 2);
        assert_eq!(config.poll, PollPolicy::new(50, Duration::from_millis(20)));
        assert_eq!(config.listen, Some("127.0.0.1:9100".parse().unwrap()));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_partial_poll_keeps_defaults() {
        let path = scratch("partial", r#"{ "poll": { "interval": 5 } }"#);
        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Native);
        assert_eq!(config.poll.attempts, PollPolicy::DEFAULT_ATTEMPTS);
        assert_eq!(config.poll.interval, Duration::from_millis(5));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_bad_config_rejected() {
        for (name, body) in [
            ("backend", r#"{ "backend": "efi" }"#),
            ("unknown", r#"{ "sockets": [0] }"#),
            ("syntax", "{ backend"),
        ] {
            let path = scratch(name, body);
            assert!(
                matches!(ScanConfig::load(&path), Err(LockprobeError::ConfigError(_))),
                "{name}"
            );
            std::fs::remove_file(path).unwrap();
        }
        assert!(ScanConfig::load(Path::new("/nonexistent/lockprobe.json")).is_err());
    }

    #[test]
    fn test_load_definitions() {
        let path = scratch(
            "defs",
            r#"[
                {
                    "name": "POST_CODE",
                    "class": { "type": "io", "port": 128 },
                    "width": 1,
                    "desc": "POST code"
                }
            ]"#,
        );
        let config = ScanConfig {
            definitions: Some(path.clone()),
            ..ScanConfig::default()
        };
        let definitions = config.load_definitions().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "POST_CODE");
        assert_eq!(definitions[0].width, AccessWidth::Byte);
        std::fs::remove_file(path).unwrap();
    }
}
